//! Token bucket limiter driven by the tokio clock.
//!
//! The bucket starts empty and holds up to one second worth of tokens, so
//! `B` units never pass in less than `B / rate` seconds from creation, and
//! an idle connection can burst at most one second of traffic. When the
//! bucket runs dry the limiter sleeps until roughly a tenth of a second of
//! tokens (bounded by the request) has accrued, which keeps timer wakeups
//! low without adding much latency.

use super::Limiter;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep_until};

const NANOS_PER_SEC: u128 = 1_000_000_000;
const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct RateLimiter {
    rate: u64,
    burst: u64,
    tokens: u64,
    last_refill: Instant,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl RateLimiter {
    /// Creates a limiter for `rate` byte-units per second, idling up to a one second burst
    pub fn new(rate: u64) -> Self {
        Self::with_burst(rate, rate)
    }

    pub fn with_burst(rate: u64, burst: u64) -> Self {
        let rate = rate.max(1);
        let burst = burst.max(1);
        Self {
            rate,
            burst,
            tokens: 0,
            last_refill: Instant::now(),
            sleep: None,
        }
    }

    /// Boxed limiter for a quota reported by a policy authority
    ///
    /// Zero and negative rates mean unlimited and yield `None`.
    pub fn for_rate(rate: i64) -> Option<Box<dyn Limiter>> {
        u64::try_from(rate)
            .ok()
            .filter(|rate| *rate > 0)
            .map(|rate| Box::new(RateLimiter::new(rate)) as Box<dyn Limiter>)
    }

    pub fn burst(&self) -> u64 {
        self.burst
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_nanos();
        let added = elapsed * self.rate as u128 / NANOS_PER_SEC;
        if added == 0 {
            return;
        }

        let room = (self.burst - self.tokens) as u128;
        if added >= room {
            self.tokens = self.burst;
            self.last_refill = now;
        } else {
            self.tokens += added as u64;
            // advance only by the time the added tokens account for
            let spent = added * NANOS_PER_SEC / self.rate as u128;
            self.last_refill += Duration::from_nanos(spent as u64);
        }
    }

    fn time_for(&self, tokens: u64) -> Duration {
        let nanos = tokens as u128 * NANOS_PER_SEC / self.rate as u128;
        Duration::from_nanos(nanos as u64).max(MIN_SLEEP)
    }
}

impl Limiter for RateLimiter {
    fn poll_wait(&mut self, cx: &mut Context<'_>, n: usize) -> Poll<usize> {
        if n == 0 {
            return Poll::Ready(0);
        }

        loop {
            if let Some(timer) = self.sleep.as_mut() {
                ready!(timer.as_mut().poll(cx));
                self.sleep = None;
            }

            self.refill();
            if self.tokens > 0 {
                let grant = (n as u64).min(self.tokens);
                self.tokens -= grant;
                return Poll::Ready(grant as usize);
            }

            let chunk = (self.rate / 10).max(1).min(n as u64).min(self.burst);
            let deadline = self.last_refill + self.time_for(chunk);
            let deadline = deadline.max(Instant::now() + MIN_SLEEP);
            self.sleep = Some(Box::pin(sleep_until(deadline)));
        }
    }

    fn rate(&self) -> u64 {
        self.rate
    }
}
