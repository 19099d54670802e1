//! Rate-limited duplex stream.
//!
//! [`RateLimitedStream`] keeps one cached [`Limiter`] per direction and asks
//! its [`TrafficLimiter`] for a fresh one once the cached value is older than
//! [`LIMITER_CACHE_TTL`]. The check happens lazily on each read or write; no
//! timer task is involved. A lookup that yields nothing keeps the previous
//! limiter, so an unreachable authority never tears down the stream.
//!
//! Reads go through an overrun buffer: the inner stream may hand over more
//! bytes than the limiter is willing to release at once, and the surplus is
//! served by subsequent reads before the inner stream is touched again.

use super::{LimitOptions, Limiter, TrafficLimiter};
use crate::common::BoxStream;
use bytes::{Buf, BytesMut};
use futures_util::future::BoxFuture;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tracing::debug;

/// How long a looked-up limiter is used before asking the policy source again
pub const LIMITER_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

type Lookup = BoxFuture<'static, Option<Box<dyn Limiter>>>;

struct CachedLimiter {
    direction: Direction,
    refreshed_at: Option<Instant>,
    current: Option<Box<dyn Limiter>>,
    pending: Option<Lookup>,
}

impl CachedLimiter {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            refreshed_at: None,
            current: None,
            pending: None,
        }
    }

    fn is_stale(&self) -> bool {
        self.refreshed_at
            .is_none_or(|at| at.elapsed() > LIMITER_CACHE_TTL)
    }

    /// Drives a lookup when the cached limiter has expired
    fn poll_refresh(
        &mut self,
        cx: &mut Context<'_>,
        source: &Arc<dyn TrafficLimiter>,
        key: &str,
        options: &LimitOptions,
    ) -> Poll<()> {
        if self.pending.is_none() {
            if !self.is_stale() {
                return Poll::Ready(());
            }
            let source = Arc::clone(source);
            let key = key.to_owned();
            let options = options.clone();
            let direction = self.direction;
            self.pending = Some(Box::pin(async move {
                match direction {
                    Direction::Input => source.input(&key, &options).await,
                    Direction::Output => source.output(&key, &options).await,
                }
            }));
        }

        if let Some(lookup) = self.pending.as_mut() {
            let fresh = ready!(lookup.as_mut().poll(cx));
            self.pending = None;
            self.refreshed_at = Some(Instant::now());
            match fresh {
                Some(limiter) => {
                    debug!(direction = ?self.direction, rate = limiter.rate(), "Traffic limiter refreshed");
                    self.current = Some(limiter);
                }
                None if self.current.is_some() => {
                    debug!(direction = ?self.direction, "No limiter returned, keeping cached limiter");
                }
                None => {}
            }
        }
        Poll::Ready(())
    }
}

/// Duplex stream whose throughput is bounded by looked-up limiters
///
/// Reads and writes keep their order; bytes are never dropped or duplicated.
/// A direction without a limiter is a pass-through to the inner stream.
pub struct RateLimitedStream<S> {
    inner: S,
    source: Arc<dyn TrafficLimiter>,
    key: String,
    options: LimitOptions,
    input: CachedLimiter,
    output: CachedLimiter,
    overrun: BytesMut,
    // tokens granted for writing but not yet accepted by the inner stream
    write_grant: usize,
    write_error: Option<io::Error>,
}

impl<S> RateLimitedStream<S> {
    pub fn new(inner: S, source: Arc<dyn TrafficLimiter>) -> Self {
        Self {
            inner,
            source,
            key: String::new(),
            options: LimitOptions::default(),
            input: CachedLimiter::new(Direction::Input),
            output: CachedLimiter::new(Direction::Output),
            overrun: BytesMut::new(),
            write_grant: 0,
            write_error: None,
        }
    }

    /// Key passed to every lookup, empty by default
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Scoping attributes passed to every lookup
    pub fn with_options(mut self, options: LimitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Bytes read from the inner stream that have not been released yet
    pub fn buffered(&self) -> usize {
        self.overrun.len()
    }

    /// Splits off the inner stream together with any unreleased bytes
    pub fn into_parts(self) -> (S, bytes::Bytes) {
        (self.inner, self.overrun.freeze())
    }
}

/// Wraps `stream` when a traffic limiter is configured
///
/// Without a limiter the stream is returned untouched.
pub fn wrap_stream(
    limiter: Option<&Arc<dyn TrafficLimiter>>,
    stream: BoxStream,
    key: &str,
    options: LimitOptions,
) -> BoxStream {
    match limiter {
        Some(limiter) => Box::new(
            RateLimitedStream::new(stream, Arc::clone(limiter))
                .with_key(key)
                .with_options(options),
        ),
        None => stream,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RateLimitedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.input.poll_refresh(cx, &this.source, &this.key, &this.options));

        let Some(limiter) = this.input.current.as_mut() else {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        };

        if !this.overrun.is_empty() {
            let want = buf.remaining().min(this.overrun.len());
            let grant = ready!(limiter.poll_wait(cx, want));
            buf.put_slice(&this.overrun[..grant]);
            this.overrun.advance(grant);
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = buf.filled().len() - before;

        match limiter.poll_wait(cx, read) {
            Poll::Ready(grant) => {
                if grant < read {
                    this.overrun.extend_from_slice(&buf.filled()[before + grant..]);
                    buf.set_filled(before + grant);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Pending => {
                // park everything just read; the next poll serves it
                this.overrun.extend_from_slice(&buf.filled()[before..]);
                buf.set_filled(before);
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RateLimitedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = this.write_error.take() {
            return Poll::Ready(Err(err));
        }
        ready!(this.output.poll_refresh(cx, &this.source, &this.key, &this.options));

        let Some(limiter) = this.output.current.as_mut() else {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        };

        let mut written = 0;
        while written < buf.len() {
            let remaining = buf.len() - written;
            if this.write_grant == 0 {
                match limiter.poll_wait(cx, remaining) {
                    Poll::Ready(grant) => this.write_grant = grant,
                    Poll::Pending if written > 0 => break,
                    Poll::Pending => return Poll::Pending,
                }
            }

            let end = written + this.write_grant.min(remaining);
            match Pin::new(&mut this.inner).poll_write(cx, &buf[written..end]) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(n)) => {
                    written += n;
                    this.write_grant -= n;
                }
                Poll::Ready(Err(err)) if written > 0 => {
                    // report the bytes that made it, surface the error next call
                    this.write_error = Some(err);
                    break;
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending if written > 0 => break,
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: fmt::Debug> fmt::Debug for RateLimitedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedStream")
            .field("inner", &self.inner)
            .field("key", &self.key)
            .field("options", &self.options)
            .field("buffered", &self.overrun.len())
            .finish()
    }
}
