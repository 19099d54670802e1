//! Scripted collaborators for exercising services and stream wrappers
//!
//! These types stand in for real listeners, handlers, recorders and metrics
//! backends in unit and integration tests.

use crate::common::{
    Admission, BoxStream, Closer, Handler, Listener, ListenerError, Recorder, SessionContext,
};
use crate::limiter::{LimitOptions, Limiter, TrafficLimiter};
use crate::observability::metrics::{Labels, Metrics};
use crate::{Result, TollgateError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::DuplexStream;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One scripted outcome of [`ScriptedListener::accept`]
pub enum AcceptStep {
    /// Hands out a connection from `peer`
    Conn(BoxStream, SocketAddr),
    /// Fails with a temporary error
    Temporary,
    /// Fails with a fatal error
    Fatal,
}

/// Listener replaying a fixed script of accept outcomes
///
/// Once the script is exhausted `accept` parks until the listener is closed.
/// Every `accept` call is timestamped with the tokio clock so backoff delays
/// can be measured under a paused runtime.
pub struct ScriptedListener {
    addr: SocketAddr,
    steps: Mutex<VecDeque<AcceptStep>>,
    accept_times: Mutex<Vec<Instant>>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    closed: AtomicBool,
    close_notify: Notify,
    fail_close: bool,
    close_calls: AtomicUsize,
}

impl ScriptedListener {
    pub fn new(steps: Vec<AcceptStep>) -> Self {
        Self {
            addr: "127.0.0.1:7000".parse().expect("static address"),
            steps: Mutex::new(steps.into()),
            accept_times: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            max_outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            fail_close: false,
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Makes `close` report an error after marking the listener closed
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Instants at which `accept` was entered
    pub fn accept_times(&self) -> Vec<Instant> {
        self.accept_times.lock().unwrap().clone()
    }

    /// Highest number of concurrently outstanding `accept` calls observed
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

struct OutstandingGuard<'a>(&'a AtomicUsize);

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Listener for ScriptedListener {
    async fn accept(&self) -> std::result::Result<(BoxStream, SocketAddr), ListenerError> {
        let current = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = OutstandingGuard(&self.outstanding);
        self.max_outstanding.fetch_max(current, Ordering::SeqCst);
        self.accept_times.lock().unwrap().push(Instant::now());

        let next = self.steps.lock().unwrap().pop_front();
        match next {
            Some(AcceptStep::Conn(stream, peer)) => Ok((stream, peer)),
            Some(AcceptStep::Temporary) => Err(ListenerError::Temporary(io::Error::from_raw_os_error(
                libc::EMFILE,
            ))),
            Some(AcceptStep::Fatal) => Err(ListenerError::Accept(io::Error::other(
                "listener socket is gone",
            ))),
            None => {
                let notified = self.close_notify.notified();
                if !self.closed.load(Ordering::SeqCst) {
                    notified.await;
                }
                Err(ListenerError::Closed)
            }
        }
    }

    async fn close(&self) -> std::result::Result<(), ListenerError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();
        if self.fail_close {
            return Err(ListenerError::Accept(io::Error::other("close failed")));
        }
        Ok(())
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Creates a connected pair; the first half is handed to the service
pub fn stream_pair() -> (BoxStream, DuplexStream) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    (Box::new(server), client)
}

/// Handler that counts sessions and optionally fails each one
#[derive(Default)]
pub struct CountingHandler {
    handled: AtomicUsize,
    closed: AtomicUsize,
    fail: bool,
    sessions: Mutex<Vec<SessionContext>>,
    done: Notify,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every session returns an error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<SessionContext> {
        self.sessions.lock().unwrap().clone()
    }

    /// Waits until at least `count` sessions have finished
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.done.notified();
            if self.handled() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, ctx: SessionContext, _stream: BoxStream) -> Result<()> {
        self.sessions.lock().unwrap().push(ctx);
        self.handled.fetch_add(1, Ordering::SeqCst);
        self.done.notify_waiters();
        if self.fail {
            return Err(TollgateError::Handler("scripted failure".to_string()));
        }
        Ok(())
    }

    fn closer(&self) -> Option<&dyn Closer> {
        Some(self)
    }
}

#[async_trait]
impl Closer for CountingHandler {
    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Admission policy denying a fixed set of remote addresses
#[derive(Default)]
pub struct DenyList {
    denied: HashSet<String>,
}

impl DenyList {
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: addrs.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Admission for DenyList {
    async fn admit(&self, _ctx: &SessionContext, addr: &str) -> bool {
        !self.denied.contains(addr)
    }
}

/// Recorder keeping every payload in memory
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the payload and then reports an error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn record(&self, _ctx: &SessionContext, data: &[u8]) -> Result<()> {
        self.records.lock().unwrap().push(data.to_vec());
        if self.fail {
            return Err(TollgateError::Recorder("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// Metrics sink accumulating values per name and label set
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    values: Mutex<HashMap<String, f64>>,
    observations: Mutex<HashMap<String, Vec<f64>>>,
}

fn metric_key(name: &str, labels: Labels<'_>) -> String {
    let mut key = name.to_string();
    for (k, v) in labels {
        key.push_str(&format!(",{k}={v}"));
    }
    key
}

impl InMemoryMetrics {
    /// Current counter or gauge value, zero when never touched
    pub fn value(&self, name: &str, labels: Labels<'_>) -> f64 {
        self.values
            .lock()
            .unwrap()
            .get(&metric_key(name, labels))
            .copied()
            .unwrap_or_default()
    }

    /// Recorded observations for a histogram
    pub fn observations(&self, name: &str, labels: Labels<'_>) -> Vec<f64> {
        self.observations
            .lock()
            .unwrap()
            .get(&metric_key(name, labels))
            .cloned()
            .unwrap_or_default()
    }

    fn add(&self, name: &str, labels: Labels<'_>, delta: f64) {
        *self
            .values
            .lock()
            .unwrap()
            .entry(metric_key(name, labels))
            .or_default() += delta;
    }
}

impl Metrics for InMemoryMetrics {
    fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        self.add(name, labels, 1.0);
    }

    fn increment_gauge(&self, name: &'static str, labels: Labels<'_>) {
        self.add(name, labels, 1.0);
    }

    fn decrement_gauge(&self, name: &'static str, labels: Labels<'_>) {
        self.add(name, labels, -1.0);
    }

    fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        self.observations
            .lock()
            .unwrap()
            .entry(metric_key(name, labels))
            .or_default()
            .push(value);
    }
}

/// Limiter granting from a repeating script of grant sizes
///
/// Each request receives `min(requested, next scripted grant)`, with a floor
/// of one byte so progress is always possible. Zero requests grant zero.
#[derive(Debug)]
pub struct ScriptedLimiter {
    grants: Vec<usize>,
    next: usize,
}

impl ScriptedLimiter {
    pub fn new(grants: Vec<usize>) -> Self {
        assert!(!grants.is_empty(), "script needs at least one grant");
        Self { grants, next: 0 }
    }
}

impl Limiter for ScriptedLimiter {
    fn poll_wait(&mut self, _cx: &mut Context<'_>, n: usize) -> Poll<usize> {
        if n == 0 {
            return Poll::Ready(0);
        }
        let grant = self.grants[self.next % self.grants.len()].max(1);
        self.next += 1;
        Poll::Ready(grant.min(n))
    }

    fn rate(&self) -> u64 {
        0
    }
}

/// Policy source handing out [`ScriptedLimiter`]s
///
/// A direction scripted with `None` is unlimited. While unavailable every
/// lookup yields `None`, as an unreachable authority would.
#[derive(Debug)]
pub struct ScriptedTrafficLimiter {
    input: Option<Vec<usize>>,
    output: Option<Vec<usize>>,
    available: AtomicBool,
    input_lookups: AtomicUsize,
    output_lookups: AtomicUsize,
}

impl ScriptedTrafficLimiter {
    pub fn new(input: Option<Vec<usize>>, output: Option<Vec<usize>>) -> Self {
        Self {
            input,
            output,
            available: AtomicBool::new(true),
            input_lookups: AtomicUsize::new(0),
            output_lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn input_lookups(&self) -> usize {
        self.input_lookups.load(Ordering::SeqCst)
    }

    pub fn output_lookups(&self) -> usize {
        self.output_lookups.load(Ordering::SeqCst)
    }

    fn lookup(&self, script: &Option<Vec<usize>>) -> Option<Box<dyn Limiter>> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        script
            .clone()
            .map(|grants| Box::new(ScriptedLimiter::new(grants)) as Box<dyn Limiter>)
    }
}

#[async_trait]
impl TrafficLimiter for ScriptedTrafficLimiter {
    async fn input(&self, _key: &str, _options: &LimitOptions) -> Option<Box<dyn Limiter>> {
        self.input_lookups.fetch_add(1, Ordering::SeqCst);
        self.lookup(&self.input)
    }

    async fn output(&self, _key: &str, _options: &LimitOptions) -> Option<Box<dyn Limiter>> {
        self.output_lookups.fetch_add(1, Ordering::SeqCst);
        self.lookup(&self.output)
    }
}
