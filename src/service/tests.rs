use super::*;
use crate::common::test_utils::{
    AcceptStep, CountingHandler, DenyList, InMemoryMetrics, MemoryRecorder, ScriptedListener,
    stream_pair,
};
use crate::common::{Handler, Listener, ListenerError, Recorder};
use crate::observability::metrics::{
    SERVICE_HANDLER_ERRORS_COUNTER, SERVICE_REQUEST_DURATION_OBSERVER, SERVICE_REQUESTS_COUNTER,
    SERVICE_REQUESTS_IN_FLIGHT_GAUGE, SERVICES_GAUGE,
};
use crate::recorder::{RecordKind, RecorderBinding};
use crate::TollgateError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn peer(addr: &str) -> SocketAddr {
    addr.parse().unwrap()
}

fn conn(addr: &str) -> AcceptStep {
    let (stream, _client) = stream_pair();
    AcceptStep::Conn(stream, peer(addr))
}

async fn start(
    listener: Arc<ScriptedListener>,
    handler: Arc<CountingHandler>,
    options: ServiceOptions,
) -> Arc<Service> {
    Arc::new(
        Service::new(
            "test",
            listener as Arc<dyn Listener>,
            handler as Arc<dyn Handler>,
            options,
        )
        .await,
    )
}

fn spawn_serve(service: &Arc<Service>) -> JoinHandle<crate::Result<()>> {
    let service = service.clone();
    tokio::spawn(async move { service.serve().await })
}

/// Lets spawned work run and timers fire
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn wait_for_accepts(listener: &ScriptedListener, count: usize) {
    while listener.accept_times().len() < count {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn shutdown(service: &Service, serving: JoinHandle<crate::Result<()>>) {
    service.close().await.unwrap();
    let result = serving.await.unwrap();
    assert!(matches!(
        result,
        Err(TollgateError::Listener(ListenerError::Closed))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_temporary_errors_back_off_exponentially() {
    let listener = Arc::new(ScriptedListener::new(vec![
        AcceptStep::Temporary,
        AcceptStep::Temporary,
        AcceptStep::Temporary,
        AcceptStep::Temporary,
        AcceptStep::Temporary,
    ]));
    let service = start(listener.clone(), Arc::new(CountingHandler::new()), ServiceOptions::default()).await;
    let serving = spawn_serve(&service);

    wait_for_accepts(&listener, 6).await;
    let times = listener.accept_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();

    for (gap, expected) in gaps.iter().zip([1, 2, 4, 5, 5]) {
        let expected = Duration::from_secs(expected);
        assert!(*gap >= expected, "gap {gap:?} expected {expected:?}");
        assert!(*gap < expected + Duration::from_millis(100), "gap {gap:?} expected {expected:?}");
    }

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_accept_recovers_after_temporary_errors() {
    let listener = Arc::new(ScriptedListener::new(vec![
        AcceptStep::Temporary,
        AcceptStep::Temporary,
        AcceptStep::Temporary,
        conn("10.0.0.1:5000"),
    ]));
    let handler = Arc::new(CountingHandler::new());
    let service = start(listener.clone(), handler.clone(), ServiceOptions::default()).await;
    let serving = spawn_serve(&service);

    handler.wait_for(1).await;
    let times = listener.accept_times();
    for (i, secs) in [(1, 1), (2, 2), (3, 4)] {
        let gap = times[i] - times[i - 1];
        let expected = Duration::from_secs(secs);
        assert!(gap >= expected && gap < expected + Duration::from_millis(100), "gap {gap:?}");
    }

    wait_for_accepts(&listener, 5).await;
    assert!(!serving.is_finished());

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_successful_accept_resets_backoff() {
    let listener = Arc::new(ScriptedListener::new(vec![
        AcceptStep::Temporary,
        AcceptStep::Temporary,
        conn("10.0.0.1:5000"),
        AcceptStep::Temporary,
    ]));
    let handler = Arc::new(CountingHandler::new());
    let service = start(listener.clone(), handler.clone(), ServiceOptions::default()).await;
    let serving = spawn_serve(&service);

    wait_for_accepts(&listener, 5).await;
    let times = listener.accept_times();

    // third accept came after 2s; the one after the reset waits 1s again
    assert!(times[2] - times[1] >= Duration::from_secs(2));
    let after_reset = times[4] - times[3];
    assert!(after_reset >= Duration::from_secs(1) && after_reset < Duration::from_secs(2));
    assert_eq!(handler.handled(), 1);

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_fatal_accept_error_ends_serve() {
    let listener = Arc::new(ScriptedListener::new(vec![AcceptStep::Fatal]));
    let service = start(listener.clone(), Arc::new(CountingHandler::new()), ServiceOptions::default()).await;

    let result = service.serve().await;

    assert!(matches!(
        result,
        Err(TollgateError::Listener(ListenerError::Accept(_)))
    ));
    assert_eq!(listener.accept_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_denied_connection_skips_handler_and_metrics() {
    let listener = Arc::new(ScriptedListener::new(vec![
        conn("10.0.0.1:5000"),
        conn("10.0.0.2:5000"),
    ]));
    let handler = Arc::new(CountingHandler::new());
    let metrics = Arc::new(InMemoryMetrics::default());
    let options = ServiceOptions::new()
        .with_admission(Arc::new(DenyList::new(["10.0.0.1:5000"])))
        .with_metrics(metrics.clone());
    let service = start(listener.clone(), handler.clone(), options).await;
    let serving = spawn_serve(&service);

    handler.wait_for(1).await;
    settle().await;

    assert_eq!(handler.handled(), 1);
    assert_eq!(handler.sessions()[0].client_addr(), peer("10.0.0.2:5000"));
    let denied = [("service", "test"), ("client", "10.0.0.1")];
    let admitted = [("service", "test"), ("client", "10.0.0.2")];
    assert_eq!(metrics.value(SERVICE_REQUESTS_COUNTER, &denied), 0.0);
    assert_eq!(metrics.value(SERVICE_REQUESTS_COUNTER, &admitted), 1.0);

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_only_first_client_address_recorder_fires() {
    let listener = Arc::new(ScriptedListener::new(vec![conn("10.0.0.9:4321")]));
    let handler = Arc::new(CountingHandler::new());
    let dial = Arc::new(MemoryRecorder::new());
    let first = Arc::new(MemoryRecorder::new());
    let second = Arc::new(MemoryRecorder::new());
    let options = ServiceOptions::new().with_recorders(vec![
        RecorderBinding::new(RecordKind::ServiceRouterDialAddress, dial.clone() as Arc<dyn Recorder>),
        RecorderBinding::new(RecordKind::ServiceClientAddress, first.clone() as Arc<dyn Recorder>),
        RecorderBinding::new(RecordKind::ServiceClientAddress, second.clone() as Arc<dyn Recorder>),
    ]);
    let service = start(listener.clone(), handler.clone(), options).await;
    let serving = spawn_serve(&service);

    handler.wait_for(1).await;

    assert_eq!(first.records(), vec![b"10.0.0.9".to_vec()]);
    assert!(second.records().is_empty());
    assert!(dial.records().is_empty());

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_recorder_failure_does_not_block_session() {
    let listener = Arc::new(ScriptedListener::new(vec![conn("10.0.0.3:5000")]));
    let handler = Arc::new(CountingHandler::new());
    let recorder = Arc::new(MemoryRecorder::failing());
    let options = ServiceOptions::new().with_recorders(vec![RecorderBinding::new(
        RecordKind::ServiceClientAddress,
        recorder.clone() as Arc<dyn Recorder>,
    )]);
    let service = start(listener.clone(), handler.clone(), options).await;
    let serving = spawn_serve(&service);

    handler.wait_for(1).await;
    assert_eq!(recorder.records().len(), 1);

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_session_metrics_are_balanced() {
    let listener = Arc::new(ScriptedListener::new(vec![
        conn("10.0.0.4:5000"),
        conn("10.0.0.4:5001"),
    ]));
    let handler = Arc::new(CountingHandler::failing());
    let metrics = Arc::new(InMemoryMetrics::default());
    let options = ServiceOptions::new().with_metrics(metrics.clone());
    let service = start(listener.clone(), handler.clone(), options).await;
    let serving = spawn_serve(&service);

    handler.wait_for(2).await;
    settle().await;

    let labels = [("service", "test"), ("client", "10.0.0.4")];
    assert_eq!(metrics.value(SERVICE_REQUESTS_COUNTER, &labels), 2.0);
    assert_eq!(metrics.value(SERVICE_HANDLER_ERRORS_COUNTER, &labels), 2.0);
    assert_eq!(metrics.value(SERVICE_REQUESTS_IN_FLIGHT_GAUGE, &labels), 0.0);
    assert_eq!(
        metrics
            .observations(SERVICE_REQUEST_DURATION_OBSERVER, &[("service", "test")])
            .len(),
        2
    );
    assert_eq!(metrics.value(SERVICES_GAUGE, &[("service", "test")]), 1.0);

    shutdown(&service, serving).await;
    assert_eq!(metrics.value(SERVICES_GAUGE, &[("service", "test")]), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_single_outstanding_accept() {
    let listener = Arc::new(ScriptedListener::new(vec![
        conn("10.0.0.5:1"),
        AcceptStep::Temporary,
        conn("10.0.0.5:2"),
        conn("10.0.0.5:3"),
    ]));
    let handler = Arc::new(CountingHandler::new());
    let service = start(listener.clone(), handler.clone(), ServiceOptions::default()).await;
    let serving = spawn_serve(&service);

    handler.wait_for(3).await;
    assert_eq!(listener.max_outstanding(), 1);

    shutdown(&service, serving).await;
}

#[tokio::test(start_paused = true)]
async fn test_root_cancellation_reaches_sessions() {
    let listener = Arc::new(ScriptedListener::new(vec![conn("10.0.0.6:5000")]));
    let handler = Arc::new(CountingHandler::new());
    let service = start(listener.clone(), handler.clone(), ServiceOptions::default()).await;
    let serving = spawn_serve(&service);

    handler.wait_for(1).await;
    let session = handler.sessions().remove(0);
    assert!(!session.cancellation().is_cancelled());

    service.cancellation().cancel();
    assert!(session.cancellation().is_cancelled());

    shutdown(&service, serving).await;
}

#[tokio::test]
async fn test_addr_reports_listener_address() {
    let listener = Arc::new(ScriptedListener::new(vec![]));
    let service = start(listener, Arc::new(CountingHandler::new()), ServiceOptions::default()).await;
    assert_eq!(service.addr(), peer("127.0.0.1:7000"));
    assert_eq!(service.name(), "test");
}

fn logging_hooks(log: &std::path::Path) -> Hooks {
    let cmd = |phase: &str| vec![format!("echo {phase} >> {}", log.display())];
    Hooks {
        pre_up: cmd("pre-up"),
        post_up: cmd("post-up"),
        pre_down: cmd("pre-down"),
        post_down: cmd("post-down"),
    }
}

fn hook_log(log: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_hooks_follow_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("hooks.log");
    let listener = Arc::new(ScriptedListener::new(vec![]));
    let handler = Arc::new(CountingHandler::new());
    let options = ServiceOptions::new().with_hooks(logging_hooks(&log));

    let service = start(listener.clone(), handler.clone(), options).await;
    assert_eq!(hook_log(&log), vec!["pre-up"]);

    let serving = spawn_serve(&service);
    wait_for_accepts(&listener, 1).await;
    assert_eq!(hook_log(&log), vec!["pre-up", "post-up"]);

    shutdown(&service, serving).await;
    assert_eq!(hook_log(&log), vec!["pre-up", "post-up", "pre-down", "post-down"]);
    assert_eq!(handler.closed(), 1);
    assert_eq!(listener.close_calls(), 1);
}

#[tokio::test]
async fn test_close_runs_post_down_when_listener_close_fails() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("hooks.log");
    let listener = Arc::new(ScriptedListener::new(vec![]).failing_close());
    let options = ServiceOptions::new().with_hooks(logging_hooks(&log));
    let service = start(listener.clone(), Arc::new(CountingHandler::new()), options).await;

    let result = service.close().await;

    assert!(matches!(result, Err(TollgateError::Listener(_))));
    assert_eq!(hook_log(&log), vec!["pre-up", "pre-down", "post-down"]);
}
