use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tollgate::common::test_utils::{InMemoryMetrics, MemoryRecorder};
use tollgate::observability::metrics::SERVICE_REQUESTS_COUNTER;
use tollgate::{
    EchoHandler, IpAdmission, ListenerError, RecordKind, Recorder, RecorderBinding, Service,
    ServiceOptions, StaticTrafficLimiter, TcpListener, TcpListenerConfig, TollgateError,
    TrafficLimiter,
};

async fn start_service(handler: EchoHandler, options: ServiceOptions) -> (Arc<Service>, tokio::task::JoinHandle<tollgate::Result<()>>) {
    let listener = TcpListener::bind(&TcpListenerConfig::default()).await.unwrap();
    let service = Arc::new(Service::new("it", Arc::new(listener), Arc::new(handler), options).await);
    let serving = {
        let service = service.clone();
        tokio::spawn(async move { service.serve().await })
    };
    (service, serving)
}

async fn stop_service(service: &Service, serving: tokio::task::JoinHandle<tollgate::Result<()>>) {
    service.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(TollgateError::Listener(ListenerError::Closed))));
}

#[tokio::test]
async fn test_tcp_echo_round_trip() {
    let (service, serving) = start_service(EchoHandler::default(), ServiceOptions::default()).await;

    let mut client = TcpStream::connect(service.addr()).await.unwrap();
    for message in ["First message", "Unicode: 🚀🌟🎉", "Third"] {
        client.write_all(message.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; message.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, message.as_bytes());
    }

    drop(client);
    stop_service(&service, serving).await;
}

#[tokio::test]
async fn test_throttled_echo_respects_output_rate() {
    let limiter: Arc<dyn TrafficLimiter> = Arc::new(StaticTrafficLimiter::new(0, 2000));
    let (service, serving) = start_service(
        EchoHandler::default().with_limiter(limiter),
        ServiceOptions::default(),
    )
    .await;

    let mut client = TcpStream::connect(service.addr()).await.unwrap();
    let payload: Vec<u8> = (0..5000).map(|i| (i % 251) as u8).collect();

    let start = Instant::now();
    let echoed = {
        let to_send = payload.clone();
        let (mut read_half, mut write_half) = client.into_split();
        let writing = tokio::spawn(async move {
            write_half.write_all(&to_send).await.unwrap();
            write_half
        });
        let mut echoed = vec![0u8; payload.len()];
        read_half.read_exact(&mut echoed).await.unwrap();
        let _write_half = writing.await.unwrap();
        echoed
    };
    let elapsed = start.elapsed();

    assert_eq!(echoed, payload);
    // 5000 bytes at 2000 B/s, less scheduling slack
    assert!(elapsed >= Duration::from_millis(2400), "elapsed {elapsed:?}");

    stop_service(&service, serving).await;
}

#[tokio::test]
async fn test_admission_and_recording_over_tcp() {
    let metrics = Arc::new(InMemoryMetrics::default());
    let recorder = Arc::new(MemoryRecorder::new());
    let options = ServiceOptions::new()
        .with_admission(Arc::new(IpAdmission::new(["127.0.0.1"])))
        .with_recorders(vec![RecorderBinding::new(
            RecordKind::ServiceClientAddress,
            recorder.clone() as Arc<dyn Recorder>,
        )])
        .with_metrics(metrics.clone());
    let (service, serving) = start_service(EchoHandler::default(), options).await;

    // loopback is blacklisted: the connection is closed without an echo
    let mut client = TcpStream::connect(service.addr()).await.unwrap();
    let _ = client.write_all(b"hello").await;
    let mut buf = [0u8; 5];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    assert_eq!(recorder.records(), vec![b"127.0.0.1".to_vec()]);
    assert_eq!(
        metrics.value(SERVICE_REQUESTS_COUNTER, &[("service", "it"), ("client", "127.0.0.1")]),
        0.0
    );

    stop_service(&service, serving).await;
}
