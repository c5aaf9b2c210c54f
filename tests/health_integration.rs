//! End-to-end tests against a real tonic server running the gRPC health
//! service on an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::server::{health_reporter, HealthReporter};

use grpc_wrapper::{CallError, Config, WrapperClient, WrapperError};

async fn start_health_server() -> (SocketAddr, HealthReporter) {
    let (mut reporter, health_service) = health_reporter();
    reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(health_service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (addr, reporter)
}

/// TCP relay in front of `upstream` that counts open client connections.
async fn start_counting_relay(upstream: SocketAddr) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let open = Arc::new(AtomicUsize::new(0));

    let counter = open.clone();
    tokio::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = counter.clone();
            tokio::spawn(async move {
                if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                }
                counter.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    (addr, open)
}

/// Poll `open` until it reaches `expected` or five seconds pass.
async fn settle(open: &AtomicUsize, expected: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = open.load(Ordering::SeqCst);
        if current == expected || Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn config() -> Config {
    Config {
        dial_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_secs(2),
        pool_size: 2,
        stream_retry: 1,
        ..Config::for_test()
    }
}

fn check_request(service: &str) -> HealthCheckRequest {
    HealthCheckRequest {
        service: service.to_string(),
    }
}

#[tokio::test]
async fn test_health_check_through_short_call() {
    let (addr, _reporter) = start_health_server().await;
    let client = WrapperClient::connect(addr.to_string(), config())
        .await
        .unwrap();
    assert_eq!(client.pool_size(), 2);

    for _ in 0..4 {
        let response = client
            .short_call(|ctx, channel| {
                let request = ctx.request(check_request(""));
                async move { HealthClient::new(channel).check(request).await }
            })
            .await
            .unwrap();
        assert_eq!(response.into_inner().status(), ServingStatus::Serving);
    }

    client.close().await;
}

#[tokio::test]
async fn test_unknown_service_is_rejected_without_retry() {
    let (addr, _reporter) = start_health_server().await;
    let client = WrapperClient::connect(addr.to_string(), config())
        .await
        .unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = client
        .short_call(|ctx, channel| {
            attempts.fetch_add(1, Ordering::SeqCst);
            let request = ctx.request(check_request("no.such.Service"));
            async move { HealthClient::new(channel).check(request).await }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    match result {
        Err(CallError::Rejected(status)) => assert_eq!(status.code(), Code::NotFound),
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }

    client.close().await;
}

#[tokio::test]
async fn test_health_watch_through_stream_call() {
    let (addr, mut reporter) = start_health_server().await;
    reporter
        .set_service_status("orders", tonic_health::ServingStatus::NotServing)
        .await;

    let client = WrapperClient::connect(addr.to_string(), config())
        .await
        .unwrap();

    let (flip_tx, mut flip_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if flip_rx.recv().await.is_some() {
            reporter
                .set_service_status("orders", tonic_health::ServingStatus::Serving)
                .await;
        }
    });

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let result = client
        .stream_call(|_ctx, channel| {
            let seen = seen.clone();
            let flip_tx = flip_tx.clone();
            async move {
                let mut updates = HealthClient::new(channel)
                    .watch(check_request("orders"))
                    .await?
                    .into_inner();
                while let Some(update) = updates.message().await? {
                    let status = update.status();
                    seen.lock().unwrap().push(status);
                    if status == ServingStatus::Serving {
                        return Ok(());
                    }
                    let _ = flip_tx.send(()).await;
                }
                Err(Status::unavailable("watch ended"))
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![ServingStatus::NotServing, ServingStatus::Serving]
    );

    client.close().await;
}

#[tokio::test]
async fn test_close_releases_transport_connections() {
    let (server, _reporter) = start_health_server().await;
    let (relay, open) = start_counting_relay(server).await;
    let client = WrapperClient::connect(relay.to_string(), config())
        .await
        .unwrap();

    for _ in 0..2 {
        client
            .short_call(|ctx, channel| {
                let request = ctx.request(check_request(""));
                async move { HealthClient::new(channel).check(request).await }
            })
            .await
            .unwrap();
    }
    // Two pooled connections plus the stream connection.
    assert_eq!(settle(&open, 3).await, 3);

    client.close().await;

    // The client is still alive; only close() may have released them.
    assert!(client.is_closed());
    assert_eq!(settle(&open, 0).await, 0);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WrapperClient::connect(addr.to_string(), config()).await;
    assert!(matches!(
        result,
        Err(WrapperError::PoolDial { index: 0, .. })
    ));
}
