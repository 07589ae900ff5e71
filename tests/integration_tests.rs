//! Integration tests for tcplb.
//!
//! These spin up real upstream servers and a real listener on loopback and
//! drive whole sessions through the balancer.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use tcplb::balancer::{
    BalancerError, Endpoint, LoadBalancer, DEFAULT_CONNECT_TIMEOUT, INTERNAL_ERROR_MESSAGE,
    UPSTREAM_TIMEOUT_MESSAGE,
};
use tcplb::config::ListenerConfig;
use tcplb::frontend::ProxyListener;
use tcplb::metrics::MetricsCollector;

/// Start an upstream that holds each connection for `hold`, writes
/// `message`, then closes.
async fn start_upstream(message: &'static str, hold: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                let _ = stream.write_all(message.as_bytes()).await;
            });
        }
    });

    addr
}

/// Start an upstream that echoes everything it reads back to the sender.
async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = stream.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
                let _ = write.shutdown().await;
            });
        }
    });

    addr
}

/// Reserve a loopback address with nothing listening on it.
async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Bind a listener around the given balancer and run it in the background.
async fn start_balancer(balancer: Arc<LoadBalancer>) -> (SocketAddr, CancellationToken) {
    let config = ListenerConfig {
        name: "test".to_string(),
        listen: "127.0.0.1:0".parse().unwrap(),
        connect_timeout: DEFAULT_CONNECT_TIMEOUT,
    };

    let listener = ProxyListener::bind(&config, balancer, MetricsCollector::new())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    tokio::spawn(listener.run(shutdown.clone()));

    (addr, shutdown)
}

fn balancer_for(addrs: &[SocketAddr]) -> Arc<LoadBalancer> {
    let endpoints = addrs.iter().map(|&a| Some(Endpoint::from(a))).collect();
    Arc::new(LoadBalancer::new(endpoints).unwrap())
}

async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    buf
}

/// Session tasks may outlive the client's EOF by a beat; give the counters
/// a moment to settle before asserting quiescence.
async fn wait_for_quiescence(balancer: &LoadBalancer) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if balancer.in_flight_counts().iter().all(|(_, n)| *n == 0) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("in-flight counts did not return to zero");
}

#[tokio::test]
async fn test_forwards_upstream_response_to_client() {
    let upstream = start_upstream("Hello World", Duration::ZERO).await;
    let balancer = balancer_for(&[upstream]);
    let (addr, _shutdown) = start_balancer(Arc::clone(&balancer)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let response = read_to_end(&mut client).await;

    assert_eq!(response, b"Hello World");

    drop(client);
    wait_for_quiescence(&balancer).await;
}

#[tokio::test]
async fn test_balances_between_upstreams() {
    // Both upstreams hold their connection open, so the first client's
    // session is still in flight when the second client arrives and must be
    // routed to the other host. Duplicate removal does not preserve caller
    // order, so the test can't fix which client lands where.
    let upstream_a = start_upstream("Hello from upstream A", Duration::from_millis(800)).await;
    let upstream_b = start_upstream("Hello from upstream B", Duration::from_millis(800)).await;

    let balancer = balancer_for(&[upstream_a, upstream_b]);
    let (addr, _shutdown) = start_balancer(Arc::clone(&balancer)).await;

    let mut first_client = TcpStream::connect(addr).await.unwrap();

    // Make sure the first session is established before the second arrives
    tokio::time::sleep(Duration::from_millis(250)).await;

    let mut second_client = TcpStream::connect(addr).await.unwrap();

    let (first_response, second_response) = tokio::join!(
        read_to_end(&mut first_client),
        read_to_end(&mut second_client)
    );

    let responses: HashSet<Vec<u8>> = [first_response, second_response].into();
    let expected: HashSet<Vec<u8>> = [
        b"Hello from upstream A".to_vec(),
        b"Hello from upstream B".to_vec(),
    ]
    .into();

    assert_eq!(responses, expected);

    drop(first_client);
    drop(second_client);
    wait_for_quiescence(&balancer).await;
}

#[tokio::test]
async fn test_unreachable_upstream_reports_internal_error() {
    let upstream = unused_addr().await;
    let balancer = balancer_for(&[upstream]);
    let (addr, _shutdown) = start_balancer(Arc::clone(&balancer)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let response = read_to_end(&mut client).await;

    assert_eq!(response, INTERNAL_ERROR_MESSAGE.as_bytes());
    wait_for_quiescence(&balancer).await;
}

#[tokio::test]
async fn test_failed_dial_is_not_retried_on_another_host() {
    // With every host unreachable, a retrying balancer would write the
    // error once per attempted host; the client must see it exactly once.
    let upstream_a = unused_addr().await;
    let upstream_b = unused_addr().await;

    let balancer = balancer_for(&[upstream_a, upstream_b]);
    let (addr, _shutdown) = start_balancer(Arc::clone(&balancer)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let response = read_to_end(&mut client).await;

    assert_eq!(response, INTERNAL_ERROR_MESSAGE.as_bytes());
    wait_for_quiescence(&balancer).await;
}

#[tokio::test]
async fn test_cancelled_dial_reports_timeout_message() {
    // Dispatch every connection with an already-fired cancellation token.
    let upstream = unused_addr().await;
    let balancer = balancer_for(&[upstream]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dispatcher = Arc::clone(&balancer);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                cancel.cancel();
                dispatcher.handle(cancel, stream).await;
            });
        }
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    let response = read_to_end(&mut client).await;

    assert_eq!(response, UPSTREAM_TIMEOUT_MESSAGE.as_bytes());
    wait_for_quiescence(&balancer).await;
}

#[tokio::test]
async fn test_bytes_pass_through_unchanged() {
    let upstream = start_echo_upstream().await;
    let balancer = balancer_for(&[upstream]);
    let (addr, _shutdown) = start_balancer(Arc::clone(&balancer)).await;

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&payload).await.unwrap();
    client.shutdown().await.unwrap();

    let echoed = read_to_end(&mut client).await;
    assert_eq!(echoed, payload);

    drop(client);
    wait_for_quiescence(&balancer).await;
}

#[tokio::test]
async fn test_sequential_sessions_reuse_released_host() {
    // Sessions that have completed no longer count against their host, so
    // a lone upstream keeps serving consecutive clients.
    let upstream = start_upstream("Hello World", Duration::ZERO).await;
    let balancer = balancer_for(&[upstream]);
    let (addr, _shutdown) = start_balancer(Arc::clone(&balancer)).await;

    for _ in 0..5 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let response = read_to_end(&mut client).await;
        assert_eq!(response, b"Hello World");
    }

    wait_for_quiescence(&balancer).await;
}

#[test]
fn test_constructor_rejects_empty_input() {
    let result = LoadBalancer::new(Vec::new());
    assert_eq!(result.err().unwrap(), BalancerError::EmptyInput);
}

#[test]
fn test_constructor_rejects_all_absent_entries() {
    let result = LoadBalancer::new(vec![None, None]);
    assert_eq!(result.err().unwrap(), BalancerError::NoValidEntries);
}
