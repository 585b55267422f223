//! Inactivity timeout and deadline behavior against real sockets.

use std::time::{Duration, Instant};

use stallguard::exchange::cancel_reader::client_error;
use stallguard::{body, Client, ClientOptions, Error, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

mod common;

fn client(timeout: Duration) -> Client {
    let mut options = ClientOptions::default();
    options.timeout = timeout;
    Client::new(options)
}

#[tokio::test]
async fn test_steady_trickle_completes() {
    let addr = common::start_trickle(5, Duration::from_millis(50)).await;
    let client = client(Duration::from_millis(100));

    let response = client.get(&format!("http://{addr}/")).await.unwrap();
    assert!(response.ok());
    assert_eq!(response.text().await.unwrap(), "abcde");
}

/// A reader yielding `b"ab"` every `gap`, `times` times, then end of file.
fn slow_source(times: usize, gap: Duration) -> DuplexStream {
    let (mut tx, rx) = tokio::io::duplex(64);
    tokio::spawn(async move {
        for _ in 0..times {
            tokio::time::sleep(gap).await;
            if tx.write_all(b"ab").await.is_err() {
                return;
            }
        }
    });
    rx
}

#[tokio::test]
async fn test_steady_upload_completes() {
    let addr = common::start_echo().await;
    let client = client(Duration::from_millis(100));

    let started = Instant::now();
    let request = Request::post(format!("http://{addr}/upload"))
        .body(body::reader(slow_source(10, Duration::from_millis(40))));
    let response = client.request(request).await.unwrap();

    assert_eq!(response.text().await.unwrap(), "ab".repeat(10));
    assert!(started.elapsed() > Duration::from_millis(300));
}

#[tokio::test]
async fn test_stalled_body_times_out_while_receiving() {
    let addr = common::start_trickle(5, Duration::from_millis(200)).await;
    let client = client(Duration::from_millis(100));

    let response = client.get(&format!("http://{addr}/")).await.unwrap();
    let err = response.text().await.unwrap_err();

    assert!(matches!(err, Error::TimeoutReceiving(d) if d == Duration::from_millis(100)), "got {err:?}");
}

#[tokio::test]
async fn test_header_wait_counts_as_receiving() {
    let addr = common::start_silent(Duration::from_secs(2)).await;
    let client = client(Duration::from_millis(100));

    let started = Instant::now();
    let err = client.get(&format!("http://{addr}/")).await.unwrap_err();

    assert!(matches!(err, Error::TimeoutReceiving(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_stalled_request_body_times_out_while_sending() {
    let addr = common::start_silent(Duration::from_secs(2)).await;
    let client = client(Duration::from_millis(100));

    // the write half stays open and silent
    let (_tx, rx) = tokio::io::duplex(64);
    let err = client
        .request(Request::post(format!("http://{addr}/upload")).body(body::reader(rx)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TimeoutSending(_)), "got {err:?}");
}

#[tokio::test]
async fn test_deadline_beats_steady_progress() {
    let addr = common::start_trickle(40, Duration::from_millis(50)).await;
    let client = client(Duration::from_secs(1));

    let request = Request::get(format!("http://{addr}/")).request_timeout(Duration::from_millis(300));
    let response = client.request(request).await.unwrap();
    let err = response.bytes().await.unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded(d) if d == Duration::from_millis(300)), "got {err:?}");
}

#[tokio::test]
async fn test_per_request_timeout_overrides_client() {
    let addr = common::start_trickle(3, Duration::from_millis(150)).await;
    let client = client(Duration::ZERO);

    let request = Request::get(format!("http://{addr}/")).timeout(Duration::from_millis(50));
    let response = client.request(request).await.unwrap();
    let err = response.text().await.unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
}

#[tokio::test]
async fn test_dial_failure_is_connect_error() {
    let addr = common::closed_port().await;
    let client = client(Duration::from_millis(100));

    let err = client.get(&format!("http://{addr}/")).await.unwrap_err();
    assert!(err.is_connect(), "got {err:?}");
}

#[tokio::test]
async fn test_linked_reader_reports_stall() {
    let addr = common::start_scripted(|mut socket| async move {
        use tokio::io::AsyncWriteExt;

        common::read_head(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nab")
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;
    let client = client(Duration::from_millis(100));

    let mut response = client.get(&format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.read_n(1).await.unwrap(), "a");

    let mut reader = response.into_reader();
    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).await.unwrap_err();

    assert_eq!(out, b"b");
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    assert!(matches!(client_error(&err), Some(Error::TimeoutReceiving(_))), "got {err:?}");
}
