//! Streaming multipart uploads end to end.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use stallguard::body::{FilePart, MultipartBody};
use stallguard::{Client, ClientOptions, Error, Request};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

mod common;

/// In-memory file content that counts its drops and can fail on first read.
struct TrackedFile {
    data: io::Cursor<Vec<u8>>,
    fail: bool,
    drops: Arc<AtomicUsize>,
}

impl TrackedFile {
    fn new(data: &str, fail: bool, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            data: io::Cursor::new(data.as_bytes().to_vec()),
            fail,
            drops: Arc::clone(drops),
        }
    }
}

impl AsyncRead for TrackedFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk read failed")));
        }
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}

impl Drop for TrackedFile {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_three_file_upload_is_echoed() {
    let addr = common::start_echo().await;
    let drops = Arc::new(AtomicUsize::new(0));

    let multipart = MultipartBody::new()
        .boundary("testboundary")
        .field("album", "holiday")
        .files([
            FilePart::new("a.txt", TrackedFile::new("first", false, &drops)),
            FilePart::new("b.txt", TrackedFile::new("second", false, &drops)).mime("text/plain"),
            FilePart::new("c.bin", TrackedFile::new("third", false, &drops)),
        ]);

    let client = Client::default();
    let response = client
        .request(Request::post(format!("http://{addr}/upload")).body(multipart))
        .await
        .unwrap();

    assert_eq!(
        response.header("x-content-type").as_deref(),
        Some("multipart/form-data; boundary=testboundary")
    );
    let body = response.text().await.unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 3);

    assert!(body.starts_with("--testboundary\r\n"));
    assert!(body.contains("Content-Disposition: form-data; name=\"file1\"; filename=\"a.txt\"\r\n"));
    assert!(body.contains("name=\"file2\"; filename=\"b.txt\"\r\nContent-Type: text/plain\r\n\r\nsecond"));
    assert!(body.contains("name=\"file3\"; filename=\"c.bin\""));
    assert!(body.contains("Content-Disposition: form-data; name=\"album\"\r\n\r\nholiday"));
    assert!(body.ends_with("\r\n--testboundary--\r\n"));

    let first = body.find("first").unwrap();
    let second = body.find("second").unwrap();
    let third = body.find("third").unwrap();
    assert!(first < second && second < third);
}

#[tokio::test]
async fn test_failing_part_aborts_with_its_error() {
    let addr = common::start_echo().await;
    let drops = Arc::new(AtomicUsize::new(0));

    let multipart = MultipartBody::new().files([
        FilePart::new("a.txt", TrackedFile::new("first", false, &drops)),
        FilePart::new("b.txt", TrackedFile::new("second", true, &drops)),
        FilePart::new("c.txt", TrackedFile::new("third", false, &drops)),
    ]);

    let client = Client::default();
    let err = client
        .request(Request::post(format!("http://{addr}/upload")).body(multipart))
        .await
        .unwrap_err();

    match &err {
        Error::Multipart(cause) => assert_eq!(cause.to_string(), "disk read failed"),
        other => panic!("expected multipart error, got {other:?}"),
    }
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_fields_only_is_sent_in_one_piece() {
    let addr = common::start_echo().await;

    let multipart = MultipartBody::new()
        .boundary("b")
        .fields([("k1", "v1"), ("k2", "say \"hi\"")]);

    let client = Client::default();
    let response = client
        .request(Request::post(format!("http://{addr}/")).body(multipart))
        .await
        .unwrap();

    assert_eq!(
        response.text().await.unwrap(),
        "--b\r\nContent-Disposition: form-data; name=\"k1\"\r\n\r\nv1\
         \r\n--b\r\nContent-Disposition: form-data; name=\"k2\"\r\n\r\nsay \"hi\"\
         \r\n--b--\r\n"
    );
}

#[tokio::test]
async fn test_file_from_disk_streams() {
    let addr = common::start_echo().await;
    let path = std::env::temp_dir().join(format!("stallguard-{}.json", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, br#"{"ok":true}"#).await.unwrap();

    let part = FilePart::from_path(&path).await.unwrap();
    let client = Client::default();
    let response = client
        .request(Request::post(format!("http://{addr}/")).body(MultipartBody::new().file(part)))
        .await
        .unwrap();
    let body = response.text().await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();

    assert!(body.contains("name=\"file\"; filename=\"stallguard-"));
    assert!(body.contains("Content-Type: application/json\r\n\r\n{\"ok\":true}"));
}

#[tokio::test]
async fn test_steady_multipart_upload_completes() {
    let addr = common::start_echo().await;

    let (mut tx, rx) = tokio::io::duplex(64);
    tokio::spawn(async move {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            if tx.write_all(b"ab").await.is_err() {
                return;
            }
        }
    });

    let mut options = ClientOptions::default();
    options.timeout = Duration::from_millis(100);
    let client = Client::new(options);

    let started = Instant::now();
    let multipart = MultipartBody::new()
        .boundary("slow")
        .file(FilePart::new("slow.txt", rx));
    let response = client
        .request(Request::post(format!("http://{addr}/upload")).body(multipart))
        .await
        .unwrap();
    let body = response.text().await.unwrap();

    assert!(started.elapsed() > Duration::from_millis(300));
    assert!(body.contains(&format!("filename=\"slow.txt\"\r\nContent-Type: application/octet-stream\r\n\r\n{}", "ab".repeat(10))));
    assert!(body.ends_with("\r\n--slow--\r\n"));
}
