//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a raw TCP backend; `script` drives each accepted connection.
pub async fn start_scripted<F, Fut>(script: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(script(socket));
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Read one request head (through the blank line) from `socket`.
pub async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// A backend that sends the response head at once, then `chunks` body bytes
/// one at a time with `gap` before each.
pub async fn start_trickle(chunks: usize, gap: Duration) -> SocketAddr {
    start_scripted(move |mut socket| async move {
        read_head(&mut socket).await;
        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {chunks}\r\n\r\n");
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for i in 0..chunks {
            tokio::time::sleep(gap).await;
            let byte = [b'a' + (i % 26) as u8];
            if socket.write_all(&byte).await.is_err() {
                return;
            }
        }
        let _ = socket.shutdown().await;
    })
    .await
}

/// A backend that reads the request head and then says nothing.
pub async fn start_silent(hold: Duration) -> SocketAddr {
    start_scripted(move |mut socket| async move {
        read_head(&mut socket).await;
        tokio::time::sleep(hold).await;
    })
    .await
}

/// A backend that replies with a fixed raw response and closes.
pub async fn start_raw(response: &'static str) -> SocketAddr {
    start_scripted(move |mut socket| async move {
        read_head(&mut socket).await;
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// Start an HTTP/1.1 backend served by `handler`.
pub async fn start_http_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let fut = handler(req);
                    async move { Ok::<_, Infallible>(fut.await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

/// Echo the request body back, with request details in `x-*` headers.
pub async fn echo(req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();

    let mut resp = Response::new(Full::new(body));
    let headers = resp.headers_mut();
    headers.insert("x-method", parts.method.as_str().parse().unwrap());
    headers.insert("x-uri", parts.uri.to_string().parse().unwrap());
    for (from, to) in [
        ("host", "x-host"),
        ("content-type", "x-content-type"),
        ("cookie", "x-cookie"),
        ("user-agent", "x-user-agent"),
        ("authorization", "x-authorization"),
        ("x-requested-with", "x-ajax"),
    ] {
        if let Some(value) = parts.headers.get(from) {
            headers.insert(to, value.clone());
        }
    }
    resp
}

/// Start the echo backend.
pub async fn start_echo() -> SocketAddr {
    start_http_server(echo).await
}

/// A response with `status` and a `Location` header.
pub fn redirect(status: u16, location: &str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = StatusCode::from_u16(status).unwrap();
    resp.headers_mut()
        .insert("location", location.parse().unwrap());
    resp
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
