//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use revert_proxy::proxy::{Transport, TransportError};
use revert_proxy::ResponseWriter;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Read one request head (up to the blank line) from `socket`.
async fn read_head(socket: &mut TcpStream) -> String {
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

/// Format a complete `Connection: close` HTTP/1.1 response.
pub fn raw_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    out
}

/// Start a mock backend that answers every request with the same raw response.
pub async fn start_mock_backend(addr: SocketAddr, response: String) {
    let response = Arc::new(response);
    start_programmable_backend(addr, move |_head| {
        let response = Arc::clone(&response);
        async move { response.as_str().to_owned() }
    })
    .await;
}

/// Start a programmable mock backend.
///
/// `f` receives the raw request head and returns the raw response to write.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let response = f(head).await;
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a backend that sends a chunked body, pausing `gap` between chunks.
pub async fn start_trickling_backend(addr: SocketAddr, chunks: Vec<&'static str>, gap: Duration) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let chunks = chunks.clone();
                    tokio::spawn(async move {
                        read_head(&mut socket).await;
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        for (i, chunk) in chunks.iter().enumerate() {
                            if i > 0 {
                                tokio::time::sleep(gap).await;
                            }
                            let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
                            if socket.write_all(frame.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        let _ = socket.write_all(b"0\r\n\r\n").await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Everything a [`RecordingWriter`] observed.
#[derive(Debug, Default)]
pub struct Recorded {
    pub status: Option<StatusCode>,
    pub status_calls: usize,
    /// Headers as they were when the status was written.
    pub headers: HeaderMap,
    /// Written but not yet flushed.
    pub pending: Vec<u8>,
    /// Flushed to the "client".
    pub body: Vec<u8>,
    pub flushes: Vec<Instant>,
    pub closed: bool,
}

/// In-memory client writer that only releases bytes on flush.
#[derive(Debug, Clone)]
pub struct RecordingWriter {
    pub seen: Arc<Mutex<Recorded>>,
    headers: HeaderMap,
    flushable: bool,
    fail_writes: bool,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Recorded::default())),
            headers: HeaderMap::new(),
            flushable: true,
            fail_writes: false,
        }
    }

    /// A writer whose `can_flush` reports false.
    pub fn unflushable() -> Self {
        Self {
            flushable: false,
            ..Self::new()
        }
    }

    /// A writer whose client has gone away.
    pub fn broken() -> Self {
        Self {
            fail_writes: true,
            ..Self::new()
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.seen.lock().unwrap().status
    }

    pub fn body(&self) -> Vec<u8> {
        self.seen.lock().unwrap().body.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.seen
            .lock()
            .unwrap()
            .headers
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }
}

impl ResponseWriter for RecordingWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        let mut seen = self.seen.lock().unwrap();
        seen.status_calls += 1;
        if seen.status.is_none() {
            seen.status = Some(status);
            seen.headers = self.headers.clone();
        }
    }

    fn can_flush(&self) -> bool {
        self.flushable
    }
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if self.seen.lock().unwrap().status.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.seen.lock().unwrap().pending.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut seen = self.seen.lock().unwrap();
        let pending = std::mem::take(&mut seen.pending);
        seen.body.extend_from_slice(&pending);
        seen.flushes.push(Instant::now());
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let seen = Arc::clone(&self.seen);
        let result = self.poll_flush(cx);
        seen.lock().unwrap().closed = true;
        result
    }
}

/// Head of a request the stub transport received.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

type Respond = dyn Fn() -> Result<Response<Body>, TransportError> + Send + Sync;

/// Transport that records outbound requests and answers from a closure.
pub struct StubTransport {
    respond: Box<Respond>,
    pub sent: Arc<Mutex<Vec<SentRequest>>>,
}

impl StubTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn() -> Result<Response<Body>, TransportError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn last_sent(&self) -> SentRequest {
        self.sent.lock().unwrap().last().cloned().unwrap()
    }
}

impl Transport for StubTransport {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, TransportError>> {
        self.sent.lock().unwrap().push(SentRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        });
        let result = (self.respond)();
        Box::pin(async move { result })
    }
}

/// Build a backend response.
pub fn backend_response(status: u16, headers: &[(&str, &str)], body: impl Into<Body>) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body.into()).unwrap()
}

/// A body that yields `chunks`, sleeping `gap` before every chunk after the first.
pub fn trickling_body(chunks: Vec<&'static str>, gap: Duration) -> Body {
    let stream = futures_util::stream::unfold((chunks.into_iter(), true), move |(mut rest, first)| async move {
        let chunk = rest.next()?;
        if !first {
            tokio::time::sleep(gap).await;
        }
        Some((Ok::<_, io::Error>(Bytes::from_static(chunk.as_bytes())), (rest, false)))
    });
    Body::from_stream(stream)
}

/// A body that yields `chunk` and then fails.
pub fn failing_body(chunk: &'static str) -> Body {
    let items: Vec<Result<Bytes, io::Error>> = vec![
        Ok(Bytes::from_static(chunk.as_bytes())),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "backend reset")),
    ];
    Body::from_stream(futures_util::stream::iter(items))
}

/// A GET request for `uri`.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
