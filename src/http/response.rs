//! Client-facing response writing.
//!
//! # Responsibilities
//! - Define [`ResponseWriter`]: headers, one status, streamed bytes, optional flush
//! - Adapt it to axum: [`channel`] pairs a writer driven by the relay task with a
//!   [`PendingResponse`] the handler turns into a streaming `Response`
//!
//! # Design Decisions
//! - Writes are buffered; `flush` is what actually releases bytes to the client
//! - The status line is committed on `write_header`, or implicitly as 200 on the
//!   first body write, mirroring a classic server response writer
//! - A writer dropped without `shutdown` ends the client body with an error, so a
//!   truncated relay is never mistaken for a complete one

use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufWriter, DuplexStream};
use tokio::sync::oneshot;

/// Bytes buffered before the writer pushes them to the client on its own.
pub const WRITE_BUFFER: usize = 8 * 1024;

/// Bytes that may be in flight between the relay task and the client connection.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Where a relayed response goes.
///
/// Bytes are written through `AsyncWrite`. Header changes after the status has
/// been written are ignored.
pub trait ResponseWriter: AsyncWrite + Unpin + Send + 'static {
    /// Headers that will accompany the status line.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line together with the current headers. Only the first call counts.
    fn write_header(&mut self, status: StatusCode);

    /// Whether `flush` pushes buffered bytes to the client.
    ///
    /// Writers that return `false` are never wrapped for periodic flushing.
    fn can_flush(&self) -> bool {
        false
    }
}

type Head = (StatusCode, HeaderMap);

/// Create a connected writer / pending response pair.
pub fn channel() -> (ChannelWriter, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (client_side, body_side) = tokio::io::duplex(PIPE_CAPACITY);
    let finished = Arc::new(AtomicBool::new(false));

    let writer = ChannelWriter {
        headers: HeaderMap::new(),
        head: Some(head_tx),
        body: BufWriter::with_capacity(WRITE_BUFFER, client_side),
        finished: Arc::clone(&finished),
    };
    let pending = PendingResponse {
        head: head_rx,
        body: body_side,
        finished,
    };
    (writer, pending)
}

/// Relay-side half of [`channel`].
#[derive(Debug)]
pub struct ChannelWriter {
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: BufWriter<DuplexStream>,
    finished: Arc<AtomicBool>,
}

impl ChannelWriter {
    fn commit_default(&mut self) {
        if self.head.is_some() {
            self.write_header(StatusCode::OK);
        }
    }
}

impl ResponseWriter for ChannelWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        match self.head.take() {
            Some(head) => {
                let headers = mem::take(&mut self.headers);
                if head.send((status, headers)).is_err() {
                    tracing::debug!(status = %status, "Client went away before the response head");
                }
            }
            None => tracing::warn!(status = %status, "Superfluous write_header call ignored"),
        }
    }

    fn can_flush(&self) -> bool {
        true
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.commit_default();
        Pin::new(&mut this.body).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().body).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.commit_default();
        // Marked before the pipe closes so the reader never sees EOF without it.
        this.finished.store(true, Ordering::Release);
        ready!(Pin::new(&mut this.body).poll_shutdown(cx))?;
        Poll::Ready(Ok(()))
    }
}

/// Handler-side half of [`channel`].
#[derive(Debug)]
pub struct PendingResponse {
    head: oneshot::Receiver<Head>,
    body: DuplexStream,
    finished: Arc<AtomicBool>,
}

impl PendingResponse {
    /// Wait for the status line and build a response streaming the rest of the body.
    ///
    /// A writer dropped before committing a status yields 500.
    pub async fn into_response(self) -> Response {
        match self.head.await {
            Ok((status, headers)) => {
                let mut response = Response::new(stream_body(self.body, self.finished));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(_) => {
                tracing::error!("Relay ended without writing a response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn stream_body<R>(reader: R, finished: Arc<AtomicBool>) -> Body
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stream = futures_util::stream::unfold(Some(reader), move |state| {
        let finished = Arc::clone(&finished);
        async move {
            let mut reader = state?;
            let mut chunk = BytesMut::with_capacity(WRITE_BUFFER);
            match reader.read_buf(&mut chunk).await {
                Ok(0) if finished.load(Ordering::Acquire) => None,
                Ok(0) => Some((
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "relay aborted before the response was complete",
                    )),
                    None,
                )),
                Ok(_) => Some((Ok(chunk.freeze()), Some(reader))),
                Err(e) => Some((Err(e), None)),
            }
        }
    });
    Body::from_stream(stream)
}
