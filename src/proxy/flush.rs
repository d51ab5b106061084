//! Latency-bounded client writer.
//!
//! Bytes written through [`LatencyBoundedWriter`] may sit in the destination's
//! buffer while a slow backend trickles out the rest of the body. A background
//! task flushes the destination every `latency`, so no written byte waits much
//! longer than that before reaching the client.
//!
//! ```text
//!   NotStarted ──first write──▶ Running ──finish / write error──▶ Stopped
//!                                  │
//!                                  └─ every tick: lock dst, flush
//! ```

use std::io;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Lifecycle of the periodic flush task.
#[derive(Debug)]
enum FlushState {
    NotStarted,
    Running {
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Wraps a flushable destination and flushes it at least once per `latency`
/// while writes are in progress.
///
/// Dropping the writer drops the stop sender, which ends the flush task, so an
/// abandoned copy does not leak a ticker.
#[derive(Debug)]
pub struct LatencyBoundedWriter<W> {
    dst: Arc<Mutex<W>>,
    latency: Duration,
    state: FlushState,
}

impl<W> LatencyBoundedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// # Panics
    ///
    /// Panics if `latency` is zero.
    pub fn new(dst: W, latency: Duration) -> Self {
        assert!(!latency.is_zero(), "flush latency must be non-zero");
        Self {
            dst: Arc::new(Mutex::new(dst)),
            latency,
            state: FlushState::NotStarted,
        }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Whether the periodic flush task is currently running.
    pub fn is_running(&self) -> bool {
        matches!(self.state, FlushState::Running { .. })
    }

    /// Write all of `buf`, starting the flush task on first use.
    ///
    /// A failed write stops the flush task before the error is returned.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.start_once();

        let result = {
            let mut dst = self.dst.lock().await;
            dst.write_all(buf).await
        };

        if result.is_err() {
            self.signal_stop();
        }
        result
    }

    /// Stop the flush task, wait for it, then flush and shut the destination down.
    pub async fn finish(mut self) -> io::Result<()> {
        if let Some(task) = self.signal_stop() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Flush task ended abnormally");
            }
        }

        let mut dst = self.dst.lock().await;
        dst.shutdown().await
    }

    fn start_once(&mut self) {
        if !matches!(self.state, FlushState::NotStarted) {
            return;
        }

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(flush_loop(Arc::clone(&self.dst), self.latency, stopped));
        self.state = FlushState::Running { stop, task };
    }

    /// Send the stop signal once. Returns the task handle if it was running.
    fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        match mem::replace(&mut self.state, FlushState::Stopped) {
            FlushState::Running { stop, task } => {
                let _ = stop.send(());
                Some(task)
            }
            FlushState::NotStarted | FlushState::Stopped => None,
        }
    }
}

async fn flush_loop<W>(dst: Arc<Mutex<W>>, latency: Duration, mut stopped: oneshot::Receiver<()>)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut ticker = time::interval_at(Instant::now() + latency, latency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // A dropped sender counts as a stop signal.
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                let mut dst = dst.lock().await;
                if let Err(e) = dst.flush().await {
                    tracing::debug!(error = %e, "Periodic flush failed, stopping flush task");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::task::{Context, Poll};

    #[derive(Debug, Default)]
    struct Seen {
        pending: Vec<u8>,
        delivered: Vec<u8>,
        flushes: usize,
        shut_down: bool,
    }

    /// Buffers writes until flushed, like a socket behind a write buffer.
    #[derive(Debug, Clone, Default)]
    struct Buffered {
        seen: Arc<StdMutex<Seen>>,
        fail_writes: bool,
    }

    impl AsyncWrite for Buffered {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_writes {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            self.seen.lock().unwrap().pending.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let mut seen = self.seen.lock().unwrap();
            let pending = mem::take(&mut seen.pending);
            seen.delivered.extend_from_slice(&pending);
            seen.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let result = self.as_mut().poll_flush(cx);
            self.seen.lock().unwrap().shut_down = true;
            result
        }
    }

    #[tokio::test]
    async fn task_starts_lazily_on_first_write() {
        let dst = Buffered::default();
        let mut writer = LatencyBoundedWriter::new(dst.clone(), Duration::from_millis(10));
        assert!(!writer.is_running());

        writer.write_all(b"a").await.unwrap();
        assert!(writer.is_running());
        writer.write_all(b"b").await.unwrap();
        assert!(writer.is_running());

        writer.finish().await.unwrap();
        let seen = dst.seen.lock().unwrap();
        assert_eq!(seen.delivered, b"ab".to_vec());
        assert!(seen.shut_down);
    }

    #[tokio::test]
    async fn pending_bytes_are_flushed_without_further_writes() {
        let dst = Buffered::default();
        let mut writer = LatencyBoundedWriter::new(dst.clone(), Duration::from_millis(10));

        writer.write_all(b"partial").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        {
            let seen = dst.seen.lock().unwrap();
            assert_eq!(seen.delivered, b"partial".to_vec());
            assert!(seen.flushes >= 2, "only {} flushes", seen.flushes);
            assert!(!seen.shut_down);
        }
        writer.finish().await.unwrap();
    }

    #[tokio::test]
    async fn finish_stops_the_ticker() {
        let dst = Buffered::default();
        let mut writer = LatencyBoundedWriter::new(dst.clone(), Duration::from_millis(5));
        writer.write_all(b"x").await.unwrap();
        writer.finish().await.unwrap();

        let after_finish = dst.seen.lock().unwrap().flushes;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(dst.seen.lock().unwrap().flushes, after_finish);
    }

    #[tokio::test]
    async fn write_failure_stops_the_ticker() {
        let dst = Buffered {
            fail_writes: true,
            ..Buffered::default()
        };
        let mut writer = LatencyBoundedWriter::new(dst.clone(), Duration::from_millis(5));

        let err = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(!writer.is_running());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(dst.seen.lock().unwrap().flushes, 0);
    }

    #[tokio::test]
    async fn dropping_the_writer_stops_the_ticker() {
        let dst = Buffered::default();
        let mut writer = LatencyBoundedWriter::new(dst.clone(), Duration::from_millis(5));
        writer.write_all(b"x").await.unwrap();
        drop(writer);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = dst.seen.lock().unwrap().flushes;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(dst.seen.lock().unwrap().flushes, settled);
    }

    #[test]
    #[should_panic(expected = "flush latency must be non-zero")]
    fn zero_latency_is_rejected_up_front() {
        LatencyBoundedWriter::new(Buffered::default(), Duration::ZERO);
    }

    #[tokio::test]
    async fn finish_without_writes_never_spawns() {
        let dst = Buffered::default();
        let writer = LatencyBoundedWriter::new(dst.clone(), Duration::from_millis(5));
        writer.finish().await.unwrap();

        let seen = dst.seen.lock().unwrap();
        assert!(seen.shut_down);
        assert_eq!(seen.flushes, 1);
    }
}
