use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use tci_client::{AssetClient, LogStream};

/// ANSI escapes for the user-visible build log. The asset service
/// archives raw bytes; color survives into the log viewer.
pub mod color {
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const HI_MAGENTA: &str = "\x1b[95m";
    pub const HI_CYAN: &str = "\x1b[96m";
    pub const BOLD: &str = "\x1b[1m";
    pub const RESET: &str = "\x1b[0m";
}

/// Producer handle to a run's build log. Cheap to clone; every writer
/// for a run (git, image pull progress, container attach, status
/// banners) holds one of these.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<Bytes>,
}

impl LogSink {
    /// A sink with no consumer, for runs that have nowhere to archive
    /// output (and for tests).
    pub fn discard() -> Self {
        let (tx, mut rx) = mpsc::channel::<Bytes>(256);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Self { tx }
    }

    /// Append raw bytes to the build log. Errors are swallowed: a
    /// closed pipe means the consumer is gone and the run should keep
    /// going regardless.
    pub async fn write(&self, bytes: impl Into<Bytes>) {
        let _ = self.tx.send(bytes.into()).await;
    }

    /// Blocking variant for threads pumping subprocess output.
    /// Returns false once the pipe is closed.
    pub fn blocking_write(&self, bytes: Bytes) -> bool {
        self.tx.blocking_send(bytes).is_ok()
    }

    pub async fn write_str(&self, s: &str) {
        self.write(Bytes::copy_from_slice(s.as_bytes())).await;
    }

    /// Mirror an executor error into the build log in red so the user
    /// sees why their run failed.
    pub async fn error_line(&self, msg: &str) {
        self.write_str(&format!("\n{}{msg}{}\n", color::RED, color::RESET))
            .await;
    }
}

/// Single writer/reader pair for one run's console output. The reader
/// side streams into the asset service until every [`LogSink`] clone
/// is dropped.
pub struct LogPipe {
    sink: LogSink,
    writer: JoinHandle<()>,
}

impl LogPipe {
    /// Start the pipe for a run. An upload failure is logged via the
    /// structured logger and does not fail the run.
    pub fn start(run_id: i64, asset: Arc<dyn AssetClient>) -> Self {
        let (tx, rx) = mpsc::channel::<Bytes>(256);
        let stream: LogStream = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>).boxed();

        let writer = tokio::spawn(async move {
            if let Err(e) = asset.write_log(run_id, stream).await {
                error!(run_id, error = %e, "writing build log to asset service failed");
            }
        });

        Self {
            sink: LogSink { tx },
            writer,
        }
    }

    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Close the writer side and wait for the upload to drain. All
    /// sink clones must be dropped by now or this waits for them.
    pub async fn finish(self) {
        drop(self.sink);
        let _ = self.writer.await;
    }
}
