use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use graphrun_core::log::LogEntry;
use graphrun_core::traits::LogSink;

/// Log sink that publishes every entry on a tokio broadcast channel.
/// All subscribers receive all entries.
pub struct BroadcastSink {
    tx: broadcast::Sender<LogEntry>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LogSink for BroadcastSink {
    fn append(&self, entry: &LogEntry) {
        // Ignore error if no receivers
        let _ = self.tx.send(entry.clone());
    }
}

/// JSONL run logger.
///
/// Drains a [`BroadcastSink`] subscription and writes one JSON object per
/// line to `{log_dir}/{run_id}/{timestamp}.jsonl`, flushing after every line
/// so a crash mid-run leaves all earlier lines intact.
pub struct RunLogger {
    log_dir: PathBuf,
}

#[derive(Serialize)]
struct LogLine<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    entry: &'a LogEntry,
}

impl RunLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// Run the logger as a background task.
    ///
    /// Subscribe before the run starts so no entry is missed. Stops when the
    /// channel closes (every sink handle dropped) or on cancellation, after
    /// writing whatever is already queued. Returns the file written, if any.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<LogEntry>,
        run_id: String,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let run_dir = self.log_dir.join(&run_id);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                biased;
                result = rx.recv() => {
                    match result {
                        Ok(entry) => {
                            let line = LogLine { run_id: &run_id, entry: &entry };
                            if let Ok(json) = serde_json::to_string(&line) {
                                if let Err(e) = writer.write_all(format!("{}\n", json).as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped entries");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Log channel closed, RunLogger stopping");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }
}
