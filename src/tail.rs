//! Incremental log tailing
//!
//! The worker appends stack traces to a log file. We remember how many bytes
//! have already been consumed in a small pointer file, so a restart of the
//! supervisor does not re-process old crashes.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Reads the part of an append-only log that has not been seen yet.
#[derive(Debug, Clone)]
pub struct LogTailer {
    log_file: PathBuf,
    pointer_file: PathBuf,
}

impl LogTailer {
    pub fn new(log_file: impl Into<PathBuf>, pointer_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            pointer_file: pointer_file.into(),
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn pointer_file(&self) -> &Path {
        &self.pointer_file
    }

    /// Create an empty log and a zero pointer if either is missing.
    pub fn ensure_files_exist(&self) -> Result<()> {
        if let Some(parent) = self.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        if !self.log_file.exists() {
            fs::write(&self.log_file, "")
                .with_context(|| format!("Failed to create {}", self.log_file.display()))?;
        }
        if !self.pointer_file.exists() {
            self.set_pointer(0)?;
        }
        Ok(())
    }

    /// Last persisted offset. Missing or garbled pointer files read as 0.
    pub fn pointer(&self) -> u64 {
        fs::read_to_string(&self.pointer_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn set_pointer(&self, position: u64) -> Result<()> {
        fs::write(&self.pointer_file, position.to_string())
            .with_context(|| format!("Failed to write {}", self.pointer_file.display()))
    }

    /// Return the bytes in `[pointer, size)` as text, or `None` if nothing new.
    ///
    /// The pointer is advanced to the size observed here and persisted before
    /// returning. A log that shrank below the pointer (truncation or rotation)
    /// is not re-read; the pointer is pulled back to the new size so it never
    /// points past the end of the file.
    pub fn read_new_entries(&self) -> Result<Option<String>> {
        self.ensure_files_exist()?;
        let start = self.pointer();
        let end = fs::metadata(&self.log_file)
            .with_context(|| format!("Failed to stat {}", self.log_file.display()))?
            .len();

        if start > end {
            tracing::warn!(
                log = %self.log_file.display(),
                pointer = start,
                size = end,
                "log file shrank below the saved offset; skipping to the end"
            );
            self.set_pointer(end)?;
            return Ok(None);
        }
        if start == end {
            return Ok(None);
        }

        let mut buffer = vec![0u8; (end - start) as usize];
        let mut file = File::open(&self.log_file)
            .with_context(|| format!("Failed to open {}", self.log_file.display()))?;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buffer)
            .with_context(|| format!("Failed to read {}", self.log_file.display()))?;

        self.set_pointer(end)?;
        Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
    }

    /// Remove the log and pointer files. Returns the paths that were removed.
    pub fn reset(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in [&self.log_file, &self.pointer_file] {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }
}

/// Handle for a running log watch. Stopping (or dropping) it ends the poll loop.
pub struct WatchHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the subscription and wait for the poll task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Polls a [`LogTailer`] and forwards every new chunk to a channel.
pub struct LogWatcher;

impl LogWatcher {
    /// Start polling on `interval`. Chunks arrive on the returned receiver
    /// until the handle is stopped or the receiver is dropped.
    pub fn spawn(tailer: LogTailer, interval: Duration) -> (WatchHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            if let Err(err) = tailer.ensure_files_exist() {
                tracing::error!(error = %err, "could not prepare log files");
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match tailer.read_new_entries() {
                    Ok(Some(chunk)) => {
                        tracing::debug!(bytes = chunk.len(), "log grew");
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "failed to read new log entries"),
                }
            }
            tracing::debug!(log = %tailer.log_file().display(), "log watch stopped");
        });

        (
            WatchHandle {
                cancel,
                task: Some(task),
            },
            rx,
        )
    }
}
