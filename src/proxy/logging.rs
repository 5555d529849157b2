use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::database::usage_log::{NewUsageLog, UsageLog};

const QUEUE_CAPACITY: usize = 256;

// Non-standard status recorded when the caller disconnects mid-stream.
pub const CLIENT_CLOSED_REQUEST: i32 = 499;

/// Fire-and-forget usage accounting. Entries are handed to a bounded worker
/// queue; when the queue is full the entry is dropped with a warning rather
/// than stalling a response.
#[derive(Clone)]
pub struct UsageLogWriter {
    sender: mpsc::Sender<NewUsageLog>,
}

impl UsageLogWriter {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<NewUsageLog>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Err(e) = UsageLog::insert(entry) {
                    error!("failed to write usage log: {}", e);
                }
            }
        });
        Self { sender }
    }

    pub fn record(&self, entry: NewUsageLog) {
        match self.sender.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("usage log queue full; dropping one entry");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("usage log worker has stopped; dropping one entry");
            }
        }
    }
}

/// Owns the pending usage entry of a streaming response. `finish` writes it
/// with the final status; if the response body is dropped before the stream
/// completes (client disconnect) the entry is written with status 499.
pub struct StreamUsageGuard {
    writer: UsageLogWriter,
    entry: Option<NewUsageLog>,
    started: i64,
}

impl StreamUsageGuard {
    pub fn new(writer: UsageLogWriter, entry: NewUsageLog, started: i64) -> Self {
        Self {
            writer,
            entry: Some(entry),
            started,
        }
    }

    pub fn finish(&mut self, status_code: i32) {
        if let Some(mut entry) = self.entry.take() {
            entry.status_code = status_code;
            entry.latency_ms = Utc::now().timestamp_millis() - self.started;
            self.writer.record(entry);
        }
    }
}

impl Drop for StreamUsageGuard {
    fn drop(&mut self) {
        if self.entry.is_some() {
            warn!("stream cancelled by client before completion");
            self.finish(CLIENT_CLOSED_REQUEST);
        }
    }
}
