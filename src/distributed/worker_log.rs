//! Serialized logging from concurrent workers
//!
//! Each dispatched task is handed a [WorkerLog] when it is spawned. All worker handles feed one
//! channel, drained by the single [LogSink] thread, which is the only place worker messages
//! reach the global logger.
//!

use std::sync::mpsc::{Sender, channel};
use std::thread::JoinHandle;

use log::Level;

struct LogRecord {
    level: Level,
    label: String,
    message: String,
}

/// Log handle injected into a worker's task context
#[derive(Clone)]
pub struct WorkerLog {
    label: String,
    tx: Sender<LogRecord>,
}

impl WorkerLog {
    /// Copy of this handle reporting under a new worker label
    pub fn with_label(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            tx: self.tx.clone(),
        }
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        // Messages sent after the sink is finished are dropped
        let _ = self.tx.send(LogRecord {
            level,
            label: self.label.clone(),
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }
}

/// The single consumer of all worker log records for one phase
pub struct LogSink {
    tx: Option<Sender<LogRecord>>,
    handle: Option<JoinHandle<usize>>,
}

impl LogSink {
    pub fn new() -> Self {
        let (tx, rx) = channel::<LogRecord>();
        let handle = std::thread::spawn(move || {
            let mut count = 0;
            for record in rx {
                log::log!(record.level, "[{}] {}", record.label, record.message);
                count += 1;
            }
            count
        });
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn worker_log(&self, label: &str) -> WorkerLog {
        WorkerLog {
            label: label.to_string(),
            // tx is only taken by finish or drop
            tx: self.tx.as_ref().unwrap().clone(),
        }
    }

    /// Close the sink and wait for all pending records to be written
    ///
    /// All [WorkerLog] handles from this sink must have been dropped first. Returns the number of
    /// records written.
    ///
    pub fn finish(mut self) -> usize {
        self.tx.take();
        match self.handle.take() {
            Some(x) => x.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogSink {
    /// Dropping without finish() detaches the consumer thread, which exits once the last worker
    /// handle is gone
    fn drop(&mut self) {
        self.tx.take();
    }
}
