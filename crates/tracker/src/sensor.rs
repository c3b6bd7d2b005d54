//! Sample producers.
//!
//! A [`Sensor`] pushes counter values into a [`BatchBuffer`] from its own
//! task. How the values are derived from a raw signal is not this crate's
//! concern; the CLI reads them line by line from stdin.

use async_trait::async_trait;
use lumina_core::ValidationError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{BatchBuffer, RecordOutcome};

#[async_trait]
pub trait Sensor: Send + Sync {
    /// Begin producing into `buffer`. Calling `start` on a running sensor
    /// does nothing.
    fn start(&self, buffer: Arc<BatchBuffer>);

    /// Stop producing and wait until no further `record` call can happen.
    async fn stop(&self);
}

/// A sensor that produces nothing. Used by one-shot CLI commands and tests,
/// where samples are recorded directly.
#[derive(Debug, Default)]
pub struct NoopSensor {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl NoopSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sensor for NoopSensor {
    fn start(&self, _buffer: Arc<BatchBuffer>) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }
}

type LineSource = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Reads one non-negative integer per line. The reader is shared across
/// restarts, so a stop/start cycle resumes where it left off.
pub struct LineSensor {
    lines: Arc<tokio::sync::Mutex<LineSource>>,
    running: Mutex<Option<Running>>,
}

impl LineSensor {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let boxed: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(boxed.lines())),
            running: Mutex::new(None),
        }
    }

    pub fn stdin() -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()))
    }

    fn take_running(&self) -> Option<Running> {
        match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => {
                tracing::error!("LineSensor lock poisoned, recovering");
                poisoned.into_inner().take()
            }
        }
    }
}

fn parse_value(line: &str) -> Result<u32, ValidationError> {
    line.trim()
        .parse::<u32>()
        .map_err(|_| ValidationError::invalid("sample value", format!("{line:?} is not a non-negative integer")))
}

#[async_trait]
impl Sensor for LineSensor {
    fn start(&self, buffer: Arc<BatchBuffer>) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("LineSensor lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let lines = self.lines.clone();
        let task = tokio::spawn(async move {
            let mut lines = lines.lock().await;
            loop {
                let line = tokio::select! {
                    _ = token.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match parse_value(&line) {
                        Ok(value) => match buffer.record(value).await {
                            Ok(RecordOutcome::Rejected) => {
                                tracing::debug!(value, "Sample ignored, no active session");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "Batch flush failed while recording"),
                        },
                        Err(e) => tracing::warn!(error = %e, "Skipping sensor line"),
                    },
                    Ok(None) => {
                        tracing::info!("Sensor input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Sensor read failed");
                        break;
                    }
                }
            }
        });
        *running = Some(Running { cancel, task });
    }

    async fn stop(&self) {
        if let Some(Running { cancel, task }) = self.take_running() {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Sensor task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumina_db::Database;
    use std::time::Duration;

    async fn active_buffer() -> (Database, Arc<BatchBuffer>) {
        let db = Database::new_in_memory().await.unwrap();
        let session = db.create_session("a@x.com", None).await.unwrap();
        let buffer = Arc::new(BatchBuffer::new(db.clone(), "a@x.com", 100));
        buffer.activate(session);
        (db, buffer)
    }

    async fn wait_for_len(buffer: &BatchBuffer, len: usize) {
        for _ in 0..200 {
            if buffer.len() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("buffer never reached {len} samples (has {})", buffer.len());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(" 12 ").unwrap(), 12);
        assert!(parse_value("-1").is_err());
        assert!(parse_value("blink").is_err());
    }

    #[tokio::test]
    async fn test_line_sensor_records_valid_lines() {
        let (_db, buffer) = active_buffer().await;
        let sensor = LineSensor::new(tokio::io::BufReader::new(&b"1\n2\n\nnope\n3\n"[..]));

        sensor.start(buffer.clone());
        wait_for_len(&buffer, 3).await;
        sensor.stop().await;

        assert_eq!(buffer.last_value(), 3);
    }

    #[tokio::test]
    async fn test_line_sensor_stop_then_restart_resumes() {
        let (_db, buffer) = active_buffer().await;
        let (mut tx, rx) = tokio::io::duplex(64);
        let sensor = LineSensor::new(tokio::io::BufReader::new(rx));

        sensor.start(buffer.clone());
        tokio::io::AsyncWriteExt::write_all(&mut tx, b"4\n").await.unwrap();
        wait_for_len(&buffer, 1).await;

        sensor.stop().await;
        tokio::io::AsyncWriteExt::write_all(&mut tx, b"5\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(buffer.len(), 1, "stopped sensor does not record");

        sensor.start(buffer.clone());
        wait_for_len(&buffer, 2).await;
        sensor.stop().await;
        assert_eq!(buffer.last_value(), 5);
    }

    #[tokio::test]
    async fn test_noop_sensor_counts_calls() {
        let (_db, buffer) = active_buffer().await;
        let sensor = NoopSensor::new();
        sensor.start(buffer);
        sensor.stop().await;
        sensor.stop().await;
        assert_eq!((sensor.starts(), sensor.stops()), (1, 2));
    }
}
