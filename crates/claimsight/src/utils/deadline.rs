use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::StorageError;

/// External fetch running on its own worker thread. Waiting past the deadline
/// abandons the worker; its late result is dropped.
#[derive(Debug)]
pub struct PendingFetch<T> {
    operation: String,
    receiver: Receiver<anyhow::Result<T>>,
    deadline: Instant,
    timeout: Duration,
}

pub fn spawn_fetch<T, F>(
    operation: impl Into<String>,
    timeout: Duration,
    task: F,
) -> Result<PendingFetch<T>, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let operation = operation.into();
    let (sender, receiver) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("claimsight-fetch-{}", operation.replace(' ', "-")))
        .spawn(move || {
            let _ = sender.send(task());
        })
        .map_err(|error| StorageError::Backend {
            operation: operation.clone(),
            cause: format!("failed to spawn fetch worker: {error}"),
        })?;

    Ok(PendingFetch {
        operation,
        receiver,
        deadline: Instant::now() + timeout,
        timeout,
    })
}

impl<T> PendingFetch<T> {
    pub fn wait(self) -> Result<T, StorageError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(remaining) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(StorageError::backend(self.operation, &error)),
            Err(RecvTimeoutError::Timeout) => Err(StorageError::Timeout {
                operation: self.operation,
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(StorageError::WorkerLost {
                operation: self.operation,
            }),
        }
    }
}

pub fn fetch_with_timeout<T, F>(
    operation: impl Into<String>,
    timeout: Duration,
    task: F,
) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    spawn_fetch(operation, timeout, task)?.wait()
}
