//! FIFO hand-off between submission and the worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::task::Task;

#[derive(Debug, thiserror::Error)]
#[error("task queue is closed")]
pub struct QueueClosed(pub Task);

/// Unbounded multi-producer queue whose receiver is shared by all workers.
///
/// Workers wait on the channel rather than polling; whichever worker holds
/// the receiver lock gets the next task.
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: Mutex<mpsc::UnboundedReceiver<Task>>,
    len: AtomicUsize,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, task: Task) -> Result<(), QueueClosed> {
        self.len.fetch_add(1, Ordering::AcqRel);
        self.tx.send(task).map_err(|e| {
            self.len.fetch_sub(1, Ordering::AcqRel);
            QueueClosed(e.0)
        })
    }

    /// Wait for the next task. `None` once closed and drained.
    pub async fn recv(&self) -> Option<Task> {
        let mut rx = self.rx.lock().await;
        let task = rx.recv().await?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(task)
    }

    /// Stop accepting tasks. Already queued tasks can still be received.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
