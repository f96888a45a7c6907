//! Fixed pool of workers draining the task queue.
//!
//! Each worker claims one task at a time, marks it RUNNING, runs `execute`
//! on the blocking pool and records the terminal state. The task is owned by
//! a [`CleanupGuard`] for the whole run, so its source is released whether
//! `execute` returns or panics. A failing task never takes its worker down.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::extract::ArchiveExtractor;
use crate::ledger::StatusLedger;
use crate::queue::TaskQueue;
use crate::sink::ObjectSink;
use crate::status::StatusUpdate;
use crate::task::{Task, TaskId};

/// Status message for tasks that die without a typed error.
pub const UNEXPECTED_FAILURE: &str = "unexpected error while processing upload";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    /// Log a warning when one task runs longer than this. Nothing is cancelled.
    pub slow_task_warning: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            slow_task_warning: Duration::from_secs(300),
        }
    }
}

/// Owns a task while it executes and runs `cleanup` on drop.
struct CleanupGuard {
    task: Task,
}

impl CleanupGuard {
    fn new(task: Task) -> Self {
        Self { task }
    }

    fn task(&self) -> &Task {
        &self.task
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = self.task.cleanup() {
            tracing::warn!(task_id = %self.task.id(), error = %e, "Cleanup failed");
        }
    }
}

/// Warns if a task is still running after the threshold. Aborted on drop.
struct SlowTaskAlarm {
    task_id: TaskId,
    started: Instant,
    threshold: Duration,
    alarm_handle: JoinHandle<()>,
}

impl SlowTaskAlarm {
    fn arm(task_id: TaskId, threshold: Duration) -> Self {
        let alarm_id = task_id.clone();
        Self {
            task_id,
            started: Instant::now(),
            threshold,
            alarm_handle: tokio::spawn(async move {
                tokio::time::sleep(threshold).await;
                tracing::warn!(task_id = %alarm_id, threshold = ?threshold, "Task still running");
            }),
        }
    }

    fn finish(self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.threshold {
            tracing::info!(task_id = %self.task_id, latency = ?elapsed, "Slow task finished");
        }
    }
}

impl Drop for SlowTaskAlarm {
    fn drop(&mut self) {
        self.alarm_handle.abort();
    }
}

struct Worker {
    queue: Arc<TaskQueue>,
    ledger: Arc<StatusLedger>,
    sink: Arc<dyn ObjectSink>,
    extractor: Arc<ArchiveExtractor>,
    slow_task_warning: Duration,
}

impl Worker {
    async fn run_loop(self: Arc<Self>, index: usize, shutdown: CancellationToken) {
        tracing::debug!(worker = index, "Worker started");
        loop {
            let task = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                task = self.queue.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.process(index, task).await;
        }
        tracing::debug!(worker = index, "Worker stopped");
    }

    async fn process(&self, index: usize, task: Task) {
        let id = task.id().clone();
        tracing::info!(task_id = %id, worker = index, "Task claimed");
        self.ledger.set(&id, StatusUpdate::running());

        let alarm = SlowTaskAlarm::arm(id.clone(), self.slow_task_warning);
        let sink = Arc::clone(&self.sink);
        let extractor = Arc::clone(&self.extractor);
        let result = tokio::task::spawn_blocking(move || {
            let guard = CleanupGuard::new(task);
            guard.task().execute(sink.as_ref(), &extractor)
        })
        .await;
        alarm.finish();

        let update = match result {
            Ok(Ok(outcome)) => {
                tracing::info!(
                    task_id = %id,
                    objects = outcome.objects_written().len(),
                    "Task succeeded"
                );
                StatusUpdate::succeeded(serde_json::to_value(&outcome).unwrap_or_default())
            }
            Ok(Err(e)) => {
                tracing::error!(task_id = %id, error = %e, "Task failed");
                StatusUpdate::failed(e.to_string())
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Task aborted");
                StatusUpdate::failed(UNEXPECTED_FAILURE)
            }
        };
        self.ledger.set(&id, update);
    }
}

/// Handle to the running worker pool.
pub struct Dispatcher {
    size: usize,
    shutdown: CancellationToken,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(
        config: DispatcherConfig,
        queue: Arc<TaskQueue>,
        ledger: Arc<StatusLedger>,
        sink: Arc<dyn ObjectSink>,
        extractor: ArchiveExtractor,
    ) -> Self {
        let size = config.workers.max(1);
        let shutdown = CancellationToken::new();
        let worker = Arc::new(Worker {
            queue,
            ledger,
            sink,
            extractor: Arc::new(extractor),
            slow_task_warning: config.slow_task_warning,
        });

        let handles = (0..size)
            .map(|index| tokio::spawn(Arc::clone(&worker).run_loop(index, shutdown.clone())))
            .collect();
        tracing::info!(workers = size, "Dispatcher started");

        Self {
            size,
            shutdown,
            handles: StdMutex::new(handles),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop claiming new tasks and wait for in-flight tasks to finish.
    ///
    /// Tasks still queued stay QUEUED.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker exited abnormally");
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SinkError};
    use crate::source::SourceBlob;
    use crate::status::TaskState;
    use crate::task::TaskVariant;
    use crate::testutil::build_zip;
    use crate::transform::{EntryTransform, TransformError};
    use crate::upload::{UploadTarget, WorkflowKind};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(id: &str, variant: TaskVariant, source: SourceBlob) -> Task {
        Task::new(
            TaskId::new(id),
            WorkflowKind::LiveCyte,
            UploadTarget {
                experiment_name: "exp".to_string(),
                location: "1".to_string(),
                file_name: format!("{id}.zip"),
            },
            variant,
            source,
        )
    }

    fn image_zip(name: &str) -> SourceBlob {
        SourceBlob::Memory(build_zip(&[(name, "pixels".as_bytes())]))
    }

    async fn wait_terminal(ledger: &StatusLedger, ids: &[TaskId]) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let done = ids
                    .iter()
                    .all(|id| ledger.get(id).is_some_and(|e| e.state.is_terminal()));
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Records how many tasks the ledger shows as RUNNING during each write.
    struct ObservingSink {
        ledger: Arc<StatusLedger>,
        max_running: AtomicUsize,
        inner: MemorySink,
    }

    impl ObjectSink for ObservingSink {
        fn put(&self, key: &str, bytes: &[u8]) -> Result<(), SinkError> {
            let running = self.ledger.count(TaskState::Running);
            self.max_running.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.inner.put(key, bytes)
        }
    }

    struct PanickingTransform;

    impl EntryTransform for PanickingTransform {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn apply(&self, _: Vec<u8>, _: &str) -> Result<(Vec<u8>, String), TransformError> {
            panic!("decoder bug");
        }
    }

    struct RejectingTransform;

    impl EntryTransform for RejectingTransform {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn apply(&self, _: Vec<u8>, _: &str) -> Result<(Vec<u8>, String), TransformError> {
            Err(TransformError::new("cannot parse"))
        }
    }

    fn start(
        workers: usize,
        ledger: &Arc<StatusLedger>,
        sink: Arc<dyn ObjectSink>,
    ) -> (Arc<TaskQueue>, Dispatcher) {
        let queue = Arc::new(TaskQueue::new());
        let dispatcher = Dispatcher::start(
            DispatcherConfig {
                workers,
                ..DispatcherConfig::default()
            },
            Arc::clone(&queue),
            Arc::clone(ledger),
            sink,
            ArchiveExtractor::default(),
        );
        (queue, dispatcher)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_tasks_than_workers() {
        let ledger = Arc::new(StatusLedger::new());
        let sink = Arc::new(ObservingSink {
            ledger: Arc::clone(&ledger),
            max_running: AtomicUsize::new(0),
            inner: MemorySink::new(),
        });
        let (queue, dispatcher) = start(2, &ledger, sink.clone());

        let ids: Vec<_> = (0..6).map(|i| TaskId::new(format!("t{i}"))).collect();
        for id in &ids {
            ledger.register(id).unwrap();
            queue
                .push(task(id.as_str(), TaskVariant::CellImages, image_zip("a.tif")))
                .unwrap();
        }
        wait_terminal(&ledger, &ids).await;

        assert_eq!(ledger.count(TaskState::Succeeded), 6);
        assert!(sink.max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(sink.inner.len(), 6);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_task_fails_alone_and_is_cleaned_up() {
        let ledger = Arc::new(StatusLedger::new());
        let sink = Arc::new(MemorySink::new());
        let (queue, dispatcher) = start(1, &ledger, sink.clone());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_zip(&[("1-2.roi", "x".as_bytes())]))
            .unwrap();
        let temp = file.into_temp_path();
        let temp_location = temp.to_path_buf();

        let bad = TaskId::new("bad");
        let good = TaskId::new("good");
        ledger.register(&bad).unwrap();
        ledger.register(&good).unwrap();
        queue
            .push(task(
                "bad",
                TaskVariant::Segmentations {
                    transform: Arc::new(PanickingTransform),
                },
                SourceBlob::Temp(temp),
            ))
            .unwrap();
        queue
            .push(task("good", TaskVariant::CellImages, image_zip("b.tif")))
            .unwrap();
        wait_terminal(&ledger, &[bad.clone(), good.clone()]).await;

        let failed = ledger.get(&bad).unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.message.as_deref(), Some(UNEXPECTED_FAILURE));
        assert!(!temp_location.exists());

        let ok = ledger.get(&good).unwrap();
        assert_eq!(ok.state, TaskState::Succeeded);
        assert_eq!(
            ok.detail.unwrap()["objects_written"],
            serde_json::json!(["exp/location_1/images/b.tif"])
        );
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn failed_task_keeps_its_message() {
        let ledger = Arc::new(StatusLedger::new());
        let (queue, dispatcher) = start(1, &ledger, Arc::new(MemorySink::new()));

        let id = TaskId::new("missing");
        ledger.register(&id).unwrap();
        queue
            .push(task(
                "missing",
                TaskVariant::CellImages,
                SourceBlob::Path("/nonexistent/loon/missing.zip".into()),
            ))
            .unwrap();
        wait_terminal(&ledger, std::slice::from_ref(&id)).await;

        insta::assert_snapshot!(
            ledger.get(&id).unwrap().message.unwrap(),
            @"could not find file: /nonexistent/loon/missing.zip"
        );
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn transform_error_fails_task_and_next_task_runs() {
        let ledger = Arc::new(StatusLedger::new());
        let sink = Arc::new(MemorySink::new());
        let (queue, dispatcher) = start(1, &ledger, sink.clone());

        let rejected = TaskId::new("rejected");
        let next = TaskId::new("next");
        ledger.register(&rejected).unwrap();
        ledger.register(&next).unwrap();
        queue
            .push(task(
                "rejected",
                TaskVariant::Segmentations {
                    transform: Arc::new(RejectingTransform),
                },
                SourceBlob::Memory(build_zip(&[("3-1.roi", "x".as_bytes())])),
            ))
            .unwrap();
        queue
            .push(task("next", TaskVariant::CellImages, image_zip("c.tif")))
            .unwrap();
        wait_terminal(&ledger, &[rejected.clone(), next.clone()]).await;

        let failed = ledger.get(&rejected).unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        insta::assert_snapshot!(failed.message.unwrap(), @"failed at callback: 3-1.roi: cannot parse");
        assert!(failed.detail.is_none());

        assert_eq!(ledger.get(&next).unwrap().state, TaskState::Succeeded);
        assert_eq!(sink.keys(), vec!["exp/location_1/images/c.tif"]);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_claiming() {
        let ledger = Arc::new(StatusLedger::new());
        let (queue, dispatcher) = start(3, &ledger, Arc::new(MemorySink::new()));
        assert_eq!(dispatcher.size(), 3);

        dispatcher.shutdown().await;
        assert!(dispatcher.is_shutting_down());

        let id = TaskId::new("late");
        ledger.register(&id).unwrap();
        queue
            .push(task("late", TaskVariant::CellImages, image_zip("a.tif")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(ledger.get(&id).unwrap().state, TaskState::Queued);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn zero_workers_is_raised_to_one() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let ledger = Arc::new(StatusLedger::new());
            let (_, dispatcher) = start(0, &ledger, Arc::new(MemorySink::new()));
            assert_eq!(dispatcher.size(), 1);
            dispatcher.shutdown().await;
        });
    }
}
