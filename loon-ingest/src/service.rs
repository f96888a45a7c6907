//! IngestService: transport-agnostic submission and status.
//!
//! Owns the status ledger, the task queue and the dispatcher. Transports
//! (HTTP today) delegate to this service and never touch tasks directly.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::IngestConfig;
use crate::dispatcher::Dispatcher;
use crate::factory::{CreateTaskError, TaskAttributes, TaskFactory};
use crate::ledger::StatusLedger;
use crate::queue::{QueueClosed, TaskQueue};
use crate::sink::ObjectSink;
use crate::source::{OutsideUploadRoot, SourceBlob, confine_to_root};
use crate::status::{StatusEntry, TaskState};
use crate::task::TaskId;
use crate::version::VersionInfo;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Create(#[from] CreateTaskError),
    #[error(transparent)]
    SourceOutsideRoot(#[from] OutsideUploadRoot),
    #[error("task '{id}' is already {state}")]
    AlreadyActive { id: TaskId, state: TaskState },
    #[error("service is shutting down")]
    ShuttingDown,
}

/// One upload as handed in by a transport.
#[derive(Debug, Default)]
pub struct SubmitRequest {
    /// Caller-chosen id; generated when absent.
    pub id: Option<TaskId>,
    pub workflow: String,
    pub file_kind: String,
    pub file_name: Option<String>,
    pub location: Option<String>,
    pub experiment_name: Option<String>,
    pub source: Option<SourceBlob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Ready,
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: Health,
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub version: VersionInfo,
}

pub struct IngestService {
    factory: TaskFactory,
    upload_root: PathBuf,
    ledger: Arc<StatusLedger>,
    queue: Arc<TaskQueue>,
    dispatcher: Dispatcher,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl IngestService {
    /// Start the worker pool. Must be called inside a tokio runtime.
    pub fn new(config: &IngestConfig, sink: Arc<dyn ObjectSink>) -> Self {
        let factory = TaskFactory::new()
            .with_metadata_format(config.metadata_delimiter, config.metadata_skip_rows);
        let ledger = Arc::new(StatusLedger::new());
        let queue = Arc::new(TaskQueue::new());
        let dispatcher = Dispatcher::start(
            config.dispatcher(),
            Arc::clone(&queue),
            Arc::clone(&ledger),
            sink,
            config.extractor(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let version = match &config.build {
            Some(build) => VersionInfo::new().with_build(build.clone()),
            None => VersionInfo::new(),
        };
        Self {
            factory,
            upload_root: config.upload_root.clone(),
            ledger,
            queue,
            dispatcher,
            shutdown_tx,
            shutdown_rx,
            version,
        }
    }

    /// Validate, register and enqueue an upload.
    ///
    /// Path sources must lie under the configured upload root. Construction
    /// errors are returned before anything is recorded, so a rejected
    /// submission never appears in the ledger or the queue.
    pub fn submit(&self, request: SubmitRequest) -> Result<TaskId, SubmitError> {
        if self.dispatcher.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }

        let id = request.id.unwrap_or_else(TaskId::generate);
        let mut attributes = TaskAttributes::new().with_id(id.clone());
        attributes.file_name = request.file_name;
        attributes.location = request.location;
        attributes.experiment_name = request.experiment_name;
        attributes.source = match request.source {
            Some(SourceBlob::Path(path)) => {
                Some(SourceBlob::Path(confine_to_root(&self.upload_root, &path)?))
            }
            other => other,
        };

        let task = self
            .factory
            .create(&request.workflow, &request.file_kind, attributes)?;

        self.ledger
            .register(&id)
            .map_err(|state| SubmitError::AlreadyActive {
                id: id.clone(),
                state,
            })?;

        if let Err(QueueClosed(_task)) = self.queue.push(task) {
            self.ledger.forget(&id);
            return Err(SubmitError::ShuttingDown);
        }
        tracing::info!(task_id = %id, queued = self.queue.len(), "Task submitted");
        Ok(id)
    }

    /// Latest status, or `None` for ids this service has never accepted.
    pub fn status(&self, id: &TaskId) -> Option<StatusEntry> {
        self.ledger.get(id)
    }

    pub fn ledger(&self) -> &Arc<StatusLedger> {
        &self.ledger
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn health(&self) -> HealthSnapshot {
        let status = if *self.shutdown_rx.borrow() || self.dispatcher.is_shutting_down() {
            Health::ShuttingDown
        } else {
            Health::Ready
        };
        HealthSnapshot {
            status,
            workers: self.dispatcher.size(),
            queued: self.queue.len(),
            running: self.ledger.count(TaskState::Running),
            version: self.version.clone(),
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Stop the workers after their in-flight tasks and refuse new uploads.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.queue.close().await;
        let abandoned = self.queue.len();
        if abandoned > 0 {
            tracing::warn!(tasks = abandoned, "Queued tasks were not processed before shutdown");
        }
    }
}
