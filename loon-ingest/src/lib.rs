//! loon-ingest: upload processing engine for Loon imaging datasets.
//!
//! Uploads are turned into [`Task`]s by the [`TaskFactory`], queued, and run
//! by a fixed pool of workers that unpack, transform and store each entry
//! while the [`StatusLedger`] tracks progress for polling clients.

mod dispatcher;
mod ledger;
mod queue;
mod status;
mod version;

pub mod config;
pub mod extract;
pub mod factory;
pub mod service;
pub mod sink;
pub mod source;
pub mod task;
pub mod transform;
pub mod transport;
pub mod upload;

#[cfg(test)]
mod testutil;

pub use config::{ConfigError, IngestConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, UNEXPECTED_FAILURE};
pub use factory::{CreateTaskError, TaskAttributes, TaskFactory};
pub use ledger::StatusLedger;
pub use queue::{QueueClosed, TaskQueue};
pub use service::{Health, HealthSnapshot, IngestService, SubmitError, SubmitRequest};
pub use sink::{FsSink, MemorySink, ObjectSink, SinkError};
pub use source::{OutsideUploadRoot, SourceBlob, confine_to_root};
pub use status::{StatusEntry, StatusUpdate, TaskState};
pub use task::{Task, TaskError, TaskId, TaskOutcome, TaskVariant};
pub use version::{LOON_INGEST_VERSION, VersionInfo};
