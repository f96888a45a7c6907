//! Upload tasks: one unit of extraction work bound to its source bytes.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::extract::{ArchiveExtractor, ExtractError, TabularError, TabularSplitter};
use crate::sink::{ObjectSink, SinkError};
use crate::source::SourceBlob;
use crate::transform::{EntryTransform, TransformError};
use crate::upload::{FileKind, UploadTarget, WorkflowKind};

/// Caller-supplied identifier of one upload task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identifier for callers that do not bring their own.
    pub fn generate() -> Self {
        Self(format!("upload_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution strategy, one per registered workflow/file-kind pair.
#[derive(Clone)]
pub enum TaskVariant {
    Segmentations {
        transform: Arc<dyn EntryTransform>,
    },
    CellImages,
    Metadata {
        delimiter: u8,
        skip_rows: usize,
    },
}

impl TaskVariant {
    pub fn file_kind(&self) -> FileKind {
        match self {
            Self::Segmentations { .. } => FileKind::Segmentations,
            Self::CellImages => FileKind::CellImages,
            Self::Metadata { .. } => FileKind::Metadata,
        }
    }
}

impl fmt::Debug for TaskVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segmentations { transform } => f
                .debug_struct("Segmentations")
                .field("transform", &transform.name())
                .finish(),
            Self::CellImages => f.write_str("CellImages"),
            Self::Metadata {
                delimiter,
                skip_rows,
            } => f
                .debug_struct("Metadata")
                .field("delimiter", &(*delimiter as char))
                .field("skip_rows", skip_rows)
                .finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("could not find file: {0}")]
    SourceNotFound(String),
    #[error("could not open file: {0}")]
    OpenSource(String),
    #[error("could not open file: {0}")]
    OpenArchive(#[source] ExtractError),
    #[error("failed to extract archive: {0}")]
    Extract(#[from] ExtractError),
    #[error("could not split metadata: {0}")]
    Tabular(#[from] TabularError),
    #[error("failed at callback: {entry}: {source}")]
    Transform {
        entry: String,
        #[source]
        source: TransformError,
    },
    #[error("{source} ({written} object(s) written before the failure were kept)")]
    Partial {
        written: usize,
        #[source]
        source: Box<TaskError>,
    },
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("failed to release source: {0}")]
    Cleanup(String),
}

impl TaskError {
    /// Attach the number of objects already stored when an entry fails mid-archive.
    fn after_writes(self, written: usize) -> Self {
        if written == 0 {
            self
        } else {
            Self::Partial {
                written,
                source: Box::new(self),
            }
        }
    }
}

/// Result of a successful `execute`; stored as the ledger entry's detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    Archive {
        base_file_location: String,
        companion_ome: Option<String>,
        objects_written: Vec<String>,
    },
    Tabular {
        base_file_location: String,
        headers: Vec<String>,
        objects_written: Vec<String>,
    },
}

impl TaskOutcome {
    pub fn objects_written(&self) -> &[String] {
        match self {
            Self::Archive {
                objects_written, ..
            }
            | Self::Tabular {
                objects_written, ..
            } => objects_written,
        }
    }
}

/// One upload bound to its strategy and exclusively owned source bytes.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    workflow: WorkflowKind,
    target: UploadTarget,
    variant: TaskVariant,
    source: Option<SourceBlob>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        workflow: WorkflowKind,
        target: UploadTarget,
        variant: TaskVariant,
        source: SourceBlob,
    ) -> Self {
        Self {
            id,
            workflow,
            target,
            variant,
            source: Some(source),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn workflow(&self) -> WorkflowKind {
        self.workflow
    }

    pub fn file_kind(&self) -> FileKind {
        self.variant.file_kind()
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub fn variant(&self) -> &TaskVariant {
        &self.variant
    }

    /// Run the extraction and write every produced object to `sink`.
    ///
    /// Blocking; call from a blocking-capable thread.
    pub fn execute(
        &self,
        sink: &dyn ObjectSink,
        extractor: &ArchiveExtractor,
    ) -> Result<TaskOutcome, TaskError> {
        tracing::info!(
            task_id = %self.id,
            workflow = %self.workflow,
            file_kind = %self.file_kind(),
            "Executing task"
        );
        match &self.variant {
            TaskVariant::Segmentations { transform } => {
                self.process_archive(sink, extractor, Some(transform.as_ref()))
            }
            TaskVariant::CellImages => self.process_archive(sink, extractor, None),
            TaskVariant::Metadata {
                delimiter,
                skip_rows,
            } => self.process_tabular(sink, TabularSplitter::new(*delimiter, *skip_rows)),
        }
    }

    fn source(&self) -> Result<&SourceBlob, TaskError> {
        self.source
            .as_ref()
            .ok_or_else(|| TaskError::OpenSource("source already released".to_string()))
    }

    fn open_source(&self) -> Result<crate::source::SourceReader<'_>, TaskError> {
        let source = self.source()?;
        source.open().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TaskError::SourceNotFound(source.describe()),
            _ => TaskError::OpenSource(format!("{}: {e}", source.describe())),
        })
    }

    fn process_archive(
        &self,
        sink: &dyn ObjectSink,
        extractor: &ArchiveExtractor,
        transform: Option<&dyn EntryTransform>,
    ) -> Result<TaskOutcome, TaskError> {
        let category = self.file_kind().category_path();
        let reader = self.open_source()?;
        let mut entries = extractor.open(reader).map_err(TaskError::OpenArchive)?;
        let mut written = Vec::new();

        for entry in entries.by_ref() {
            let entry = entry.map_err(|e| TaskError::from(e).after_writes(written.len()))?;
            let (contents, name) = match transform {
                Some(transform) => transform.apply(entry.contents, &entry.name).map_err(|source| {
                    TaskError::Transform {
                        entry: entry.name.clone(),
                        source,
                    }
                    .after_writes(written.len())
                })?,
                None => (entry.contents, entry.name),
            };

            let key = self.target.destination_key(category, &name);
            sink.put(&key, &contents)
                .map_err(|e| TaskError::from(e).after_writes(written.len()))?;
            tracing::debug!(task_id = %self.id, key = %key, bytes = contents.len(), "Stored entry");
            written.push(key);
        }

        Ok(TaskOutcome::Archive {
            base_file_location: self.target.base_location(category),
            companion_ome: entries.companion().map(str::to_string),
            objects_written: written,
        })
    }

    fn process_tabular(
        &self,
        sink: &dyn ObjectSink,
        splitter: TabularSplitter,
    ) -> Result<TaskOutcome, TaskError> {
        let category = self.file_kind().category_path();
        let reader = self.open_source()?;
        let split = splitter.split(reader)?;

        let key = self.target.destination_key(category, &self.target.file_name);
        sink.put(&key, &split.body)?;
        tracing::debug!(task_id = %self.id, key = %key, bytes = split.body.len(), "Stored table");

        Ok(TaskOutcome::Tabular {
            base_file_location: self.target.base_location(category),
            headers: split.header,
            objects_written: vec![key],
        })
    }

    /// Release the source bytes. Safe to call more than once.
    pub fn cleanup(&mut self) -> Result<(), TaskError> {
        let Some(source) = self.source.take() else {
            return Ok(());
        };
        tracing::info!(task_id = %self.id, "Cleaning up task");
        source
            .release()
            .map_err(|e| TaskError::Cleanup(e.to_string()))
    }
}
