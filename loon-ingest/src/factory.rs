//! Registry of workflow/file-kind pairs and the tasks they produce.

use std::sync::Arc;

use crate::source::SourceBlob;
use crate::task::{Task, TaskId, TaskVariant};
use crate::transform::{EntryTransform, RoiToGeoJson};
use crate::upload::{FileKind, UploadTarget, WorkflowKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateTaskError {
    #[error("unknown task type '{file_kind}' for workflow '{workflow}'")]
    UnsupportedCombination { workflow: String, file_kind: String },
    #[error("failed to create task: missing required attribute '{0}'")]
    MissingAttribute(&'static str),
}

/// Everything a task needs besides its kind. Every field is required.
#[derive(Debug, Default)]
pub struct TaskAttributes {
    pub id: Option<TaskId>,
    pub file_name: Option<String>,
    pub location: Option<String>,
    pub experiment_name: Option<String>,
    pub source: Option<SourceBlob>,
}

impl TaskAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_experiment_name(mut self, experiment_name: impl Into<String>) -> Self {
        self.experiment_name = Some(experiment_name.into());
        self
    }

    pub fn with_source(mut self, source: SourceBlob) -> Self {
        self.source = Some(source);
        self
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, CreateTaskError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(CreateTaskError::MissingAttribute(name))
}

/// Builds tasks for every registered workflow/file-kind pair.
#[derive(Clone)]
pub struct TaskFactory {
    segmentation_transform: Arc<dyn EntryTransform>,
    metadata_delimiter: u8,
    metadata_skip_rows: usize,
}

impl Default for TaskFactory {
    fn default() -> Self {
        Self {
            segmentation_transform: Arc::new(RoiToGeoJson),
            metadata_delimiter: b',',
            metadata_skip_rows: 1,
        }
    }
}

impl TaskFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata_format(mut self, delimiter: u8, skip_rows: usize) -> Self {
        self.metadata_delimiter = delimiter;
        self.metadata_skip_rows = skip_rows;
        self
    }

    /// Create a task from wire names, e.g. `("live_cyte", "segmentations")`.
    pub fn create(
        &self,
        workflow: &str,
        file_kind: &str,
        attributes: TaskAttributes,
    ) -> Result<Task, CreateTaskError> {
        let unsupported = || CreateTaskError::UnsupportedCombination {
            workflow: workflow.to_string(),
            file_kind: file_kind.to_string(),
        };
        let workflow_kind = workflow.parse::<WorkflowKind>().map_err(|_| unsupported())?;
        let file_kind = file_kind.parse::<FileKind>().map_err(|_| unsupported())?;
        self.create_kind(workflow_kind, file_kind, attributes)
    }

    pub fn create_kind(
        &self,
        workflow: WorkflowKind,
        file_kind: FileKind,
        attributes: TaskAttributes,
    ) -> Result<Task, CreateTaskError> {
        let variant = match (workflow, file_kind) {
            (WorkflowKind::LiveCyte, FileKind::Segmentations) => TaskVariant::Segmentations {
                transform: Arc::clone(&self.segmentation_transform),
            },
            (WorkflowKind::LiveCyte, FileKind::CellImages) => TaskVariant::CellImages,
            (WorkflowKind::LiveCyte, FileKind::Metadata) => TaskVariant::Metadata {
                delimiter: self.metadata_delimiter,
                skip_rows: self.metadata_skip_rows,
            },
        };

        let TaskAttributes {
            id,
            file_name,
            location,
            experiment_name,
            source,
        } = attributes;
        let target = UploadTarget {
            file_name: required(file_name, "file_name")?,
            location: required(location, "location")?,
            experiment_name: required(experiment_name, "experiment_name")?,
        };
        let source = source.ok_or(CreateTaskError::MissingAttribute("source"))?;
        let id = id.ok_or(CreateTaskError::MissingAttribute("id"))?;

        tracing::info!(task_id = %id, %workflow, %file_kind, "Created task");
        Ok(Task::new(id, workflow, target, variant, source))
    }
}
