//! Key-addressed object storage that receives processed entries.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("failed to store '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Durable byte storage. `put` on an existing key overwrites it.
pub trait ObjectSink: Send + Sync + 'static {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), SinkError>;
}

/// In-process sink, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    objects: DashMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|v| v.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectSink for MemorySink {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), SinkError> {
        validate_key(key)?;
        self.objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Stores objects as files below a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, SinkError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectSink for FsSink {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), SinkError> {
        let target = self.path_for(key)?;
        let io_err = |source| SinkError::Io {
            key: key.to_string(),
            source,
        };

        let parent = target
            .parent()
            .ok_or_else(|| SinkError::InvalidKey(key.to_string()))?;
        std::fs::create_dir_all(parent).map_err(io_err)?;

        // Readers never see a truncated object: write beside the target, then rename over it.
        let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        staged.write_all(bytes).map_err(io_err)?;
        staged
            .persist(&target)
            .map_err(|e| io_err(e.error))?;

        tracing::debug!(key = %key, bytes = bytes.len(), "Stored object");
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), SinkError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.ends_with('/')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidKey(key.to_string()))
    }
}
