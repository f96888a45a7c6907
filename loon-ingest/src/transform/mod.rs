//! Per-entry content transforms applied during extraction.
//!
//! A transform receives the raw bytes and (directory-stripped) name of one
//! entry and returns replacement bytes plus a possibly renamed entry. It holds
//! no state between calls; a failure aborts the owning task without retry.

mod geojson;
mod roi;

pub use geojson::RoiToGeoJson;
pub use roi::{Coordinates, ImagejRoi, RoiType};

#[cfg(test)]
pub(crate) use roi::encode_polygon;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub trait EntryTransform: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn apply(&self, contents: Vec<u8>, name: &str) -> Result<(Vec<u8>, String), TransformError>;
}
