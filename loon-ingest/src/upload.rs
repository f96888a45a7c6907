//! Upload classification and destination key layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Acquisition workflow that produced an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    LiveCyte,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveCyte => "live_cyte",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_cyte" => Ok(Self::LiveCyte),
            _ => Err(()),
        }
    }
}

/// What a single upload contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Zip of ImageJ `.roi` cell outlines.
    Segmentations,
    /// Zip of image tiles plus an optional OME companion descriptor.
    CellImages,
    /// Delimited text with one preamble row before the column header.
    Metadata,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segmentations => "segmentations",
            Self::CellImages => "cell_images",
            Self::Metadata => "metadata",
        }
    }

    /// Path segment(s) placed between the location prefix and the entry name.
    pub fn category_path(&self) -> &'static str {
        match self {
            Self::Segmentations => "segmentations/cells",
            Self::CellImages => "images",
            Self::Metadata => "",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "segmentations" => Ok(Self::Segmentations),
            "cell_images" => Ok(Self::CellImages),
            "metadata" => Ok(Self::Metadata),
            _ => Err(()),
        }
    }
}

/// The parts of an upload that decide where its objects land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub experiment_name: String,
    pub location: String,
    pub file_name: String,
}

impl UploadTarget {
    /// `{experiment}/location_{location}[/{category}]`.
    pub fn base_location(&self, category: &str) -> String {
        let mut base = format!("{}/location_{}", self.experiment_name, self.location);
        if !category.is_empty() {
            base.push('/');
            base.push_str(category);
        }
        base
    }

    /// Object key for one processed entry. Identical inputs always give the same key.
    pub fn destination_key(&self, category: &str, entry_name: &str) -> String {
        format!("{}/{}", self.base_location(category), entry_name)
    }
}
