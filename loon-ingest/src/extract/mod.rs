//! Unpacking of uploaded sources into logical entries.

mod archive;
mod tabular;

pub use archive::{
    ArchiveEntries, ArchiveEntry, ArchiveExtractor, COMPANION_SUFFIX, DEFAULT_NOISE_FRAGMENTS,
    ExtractError, ExtractLimits,
};
pub use tabular::{TabularError, TabularSplit, TabularSplitter};
