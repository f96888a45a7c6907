//! Streaming zip extraction with noise filtering and size caps.

use std::io::{Read, Seek};

use zip::ZipArchive;

/// Platform metadata that never reaches transforms or storage.
pub const DEFAULT_NOISE_FRAGMENTS: &[&str] = &[".DS_Store", "__MACOSX"];

/// Suffix of the OME-TIFF companion descriptor inside image bundles.
pub const COMPANION_SUFFIX: &str = ".companion.ome";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid zip archive: {0}")]
    Open(#[source] zip::result::ZipError),
    #[error("could not read entry '{name}': {reason}")]
    Entry { name: String, reason: String },
    #[error("archive exceeds {limit}")]
    LimitExceeded { limit: String },
}

/// Caps on what a single archive may expand to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_entries: usize,
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_entry_bytes: 512 * 1024 * 1024,
            max_total_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Final path segment of the entry name.
    pub name: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    noise: Vec<String>,
    limits: ExtractLimits,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new(
            DEFAULT_NOISE_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
            ExtractLimits::default(),
        )
    }
}

impl ArchiveExtractor {
    pub fn new(noise: Vec<String>, limits: ExtractLimits) -> Self {
        Self { noise, limits }
    }

    pub fn is_noise(&self, name: &str) -> bool {
        self.noise.iter().any(|fragment| name.contains(fragment.as_str()))
    }

    /// Open an archive for a single pass over its entries.
    pub fn open<R: Read + Seek>(&self, reader: R) -> Result<ArchiveEntries<'_, R>, ExtractError> {
        let archive = ZipArchive::new(reader).map_err(ExtractError::Open)?;
        if archive.len() > self.limits.max_entries {
            return Err(ExtractError::LimitExceeded {
                limit: format!("{} entries", self.limits.max_entries),
            });
        }
        Ok(ArchiveEntries {
            extractor: self,
            archive,
            index: 0,
            total_bytes: 0,
            companion: None,
        })
    }
}

/// Lazy, non-restartable iterator over the kept entries of an archive.
pub struct ArchiveEntries<'a, R> {
    extractor: &'a ArchiveExtractor,
    archive: ZipArchive<R>,
    index: usize,
    total_bytes: u64,
    companion: Option<String>,
}

impl<R: Read + Seek> ArchiveEntries<'_, R> {
    /// Stripped name of the companion descriptor seen so far.
    pub fn companion(&self) -> Option<&str> {
        self.companion.as_deref()
    }

    fn read_entry(&mut self, index: usize) -> Result<Option<ArchiveEntry>, ExtractError> {
        let limits = self.extractor.limits;
        let mut file = self.archive.by_index(index).map_err(|e| ExtractError::Entry {
            name: format!("#{index}"),
            reason: e.to_string(),
        })?;
        let raw_name = file.name().to_string();

        if self.extractor.is_noise(&raw_name) {
            tracing::debug!(entry = %raw_name, "Skipping noise entry");
            return Ok(None);
        }
        if file.is_dir() {
            return Ok(None);
        }

        let name = strip_directories(&raw_name).to_string();
        if name.ends_with(COMPANION_SUFFIX) {
            self.companion = Some(name.clone());
        }

        // Declared sizes can lie; cap what is actually decompressed.
        let mut contents = Vec::new();
        (&mut file)
            .take(limits.max_entry_bytes.saturating_add(1))
            .read_to_end(&mut contents)
            .map_err(|e| ExtractError::Entry {
                name: raw_name.clone(),
                reason: e.to_string(),
            })?;
        let len = contents.len() as u64;
        if len > limits.max_entry_bytes {
            return Err(ExtractError::LimitExceeded {
                limit: format!("{} bytes in entry '{raw_name}'", limits.max_entry_bytes),
            });
        }
        self.total_bytes = self.total_bytes.saturating_add(len);
        if self.total_bytes > limits.max_total_bytes {
            return Err(ExtractError::LimitExceeded {
                limit: format!("{} decompressed bytes", limits.max_total_bytes),
            });
        }

        if contents.is_empty() {
            return Ok(None);
        }
        Ok(Some(ArchiveEntry { name, contents }))
    }
}

impl<R: Read + Seek> Iterator for ArchiveEntries<'_, R> {
    type Item = Result<ArchiveEntry, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.archive.len() {
            let index = self.index;
            self.index += 1;
            match self.read_entry(index) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    // Stop after the first failure.
                    self.index = self.archive.len();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

fn strip_directories(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
