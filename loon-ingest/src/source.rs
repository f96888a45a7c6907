//! Source bytes owned by a task for its lifetime.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tempfile::TempPath;

/// Uploaded bytes backing one task.
///
/// `Temp` files are deleted by [`SourceBlob::release`]; `Path` files belong to
/// whoever handed them over and are left in place.
#[derive(Debug)]
pub enum SourceBlob {
    Path(PathBuf),
    Temp(TempPath),
    Memory(Vec<u8>),
}

impl SourceBlob {
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Temp(path) => path.display().to_string(),
            Self::Memory(bytes) => format!("<memory: {} bytes>", bytes.len()),
        }
    }

    /// Open a seekable reader over the bytes.
    pub fn open(&self) -> io::Result<SourceReader<'_>> {
        match self {
            Self::Path(path) => File::open(path).map(SourceReader::File),
            Self::Temp(path) => File::open(path).map(SourceReader::File),
            Self::Memory(bytes) => Ok(SourceReader::Memory(Cursor::new(bytes.as_slice()))),
        }
    }

    /// Release whatever the blob holds on disk.
    pub fn release(self) -> io::Result<()> {
        match self {
            Self::Temp(path) => path.close(),
            Self::Path(_) | Self::Memory(_) => Ok(()),
        }
    }
}

pub enum SourceReader<'a> {
    File(File),
    Memory(Cursor<&'a [u8]>),
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.read(buf),
            Self::Memory(c) => c.read(buf),
        }
    }
}

impl Seek for SourceReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(f) => f.seek(pos),
            Self::Memory(c) => c.seek(pos),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("source '{path}' is outside the upload root")]
pub struct OutsideUploadRoot {
    pub path: String,
}

/// Resolve a caller-supplied path against `root`, refusing anything outside it.
///
/// Relative paths are taken relative to `root`. Symlinks are resolved for
/// files that exist; a missing file is accepted only if it lies lexically
/// under `root`, and then fails at execution as not found.
pub fn confine_to_root(root: &Path, path: &Path) -> Result<PathBuf, OutsideUploadRoot> {
    let outside = || OutsideUploadRoot {
        path: path.display().to_string(),
    };
    let candidate = root.join(path);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(outside());
    }

    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    match candidate.canonicalize() {
        Ok(resolved) if resolved.starts_with(&canonical_root) => Ok(resolved),
        Ok(_) => Err(outside()),
        Err(_) if candidate.starts_with(root) || candidate.starts_with(&canonical_root) => {
            Ok(candidate)
        }
        Err(_) => Err(outside()),
    }
}
