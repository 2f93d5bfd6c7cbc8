//! Source materialization.
//!
//! Input references are opaque: a host may hand the engine a file path, an
//! in-memory buffer, or its own content-handle type. Codecs that need random
//! access or a size up front only ever see a [`MaterializedSource`], a private
//! temporary copy that is deleted when dropped.

use crate::error::EngineError;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// Prefix of every materialized temp file in the scratch directory.
pub const MATERIALIZED_PREFIX: &str = "ngz_";

/// An opaque, readable input reference.
pub trait InputSource: Send + Sync {
    /// Display name, used for the archive entry name and format dispatch.
    fn name(&self) -> String;

    /// Open the reference for a single sequential read.
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>>;

    /// Local path backing this reference, when there is one.
    fn local_path(&self) -> Option<&Path> {
        None
    }
}

impl fmt::Debug for dyn InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSource").field("name", &self.name()).finish()
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
}

impl PathSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn shared(path: impl Into<PathBuf>) -> Arc<dyn InputSource> {
        Arc::new(Self::new(path))
    }
}

impl InputSource for PathSource {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Named bytes held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn shared(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Arc<dyn InputSource> {
        Arc::new(Self::new(name, data))
    }
}

impl InputSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(&self.data[..]))
    }
}

/// Exclusively owned temporary copy of one input reference.
///
/// The backing file is removed when this value is dropped, on every exit
/// path of the call that created it.
#[derive(Debug)]
pub struct MaterializedSource {
    name: String,
    file: NamedTempFile,
    len: u64,
}

impl MaterializedSource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open an independent read handle positioned at the start.
    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }
}

/// Copy `source` into a uniquely named temp file inside `scratch_dir`.
///
/// Fails with [`EngineError::SourceUnavailable`] when the reference cannot be
/// opened; any later read or write failure is an I/O failure and the partial
/// copy is removed before returning.
pub fn materialize(
    source: &dyn InputSource,
    scratch_dir: &Path,
    buffer_size: usize,
) -> Result<MaterializedSource, EngineError> {
    let name = source.name();
    let mut reader = source
        .open()
        .map_err(|e| EngineError::SourceUnavailable {
            name: name.clone(),
            source: e,
        })?;

    std::fs::create_dir_all(scratch_dir)?;
    let mut file = tempfile::Builder::new()
        .prefix(MATERIALIZED_PREFIX)
        .tempfile_in(scratch_dir)?;

    let len = copy_buffered(&mut reader, file.as_file_mut(), buffer_size)?;
    file.as_file_mut().flush()?;

    debug!(source = %name, bytes = len, path = %file.path().display(), "Materialized source");
    Ok(MaterializedSource { name, file, len })
}

/// Materialize every reference in order. Sources materialized before a
/// failure are released before the error is returned.
pub fn materialize_all(
    sources: &[Arc<dyn InputSource>],
    scratch_dir: &Path,
    buffer_size: usize,
) -> Result<Vec<MaterializedSource>, EngineError> {
    sources
        .iter()
        .map(|s| materialize(s.as_ref(), scratch_dir, buffer_size))
        .collect()
}

/// Stream copy with a fixed-size buffer.
pub(crate) fn copy_buffered<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    Ok(total)
}
