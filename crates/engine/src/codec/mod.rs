//! Format codecs.
//!
//! Each archive format is handled by one [`Codec`]. Codecs only ever touch
//! materialized sources (local, seekable temp files) and write output through
//! temporary names that are renamed into place when complete.

pub mod rar;
pub mod sevenz;
pub mod tar;
pub mod volume;
pub mod zip;

use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::progress::ProgressAccountant;
use crate::source::MaterializedSource;
use crate::types::{ArchiveEntry, CreateSummary, ExtractStats};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;

/// Per-call state threaded through a codec.
pub struct OpContext<'a> {
    pub progress: ProgressAccountant<'a>,
    pub cancel: &'a AtomicBool,
}

impl<'a> OpContext<'a> {
    pub fn new(progress: ProgressAccountant<'a>, cancel: &'a AtomicBool) -> Self {
        Self { progress, cancel }
    }

    /// Entry-granularity cancellation checkpoint.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// Inputs of an archive creation.
pub struct CreateRequest<'r> {
    /// Entry name and content of every source, in archive order
    pub sources: &'r [(String, MaterializedSource)],
    pub output: &'r Path,
    pub password: Option<&'r str>,
    pub split_size: u64,
    pub level: u32,
}

/// Inputs of an extraction.
pub struct ExtractRequest<'r> {
    /// Archive bytes; more than one path means ordered split volumes
    pub volumes: &'r [PathBuf],
    pub destination: &'r Path,
    pub password: Option<&'r str>,
}

/// One archive format.
pub trait Codec {
    fn format(&self) -> ArchiveFormat;

    /// Write `request.sources` into a new archive. Read-only formats keep
    /// the default, which rejects the request.
    fn create(
        &self,
        request: &CreateRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<CreateSummary, EngineError> {
        let _ = (request, ctx);
        Err(EngineError::UnsupportedFormat(format!(
            "{} archives can be extracted but not created",
            self.format()
        )))
    }

    /// Recreate the archive's tree under `request.destination`.
    fn extract(
        &self,
        request: &ExtractRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<ExtractStats, EngineError>;

    /// List entries without extracting.
    fn list(&self, volumes: &[PathBuf]) -> Result<(Vec<ArchiveEntry>, bool), EngineError>;
}

/// Codec responsible for `format`.
pub fn codec_for(format: ArchiveFormat) -> Box<dyn Codec> {
    match format {
        ArchiveFormat::Zip => Box::new(self::zip::ZipCodec),
        ArchiveFormat::Tar | ArchiveFormat::Gzip | ArchiveFormat::Xz => {
            Box::new(self::tar::TarCodec::new(format))
        }
        ArchiveFormat::SevenZip => Box::new(sevenz::SevenZipCodec),
        ArchiveFormat::Rar => Box::new(rar::RarCodec),
    }
}

/// The single archive path of a non-splittable format.
pub(crate) fn single_volume<'p>(
    volumes: &'p [PathBuf],
    format: ArchiveFormat,
) -> Result<&'p Path, EngineError> {
    match volumes {
        [only] => Ok(only),
        [] => Err(EngineError::other("no archive given")),
        _ => Err(EngineError::UnsupportedFormat(format!(
            "split {} archives are not supported",
            format
        ))),
    }
}

/// Directory that holds `path`, for staging temp files beside it.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Temp file beside `target`, named so it cannot be mistaken for a finished
/// output.
pub(crate) fn staging_file(target: &Path) -> io::Result<NamedTempFile> {
    let parent = parent_dir(target);
    fs::create_dir_all(parent)?;
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!(".{}.", stem))
        .suffix(".partial")
        .tempfile_in(parent)
}

/// Write one entry's content to `target` through a staging file, so an
/// interrupted copy never leaves a truncated file under the entry's name.
pub(crate) fn write_entry_file<R: Read + ?Sized>(
    reader: &mut R,
    target: &Path,
) -> Result<u64, EngineError> {
    let mut staging = staging_file(target)?;
    let written = io::copy(reader, staging.as_file_mut())?;
    staging.persist(target)?;
    Ok(written)
}

/// Move a finished staging archive to `output`, or cut it into volumes.
pub(crate) fn place_output(
    staging: NamedTempFile,
    output: &Path,
    split_size: u64,
) -> Result<Vec<PathBuf>, EngineError> {
    if split_size > 0 {
        // staging is removed on drop once the volumes are written
        volume::split_into_volumes(staging.path(), output, split_size)
    } else {
        staging.persist(output)?;
        Ok(vec![output.to_path_buf()])
    }
}

/// Summed size of all volumes on disk.
pub(crate) fn volumes_len(volumes: &[PathBuf]) -> Result<u64, EngineError> {
    let mut total = 0;
    for path in volumes {
        total += File::open(path)?.metadata()?.len();
    }
    Ok(total)
}
