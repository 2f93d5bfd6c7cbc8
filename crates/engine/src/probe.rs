//! Archive probing functionality for reading metadata without extraction.

use crate::codec::{codec_for, volume::discover_volumes, volumes_len};
use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::types::ArchiveInfo;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Probe an archive to retrieve metadata without extracting.
///
/// `path` may name a whole archive or any volume of a split set; sibling
/// volumes are discovered automatically. The format comes from the name.
///
/// # Errors
///
/// Returns an error if:
/// - The name does not map to a supported format
/// - The archive cannot be read
/// - The archive is corrupted or its headers are encrypted
pub fn probe_archive(path: &Path) -> Result<ArchiveInfo, EngineError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::from_name(&name)?;
    probe_volumes(&discover_volumes(path), format)
}

/// Probe an ordered set of volumes already known to hold one `format`
/// archive.
pub fn probe_volumes(volumes: &[PathBuf], format: ArchiveFormat) -> Result<ArchiveInfo, EngineError> {
    let compressed_bytes = volumes_len(volumes)?;
    let (entry_list, encrypted) = codec_for(format).list(volumes)?;

    let uncompressed_bytes = entry_list.iter().map(|e| e.size).sum();
    debug!(
        format = %format,
        entries = entry_list.len(),
        volumes = volumes.len(),
        "Probed archive"
    );

    Ok(ArchiveInfo {
        format,
        entries: entry_list.len() as u64,
        compressed_bytes,
        uncompressed_bytes,
        encrypted,
        entry_list,
    })
}
