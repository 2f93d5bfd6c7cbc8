//! 7-Zip codec (extraction only).
//!
//! Password-protected 7z archives are not supported: a password on the
//! request is ignored and an encrypted archive fails with
//! [`EngineError::DecryptionFailed`].

use super::{single_volume, write_entry_file, Codec, ExtractRequest, OpContext};
use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::progress::ProgressReader;
use crate::safety::validate_entry_path;
use crate::types::{ArchiveEntry, ExtractStats};
use sevenz_rust2::{Password, SevenZReader};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct SevenZipCodec;

impl Codec for SevenZipCodec {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn extract(
        &self,
        request: &ExtractRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<ExtractStats, EngineError> {
        let start = Instant::now();
        let path = single_volume(request.volumes, ArchiveFormat::SevenZip)?;
        if request.password.is_some() {
            warn!("7z extraction ignores the supplied password");
        }
        let mut reader = open_reader(path)?;

        ctx.progress.set_total(
            reader
                .archive()
                .files
                .iter()
                .filter(|f| !f.is_directory)
                .map(|f| f.size)
                .sum(),
        );
        fs::create_dir_all(request.destination)?;

        let mut stats = ExtractStats::default();
        // The callback can only return the library's error type, so engine
        // errors are parked here and the walk is stopped with `Ok(false)`.
        let mut failure: Option<EngineError> = None;

        let walk = reader.for_each_entries(|entry, data| {
            if let Err(e) = ctx.checkpoint() {
                failure = Some(e);
                return Ok(false);
            }

            let relative = match validate_entry_path(Path::new(&entry.name)) {
                Ok(p) => p,
                Err(e) => {
                    failure = Some(e.into());
                    return Ok(false);
                }
            };
            let target = request.destination.join(&relative);

            let written = if entry.is_directory {
                fs::create_dir_all(&target).map_err(EngineError::from)
            } else {
                extract_file(data, &target, ctx).map(|size| {
                    debug!(entry = %relative.display(), bytes = size, "Extracted 7z entry");
                    stats.record_file(relative.to_string_lossy().replace('\\', "/"), size);
                })
            };

            match written {
                Ok(()) => Ok(true),
                Err(e) => {
                    failure = Some(e);
                    Ok(false)
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        walk.map_err(map_sevenz_error)?;

        stats.duration = start.elapsed();
        info!(
            destination = %request.destination.display(),
            files = stats.files_extracted,
            bytes = stats.bytes_written,
            "Extracted 7z archive"
        );
        Ok(stats)
    }

    fn list(&self, volumes: &[PathBuf]) -> Result<(Vec<ArchiveEntry>, bool), EngineError> {
        let path = single_volume(volumes, ArchiveFormat::SevenZip)?;
        let reader = open_reader(path)?;

        let entries = reader
            .archive()
            .files
            .iter()
            .map(|f| ArchiveEntry {
                path: f.name.clone(),
                is_directory: f.is_directory,
                size: f.size,
                compressed_size: None,
            })
            .collect();

        // Headers of an encrypted archive cannot be read without the
        // password, so anything listed here was stored in the clear.
        Ok((entries, false))
    }
}

fn open_reader(path: &Path) -> Result<SevenZReader<File>, EngineError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    SevenZReader::new(file, len, Password::empty()).map_err(map_sevenz_error)
}

fn extract_file(
    data: &mut dyn Read,
    target: &Path,
    ctx: &mut OpContext<'_>,
) -> Result<u64, EngineError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut reader = ProgressReader::new(data, &mut ctx.progress);
    write_entry_file(&mut reader, target)
}

/// The library reports password problems only through its messages.
fn map_sevenz_error(e: sevenz_rust2::Error) -> EngineError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") || lower.contains("aes") {
        EngineError::DecryptionFailed(message)
    } else {
        EngineError::Corrupted(message)
    }
}
