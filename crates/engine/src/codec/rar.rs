//! RAR codec (extraction only).
//!
//! Decoding is delegated to the bundled unrar library, which has no progress
//! hook. Progress is therefore reported at two points only: when extraction
//! starts and when it finishes.
//!
//! Password-protected RAR archives are not supported; encrypted entries fail
//! with [`EngineError::DecryptionFailed`].

use super::{parent_dir, single_volume, Codec, ExtractRequest, OpContext};
use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::safety::validate_entry_path;
use crate::types::{ArchiveEntry, ExtractStats};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};
use unrar::Archive;

pub struct RarCodec;

impl Codec for RarCodec {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn extract(
        &self,
        request: &ExtractRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<ExtractStats, EngineError> {
        let start = Instant::now();
        let path = single_volume(request.volumes, ArchiveFormat::Rar)?;
        if request.password.is_some() {
            warn!("RAR extraction ignores the supplied password");
        }
        ctx.progress.report(0.0);

        let mut current = Some(
            Archive::new(path)
                .as_first_part()
                .open_for_processing()
                .map_err(map_unrar_error)?,
        );

        fs::create_dir_all(request.destination)?;
        let mut stats = ExtractStats::default();

        while let Some(open) = current.take() {
            ctx.checkpoint()?;

            let Some(header) = open
                .read_header()
                .map_err(map_unrar_error)?
            else {
                break;
            };

            let entry = header.entry();
            let relative = validate_entry_path(&entry.filename)?;
            let target = request.destination.join(&relative);

            if entry.is_directory() {
                fs::create_dir_all(&target)?;
                current = Some(header.skip().map_err(map_unrar_error)?);
                continue;
            }
            if entry.is_encrypted() {
                return Err(EngineError::DecryptionFailed(format!(
                    "{} is encrypted",
                    relative.display()
                )));
            }

            let size = entry.unpacked_size;
            let parent = parent_dir(&target);
            fs::create_dir_all(parent)?;
            // unrar writes straight to the path it is given, so it gets a
            // staging name that is renamed once the entry is complete.
            let staging = tempfile::Builder::new()
                .prefix(".entry.")
                .suffix(".partial")
                .tempfile_in(parent)?
                .into_temp_path();
            current = Some(
                header
                    .extract_to(&staging)
                    .map_err(map_unrar_error)?,
            );
            staging.persist(&target)?;

            debug!(entry = %relative.display(), bytes = size, "Extracted RAR entry");
            stats.record_file(relative.to_string_lossy().replace('\\', "/"), size);
        }

        stats.duration = start.elapsed();
        info!(
            destination = %request.destination.display(),
            files = stats.files_extracted,
            bytes = stats.bytes_written,
            "Extracted RAR archive"
        );
        Ok(stats)
    }

    fn list(&self, volumes: &[PathBuf]) -> Result<(Vec<ArchiveEntry>, bool), EngineError> {
        let path = single_volume(volumes, ArchiveFormat::Rar)?;
        let mut current = Some(
            Archive::new(path)
                .open_for_listing()
                .map_err(map_unrar_error)?,
        );
        let mut entries = Vec::new();
        let mut encrypted = false;

        while let Some(open) = current.take() {
            let Some(header) = open.read_header().map_err(map_unrar_error)? else {
                break;
            };
            let entry = header.entry();
            encrypted |= entry.is_encrypted();
            entries.push(ArchiveEntry {
                path: entry.filename.to_string_lossy().into_owned(),
                is_directory: entry.is_directory(),
                size: entry.unpacked_size,
                compressed_size: None,
            });
            current = Some(header.skip().map_err(map_unrar_error)?);
        }

        Ok((entries, encrypted))
    }
}

/// unrar reports failures as status codes rendered into the message.
fn map_unrar_error(e: unrar::error::UnrarError) -> EngineError {
    classify_message(e.to_string())
}

fn classify_message(message: String) -> EngineError {
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypted") {
        EngineError::DecryptionFailed(message)
    } else {
        EngineError::Corrupted(message)
    }
}
