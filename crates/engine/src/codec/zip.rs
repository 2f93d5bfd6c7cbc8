//! ZIP codec: creation with optional AES-256 and split volumes, extraction
//! with byte-accurate progress.

use super::volume::MultiVolumeReader;
use super::{place_output, staging_file, write_entry_file, Codec, CreateRequest, ExtractRequest, OpContext};
use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::progress::ProgressReader;
use crate::safety::validate_entry_path;
use crate::types::{validate_split_size, ArchiveEntry, CreateSummary, EntryRecord, ExtractStats};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::write::{FileOptions, SimpleFileOptions};
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

/// Entries at or above this size need ZIP64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

type VolumeArchive = ZipArchive<BufReader<MultiVolumeReader>>;

pub struct ZipCodec;

/// A file to store in a new ZIP.
pub(crate) struct PendingEntry<'a> {
    pub name: &'a str,
    pub path: &'a Path,
    pub len: u64,
}

impl Codec for ZipCodec {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn create(
        &self,
        request: &CreateRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<CreateSummary, EngineError> {
        validate_split_size(request.split_size)?;
        let start = Instant::now();

        let pending: Vec<PendingEntry<'_>> = request
            .sources
            .iter()
            .map(|(name, source)| PendingEntry {
                name,
                path: source.path(),
                len: source.len(),
            })
            .collect();

        let mut staging = staging_file(request.output)?;
        let entries = write_zip(
            &pending,
            staging.as_file_mut(),
            request.level,
            request.password,
            ctx,
        )?;
        let outputs = place_output(staging, request.output, request.split_size)?;

        let bytes_read = entries.iter().map(|e| e.size).sum();
        info!(
            output = %request.output.display(),
            entries = entries.len(),
            volumes = outputs.len(),
            encrypted = request.password.is_some(),
            "Created ZIP archive"
        );

        Ok(CreateSummary {
            outputs,
            entries,
            bytes_read,
            duration: start.elapsed(),
        })
    }

    fn extract(
        &self,
        request: &ExtractRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<ExtractStats, EngineError> {
        let start = Instant::now();
        let mut archive = open_archive(request.volumes)?;

        let mut total = 0u64;
        for index in 0..archive.len() {
            total += archive.by_index_raw(index).map_err(map_zip_error)?.size();
        }
        ctx.progress.set_total(total);

        fs::create_dir_all(request.destination)?;
        let mut stats = ExtractStats::default();

        for index in 0..archive.len() {
            ctx.checkpoint()?;

            let encrypted = archive
                .by_index_raw(index)
                .map_err(map_zip_error)?
                .encrypted();
            let mut entry = match (encrypted, request.password) {
                (true, Some(password)) => archive.by_index_decrypt(index, password.as_bytes()),
                (true, None) => {
                    return Err(EngineError::DecryptionFailed(
                        "archive is encrypted and no password was given".to_string(),
                    ))
                }
                (false, _) => archive.by_index(index),
            }
            .map_err(map_zip_error)?;

            let relative = validate_entry_path(Path::new(entry.name()))?;
            let target = request.destination.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut reader = ProgressReader::new(&mut entry, &mut ctx.progress);
            let size = write_entry_file(&mut reader, &target)
                .map_err(|e| classify_read_error(e, encrypted))?;
            debug!(entry = %relative.display(), bytes = size, "Extracted ZIP entry");
            stats.record_file(relative.to_string_lossy().replace('\\', "/"), size);
        }

        stats.duration = start.elapsed();
        info!(
            destination = %request.destination.display(),
            files = stats.files_extracted,
            bytes = stats.bytes_written,
            "Extracted ZIP archive"
        );
        Ok(stats)
    }

    fn list(&self, volumes: &[PathBuf]) -> Result<(Vec<ArchiveEntry>, bool), EngineError> {
        let mut archive = open_archive(volumes)?;
        let mut entries = Vec::with_capacity(archive.len());
        let mut encrypted = false;

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(map_zip_error)?;
            encrypted |= entry.encrypted();
            entries.push(ArchiveEntry {
                path: entry.name().to_string(),
                is_directory: entry.is_dir(),
                size: entry.size(),
                compressed_size: Some(entry.compressed_size()),
            });
        }

        Ok((entries, encrypted))
    }
}

/// Stream `entries` into a ZIP written to `out`.
///
/// Every entry uses the same method: STORED at level 0, DEFLATE at the given
/// level otherwise, and AES-256 when a password is supplied. Cancellation is
/// checked before each entry.
pub(crate) fn write_zip(
    entries: &[PendingEntry<'_>],
    out: &mut File,
    level: u32,
    password: Option<&str>,
    ctx: &mut OpContext<'_>,
) -> Result<Vec<EntryRecord>, EngineError> {
    ctx.progress.set_total(entries.iter().map(|e| e.len).sum());

    let mut writer = ZipWriter::new(BufWriter::new(out));
    let mut records = Vec::with_capacity(entries.len());

    for entry in entries {
        ctx.checkpoint()?;

        let options = entry_options(level, password, entry.len);
        writer
            .start_file(entry.name, options)
            .map_err(map_zip_error)?;

        let mut input = ProgressReader::new(File::open(entry.path)?, &mut ctx.progress);
        let size = io::copy(&mut input, &mut writer)?;
        debug!(entry = entry.name, bytes = size, "Stored ZIP entry");

        records.push(EntryRecord {
            name: entry.name.to_string(),
            size,
        });
    }

    let mut inner = writer.finish().map_err(map_zip_error)?;
    inner.flush()?;
    Ok(records)
}

fn entry_options(level: u32, password: Option<&str>, len: u64) -> FileOptions<'_, ()> {
    let options = SimpleFileOptions::default()
        .unix_permissions(0o644)
        .large_file(len >= ZIP64_THRESHOLD);

    let options = if level == 0 {
        options.compression_method(CompressionMethod::Stored)
    } else {
        options
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(level)))
    };

    match password {
        Some(password) => options.with_aes_encryption(AesMode::Aes256, password),
        None => options,
    }
}

fn open_archive(volumes: &[PathBuf]) -> Result<VolumeArchive, EngineError> {
    if volumes.is_empty() {
        return Err(EngineError::other("no archive given"));
    }
    let reader = MultiVolumeReader::open(volumes)?;
    ZipArchive::new(BufReader::new(reader)).map_err(map_zip_error)
}

/// Translate a `zip` crate error into the engine taxonomy.
pub(crate) fn map_zip_error(e: ZipError) -> EngineError {
    match e {
        ZipError::Io(err) => EngineError::Io(err),
        ZipError::InvalidPassword => {
            EngineError::DecryptionFailed("invalid password".to_string())
        }
        ZipError::UnsupportedArchive(msg) if msg == ZipError::PASSWORD_REQUIRED => {
            EngineError::DecryptionFailed("password required".to_string())
        }
        ZipError::InvalidArchive(msg) => EngineError::Corrupted(msg.to_string()),
        other => EngineError::Corrupted(other.to_string()),
    }
}

/// A failed read from an encrypted entry usually means the authentication
/// code did not match, i.e. the password was wrong.
fn classify_read_error(e: EngineError, encrypted: bool) -> EngineError {
    match e {
        EngineError::Io(err) if encrypted && err.kind() == io::ErrorKind::InvalidData => {
            EngineError::DecryptionFailed(err.to_string())
        }
        EngineError::Io(err) if err.kind() == io::ErrorKind::InvalidData => {
            EngineError::Corrupted(err.to_string())
        }
        other => other,
    }
}
