//! TAR codec, plain or wrapped in GZIP or XZ.
//!
//! Creation streams sources through the compressor with byte progress.
//! Extraction is a single sequential pass; the compressed stream does not
//! reveal its uncompressed length cheaply, so progress there is coarse.

use super::{
    place_output, single_volume, staging_file, write_entry_file, Codec, CreateRequest,
    ExtractRequest, OpContext,
};
use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::progress::{ProgressReader, COARSE_MIDPOINT};
use crate::safety::{validate_entry_path, EntryType};
use crate::types::{ArchiveEntry, CreateSummary, EntryRecord, ExtractStats};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tar::{Archive, Builder, EntryType as TarEntryType, Header};
use tracing::{debug, info, warn};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

pub struct TarCodec {
    format: ArchiveFormat,
}

impl TarCodec {
    /// `format` must be one of `Tar`, `Gzip` or `Xz`.
    pub fn new(format: ArchiveFormat) -> Self {
        Self { format }
    }

    fn decoder(&self, file: File) -> Box<dyn Read> {
        let reader = BufReader::new(file);
        match self.format {
            ArchiveFormat::Gzip => Box::new(GzDecoder::new(reader)),
            ArchiveFormat::Xz => Box::new(XzDecoder::new(reader)),
            _ => Box::new(reader),
        }
    }
}

/// Compressor stage between the TAR builder and the output file.
enum Compressor<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Xz(XzEncoder<W>),
}

impl<W: Write> Compressor<W> {
    fn new(format: ArchiveFormat, inner: W, level: u32) -> Self {
        match format {
            ArchiveFormat::Gzip => Compressor::Gzip(GzEncoder::new(inner, Compression::new(level))),
            ArchiveFormat::Xz => Compressor::Xz(XzEncoder::new(inner, level)),
            _ => Compressor::Plain(inner),
        }
    }

    /// Write the compressor footer and hand back the inner writer.
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Plain(w) => Ok(w),
            Compressor::Gzip(encoder) => encoder.finish(),
            Compressor::Xz(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Plain(w) => w.write(buf),
            Compressor::Gzip(encoder) => encoder.write(buf),
            Compressor::Xz(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Plain(w) => w.flush(),
            Compressor::Gzip(encoder) => encoder.flush(),
            Compressor::Xz(encoder) => encoder.flush(),
        }
    }
}

impl Codec for TarCodec {
    fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn create(
        &self,
        request: &CreateRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<CreateSummary, EngineError> {
        if request.password.is_some() {
            return Err(EngineError::UnsupportedFormat(format!(
                "{} archives cannot be encrypted",
                self.format
            )));
        }
        if request.split_size > 0 {
            return Err(EngineError::UnsupportedFormat(format!(
                "{} archives cannot be split",
                self.format
            )));
        }

        let start = Instant::now();
        ctx.progress
            .set_total(request.sources.iter().map(|(_, s)| s.len()).sum());

        let mut staging = staging_file(request.output)?;
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut entries = Vec::with_capacity(request.sources.len());
        {
            let compressor = Compressor::new(
                self.format,
                BufWriter::new(staging.as_file_mut()),
                request.level,
            );
            let mut builder = Builder::new(compressor);

            for (name, source) in request.sources {
                ctx.checkpoint()?;

                // GNU headers carry names longer than 100 bytes in a
                // long-name extension entry.
                let mut header = Header::new_gnu();
                header.set_entry_type(TarEntryType::Regular);
                header.set_size(source.len());
                header.set_mode(0o644);
                header.set_mtime(mtime);
                header.set_cksum();

                let input = ProgressReader::new(source.open()?, &mut ctx.progress);
                builder.append_data(&mut header, name, input)?;
                debug!(entry = %name, bytes = source.len(), "Stored TAR entry");

                entries.push(EntryRecord {
                    name: name.clone(),
                    size: source.len(),
                });
            }

            let compressor = builder.into_inner()?;
            let mut inner = compressor.finish()?;
            inner.flush()?;
        }

        let outputs = place_output(staging, request.output, 0)?;
        info!(
            output = %request.output.display(),
            format = %self.format,
            entries = entries.len(),
            "Created TAR archive"
        );

        Ok(CreateSummary {
            outputs,
            bytes_read: entries.iter().map(|e| e.size).sum(),
            entries,
            duration: start.elapsed(),
        })
    }

    fn extract(
        &self,
        request: &ExtractRequest<'_>,
        ctx: &mut OpContext<'_>,
    ) -> Result<ExtractStats, EngineError> {
        let start = Instant::now();
        let path = single_volume(request.volumes, self.format)?;
        let mut archive = Archive::new(self.decoder(File::open(path)?));

        fs::create_dir_all(request.destination)?;
        let mut stats = ExtractStats::default();

        for entry in archive.entries().map_err(corrupted)? {
            ctx.checkpoint()?;
            let mut entry = entry.map_err(corrupted)?;

            let raw_path = entry.path().map_err(corrupted)?.into_owned();
            let relative = validate_entry_path(&raw_path)?;
            let target = request.destination.join(&relative);

            match entry_type(entry.header().entry_type()) {
                EntryType::Directory => {
                    fs::create_dir_all(&target)?;
                }
                EntryType::File => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let size = write_entry_file(&mut entry, &target).map_err(|e| match e {
                        EngineError::Io(err) if err.kind() == io::ErrorKind::InvalidData => {
                            EngineError::Corrupted(err.to_string())
                        }
                        other => other,
                    })?;
                    debug!(entry = %relative.display(), bytes = size, "Extracted TAR entry");
                    stats.record_file(relative.to_string_lossy().replace('\\', "/"), size);
                }
                EntryType::Other => {
                    warn!(entry = %relative.display(), "Skipping non-regular TAR entry");
                }
            }

            ctx.progress.report(COARSE_MIDPOINT);
        }

        stats.duration = start.elapsed();
        info!(
            destination = %request.destination.display(),
            format = %self.format,
            files = stats.files_extracted,
            "Extracted TAR archive"
        );
        Ok(stats)
    }

    fn list(&self, volumes: &[PathBuf]) -> Result<(Vec<ArchiveEntry>, bool), EngineError> {
        let path = single_volume(volumes, self.format)?;
        let mut archive = Archive::new(self.decoder(File::open(path)?));
        let mut entries = Vec::new();

        for entry in archive.entries().map_err(corrupted)? {
            let entry = entry.map_err(corrupted)?;
            let header = entry.header();
            entries.push(ArchiveEntry {
                path: entry.path().map_err(corrupted)?.to_string_lossy().into_owned(),
                is_directory: header.entry_type().is_dir(),
                size: header.size().map_err(corrupted)?,
                compressed_size: None,
            });
        }

        Ok((entries, false))
    }
}

fn entry_type(kind: TarEntryType) -> EntryType {
    if kind.is_dir() {
        EntryType::Directory
    } else if kind.is_file() || kind.is_contiguous() {
        EntryType::File
    } else {
        EntryType::Other
    }
}

/// Header-level read errors mean the stream is not a valid TAR.
fn corrupted(e: io::Error) -> EngineError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
            EngineError::Corrupted(e.to_string())
        }
        _ => EngineError::Io(e),
    }
}
