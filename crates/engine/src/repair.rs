//! Best-effort recovery of damaged ZIP archives.
//!
//! Repair first tries a normal extraction. When that fails, it walks the
//! local file headers directly, ignoring the central directory, and skips
//! any entry it cannot read instead of aborting. Entries written by
//! streaming producers, whose sizes and CRC only follow the data in a data
//! descriptor, are decoded until the DEFLATE stream ends (or, when stored,
//! up to the descriptor) and checked against the descriptor's CRC. The
//! damaged input is only ever opened for reading.

use crate::codec::zip::{write_zip, PendingEntry, ZipCodec};
use crate::codec::{place_output, staging_file, write_entry_file, Codec, ExtractRequest, OpContext};
use crate::error::EngineError;
use crate::safety::validate_entry_path;
use crate::types::{EntryRecord, RepairResult, DEFAULT_COMPRESSION_LEVEL};
use flate2::bufread::DeflateDecoder;
use flate2::CrcReader;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Local file header signature, `PK\x03\x04`.
const LOCAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Optional data descriptor signature, `PK\x07\x08`.
const DESCRIPTOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x07, 0x08];

const LOCAL_HEADER_LEN: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const SCAN_CHUNK: usize = 64 * 1024;

/// Inputs of a repair.
pub struct RepairRequest<'r> {
    pub archive: &'r Path,
    /// Directory that receives the recovered tree
    pub destination: &'r Path,
    pub password: Option<&'r str>,
    /// Where to write a clean archive built from the recovered files
    pub rebuild: Option<&'r Path>,
}

/// Recover what can be recovered from `request.archive`.
///
/// Returns `salvaged == false` when the archive extracted normally.
/// Cancellation, an unreadable input and a wrong or missing password abort
/// the call; per-entry read errors during salvage are counted in `skipped`.
pub fn repair(
    request: &RepairRequest<'_>,
    ctx: &mut OpContext<'_>,
) -> Result<RepairResult, EngineError> {
    if let Some(rebuild) = request.rebuild {
        if same_file(rebuild, request.archive) {
            return Err(EngineError::other(
                "rebuilt archive would overwrite the damaged input",
            ));
        }
    }

    let volumes = [request.archive.to_path_buf()];
    let standard = ZipCodec.extract(
        &ExtractRequest {
            volumes: &volumes,
            destination: request.destination,
            password: request.password,
        },
        ctx,
    );

    let mut result = match standard {
        Ok(stats) => {
            info!(archive = %request.archive.display(), "Archive is intact, no repair needed");
            RepairResult {
                recovered: stats.entries,
                ..RepairResult::default()
            }
        }
        Err(
            e @ (EngineError::Cancelled
            | EngineError::SourceUnavailable { .. }
            | EngineError::DecryptionFailed(_)),
        ) => return Err(e),
        Err(e) => {
            warn!(
                archive = %request.archive.display(),
                error = %e,
                "Standard extraction failed, salvaging local entries"
            );
            salvage(request.archive, request.destination, ctx)?
        }
    };

    if let Some(rebuild) = request.rebuild {
        rebuild_archive(request.destination, rebuild, ctx)?;
        result.rebuilt_archive = Some(rebuild.to_path_buf());
    }

    info!(
        archive = %request.archive.display(),
        recovered = result.recovered.len(),
        skipped = result.skipped,
        salvaged = result.salvaged,
        "Repair finished"
    );
    Ok(result)
}

/// Walk local file headers from the start of the file, extracting every
/// entry that reads back cleanly.
fn salvage(
    archive: &Path,
    destination: &Path,
    ctx: &mut OpContext<'_>,
) -> Result<RepairResult, EngineError> {
    let file = File::open(archive)?;
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    fs::create_dir_all(destination)?;

    let mut result = RepairResult {
        salvaged: true,
        ..RepairResult::default()
    };
    let mut pos = 0u64;

    while let Some(offset) = find_signature(&mut reader, pos, &LOCAL_HEADER_SIGNATURE)? {
        ctx.checkpoint()?;
        if len > 0 {
            ctx.progress.report(offset as f32 / len as f32);
        }

        reader.seek(SeekFrom::Start(offset))?;
        match salvage_entry(&mut reader, destination) {
            Ok(Salvaged::Entry(record)) => {
                debug!(entry = %record.name, bytes = record.size, offset, "Recovered entry");
                result.recovered.push(record);
                pos = reader.stream_position()?;
            }
            Ok(Salvaged::Directory) => {
                pos = reader.stream_position()?;
            }
            Ok(Salvaged::End) => break,
            Err(e) => {
                warn!(offset, error = %e, "Skipping unreadable entry");
                result.skipped += 1;
                pos = offset + LOCAL_HEADER_SIGNATURE.len() as u64;
            }
        }
    }

    Ok(result)
}

enum Salvaged {
    Entry(EntryRecord),
    Directory,
    /// The central directory starts here
    End,
}

fn salvage_entry(
    reader: &mut BufReader<File>,
    destination: &Path,
) -> Result<Salvaged, EngineError> {
    let start = reader.stream_position()?;
    let header = LocalHeader::read(reader)?;
    if header.flags & FLAG_DATA_DESCRIPTOR != 0 {
        return salvage_described_entry(reader, &header, destination);
    }
    reader.seek(SeekFrom::Start(start))?;

    let Some(mut entry) = zip::read::read_zipfile_from_stream(reader)
        .map_err(crate::codec::zip::map_zip_error)?
    else {
        return Ok(Salvaged::End);
    };

    let relative = validate_entry_path(Path::new(entry.name()))?;
    let target = destination.join(&relative);
    if entry.is_dir() {
        fs::create_dir_all(&target)?;
        return Ok(Salvaged::Directory);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    // A CRC mismatch surfaces as a read error at the end of the entry, before
    // the staging file is renamed into place.
    let size = write_entry_file(&mut entry, &target)?;
    Ok(Salvaged::Entry(EntryRecord {
        name: relative.to_string_lossy().replace('\\', "/"),
        size,
    }))
}

/// Fixed fields of a local file header that salvage needs.
struct LocalHeader {
    flags: u16,
    method: u16,
    name_len: u16,
    extra_len: u16,
}

impl LocalHeader {
    fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut raw = [0u8; LOCAL_HEADER_LEN];
        reader.read_exact(&mut raw)?;
        let field = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        Ok(LocalHeader {
            flags: field(6),
            method: field(8),
            name_len: field(26),
            extra_len: field(28),
        })
    }
}

/// CRC and sizes trailing an entry written with bit 3 set.
#[derive(Debug, PartialEq)]
struct DataDescriptor {
    crc: u32,
    compressed: u32,
    uncompressed: u32,
}

impl DataDescriptor {
    /// Read a descriptor with or without its leading signature.
    fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut raw = [0u8; 16];
        reader.read_exact(&mut raw[..12])?;
        let fields = if raw[..4] == DESCRIPTOR_SIGNATURE {
            reader.read_exact(&mut raw[12..])?;
            &raw[4..]
        } else {
            &raw[..12]
        };
        let field = |at: usize| {
            u32::from_le_bytes([fields[at], fields[at + 1], fields[at + 2], fields[at + 3]])
        };
        Ok(DataDescriptor {
            crc: field(0),
            compressed: field(4),
            uncompressed: field(8),
        })
    }
}

/// Recover an entry whose sizes are only known from the data descriptor
/// that follows it. The reader is left just past the descriptor.
fn salvage_described_entry(
    reader: &mut BufReader<File>,
    header: &LocalHeader,
    destination: &Path,
) -> Result<Salvaged, EngineError> {
    let mut raw_name = vec![0u8; usize::from(header.name_len)];
    reader.read_exact(&mut raw_name)?;
    reader.seek_relative(i64::from(header.extra_len))?;
    let name = String::from_utf8_lossy(&raw_name).into_owned();

    if header.flags & FLAG_ENCRYPTED != 0 {
        return Err(EngineError::DecryptionFailed(format!("{} is encrypted", name)));
    }

    let relative = validate_entry_path(Path::new(&name))?;
    let target = destination.join(&relative);
    let is_dir = name.ends_with('/');

    let mut staging = if is_dir {
        None
    } else {
        Some(staging_file(&target)?)
    };
    let (crc, size) = {
        let mut sink = io::sink();
        let out: &mut dyn Write = match staging.as_mut() {
            Some(file) => file.as_file_mut(),
            None => &mut sink,
        };
        match header.method {
            METHOD_DEFLATED => inflate_until_end(reader, out)?,
            METHOD_STORED => copy_until_descriptor(reader, out)?,
            other => {
                return Err(EngineError::Corrupted(format!(
                    "{}: unsupported compression method {}",
                    name, other
                )))
            }
        }
    };

    let descriptor = DataDescriptor::read(reader)?;
    // the declared size is the low 32 bits for entries past 4 GiB
    if descriptor.crc != crc || u64::from(descriptor.uncompressed) != size & 0xffff_ffff {
        // dropping the staging file removes it
        return Err(EngineError::Corrupted(format!(
            "{}: checksum mismatch against data descriptor",
            name
        )));
    }

    match staging {
        None => {
            fs::create_dir_all(&target)?;
            Ok(Salvaged::Directory)
        }
        Some(staging) => {
            staging.persist(&target)?;
            Ok(Salvaged::Entry(EntryRecord {
                name: relative.to_string_lossy().replace('\\', "/"),
                size,
            }))
        }
    }
}

/// Inflate one raw DEFLATE stream into `out`, stopping at its end marker so
/// the reader sits on the data descriptor. Returns the CRC and length of the
/// inflated bytes.
fn inflate_until_end(
    reader: &mut BufReader<File>,
    out: &mut dyn Write,
) -> Result<(u32, u64), EngineError> {
    // the bufread decoder consumes only the input the stream actually uses
    let mut decoder = CrcReader::new(DeflateDecoder::new(&mut *reader));
    let size = io::copy(&mut decoder, out)?;
    Ok((decoder.crc().sum(), size))
}

/// Copy stored data up to the first descriptor whose sizes match the bytes
/// before it, leaving the reader on that descriptor.
fn copy_until_descriptor(
    reader: &mut BufReader<File>,
    out: &mut dyn Write,
) -> Result<(u32, u64), EngineError> {
    let data_start = reader.stream_position()?;
    let mut from = data_start;

    loop {
        let Some(at) = find_signature(reader, from, &DESCRIPTOR_SIGNATURE)? else {
            return Err(EngineError::Corrupted(
                "stored entry has no data descriptor".to_string(),
            ));
        };
        let len = at - data_start;
        reader.seek(SeekFrom::Start(at))?;
        let candidate = DataDescriptor::read(reader)?;

        // the signature bytes can occur inside the data itself
        if u64::from(candidate.compressed) == len && candidate.uncompressed == candidate.compressed
        {
            reader.seek(SeekFrom::Start(data_start))?;
            let mut data = CrcReader::new((&mut *reader).take(len));
            io::copy(&mut data, out)?;
            let crc = data.crc().sum();
            reader.seek(SeekFrom::Start(at))?;
            return Ok((crc, len));
        }
        from = at + 1;
    }
}

/// Offset of the first occurrence of `signature` at or after `from`.
fn find_signature<R: Read + Seek>(
    reader: &mut R,
    from: u64,
    signature: &[u8; 4],
) -> io::Result<Option<u64>> {
    let overlap = signature.len() - 1;
    let mut buffer = vec![0u8; SCAN_CHUNK + overlap];
    let mut base = from;
    let mut carried = 0usize;
    reader.seek(SeekFrom::Start(from))?;

    loop {
        let read = reader.read(&mut buffer[carried..])?;
        if read == 0 {
            return Ok(None);
        }
        let filled = carried + read;
        if let Some(index) = buffer[..filled]
            .windows(signature.len())
            .position(|w| w == signature)
        {
            return Ok(Some(base + index as u64));
        }

        // keep the tail so a signature straddling two reads is still found
        let keep = overlap.min(filled);
        buffer.copy_within(filled - keep..filled, 0);
        base += (filled - keep) as u64;
        carried = keep;
    }
}

/// Package every file under `recovered` into a clean, unencrypted ZIP.
fn rebuild_archive(
    recovered: &Path,
    output: &Path,
    ctx: &mut OpContext<'_>,
) -> Result<(), EngineError> {
    // Collected before the staging file exists, which may sit inside
    // `recovered`.
    let mut files: Vec<(String, PathBuf, u64)> = Vec::new();
    for entry in WalkDir::new(recovered).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(recovered) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let len = entry.metadata().map_err(io::Error::from)?.len();
        files.push((name, entry.path().to_path_buf(), len));
    }

    let pending: Vec<PendingEntry<'_>> = files
        .iter()
        .map(|(name, path, len)| PendingEntry {
            name,
            path,
            len: *len,
        })
        .collect();

    let mut staging = staging_file(output)?;
    write_zip(
        &pending,
        staging.as_file_mut(),
        DEFAULT_COMPRESSION_LEVEL,
        None,
        ctx,
    )?;
    place_output(staging, output, 0)?;

    info!(output = %output.display(), entries = pending.len(), "Rebuilt clean archive");
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
