//! Split-volume I/O.
//!
//! A split archive is one ZIP byte stream cut into fixed-size volumes named
//! `<archive>.001`, `<archive>.002`, ... Concatenating the volumes in order
//! yields the original archive, so reading goes through a single
//! [`MultiVolumeReader`] that presents them as one seekable stream.
//!
//! This is a raw byte split, not the PKZIP spanned layout (`.z01`, `.z02`,
//! ..., `.zip` with disk numbers recorded in the headers). Tools that expect
//! spanned archives need the volumes concatenated first, and spanned sets
//! produced elsewhere are not read here.

use crate::error::EngineError;
use crate::format::volume_index;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of volume `index` (1-based) of `archive`.
pub fn volume_path(archive: &Path, index: u32) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{:03}", index));
    archive.with_file_name(name)
}

/// Cut the finished archive at `source` into volumes of `volume_size` bytes
/// named after `archive`. Every volume is staged under a temporary name and
/// renamed when complete; on failure the volumes already placed are removed.
pub fn split_into_volumes(
    source: &Path,
    archive: &Path,
    volume_size: u64,
) -> Result<Vec<PathBuf>, EngineError> {
    let mut written = Vec::new();
    match write_volumes(source, archive, volume_size, &mut written) {
        Ok(()) => {
            remove_stale_volumes(archive, written.len() as u32 + 1);
            Ok(written)
        }
        Err(e) => {
            for path in &written {
                if let Err(err) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %err, "Failed to remove partial volume");
                }
            }
            Err(e)
        }
    }
}

fn write_volumes(
    source: &Path,
    archive: &Path,
    volume_size: u64,
    written: &mut Vec<PathBuf>,
) -> Result<(), EngineError> {
    let parent = archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut input = File::open(source)?;
    let total = input.metadata()?.len();
    let mut remaining = total;
    let mut index = 1u32;

    loop {
        let mut staging = tempfile::Builder::new()
            .prefix(".volume.")
            .suffix(".partial")
            .tempfile_in(parent)?;
        let chunk = remaining.min(volume_size);
        let copied = io::copy(&mut (&mut input).take(chunk), staging.as_file_mut())?;
        if copied != chunk {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive shrank while splitting",
            )));
        }
        staging.as_file_mut().flush()?;

        let target = volume_path(archive, index);
        staging.persist(&target)?;
        debug!(volume = %target.display(), bytes = chunk, "Wrote volume");
        written.push(target);

        remaining -= chunk;
        if remaining == 0 {
            return Ok(());
        }
        index += 1;
    }
}

/// Remove leftovers of an earlier, longer volume set so discovery does not
/// pick them up.
fn remove_stale_volumes(archive: &Path, mut index: u32) {
    loop {
        let stale = volume_path(archive, index);
        if !stale.is_file() {
            return;
        }
        warn!(path = %stale.display(), "Removing stale volume from an earlier run");
        if fs::remove_file(&stale).is_err() {
            return;
        }
        index += 1;
    }
}

/// Given the path of any volume, list the whole set in order, starting at
/// `.001`. Returns just `path` when it is not a volume name.
pub fn discover_volumes(path: &Path) -> Vec<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if volume_index(&name).is_none() {
        return vec![path.to_path_buf()];
    }
    let base = path.with_extension("");

    let mut volumes = Vec::new();
    let mut index = 1;
    loop {
        let candidate = volume_path(&base, index);
        if !candidate.is_file() {
            break;
        }
        volumes.push(candidate);
        index += 1;
    }
    if volumes.is_empty() {
        volumes.push(path.to_path_buf());
    }
    volumes
}

struct Volume {
    file: File,
    start: u64,
    len: u64,
}

/// Read-only view of an ordered set of volumes as one contiguous stream.
pub struct MultiVolumeReader {
    volumes: Vec<Volume>,
    total: u64,
    pos: u64,
}

impl MultiVolumeReader {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let mut volumes = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for path in paths {
            let file = File::open(path.as_ref())?;
            let len = file.metadata()?.len();
            volumes.push(Volume { file, start, len });
            start += len;
        }
        Ok(Self {
            volumes,
            total: start,
            pos: 0,
        })
    }

    /// Combined length of all volumes.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn volume_at(&self, pos: u64) -> Option<usize> {
        self.volumes
            .iter()
            .position(|v| pos >= v.start && pos < v.start + v.len)
    }
}

impl Read for MultiVolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.total {
            return Ok(0);
        }
        let Some(index) = self.volume_at(self.pos) else {
            return Ok(0);
        };
        let volume = &mut self.volumes[index];
        let offset = self.pos - volume.start;
        let available = (volume.len - offset).min(buf.len() as u64) as usize;

        volume.file.seek(SeekFrom::Start(offset))?;
        let n = volume.file.read(&mut buf[..available])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MultiVolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.total.checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_volume_path() {
        assert_eq!(
            volume_path(Path::new("/out/backup.zip"), 1),
            PathBuf::from("/out/backup.zip.001")
        );
        assert_eq!(
            volume_path(Path::new("backup.zip"), 12),
            PathBuf::from("backup.zip.012")
        );
    }

    #[test]
    fn test_split_and_read_back() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("whole.bin");
        let data = pattern(10_000);
        fs::write(&source, &data).unwrap();

        let archive = dir.path().join("set.zip");
        let volumes = split_into_volumes(&source, &archive, 4096).unwrap();
        assert_eq!(volumes.len(), 3);
        assert_eq!(fs::metadata(&volumes[0]).unwrap().len(), 4096);
        assert_eq!(fs::metadata(&volumes[2]).unwrap().len(), 10_000 - 8192);
        assert!(!archive.exists());

        let discovered = discover_volumes(&volumes[0]);
        assert_eq!(discovered, volumes);

        let mut reader = MultiVolumeReader::open(&volumes).unwrap();
        assert_eq!(reader.len(), 10_000);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_volumes_are_a_plain_byte_split() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("whole.bin");
        let data = pattern(9_000);
        fs::write(&source, &data).unwrap();

        let archive = dir.path().join("set.zip");
        let volumes = split_into_volumes(&source, &archive, 4096).unwrap();

        let joined: Vec<u8> = volumes
            .iter()
            .flat_map(|v| fs::read(v).unwrap())
            .collect();
        assert_eq!(joined, data);
        assert!(!dir.path().join("set.z01").exists());
        assert!(volumes.iter().all(|v| v.extension().unwrap() != "zip"));
    }

    #[test]
    fn test_seek_across_volume_boundary() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("whole.bin");
        let data = pattern(300);
        fs::write(&source, &data).unwrap();
        let volumes = split_into_volumes(&source, &dir.path().join("s.zip"), 100).unwrap();

        let mut reader = MultiVolumeReader::open(&volumes).unwrap();
        reader.seek(SeekFrom::Start(95)).unwrap();
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[95..105]);

        let end = reader.seek(SeekFrom::End(-22)).unwrap();
        assert_eq!(end, 278);
        assert!(reader.seek(SeekFrom::Current(-1000)).is_err());
    }

    #[test]
    fn test_stale_volumes_are_removed() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("s.zip");
        fs::write(volume_path(&archive, 3), b"old").unwrap();

        let source = dir.path().join("whole.bin");
        fs::write(&source, pattern(150)).unwrap();
        let volumes = split_into_volumes(&source, &archive, 100).unwrap();

        assert_eq!(volumes.len(), 2);
        assert!(!volume_path(&archive, 3).exists());
    }

    #[test]
    fn test_discover_plain_path() {
        let path = Path::new("/tmp/plain.zip");
        assert_eq!(discover_volumes(path), vec![path.to_path_buf()]);
    }
}
