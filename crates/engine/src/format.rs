//! Archive formats and name-based codec dispatch.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported archive formats.
///
/// `Gzip` and `Xz` denote GZIP- or XZ-compressed TAR containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    #[serde(rename = "7z")]
    SevenZip,
    Tar,
    Gzip,
    Xz,
    Rar,
}

/// Suffix table checked longest match first; compound suffixes therefore win
/// over the single suffix they end with.
const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::Gzip),
    (".tar.xz", ArchiveFormat::Xz),
    (".tgz", ArchiveFormat::Gzip),
    (".txz", ArchiveFormat::Xz),
    (".zip", ArchiveFormat::Zip),
    (".cbz", ArchiveFormat::Zip),
    (".tar", ArchiveFormat::Tar),
    (".rar", ArchiveFormat::Rar),
    (".7z", ArchiveFormat::SevenZip),
    (".gz", ArchiveFormat::Gzip),
    (".xz", ArchiveFormat::Xz),
];

impl ArchiveFormat {
    /// Canonical file extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Gzip => "gz",
            ArchiveFormat::Xz => "xz",
            ArchiveFormat::Rar => "rar",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "application/zip",
            ArchiveFormat::SevenZip => "application/x-7z-compressed",
            ArchiveFormat::Tar => "application/x-tar",
            ArchiveFormat::Gzip => "application/gzip",
            ArchiveFormat::Xz => "application/x-xz",
            ArchiveFormat::Rar => "application/vnd.rar",
        }
    }

    /// Whether this engine can write archives of this format.
    pub fn supports_create(self) -> bool {
        !matches!(self, ArchiveFormat::SevenZip | ArchiveFormat::Rar)
    }

    /// Resolve a format from a file name by case-insensitive suffix match.
    ///
    /// Split-volume names such as `backup.zip.001` resolve by the suffix in
    /// front of the numeric volume index.
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        let lower = name.to_lowercase();
        let base = strip_volume_index(&lower).unwrap_or(&lower);

        SUFFIXES
            .iter()
            .filter(|(suffix, _)| base.ends_with(suffix) && base.len() > suffix.len())
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, format)| *format)
            .ok_or_else(|| EngineError::UnsupportedFormat(name.to_string()))
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArchiveFormat::Zip => "ZIP",
            ArchiveFormat::SevenZip => "7Z",
            ArchiveFormat::Tar => "TAR",
            ArchiveFormat::Gzip => "TAR.GZ",
            ArchiveFormat::Xz => "TAR.XZ",
            ArchiveFormat::Rar => "RAR",
        };
        f.write_str(label)
    }
}

/// Strip a trailing `.NNN` volume index (e.g. `.001`) from a lowercase name.
pub(crate) fn strip_volume_index(name: &str) -> Option<&str> {
    let (base, index) = name.rsplit_once('.')?;
    if index.len() == 3 && index.chars().all(|c| c.is_ascii_digit()) {
        Some(base)
    } else {
        None
    }
}

/// Parse the numeric volume index of a split-volume name.
pub(crate) fn volume_index(name: &str) -> Option<u32> {
    let (_, index) = name.rsplit_once('.')?;
    if index.len() == 3 && index.chars().all(|c| c.is_ascii_digit()) {
        index.parse().ok()
    } else {
        None
    }
}
