//! Type definitions for archive operations.

use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::source::InputSource;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Smallest accepted split-volume size (64 KiB).
pub const MIN_SPLIT_SIZE: u64 = 64 * 1024;

/// Highest accepted compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Compression level used when a request does not set one.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Extract,
    Repair,
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One create, extract or repair request.
///
/// Built with [`ArchiveOperation::builder`], which enforces the construction
/// invariants (split size is 0 or at least [`MIN_SPLIT_SIZE`], compression
/// level within 0-9). The engine owns the value for the duration of one call
/// and keeps no record of it afterwards.
#[derive(Debug)]
pub struct ArchiveOperation {
    id: String,
    kind: OperationKind,
    inputs: Vec<Arc<dyn InputSource>>,
    output: PathBuf,
    format: ArchiveFormat,
    password: Option<String>,
    split_size: u64,
    compression_level: u32,
    encrypt: bool,
    rebuild_path: Option<PathBuf>,
    created_at: SystemTime,

    /// Current lifecycle state
    pub status: OperationStatus,

    /// Last progress fraction observed
    pub progress: f32,
}

impl ArchiveOperation {
    pub fn builder(kind: OperationKind) -> OperationBuilder {
        OperationBuilder::new(kind)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Ordered input references. For extraction of a split archive these are
    /// the volumes in order.
    pub fn inputs(&self) -> &[Arc<dyn InputSource>] {
        &self.inputs
    }

    /// Archive path for create, destination directory for extract and repair.
    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Split-volume size in bytes; 0 means a single unsplit archive.
    pub fn split_size(&self) -> u64 {
        self.split_size
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    /// Where repair should write a freshly rebuilt archive, if anywhere.
    pub fn rebuild_path(&self) -> Option<&Path> {
        self.rebuild_path.as_deref()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

/// Builder for [`ArchiveOperation`].
#[derive(Debug)]
pub struct OperationBuilder {
    kind: OperationKind,
    inputs: Vec<Arc<dyn InputSource>>,
    output: Option<PathBuf>,
    format: Option<ArchiveFormat>,
    password: Option<String>,
    split_size: u64,
    compression_level: u32,
    rebuild_path: Option<PathBuf>,
}

impl OperationBuilder {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            output: None,
            format: None,
            password: None,
            split_size: 0,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            rebuild_path: None,
        }
    }

    pub fn input(mut self, source: Arc<dyn InputSource>) -> Self {
        self.inputs.push(source);
        self
    }

    pub fn inputs<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn InputSource>>,
    {
        self.inputs.extend(sources);
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Override the format otherwise resolved from the output (create) or
    /// first input (extract) name.
    pub fn format(mut self, format: ArchiveFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// An empty password is the same as no password.
    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn split_size(mut self, bytes: u64) -> Self {
        self.split_size = bytes;
        self
    }

    /// Levels above 9 are clamped to 9.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(MAX_COMPRESSION_LEVEL);
        self
    }

    pub fn rebuild_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.rebuild_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ArchiveOperation, EngineError> {
        validate_split_size(self.split_size)?;

        let output = self
            .output
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                EngineError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "output path is required",
                ))
            })?;

        if self.kind != OperationKind::Create && self.inputs.is_empty() {
            return Err(EngineError::SourceUnavailable {
                name: "(none)".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no archive input given"),
            });
        }

        let format = match (self.format, self.kind) {
            (Some(format), _) => format,
            (None, OperationKind::Create) => {
                let name = output
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ArchiveFormat::from_name(&name)?
            }
            (None, OperationKind::Extract) => ArchiveFormat::from_name(&self.inputs[0].name())?,
            (None, OperationKind::Repair) => ArchiveFormat::Zip,
        };

        let encrypt = self.password.is_some();

        Ok(ArchiveOperation {
            id: next_operation_id(),
            kind: self.kind,
            inputs: self.inputs,
            output,
            format,
            password: self.password,
            split_size: self.split_size,
            compression_level: self.compression_level,
            encrypt,
            rebuild_path: self.rebuild_path,
            created_at: SystemTime::now(),
            status: OperationStatus::Pending,
            progress: 0.0,
        })
    }
}

/// Split size must be 0 (unsplit) or at least [`MIN_SPLIT_SIZE`].
pub fn validate_split_size(split_size: u64) -> Result<(), EngineError> {
    if split_size > 0 && split_size < MIN_SPLIT_SIZE {
        return Err(EngineError::InvalidSplitSize {
            size: split_size,
            minimum: MIN_SPLIT_SIZE,
        });
    }
    Ok(())
}

fn next_operation_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("op-{:x}-{}", millis, COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Individual entry within an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path of the entry within the archive
    pub path: String,

    /// Whether this entry is a directory
    pub is_directory: bool,

    /// Uncompressed size in bytes
    pub size: u64,

    /// Compressed size in bytes (if available)
    pub compressed_size: Option<u64>,
}

/// Metadata information about an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub format: ArchiveFormat,

    /// Number of entries in the archive
    pub entries: u64,

    /// Archive size on disk, summed over all volumes
    pub compressed_bytes: u64,

    /// Sum of the entries' uncompressed sizes
    pub uncompressed_bytes: u64,

    /// Whether any entry is password-protected
    pub encrypted: bool,

    /// List of all entries in the archive
    pub entry_list: Vec<ArchiveEntry>,
}

/// A file written or recovered by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Entry name, relative to the archive root
    pub name: String,

    /// Content length in bytes
    pub size: u64,
}

/// Result of a successful create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSummary {
    /// Files written: the archive, or every split volume in order
    pub outputs: Vec<PathBuf>,

    /// Entries stored, in archive order
    pub entries: Vec<EntryRecord>,

    /// Total uncompressed bytes stored
    pub bytes_read: u64,

    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Statistics about a completed extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Number of files successfully extracted
    pub files_extracted: u64,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Files written, relative to the destination
    pub entries: Vec<EntryRecord>,

    /// Duration of the extraction operation (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ExtractStats {
    pub(crate) fn record_file(&mut self, name: String, size: u64) {
        self.files_extracted += 1;
        self.bytes_written += size;
        self.entries.push(EntryRecord { name, size });
    }
}

/// Outcome of a repair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairResult {
    /// Entries written to the recovery directory
    pub recovered: Vec<EntryRecord>,

    /// Entries skipped because they could not be read
    pub skipped: u64,

    /// Whether the tolerant sequential reader had to be used
    pub salvaged: bool,

    /// Freshly built clean archive, when one was requested
    pub rebuilt_archive: Option<PathBuf>,
}

/// What [`ArchiveEngine::run`](crate::ArchiveEngine::run) produced.
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Created(CreateSummary),
    Extracted(ExtractStats),
    Repaired(RepairResult),
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
