//! # Archive Engine
//!
//! Create, extract and repair compressed archives from arbitrary byte
//! sources, with progress reporting and cancellation.
//!
//! Every operation runs synchronously on the calling thread. Inputs are
//! copied into private temporary files first, so sources may be anything
//! readable; those copies are removed before the call returns, whatever the
//! outcome.
//!
//! ## Supported Formats
//!
//! - ZIP: create (DEFLATE or STORED, optional AES-256, optional split
//!   volumes) and extract
//! - TAR, TAR+GZIP, TAR+XZ: create and extract
//! - 7-Zip, RAR: extract only
//!
//! Damaged ZIPs can be salvaged with a repair operation that walks local
//! headers and skips unreadable entries.
//!
//! ## Example
//!
//! ```rust,no_run
//! use archive_engine::{
//!     ArchiveEngine, ArchiveOperation, EngineConfig, OperationKind, PathSource,
//! };
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ArchiveEngine::new(EngineConfig::default());
//!
//! let op = ArchiveOperation::builder(OperationKind::Create)
//!     .input(PathSource::shared("report.pdf"))
//!     .input(PathSource::shared("photo.jpg"))
//!     .output("bundle.zip")
//!     .password(Some("secret".to_string()))
//!     .split_size(1024 * 1024)
//!     .build()?;
//!
//! let cancel = Arc::new(AtomicBool::new(false));
//! let summary = engine.create(&op, &|p: f32| println!("{:.0}%", p * 100.0), cancel)?;
//! println!("Wrote {} volume(s)", summary.outputs.len());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod probe;
pub mod progress;
pub mod repair;
pub mod safety;
pub mod source;
pub mod types;

// Re-export main types
pub use config::EngineConfig;
pub use engine::ArchiveEngine;
pub use error::{ConfigError, EngineError, ErrorKind, SecurityError};
pub use format::ArchiveFormat;
pub use safety::EntryType;
pub use source::{InputSource, MaterializedSource, MemorySource, PathSource};
pub use types::{
    ArchiveEntry, ArchiveInfo, ArchiveOperation, CreateSummary, EntryRecord, ExtractStats,
    OperationBuilder, OperationKind, OperationOutcome, OperationStatus, RepairResult,
    MIN_SPLIT_SIZE,
};

/// Progress sink: receives completion fractions in `[0.0, 1.0]`.
///
/// Values passed during one operation never decrease, and a successful
/// operation always ends with exactly `1.0`. The callback runs on the
/// engine's thread and should hand work off rather than block.
pub type ProgressCallback<'a> = dyn Fn(f32) + Send + Sync + 'a;
