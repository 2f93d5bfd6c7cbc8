//! The archive operation engine.
//!
//! [`ArchiveEngine`] is the single entry point hosts use. It resolves inputs
//! to local files, dispatches to the codec for the operation's format and
//! threads progress and cancellation through. Every temporary resource a call
//! creates is owned by that call's stack frame and released when it returns.

use crate::codec::volume::discover_volumes;
use crate::codec::{codec_for, CreateRequest, ExtractRequest, OpContext};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::format::ArchiveFormat;
use crate::probe::{probe_archive, probe_volumes};
use crate::progress::ProgressAccountant;
use crate::repair::{repair, RepairRequest};
use crate::safety::{dedupe_name, safe_entry_name};
use crate::source::{materialize, materialize_all, InputSource, MaterializedSource};
use crate::types::{
    validate_split_size, ArchiveInfo, ArchiveOperation, CreateSummary, ExtractStats,
    OperationKind, OperationOutcome, OperationStatus, RepairResult,
};
use crate::ProgressCallback;
use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Synchronous engine for create, extract and repair operations.
///
/// Each call blocks the calling thread until it completes. Hosts run calls
/// on a worker and must not start a second call on the same output while
/// one is in flight.
#[derive(Debug, Clone, Default)]
pub struct ArchiveEngine {
    config: EngineConfig,
}

impl ArchiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `op` to completion, updating its status and last progress.
    ///
    /// Dispatches on [`ArchiveOperation::kind`]. On return `op.status` is
    /// `Completed`, `Failed` or `Cancelled`.
    pub fn run(
        &self,
        op: &mut ArchiveOperation,
        progress: &ProgressCallback<'_>,
        cancel: Arc<AtomicBool>,
    ) -> Result<OperationOutcome, EngineError> {
        op.status = OperationStatus::Running;

        let observed = AtomicU32::new(op.progress.to_bits());
        let tracking = |fraction: f32| {
            observed.store(fraction.to_bits(), Ordering::Relaxed);
            progress(fraction);
        };

        let result = match op.kind() {
            OperationKind::Create => self
                .create(op, &tracking, cancel)
                .map(OperationOutcome::Created),
            OperationKind::Extract => self
                .extract(op, &tracking, cancel)
                .map(OperationOutcome::Extracted),
            OperationKind::Repair => self
                .repair(op, &tracking, cancel)
                .map(OperationOutcome::Repaired),
        };

        op.progress = f32::from_bits(observed.load(Ordering::Relaxed));
        op.status = match &result {
            Ok(_) => OperationStatus::Completed,
            Err(EngineError::Cancelled) => OperationStatus::Cancelled,
            Err(_) => OperationStatus::Failed,
        };
        result
    }

    /// Write every input of a `Create` operation into a new archive at
    /// `op.output()`.
    ///
    /// # Errors
    ///
    /// - `InvalidSplitSize` before anything is written
    /// - `UnsupportedFormat` for read-only formats, or a password or split
    ///   size on a format that cannot honour it
    /// - `SourceUnavailable` when an input cannot be opened
    pub fn create(
        &self,
        op: &ArchiveOperation,
        progress: &ProgressCallback<'_>,
        cancel: Arc<AtomicBool>,
    ) -> Result<CreateSummary, EngineError> {
        expect_kind(op, OperationKind::Create)?;
        self.execute(op, progress, &cancel, |ctx| {
            let format = op.format();
            validate_split_size(op.split_size())?;
            if !format.supports_create() {
                return Err(EngineError::UnsupportedFormat(format!(
                    "{} archives can be extracted but not created",
                    format
                )));
            }
            ctx.checkpoint()?;

            let sources = self.materialize_named(op.inputs())?;
            let request = CreateRequest {
                sources: &sources,
                output: op.output(),
                password: op.password(),
                split_size: op.split_size(),
                level: op.compression_level(),
            };
            codec_for(format).create(&request, ctx)
        })
    }

    /// Recreate the archive named by the inputs of an `Extract` operation
    /// under the directory `op.output()`.
    ///
    /// Several inputs are read as ordered split volumes; a single local
    /// `*.001` input pulls in its sibling volumes.
    pub fn extract(
        &self,
        op: &ArchiveOperation,
        progress: &ProgressCallback<'_>,
        cancel: Arc<AtomicBool>,
    ) -> Result<ExtractStats, EngineError> {
        expect_kind(op, OperationKind::Extract)?;
        self.execute(op, progress, &cancel, |ctx| {
            ctx.checkpoint()?;
            let (volumes, _materialized) = self.resolve_volumes(op.inputs())?;
            let request = ExtractRequest {
                volumes: &volumes,
                destination: op.output(),
                password: op.password(),
            };
            codec_for(op.format()).extract(&request, ctx)
        })
    }

    /// Recover a damaged ZIP into the directory `op.output()`, optionally
    /// rebuilding a clean archive at [`ArchiveOperation::rebuild_path`].
    pub fn repair(
        &self,
        op: &ArchiveOperation,
        progress: &ProgressCallback<'_>,
        cancel: Arc<AtomicBool>,
    ) -> Result<RepairResult, EngineError> {
        expect_kind(op, OperationKind::Repair)?;
        self.execute(op, progress, &cancel, |ctx| {
            if op.format() != ArchiveFormat::Zip {
                return Err(EngineError::UnsupportedFormat(format!(
                    "only ZIP archives can be repaired, not {}",
                    op.format()
                )));
            }
            ctx.checkpoint()?;

            let source = op.inputs()[0].as_ref();
            let materialized;
            let archive = match readable_path(source)? {
                Some(path) => path,
                None => {
                    materialized = self.materialize_one(source)?;
                    materialized.path().to_path_buf()
                }
            };

            repair(
                &RepairRequest {
                    archive: &archive,
                    destination: op.output(),
                    password: op.password(),
                    rebuild: op.rebuild_path(),
                },
                ctx,
            )
        })
    }

    /// Read the format, entry list and totals of an archive without
    /// extracting it.
    pub fn probe(&self, source: &dyn InputSource) -> Result<ArchiveInfo, EngineError> {
        if let Some(path) = readable_path(source)? {
            return probe_archive(&path);
        }
        let format = ArchiveFormat::from_name(&source.name())?;
        let materialized = self.materialize_one(source)?;
        probe_volumes(&[materialized.path().to_path_buf()], format)
    }

    /// Shared bookkeeping around one operation body: logging, the progress
    /// accountant and the final 1.0 sample.
    fn execute<T>(
        &self,
        op: &ArchiveOperation,
        progress: &ProgressCallback<'_>,
        cancel: &AtomicBool,
        body: impl FnOnce(&mut OpContext<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let start = Instant::now();
        info!(
            id = op.id(),
            kind = ?op.kind(),
            format = %op.format(),
            inputs = op.inputs().len(),
            output = %op.output().display(),
            "Starting operation"
        );

        let mut ctx = OpContext::new(ProgressAccountant::new(progress), cancel);
        match body(&mut ctx) {
            Ok(value) => {
                ctx.progress.finish();
                info!(id = op.id(), elapsed = ?start.elapsed(), "Operation completed");
                Ok(value)
            }
            Err(EngineError::Cancelled) => {
                info!(id = op.id(), "Operation cancelled");
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                warn!(id = op.id(), kind = ?e.kind(), error = %e, "Operation failed");
                Err(e)
            }
        }
    }

    fn materialize_one(&self, source: &dyn InputSource) -> Result<MaterializedSource, EngineError> {
        materialize(
            source,
            &self.config.scratch_dir,
            self.config.effective_buffer_size(),
        )
    }

    /// Materialize create inputs and give each a unique, safe entry name.
    fn materialize_named(
        &self,
        inputs: &[Arc<dyn InputSource>],
    ) -> Result<Vec<(String, MaterializedSource)>, EngineError> {
        let materialized = materialize_all(
            inputs,
            &self.config.scratch_dir,
            self.config.effective_buffer_size(),
        )?;

        let mut taken = HashSet::new();
        Ok(materialized
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let name = dedupe_name(safe_entry_name(source.name(), index + 1), &mut taken);
                (name, source)
            })
            .collect())
    }

    /// Local paths of the archive volumes named by `inputs`. Inputs without
    /// a local path are materialized; the returned sources must outlive any
    /// use of the paths.
    fn resolve_volumes(
        &self,
        inputs: &[Arc<dyn InputSource>],
    ) -> Result<(Vec<PathBuf>, Vec<MaterializedSource>), EngineError> {
        if let [only] = inputs {
            if let Some(path) = readable_path(only.as_ref())? {
                return Ok((discover_volumes(&path), Vec::new()));
            }
        }

        let mut volumes = Vec::with_capacity(inputs.len());
        let mut materialized = Vec::new();
        for input in inputs {
            match readable_path(input.as_ref())? {
                Some(path) => volumes.push(path),
                None => {
                    let source = self.materialize_one(input.as_ref())?;
                    volumes.push(source.path().to_path_buf());
                    materialized.push(source);
                }
            }
        }
        Ok((volumes, materialized))
    }
}

/// Local file behind `source`, if it has one, after checking it can be
/// opened.
fn readable_path(source: &dyn InputSource) -> Result<Option<PathBuf>, EngineError> {
    let Some(path) = source.local_path() else {
        return Ok(None);
    };
    File::open(path).map_err(|e| EngineError::SourceUnavailable {
        name: source.name(),
        source: e,
    })?;
    Ok(Some(path.to_path_buf()))
}

fn expect_kind(op: &ArchiveOperation, kind: OperationKind) -> Result<(), EngineError> {
    if op.kind() != kind {
        return Err(EngineError::other(format!(
            "expected a {:?} operation, got {:?}",
            kind,
            op.kind()
        )));
    }
    Ok(())
}
