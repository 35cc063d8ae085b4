//! Eager-subsize suppression after ingest or edit.
//!
//! Standard ingest pipelines create every configured derivative up front.
//! The suppressor deletes those files right after the pipeline reports
//! them, leaving generation to the first real request. Repository records
//! are deliberately left in place.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::repo::{AssetId, AssetRepository};

/// A subsize file reported by the ingest pipeline.
#[derive(Debug, Clone)]
pub struct SubsizeFile {
    /// Filename relative to the asset's storage directory.
    pub filename: String,

    /// Mime type the pipeline declared for the file.
    pub mime_type: String,
}

impl SubsizeFile {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Pipeline lifecycle events the suppressor reacts to.
#[derive(Debug, Clone)]
pub enum AssetEvent {
    /// A new asset finished ingest and its eager subsizes were created.
    Ingested {
        asset_id: AssetId,
        subsizes: Vec<SubsizeFile>,
    },
    /// An existing asset was edited and its subsizes regenerated.
    Edited {
        asset_id: AssetId,
        subsizes: Vec<SubsizeFile>,
    },
}

impl AssetEvent {
    pub fn asset_id(&self) -> AssetId {
        match self {
            Self::Ingested { asset_id, .. } | Self::Edited { asset_id, .. } => *asset_id,
        }
    }

    pub fn subsizes(&self) -> &[SubsizeFile] {
        match self {
            Self::Ingested { subsizes, .. } | Self::Edited { subsizes, .. } => subsizes,
        }
    }
}

/// Outcome of one suppression pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub skipped: usize,
    pub failures: Vec<(PathBuf, io::Error)>,
}

impl CleanupReport {
    /// True when no deletion failed. Skips are not failures.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn print_report(&self) {
        println!(
            "  ✓ Suppressed {} eager derivatives ({} skipped)",
            self.deleted, self.skipped
        );
        if !self.failures.is_empty() {
            eprintln!("  ⚠ {} deletions failed:", self.failures.len());
            for (path, err) in &self.failures {
                eprintln!("    - {}: {}", path.display(), err);
            }
        }
    }
}

/// Deletes eagerly created derivative files while keeping their records.
pub struct EagerSuppressor {
    repo: Arc<dyn AssetRepository>,
}

impl EagerSuppressor {
    pub fn new(repo: Arc<dyn AssetRepository>) -> Self {
        Self { repo }
    }

    /// Delete the image-typed subsize files an event reports, out of the
    /// asset's storage directory.
    ///
    /// Best-effort: a failed deletion lands in the report and the pass
    /// continues. Only repository faults abort.
    pub fn handle(&self, event: &AssetEvent) -> Result<CleanupReport, EngineError> {
        let asset_id = event.asset_id();

        let Some(source_path) = self.repo.source_file_path(asset_id)? else {
            debug!(asset_id, "no recorded source path, nothing to suppress");
            return Ok(CleanupReport::default());
        };
        let Some(dir) = source_path.parent() else {
            return Ok(CleanupReport::default());
        };

        let mut report = CleanupReport::default();
        for subsize in event.subsizes() {
            if subsize.filename.is_empty() || !subsize.mime_type.starts_with("image") {
                report.skipped += 1;
                continue;
            }
            // Reported names must stay inside the asset's directory.
            if subsize.filename.contains('/') || subsize.filename.contains('\\') {
                warn!(filename = %subsize.filename, "skipping subsize with path separator");
                report.skipped += 1;
                continue;
            }

            let path = dir.join(&subsize.filename);
            if !path.exists() {
                report.skipped += 1;
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete eager derivative");
                    report.failures.push((path, e));
                }
            }
        }

        info!(
            asset_id,
            deleted = report.deleted,
            skipped = report.skipped,
            "suppressed eager derivatives"
        );
        Ok(report)
    }
}
