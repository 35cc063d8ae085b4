//! Error types split by how the engine reacts to them.

use std::io;
use std::path::PathBuf;

/// All possible errors during derivative resolution and generation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ══════════════════════════════════════════════════════════════════════
    // MISSES: Resolution gives up, the caller's not-found response stands
    // ══════════════════════════════════════════════════════════════════════

    /// No resolution strategy identified an asset for this request.
    #[error("No asset found for '{url}'")]
    AssetNotFound {
        url: String,
    },

    /// The filename-fragment search matched more than one asset.
    /// Picking one would be a guess, so resolution stops instead.
    #[error("Fragment '{fragment}' is ambiguous: {matches} assets match")]
    AmbiguousAsset {
        fragment: String,
        matches: usize,
    },

    /// An asset was identified but no readable source file exists for it.
    #[error("Source file not readable: {path:?}")]
    SourceUnreadable {
        path: PathBuf,
    },

    // ══════════════════════════════════════════════════════════════════════
    // FAULTS: Must surface to the caller
    // ══════════════════════════════════════════════════════════════════════

    /// The asset repository backend failed.
    #[error("Repository error: {message}")]
    Storage {
        message: String,
    },

    /// The rendering backend failed to produce a derivative.
    #[error("Render failed for {path:?}")]
    Render {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Cannot write into the uploads tree.
    #[error("Uploads path not writable: {path:?}")]
    UploadsNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An optimizer integration failed. Logged, never aborts delivery.
    #[error("Optimizer error: {message}")]
    Optimizer {
        message: String,
    },

    // ══════════════════════════════════════════════════════════════════════
    // INTERNAL: Should never happen (indicates bug)
    // ══════════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns true if this is a plain resolution miss: the request stays
    /// unanswered and the router's original not-found outcome is preserved.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            Self::AssetNotFound { .. }
            | Self::AmbiguousAsset { .. }
            | Self::SourceUnreadable { .. }
        )
    }

    /// Returns true if this indicates a bug in the engine.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
