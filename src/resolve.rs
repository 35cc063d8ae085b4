//! Asset resolution: from a parsed derivative request to a readable source.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::{Config, SelfHeal};
use crate::error::EngineError;
use crate::render::read_dimensions;
use crate::repo::{Asset, AssetRepository};
use crate::request::DerivativeRequest;

/// Lookup strategies, tried in order. The first hit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Repository lookup by the reconstructed canonical URL.
    CanonicalUrl,
    /// Retry with the scaled-original suffix appended to the base name.
    ScaledUrl,
    /// Search recorded filenames for `<parent>.<ext>`, accepting exactly
    /// one match.
    FilenameFragment,
}

/// A resolved source image, ready for generation.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub asset: Asset,

    /// Readable file the derivative will be generated from.
    pub path: PathBuf,

    /// Actual pixel width of `path`, read from the file itself.
    pub width: u32,

    /// Actual pixel height of `path`.
    pub height: u32,

    /// Strategy that identified the asset.
    pub strategy: Strategy,
}

pub struct AssetResolver<'a> {
    config: &'a Config,
    repo: &'a dyn AssetRepository,
}

impl<'a> AssetResolver<'a> {
    /// Lookup order. Cheap exact matches first, the fragment search last.
    pub const STRATEGIES: [Strategy; 3] = [
        Strategy::CanonicalUrl,
        Strategy::ScaledUrl,
        Strategy::FilenameFragment,
    ];

    pub fn new(config: &'a Config, repo: &'a dyn AssetRepository) -> Self {
        Self { config, repo }
    }

    /// Resolve a derivative request to an asset and a readable source file.
    ///
    /// Misses come back as `AssetNotFound`, `AmbiguousAsset` or
    /// `SourceUnreadable`; repository faults pass through unchanged.
    pub fn resolve(&self, request: &DerivativeRequest) -> Result<SourceImage, EngineError> {
        let mut identified = None;
        for strategy in Self::STRATEGIES {
            if let Some(asset) = self.lookup(strategy, request)? {
                debug!(?strategy, asset_id = asset.id, "asset identified");
                identified = Some((asset, strategy));
                break;
            }
        }

        let Some((asset, strategy)) = identified else {
            debug!(path = %request.raw_path, "no asset found");
            return Err(EngineError::AssetNotFound {
                url: request.raw_path.clone(),
            });
        };

        let path = self.locate_source(&asset, request)?;
        let (width, height) = read_dimensions(&path)?;

        Ok(SourceImage {
            asset,
            path,
            width,
            height,
            strategy,
        })
    }

    fn lookup(
        &self,
        strategy: Strategy,
        request: &DerivativeRequest,
    ) -> Result<Option<Asset>, EngineError> {
        match strategy {
            Strategy::CanonicalUrl => {
                let url = self.config.source_url(
                    &request.upload_subpath,
                    &request.parent_filename,
                    &request.extension,
                );
                self.repo.find_by_source_url(&url)
            }
            Strategy::ScaledUrl => {
                let scaled = format!("{}{}", request.parent_filename, self.config.scaled_suffix);
                let url =
                    self.config
                        .source_url(&request.upload_subpath, &scaled, &request.extension);
                self.repo.find_by_source_url(&url)
            }
            Strategy::FilenameFragment => {
                let fragment = format!("{}.{}", request.parent_filename, request.extension);
                self.repo.find_unique_by_filename_fragment(&fragment)
            }
        }
    }

    /// Find a readable file to generate from, repairing a missing canonical
    /// file from its `-scaled` sibling when the policy allows.
    fn locate_source(
        &self,
        asset: &Asset,
        request: &DerivativeRequest,
    ) -> Result<PathBuf, EngineError> {
        let canonical = self.config.source_path(
            &request.upload_subpath,
            &request.parent_filename,
            &request.extension,
        );

        if !canonical.exists() && self.config.self_heal == SelfHeal::Copy {
            let scaled_name =
                format!("{}{}", request.parent_filename, self.config.scaled_suffix);
            let scaled = self.config.source_path(
                &request.upload_subpath,
                &scaled_name,
                &request.extension,
            );
            if scaled.exists() {
                // The scaled copy keeps the aspect ratio, so it substitutes
                // for the true original when generating derivatives.
                match fs::copy(&scaled, &canonical) {
                    Ok(_) => info!(
                        from = %scaled.display(),
                        to = %canonical.display(),
                        "materialized canonical source from scaled copy"
                    ),
                    Err(e) => warn!(
                        from = %scaled.display(),
                        to = %canonical.display(),
                        error = %e,
                        "self-heal copy failed"
                    ),
                }
            }
        }

        if canonical.exists() {
            return Ok(canonical);
        }

        // Fall back to wherever the repository says the file lives.
        if let Some(recorded) = self.repo.source_file_path(asset.id)? {
            if recorded.exists() {
                return Ok(recorded);
            }
        }

        Err(EngineError::SourceUnreadable { path: canonical })
    }
}
