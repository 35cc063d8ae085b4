//! Asset storage seam and the in-process repository.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::EngineError;

/// Stable asset identifier.
pub type AssetId = i64;

/// A registered source image.
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: AssetId,

    /// Canonical source file on disk.
    pub source_path: PathBuf,

    /// Public URL of the canonical source.
    pub source_url: String,

    /// Filename the asset was originally uploaded under. Stays put when
    /// scaling or editing moves the canonical file to a new name, which is
    /// what the filename-fragment search leans on.
    pub original_filename: String,

    /// Pixel width of the canonical source.
    pub width: u32,

    /// Pixel height of the canonical source.
    pub height: u32,
}

/// Repository-side record of a generated derivative.
///
/// Records outlive the files they describe: suppressing an eager file
/// deletes the file, not the record, which is what keeps drifted filenames
/// findable through the fragment search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeRecord {
    pub size_name: String,
    pub filename: String,
    pub mime_type: String,
    pub byte_size: u64,
}

/// Storage seam for asset lookups and derivative records.
///
/// Implementations must be shareable across threads; the engine holds one
/// behind an `Arc`.
pub trait AssetRepository: Send + Sync {
    /// Look up an asset by its canonical source URL.
    fn find_by_source_url(&self, url: &str) -> Result<Option<Asset>, EngineError>;

    /// Find the single asset whose recorded filenames (the original upload
    /// name or any recorded derivative) mention `fragment`. Zero matches is
    /// `None`; more than one is `EngineError::AmbiguousAsset`, never a pick
    /// among candidates.
    fn find_unique_by_filename_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<Asset>, EngineError>;

    /// On-disk source path recorded for an asset.
    fn source_file_path(&self, id: AssetId) -> Result<Option<PathBuf>, EngineError>;

    /// Record a generated derivative. Recording the same size name again
    /// replaces the previous record.
    fn record_derivative(&self, id: AssetId, record: &DerivativeRecord) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    assets: Vec<Asset>,
    derivatives: HashMap<AssetId, Vec<DerivativeRecord>>,
    next_id: AssetId,
}

/// In-process repository backed by a mutex.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryInner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, MemoryInner>, EngineError> {
        self.inner.lock().map_err(|_| EngineError::Storage {
            message: "memory repository lock poisoned".to_string(),
        })
    }

    /// Register a source asset and return its id. The original filename
    /// defaults to the basename of the source path; use
    /// [`register_asset_with_original`](Self::register_asset_with_original)
    /// when the canonical file has drifted away from the upload name.
    pub fn register_asset(
        &self,
        source_path: impl Into<PathBuf>,
        source_url: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<AssetId, EngineError> {
        let source_path = source_path.into();
        let original = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.register_asset_with_original(source_path, source_url, original, width, height)
    }

    /// Register a source asset whose original upload name differs from its
    /// canonical file.
    pub fn register_asset_with_original(
        &self,
        source_path: impl Into<PathBuf>,
        source_url: impl Into<String>,
        original_filename: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<AssetId, EngineError> {
        let mut inner = self.inner()?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.assets.push(Asset {
            id,
            source_path: source_path.into(),
            source_url: source_url.into(),
            original_filename: original_filename.into(),
            width,
            height,
        });
        Ok(id)
    }

    /// Point an asset's recorded source path somewhere else.
    pub fn set_source_path(
        &self,
        id: AssetId,
        path: impl Into<PathBuf>,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner()?;
        if let Some(asset) = inner.assets.iter_mut().find(|a| a.id == id) {
            asset.source_path = path.into();
        }
        Ok(())
    }

    /// All records for an asset, in recording order.
    pub fn derivatives(&self, id: AssetId) -> Result<Vec<DerivativeRecord>, EngineError> {
        let inner = self.inner()?;
        Ok(inner.derivatives.get(&id).cloned().unwrap_or_default())
    }
}

impl AssetRepository for MemoryRepository {
    fn find_by_source_url(&self, url: &str) -> Result<Option<Asset>, EngineError> {
        let inner = self.inner()?;
        Ok(inner.assets.iter().find(|a| a.source_url == url).cloned())
    }

    fn find_unique_by_filename_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<Asset>, EngineError> {
        let inner = self.inner()?;
        let hits: Vec<&Asset> = inner
            .assets
            .iter()
            .filter(|asset| {
                asset.original_filename.contains(fragment)
                    || inner.derivatives.get(&asset.id).is_some_and(|records| {
                        records.iter().any(|r| r.filename.contains(fragment))
                    })
            })
            .collect();

        match hits.len() {
            0 => Ok(None),
            1 => Ok(Some(hits[0].clone())),
            n => Err(EngineError::AmbiguousAsset {
                fragment: fragment.to_string(),
                matches: n,
            }),
        }
    }

    fn source_file_path(&self, id: AssetId) -> Result<Option<PathBuf>, EngineError> {
        let inner = self.inner()?;
        Ok(inner
            .assets
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.source_path.clone()))
    }

    fn record_derivative(&self, id: AssetId, record: &DerivativeRecord) -> Result<(), EngineError> {
        let mut inner = self.inner()?;
        let records = inner.derivatives.entry(id).or_default();
        match records.iter_mut().find(|r| r.size_name == record.size_name) {
            Some(slot) => *slot = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: &str, filename: &str) -> DerivativeRecord {
        DerivativeRecord {
            size_name: size.to_string(),
            filename: filename.to_string(),
            mime_type: "image/jpeg".to_string(),
            byte_size: 1024,
        }
    }

    #[test]
    fn looks_up_by_source_url() {
        let repo = MemoryRepository::new();
        let id = repo
            .register_asset("/up/cat.jpg", "/uploads/cat.jpg", 1000, 800)
            .unwrap();

        let found = repo.find_by_source_url("/uploads/cat.jpg").unwrap();
        assert_eq!(found.map(|a| a.id), Some(id));
        assert!(repo.find_by_source_url("/uploads/dog.jpg").unwrap().is_none());
    }

    #[test]
    fn fragment_search_covers_original_filenames() {
        let repo = MemoryRepository::new();
        // An edited asset: the canonical file drifted, the upload name
        // stayed recorded.
        let id = repo
            .register_asset_with_original(
                "/up/photo-e17.jpg",
                "/uploads/photo-e17.jpg",
                "photo.jpg",
                1000,
                800,
            )
            .unwrap();

        let found = repo.find_unique_by_filename_fragment("photo.jpg").unwrap();
        assert_eq!(found.map(|x| x.id), Some(id));
        assert!(repo
            .find_unique_by_filename_fragment("other.jpg")
            .unwrap()
            .is_none());
    }

    #[test]
    fn fragment_search_covers_derivative_records() {
        let repo = MemoryRepository::new();
        let a = repo
            .register_asset("/up/photo.jpg", "/uploads/photo.jpg", 1000, 800)
            .unwrap();
        let b = repo
            .register_asset("/up/other.jpg", "/uploads/other.jpg", 1000, 800)
            .unwrap();

        repo.record_derivative(a, &record("medium", "photo-300x240.jpg"))
            .unwrap();

        let found = repo
            .find_unique_by_filename_fragment("photo-300x240.jpg")
            .unwrap();
        assert_eq!(found.map(|x| x.id), Some(a));

        // A second asset whose records also mention the fragment makes the
        // search give up.
        repo.record_derivative(b, &record("medium", "photo-300x240.jpg"))
            .unwrap();
        let err = repo
            .find_unique_by_filename_fragment("photo-300x240.jpg")
            .unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousAsset { matches: 2, .. }));
        assert!(err.is_miss());
    }

    #[test]
    fn fragment_search_gives_up_on_substring_collisions() {
        let repo = MemoryRepository::new();
        repo.register_asset("/up/photo.jpg", "/uploads/photo.jpg", 1000, 800)
            .unwrap();
        repo.register_asset("/up/my-photo.jpg", "/uploads/my-photo.jpg", 900, 700)
            .unwrap();

        // "photo.jpg" is a substring of both original filenames.
        let err = repo.find_unique_by_filename_fragment("photo.jpg").unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousAsset { matches: 2, .. }));
    }

    #[test]
    fn recording_a_size_twice_replaces_it() {
        let repo = MemoryRepository::new();
        let id = repo
            .register_asset("/up/cat.jpg", "/uploads/cat.jpg", 1000, 800)
            .unwrap();

        repo.record_derivative(id, &record("thumbnail", "cat-150x150.jpg"))
            .unwrap();
        let mut updated = record("thumbnail", "cat-150x150.jpg");
        updated.byte_size = 2048;
        repo.record_derivative(id, &updated).unwrap();

        let records = repo.derivatives(id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].byte_size, 2048);
    }
}
