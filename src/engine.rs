//! Request-to-derivative orchestration.
//!
//! One entry point ties the pieces together: parse the request path,
//! resolve the source asset, match a size profile, render, record, and
//! hand the file back. Resolution misses step aside so the host's own
//! not-found handling stays in charge; real faults surface.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::optimize::DerivativeOptimizer;
use crate::profile::{ProfileRegistry, SizeProfile};
use crate::render::{self, ImageRenderer};
use crate::repo::{AssetId, AssetRepository, DerivativeRecord};
use crate::request::DerivativeRequest;
use crate::resolve::{AssetResolver, SourceImage};

/// A file ready to be served in response to a derivative request.
#[derive(Debug, Clone)]
pub struct ResolvedDerivative {
    pub path: PathBuf,

    /// Mime type read from the file content, not the extension.
    pub mime_type: String,

    pub byte_size: u64,

    /// Matched profile name. `None` when the original is served as-is.
    pub profile: Option<String>,
}

/// Lazy derivative engine.
pub struct Engine {
    config: Config,
    profiles: ProfileRegistry,
    repo: Arc<dyn AssetRepository>,
    renderer: Arc<dyn ImageRenderer>,
    optimizer: Option<Arc<dyn DerivativeOptimizer>>,
}

impl Engine {
    pub fn new(
        config: Config,
        profiles: ProfileRegistry,
        repo: Arc<dyn AssetRepository>,
        renderer: Arc<dyn ImageRenderer>,
    ) -> Self {
        Self {
            config,
            profiles,
            repo,
            renderer,
            optimizer: None,
        }
    }

    /// Builder: attach an optimizer integration.
    pub fn with_optimizer(mut self, optimizer: Arc<dyn DerivativeOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Resolve a request path to a servable file, generating the derivative
    /// on the spot when a size profile matches.
    ///
    /// `Ok(None)` means the engine has nothing to say about this path and
    /// the host's own response stands. That covers paths that are not
    /// derivative requests at all as well as resolution misses like an
    /// unknown parent or an ambiguous fragment. Errors are real faults
    /// from storage or the rendering backend.
    pub fn handle_request(
        &self,
        raw_path: &str,
    ) -> Result<Option<ResolvedDerivative>, EngineError> {
        match self.dispatch(raw_path) {
            Err(e) if e.is_miss() => {
                debug!(path = raw_path, error = %e, "resolution miss, leaving the response to the host");
                Ok(None)
            }
            outcome => outcome,
        }
    }

    fn dispatch(&self, raw_path: &str) -> Result<Option<ResolvedDerivative>, EngineError> {
        let request = DerivativeRequest::parse(raw_path, &self.config);
        if !request.is_derivative {
            return Ok(None);
        }

        let resolver = AssetResolver::new(&self.config, self.repo.as_ref());
        let source = resolver.resolve(&request)?;

        if let Some(profile) =
            self.profiles
                .match_request(source.width, source.height, request.width, request.height)
        {
            return self.generate(&source, profile).map(Some);
        }

        // A request for the source's own dimensions serves the source.
        if (request.width, request.height) == (source.width, source.height) {
            return self.passthrough(&source).map(Some);
        }

        debug!(
            path = raw_path,
            width = request.width,
            height = request.height,
            "no profile produces the requested dimensions"
        );
        Ok(None)
    }

    fn generate(
        &self,
        source: &SourceImage,
        profile: &SizeProfile,
    ) -> Result<ResolvedDerivative, EngineError> {
        let rendered =
            self.renderer
                .render(&source.path, profile.width, profile.height, profile.crop)?;

        // Recording is best-effort. A failed write never withholds the file
        // that was just rendered.
        match rendered.path.file_name() {
            Some(name) => {
                let record = DerivativeRecord {
                    size_name: profile.name.clone(),
                    filename: name.to_string_lossy().into_owned(),
                    mime_type: rendered.mime_type.clone(),
                    byte_size: rendered.byte_size,
                };
                if let Err(e) = self.repo.record_derivative(source.asset.id, &record) {
                    warn!(
                        asset_id = source.asset.id,
                        size = %profile.name,
                        error = %e,
                        "failed to record the derivative"
                    );
                }
            }
            None => warn!(path = %rendered.path.display(), "rendered file has no recordable name"),
        }

        if let Some(optimizer) = &self.optimizer {
            self.run_optimizer(optimizer.as_ref(), source.asset.id, &profile.name);
        }

        info!(
            asset_id = source.asset.id,
            size = %profile.name,
            path = %rendered.path.display(),
            "generated derivative on demand"
        );

        Ok(ResolvedDerivative {
            path: rendered.path,
            mime_type: rendered.mime_type,
            byte_size: rendered.byte_size,
            profile: Some(profile.name.clone()),
        })
    }

    /// Mark, run, clear. Each step is best-effort and the clear runs even
    /// when the pass fails, so the allow list holds no leftover marks.
    fn run_optimizer(&self, optimizer: &dyn DerivativeOptimizer, asset_id: AssetId, size_name: &str) {
        if let Err(e) = optimizer.mark_eligible(asset_id, size_name) {
            warn!(asset_id, size = size_name, error = %e, "optimizer rejected the eligibility mark");
        }
        if let Err(e) = optimizer.optimize(asset_id) {
            warn!(asset_id, size = size_name, error = %e, "optimizer pass failed");
        }
        if let Err(e) = optimizer.clear_eligible(asset_id, size_name) {
            warn!(asset_id, size = size_name, error = %e, "optimizer kept the eligibility mark");
        }
    }

    /// Serve the source file itself when the request names its exact
    /// dimensions. No rendering and no record: nothing was generated.
    fn passthrough(&self, source: &SourceImage) -> Result<ResolvedDerivative, EngineError> {
        let mime_type = render::detect_mime(&source.path)?;
        let byte_size = fs::metadata(&source.path)
            .map_err(|_| EngineError::SourceUnreadable {
                path: source.path.clone(),
            })?
            .len();

        debug!(path = %source.path.display(), "request names the source dimensions, serving the original");

        Ok(ResolvedDerivative {
            path: source.path.clone(),
            mime_type,
            byte_size,
            profile: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{read_dimensions, RenderedFile, ResizeBackend};
    use crate::repo::{Asset, MemoryRepository};
    use image::{Rgb, RgbImage};
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Config, Arc<MemoryRepository>) {
        let dir = TempDir::new().unwrap();
        let subdir = dir.path().join("2026/08");
        fs::create_dir_all(&subdir).unwrap();
        RgbImage::from_pixel(400, 300, Rgb([70, 120, 60]))
            .save(subdir.join("cat.jpg"))
            .unwrap();

        let config = Config::new().uploads_dir(dir.path()).uploads_url("/uploads");
        let repo = Arc::new(MemoryRepository::new());
        repo.register_asset(subdir.join("cat.jpg"), "/uploads/2026/08/cat.jpg", 400, 300)
            .unwrap();
        (dir, config, repo)
    }

    fn profiles() -> ProfileRegistry {
        let mut reg = ProfileRegistry::new();
        reg.register(SizeProfile::new("thumbnail", 150, 150, true));
        reg.register(SizeProfile::new("medium", 300, 300, false));
        reg
    }

    #[test]
    fn generates_a_matched_derivative_on_demand() {
        let (dir, config, repo) = fixture();
        let engine = Engine::new(config, profiles(), repo.clone(), Arc::new(ResizeBackend::new()));

        let resolved = engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap()
            .expect("thumbnail request must resolve");

        assert_eq!(resolved.profile.as_deref(), Some("thumbnail"));
        assert_eq!(resolved.mime_type, "image/jpeg");
        let expected = dir.path().join("2026/08/cat-150x150.jpg");
        assert_eq!(resolved.path, expected);
        assert_eq!(read_dimensions(&expected).unwrap(), (150, 150));

        let id = repo
            .find_by_source_url("/uploads/2026/08/cat.jpg")
            .unwrap()
            .unwrap()
            .id;
        let records = repo.derivatives(id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size_name, "thumbnail");
        assert_eq!(records[0].filename, "cat-150x150.jpg");
        assert_eq!(records[0].byte_size, resolved.byte_size);
    }

    #[test]
    fn fit_profiles_match_by_their_computed_output() {
        let (_dir, config, repo) = fixture();
        let engine = Engine::new(config, profiles(), repo, Arc::new(ResizeBackend::new()));

        // 400x300 constrained to the 300x300 box is 300x225.
        let resolved = engine
            .handle_request("/uploads/2026/08/cat-300x225.jpg")
            .unwrap()
            .expect("medium request must resolve");
        assert_eq!(resolved.profile.as_deref(), Some("medium"));

        // The box itself is not what the profile produces for this source.
        assert!(engine
            .handle_request("/uploads/2026/08/cat-300x300.jpg")
            .unwrap()
            .is_none());
    }

    #[test]
    fn repeated_requests_regenerate_without_duplicate_records() {
        let (_dir, config, repo) = fixture();
        let engine = Engine::new(config, profiles(), repo.clone(), Arc::new(ResizeBackend::new()));

        let first = engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap()
            .unwrap();
        let second = engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap()
            .unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(first.mime_type, second.mime_type);
        assert_eq!(first.byte_size, second.byte_size);

        let id = repo
            .find_by_source_url("/uploads/2026/08/cat.jpg")
            .unwrap()
            .unwrap()
            .id;
        assert_eq!(repo.derivatives(id).unwrap().len(), 1);
    }

    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl ImageRenderer for CountingRenderer {
        fn render(&self, source: &Path, _: u32, _: u32, _: bool) -> Result<RenderedFile, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Internal(format!(
                "unexpected render of {}",
                source.display()
            )))
        }
    }

    #[test]
    fn source_sized_request_is_served_without_rendering() {
        let (dir, config, repo) = fixture();
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
        });
        let engine = Engine::new(config, profiles(), repo, renderer.clone());

        let resolved = engine
            .handle_request("/uploads/2026/08/cat-400x300.jpg")
            .unwrap()
            .expect("source-sized request must resolve");

        assert_eq!(resolved.profile, None);
        assert_eq!(resolved.mime_type, "image/jpeg");
        assert_eq!(resolved.path, dir.path().join("2026/08/cat.jpg"));
        assert_eq!(resolved.byte_size, fs::metadata(&resolved.path).unwrap().len());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_derivative_paths_are_left_alone() {
        let (_dir, config, repo) = fixture();
        let engine = Engine::new(config, profiles(), repo, Arc::new(ResizeBackend::new()));

        assert!(engine
            .handle_request("/uploads/2026/08/cat.jpg")
            .unwrap()
            .is_none());
        assert!(engine
            .handle_request("/blog/post-150x150.jpg")
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_parent_is_a_miss_not_an_error() {
        let (_dir, config, repo) = fixture();
        let engine = Engine::new(config, profiles(), repo, Arc::new(ResizeBackend::new()));

        assert!(engine
            .handle_request("/uploads/2026/08/dog-150x150.jpg")
            .unwrap()
            .is_none());
    }

    #[derive(Default)]
    struct RecordingOptimizer {
        log: Mutex<Vec<String>>,
        fail_pass: bool,
    }

    impl DerivativeOptimizer for RecordingOptimizer {
        fn mark_eligible(&self, _: AssetId, size_name: &str) -> Result<(), EngineError> {
            self.log.lock().unwrap().push(format!("mark:{size_name}"));
            Ok(())
        }

        fn optimize(&self, _: AssetId) -> Result<(), EngineError> {
            self.log.lock().unwrap().push("pass".to_string());
            if self.fail_pass {
                return Err(EngineError::Optimizer {
                    message: "compressor offline".to_string(),
                });
            }
            Ok(())
        }

        fn clear_eligible(&self, _: AssetId, size_name: &str) -> Result<(), EngineError> {
            self.log.lock().unwrap().push(format!("clear:{size_name}"));
            Ok(())
        }
    }

    #[test]
    fn optimizer_runs_mark_pass_clear_around_generation() {
        let (_dir, config, repo) = fixture();
        let optimizer = Arc::new(RecordingOptimizer::default());
        let engine = Engine::new(config, profiles(), repo, Arc::new(ResizeBackend::new()))
            .with_optimizer(optimizer.clone());

        engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap()
            .unwrap();

        let log = optimizer.log.lock().unwrap();
        assert_eq!(*log, ["mark:thumbnail", "pass", "clear:thumbnail"]);
    }

    #[test]
    fn optimizer_failure_never_withholds_the_file() {
        let (_dir, config, repo) = fixture();
        let optimizer = Arc::new(RecordingOptimizer {
            fail_pass: true,
            ..Default::default()
        });
        let engine = Engine::new(config, profiles(), repo, Arc::new(ResizeBackend::new()))
            .with_optimizer(optimizer.clone());

        let resolved = engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap();
        assert!(resolved.is_some());

        // The clear runs despite the failed pass.
        let log = optimizer.log.lock().unwrap();
        assert_eq!(*log, ["mark:thumbnail", "pass", "clear:thumbnail"]);
    }

    struct FailingRenderer;

    impl ImageRenderer for FailingRenderer {
        fn render(&self, source: &Path, _: u32, _: u32, _: bool) -> Result<RenderedFile, EngineError> {
            Err(EngineError::Render {
                path: source.to_path_buf(),
                source: image::ImageError::IoError(io::Error::other("disk full")),
            })
        }
    }

    #[test]
    fn renderer_faults_surface_to_the_caller() {
        let (_dir, config, repo) = fixture();
        let engine = Engine::new(config, profiles(), repo, Arc::new(FailingRenderer));

        let err = engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap_err();
        assert!(!err.is_miss());
    }

    struct RecordFailRepo(MemoryRepository);

    impl AssetRepository for RecordFailRepo {
        fn find_by_source_url(&self, url: &str) -> Result<Option<Asset>, EngineError> {
            self.0.find_by_source_url(url)
        }

        fn find_unique_by_filename_fragment(
            &self,
            fragment: &str,
        ) -> Result<Option<Asset>, EngineError> {
            self.0.find_unique_by_filename_fragment(fragment)
        }

        fn source_file_path(&self, id: AssetId) -> Result<Option<PathBuf>, EngineError> {
            self.0.source_file_path(id)
        }

        fn record_derivative(&self, _: AssetId, _: &DerivativeRecord) -> Result<(), EngineError> {
            Err(EngineError::Storage {
                message: "table locked".to_string(),
            })
        }
    }

    #[test]
    fn record_failure_never_withholds_the_file() {
        let dir = TempDir::new().unwrap();
        let subdir = dir.path().join("2026/08");
        fs::create_dir_all(&subdir).unwrap();
        RgbImage::from_pixel(400, 300, Rgb([70, 120, 60]))
            .save(subdir.join("cat.jpg"))
            .unwrap();

        let inner = MemoryRepository::new();
        inner
            .register_asset(subdir.join("cat.jpg"), "/uploads/2026/08/cat.jpg", 400, 300)
            .unwrap();
        let config = Config::new().uploads_dir(dir.path()).uploads_url("/uploads");
        let engine = Engine::new(
            config,
            profiles(),
            Arc::new(RecordFailRepo(inner)),
            Arc::new(ResizeBackend::new()),
        );

        let resolved = engine
            .handle_request("/uploads/2026/08/cat-150x150.jpg")
            .unwrap();
        assert!(resolved.is_some());
        assert!(dir.path().join("2026/08/cat-150x150.jpg").exists());
    }
}
