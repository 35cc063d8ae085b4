//! Engine configuration with typed defaults.

use std::path::{Path, PathBuf};

/// What to do when an asset's canonical file is missing on disk but its
/// `-scaled` sibling exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfHeal {
    /// Copy the `-scaled` file to the canonical path. A copy, not a
    /// symlink: link support varies across storage backends.
    Copy,
    /// Leave the canonical path missing.
    Disabled,
}

/// Configuration for the derivative engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the uploads tree on disk.
    pub uploads_dir: PathBuf,

    /// URL prefix under which uploads are served.
    pub uploads_url: String,

    /// File extensions treated as image candidates (lowercase, no dot).
    pub allowed_extensions: Vec<String>,

    /// Filename suffix the host platform appends to downsized originals.
    pub scaled_suffix: String,

    /// Recovery policy for missing canonical source files.
    pub self_heal: SelfHeal,

    /// Largest side an original may have before ingest stores a `-scaled`
    /// copy and makes that the canonical file.
    pub big_image_threshold: u32,
}

impl Config {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the uploads directory.
    pub fn uploads_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.uploads_dir = path.as_ref().to_path_buf();
        self
    }

    /// Builder: set the uploads URL prefix.
    pub fn uploads_url(mut self, url: impl Into<String>) -> Self {
        self.uploads_url = url.into();
        self
    }

    /// Builder: set the recognized image extensions.
    pub fn allowed_extensions(mut self, exts: &[&str]) -> Self {
        self.allowed_extensions = exts.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Builder: set the scaled-original suffix.
    pub fn scaled_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.scaled_suffix = suffix.into();
        self
    }

    /// Builder: set the self-heal policy.
    pub fn self_heal(mut self, policy: SelfHeal) -> Self {
        self.self_heal = policy;
        self
    }

    /// Builder: set the big-image threshold.
    pub fn big_image_threshold(mut self, pixels: u32) -> Self {
        self.big_image_threshold = pixels;
        self
    }

    /// Check whether an extension names an image candidate.
    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        let lower = ext.to_lowercase();
        self.allowed_extensions.iter().any(|e| *e == lower)
    }

    /// On-disk path for a source file in the uploads tree.
    pub fn source_path(&self, subpath: &str, filename: &str, ext: &str) -> PathBuf {
        let mut path = self.uploads_dir.clone();
        if !subpath.is_empty() {
            path.push(subpath);
        }
        path.push(format!("{filename}.{ext}"));
        path
    }

    /// Public URL for a source file in the uploads tree.
    pub fn source_url(&self, subpath: &str, filename: &str, ext: &str) -> String {
        let base = self.uploads_url.trim_end_matches('/');
        if subpath.is_empty() {
            format!("{base}/{filename}.{ext}")
        } else {
            format!("{base}/{subpath}/{filename}.{ext}")
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            uploads_url: String::from("/uploads"),
            allowed_extensions: ["jpg", "jpeg", "png", "gif", "webp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            scaled_suffix: String::from("-scaled"),
            self_heal: SelfHeal::Copy,
            big_image_threshold: 2560,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .uploads_dir("./media")
            .uploads_url("/media")
            .big_image_threshold(1920);

        assert_eq!(config.uploads_dir, PathBuf::from("./media"));
        assert_eq!(config.uploads_url, "/media");
        assert_eq!(config.big_image_threshold, 1920);
    }

    #[test]
    fn derived_paths() {
        let config = Config::new().uploads_dir("./up");
        assert_eq!(
            config.source_path("2024/06", "cat", "jpg"),
            PathBuf::from("./up/2024/06/cat.jpg")
        );
        assert_eq!(
            config.source_path("", "cat", "jpg"),
            PathBuf::from("./up/cat.jpg")
        );
    }

    #[test]
    fn url_join_avoids_double_slash() {
        let config = Config::new().uploads_url("/uploads/");
        assert_eq!(
            config.source_url("2024/06", "cat", "jpg"),
            "/uploads/2024/06/cat.jpg"
        );
        assert_eq!(config.source_url("", "cat", "jpg"), "/uploads/cat.jpg");
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let config = Config::new();
        assert!(config.is_allowed_extension("JPG"));
        assert!(config.is_allowed_extension("webp"));
        assert!(!config.is_allowed_extension("pdf"));
    }
}
