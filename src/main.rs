//! Host-simulation binary for the derivative engine.
//!
//! Plays the parts of the platform the library plugs into: an ingest
//! pipeline that creates every subsize eagerly, a router asking about a
//! path its own lookup missed, and a catalog listing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

use lazyimg::config::Config;
use lazyimg::engine::Engine;
use lazyimg::error::EngineError;
use lazyimg::profile::{constrain_dimensions, ProfileRegistry, SizeProfile};
use lazyimg::render::{self, ImageRenderer, ResizeBackend};
use lazyimg::repo::{AssetId, AssetRepository, DerivativeRecord};
use lazyimg::settings::{MemorySettings, SettingsStore};
use lazyimg::sqlite::SqliteRepository;
use lazyimg::suppress::{AssetEvent, EagerSuppressor, SubsizeFile};

#[derive(Parser)]
#[command(name = "lazyimg", about = "Lazy image derivative engine", version)]
struct Cli {
    /// SQLite catalog file.
    #[arg(long, default_value = "lazyimg.db", global = true)]
    db: PathBuf,

    /// Root of the uploads tree.
    #[arg(long, default_value = "uploads", global = true)]
    uploads: PathBuf,

    /// Turn lazy generation off: ingest keeps its eager files and
    /// resolve stands down.
    #[arg(long, global = true)]
    lazy_off: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest image files the way a stock pipeline would.
    Ingest {
        /// Image files to ingest.
        files: Vec<PathBuf>,

        /// Upload subdirectory; defaults to the current year/month.
        #[arg(long)]
        subpath: Option<String>,
    },
    /// Resolve a request path after the router's own lookup missed.
    Resolve {
        /// Raw request path, e.g. /uploads/2026/08/cat-150x150.jpg.
        path: String,
    },
    /// Print the catalog of assets and their recorded derivatives.
    List,
}

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::new().uploads_dir(&cli.uploads).uploads_url("/uploads");
    let repo = Arc::new(SqliteRepository::open(&cli.db)?);
    let settings = MemorySettings::new(!cli.lazy_off);

    match cli.command {
        Command::Ingest { files, subpath } => ingest(&config, repo, &settings, &files, subpath),
        Command::Resolve { path } => resolve(config, repo, &settings, &path),
        Command::List => list(repo.as_ref()),
    }
}

/// The host platform's standard profile ladder.
fn default_profiles() -> ProfileRegistry {
    let mut profiles = ProfileRegistry::new();
    profiles.register(SizeProfile::new("thumbnail", 150, 150, true));
    profiles.register(SizeProfile::new("medium", 300, 300, false));
    profiles.register(SizeProfile::new("medium_large", 768, 0, false));
    profiles.register(SizeProfile::new("large", 1024, 1024, false));
    profiles.register(SizeProfile::new("1536x1536", 1536, 1536, false));
    profiles.register(SizeProfile::new("2048x2048", 2048, 2048, false));
    profiles
}

fn ingest(
    config: &Config,
    repo: Arc<SqliteRepository>,
    settings: &MemorySettings,
    files: &[PathBuf],
    subpath: Option<String>,
) -> Result<(), EngineError> {
    let start_time = std::time::Instant::now();

    // Discover images the same way the pipeline would: by extension.
    let (images, skipped): (Vec<_>, Vec<_>) = files.iter().partition(|f| {
        f.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| config.is_allowed_extension(e))
    });
    for file in &skipped {
        eprintln!("  ⚠ Skipping non-image file {}", file.display());
    }
    if images.is_empty() {
        eprintln!("  ⚠ Nothing to ingest");
        return Ok(());
    }

    let subpath = subpath.unwrap_or_else(|| Utc::now().format("%Y/%m").to_string());
    let target_dir = config.uploads_dir.join(&subpath);
    fs::create_dir_all(&target_dir).map_err(|e| EngineError::UploadsNotWritable {
        path: target_dir.clone(),
        source: e,
    })?;

    println!(
        "Ingesting {} files into {}...",
        images.len(),
        target_dir.display()
    );

    let profiles = default_profiles();
    let renderer = ResizeBackend::new();

    let results: Vec<_> = images
        .par_iter()
        .map(|file| ingest_one(config, repo.as_ref(), &profiles, &renderer, &subpath, file))
        .collect();

    let suppressor = EagerSuppressor::new(repo.clone() as Arc<dyn AssetRepository>);
    let mut ingested = 0usize;
    let mut failed = 0usize;
    for result in results {
        match result {
            Ok((asset_id, subsizes)) => {
                ingested += 1;
                if settings.autogen_enabled() {
                    match suppressor.handle(&AssetEvent::Ingested { asset_id, subsizes }) {
                        Ok(report) => report.print_report(),
                        Err(e) => eprintln!("  ⚠ Suppression failed: {e}"),
                    }
                } else {
                    println!("  → Lazy mode off, keeping {} eager files", subsizes.len());
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("  ⚠ {e}");
            }
        }
    }

    let duration = start_time.elapsed();
    println!("Done! {ingested} ingested, {failed} failed in {duration:.2?}");
    Ok(())
}

/// Ingest a single file: store it, apply the big-image rule, register the
/// asset, and eagerly render every applicable profile.
fn ingest_one(
    config: &Config,
    repo: &SqliteRepository,
    profiles: &ProfileRegistry,
    renderer: &ResizeBackend,
    subpath: &str,
    file: &Path,
) -> Result<(AssetId, Vec<SubsizeFile>), EngineError> {
    let original_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::Internal(format!("unusable file name: {}", file.display())))?
        .to_string();
    let (stem, ext) = original_name
        .rsplit_once('.')
        .ok_or_else(|| EngineError::Internal(format!("no extension: {original_name}")))?;

    // Store the upload.
    let stored_path = config.source_path(subpath, stem, ext);
    fs::copy(file, &stored_path).map_err(|e| EngineError::UploadsNotWritable {
        path: stored_path.clone(),
        source: e,
    })?;
    let (width, height) = render::read_dimensions(&stored_path)?;

    // Big-image rule: past the threshold the platform stores a downsized
    // `-scaled` copy and makes that the canonical file. The full-size
    // original stays on disk beside it.
    let threshold = config.big_image_threshold;
    let (canonical_stem, canon_w, canon_h) =
        if threshold > 0 && (width > threshold || height > threshold) {
            let scaled = renderer.render(&stored_path, threshold, threshold, false)?;
            let scaled_stem = format!("{stem}{}", config.scaled_suffix);
            let scaled_path = stored_path.with_file_name(format!("{scaled_stem}.{ext}"));
            fs::rename(&scaled.path, &scaled_path).map_err(|e| {
                EngineError::UploadsNotWritable {
                    path: scaled_path.clone(),
                    source: e,
                }
            })?;
            let (sw, sh) = constrain_dimensions(width, height, threshold, threshold);
            (scaled_stem, sw, sh)
        } else {
            (stem.to_string(), width, height)
        };

    let canonical_path = config.source_path(subpath, &canonical_stem, ext);
    let canonical_url = config.source_url(subpath, &canonical_stem, ext);
    let asset_id = repo.insert_asset(
        &canonical_path,
        &canonical_url,
        &original_name,
        canon_w,
        canon_h,
    )?;

    // The stock pipeline renders every subsize up front.
    let mut subsizes = Vec::new();
    for profile in profiles.iter() {
        if profile.resize_result(canon_w, canon_h).is_none() {
            continue;
        }
        match renderer.render(&canonical_path, profile.width, profile.height, profile.crop) {
            Ok(rendered) => {
                let filename = rendered
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let record = DerivativeRecord {
                    size_name: profile.name.clone(),
                    filename: filename.clone(),
                    mime_type: rendered.mime_type.clone(),
                    byte_size: rendered.byte_size,
                };
                repo.record_derivative(asset_id, &record)?;
                subsizes.push(SubsizeFile::new(filename, rendered.mime_type));
            }
            Err(e) => eprintln!("  ⚠ {original_name}: {} render failed: {e}", profile.name),
        }
    }

    println!(
        "  ✓ {} [{}x{}] {} subsizes{}",
        original_name,
        canon_w,
        canon_h,
        subsizes.len(),
        if canonical_stem != stem {
            " (scaled canonical)"
        } else {
            ""
        }
    );

    Ok((asset_id, subsizes))
}

fn resolve(
    config: Config,
    repo: Arc<SqliteRepository>,
    settings: &MemorySettings,
    path: &str,
) -> Result<(), EngineError> {
    if !settings.autogen_enabled() {
        println!("404 (kept): lazy generation is off");
        return Ok(());
    }

    let engine = Engine::new(
        config,
        default_profiles(),
        repo as Arc<dyn AssetRepository>,
        Arc::new(ResizeBackend::new()),
    );

    match engine.handle_request(path)? {
        Some(resolved) => {
            println!("200");
            println!("content-type: {}", resolved.mime_type);
            println!("content-length: {}", resolved.byte_size);
            println!("file: {}", resolved.path.display());
        }
        None => println!("404 (kept)"),
    }
    Ok(())
}

fn list(repo: &SqliteRepository) -> Result<(), EngineError> {
    let assets = repo.all_assets()?;
    if assets.is_empty() {
        println!("Catalog is empty.");
        return Ok(());
    }

    for asset in assets {
        println!(
            "#{} {} [{}x{}] uploaded as {}",
            asset.id, asset.source_url, asset.width, asset.height, asset.original_filename
        );
        for record in repo.derivatives_for(asset.id)? {
            println!(
                "    {} → {} ({}, {} bytes)",
                record.size_name, record.filename, record.mime_type, record.byte_size
            );
        }
    }
    Ok(())
}
