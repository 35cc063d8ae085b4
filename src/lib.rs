//! Lazy image derivative engine.
//!
//! Resolves requests for sized image files, generates the matching
//! derivative on first use, and keeps standard ingest pipelines from
//! creating every size up front.

pub mod config;
pub mod engine;
pub mod error;
pub mod optimize;
pub mod profile;
pub mod render;
pub mod repo;
pub mod request;
pub mod resolve;
pub mod settings;
pub mod sqlite;
pub mod suppress;
