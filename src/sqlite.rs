//! SQLite-backed asset repository.
//!
//! A single connection behind a mutex; the engine only needs short,
//! infrequent queries, so one writer is plenty.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::EngineError;
use crate::repo::{Asset, AssetId, AssetRepository, DerivativeRecord};

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

fn sql(err: rusqlite::Error) -> EngineError {
    EngineError::Storage {
        message: err.to_string(),
    }
}

impl SqliteRepository {
    /// Open (or create) a repository database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let conn = Connection::open(path.as_ref()).map_err(sql)?;
        Self::from_connection(conn)
    }

    /// Open a throwaway in-memory repository.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(sql)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn.lock().map_err(|_| EngineError::Storage {
            message: "repository connection lock poisoned".to_string(),
        })
    }

    /// Insert a source asset and return its id. `original_filename` is the
    /// name the file was uploaded under, which can differ from the
    /// canonical file for scaled or edited assets.
    pub fn insert_asset(
        &self,
        source_path: &Path,
        source_url: &str,
        original_filename: &str,
        width: u32,
        height: u32,
    ) -> Result<AssetId, EngineError> {
        let conn = self.conn()?;
        let path_text = source_path.to_string_lossy();
        conn.execute(
            "INSERT INTO assets (source_path, source_url, original_filename, width, height, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                path_text.as_ref(),
                source_url,
                original_filename,
                width,
                height,
                Utc::now().timestamp(),
            ],
        )
        .map_err(sql)?;
        Ok(conn.last_insert_rowid())
    }

    /// Look up an asset by id.
    pub fn asset(&self, id: AssetId) -> Result<Option<Asset>, EngineError> {
        let conn = self.conn()?;
        asset_by_id(&conn, id)
    }

    /// All assets, oldest first.
    pub fn all_assets(&self) -> Result<Vec<Asset>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, source_path, source_url, original_filename, width, height
                 FROM assets ORDER BY id",
            )
            .map_err(sql)?;

        let rows = stmt.query_map([], asset_from_row).map_err(sql)?;
        let mut assets = Vec::new();
        for asset in rows {
            assets.push(asset.map_err(sql)?);
        }
        Ok(assets)
    }

    /// All derivative records for an asset, in recording order.
    pub fn derivatives_for(&self, id: AssetId) -> Result<Vec<DerivativeRecord>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT size_name, filename, mime_type, byte_size
                 FROM derivatives WHERE asset_id = ?1 ORDER BY id",
            )
            .map_err(sql)?;

        let rows = stmt
            .query_map(params![id], |row| {
                Ok(DerivativeRecord {
                    size_name: row.get(0)?,
                    filename: row.get(1)?,
                    mime_type: row.get(2)?,
                    byte_size: row.get::<_, i64>(3)? as u64,
                })
            })
            .map_err(sql)?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record.map_err(sql)?);
        }
        Ok(records)
    }
}

fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assets (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            source_path         TEXT NOT NULL,
            source_url          TEXT NOT NULL UNIQUE,
            original_filename   TEXT NOT NULL,
            width               INTEGER NOT NULL,
            height              INTEGER NOT NULL,
            ingested_at         INTEGER NOT NULL
        )",
        [],
    )
    .map_err(sql)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS derivatives (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            asset_id        INTEGER NOT NULL,
            size_name       TEXT NOT NULL,
            filename        TEXT NOT NULL,
            mime_type       TEXT NOT NULL,
            byte_size       INTEGER NOT NULL,
            created_at      INTEGER NOT NULL,
            UNIQUE(asset_id, size_name),
            FOREIGN KEY(asset_id) REFERENCES assets(id) ON DELETE CASCADE
        )",
        [],
    )
    .map_err(sql)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_derivatives_asset_id
         ON derivatives(asset_id)",
        [],
    )
    .map_err(sql)?;

    Ok(())
}

fn asset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        source_path: PathBuf::from(row.get::<_, String>(1)?),
        source_url: row.get(2)?,
        original_filename: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
    })
}

fn asset_by_id(conn: &Connection, id: AssetId) -> Result<Option<Asset>, EngineError> {
    conn.query_row(
        "SELECT id, source_path, source_url, original_filename, width, height
         FROM assets WHERE id = ?1",
        params![id],
        asset_from_row,
    )
    .optional()
    .map_err(sql)
}

/// Escape `%`, `_` and the escape character itself so a fragment is
/// matched literally inside a LIKE pattern.
fn escape_like(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl AssetRepository for SqliteRepository {
    fn find_by_source_url(&self, url: &str) -> Result<Option<Asset>, EngineError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, source_path, source_url, original_filename, width, height
             FROM assets WHERE source_url = ?1",
            params![url],
            asset_from_row,
        )
        .optional()
        .map_err(sql)
    }

    fn find_unique_by_filename_fragment(
        &self,
        fragment: &str,
    ) -> Result<Option<Asset>, EngineError> {
        let conn = self.conn()?;
        let pattern = format!("%{}%", escape_like(fragment));

        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT a.id FROM assets a
                 LEFT JOIN derivatives d ON d.asset_id = a.id
                 WHERE a.original_filename LIKE ?1 ESCAPE '\\'
                    OR d.filename LIKE ?1 ESCAPE '\\'",
            )
            .map_err(sql)?;

        let rows = stmt
            .query_map(params![pattern], |row| row.get::<_, AssetId>(0))
            .map_err(sql)?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(id.map_err(sql)?);
        }

        match ids.as_slice() {
            [] => Ok(None),
            [id] => asset_by_id(&conn, *id),
            many => Err(EngineError::AmbiguousAsset {
                fragment: fragment.to_string(),
                matches: many.len(),
            }),
        }
    }

    fn source_file_path(&self, id: AssetId) -> Result<Option<PathBuf>, EngineError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT source_path FROM assets WHERE id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(sql)
        .map(|path| path.map(PathBuf::from))
    }

    fn record_derivative(&self, id: AssetId, record: &DerivativeRecord) -> Result<(), EngineError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO derivatives (asset_id, size_name, filename, mime_type, byte_size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(asset_id, size_name) DO UPDATE SET
                 filename = excluded.filename,
                 mime_type = excluded.mime_type,
                 byte_size = excluded.byte_size,
                 created_at = excluded.created_at",
            params![
                id,
                record.size_name,
                record.filename,
                record.mime_type,
                record.byte_size as i64,
                Utc::now().timestamp(),
            ],
        )
        .map_err(sql)?;
        Ok(())
    }
}
