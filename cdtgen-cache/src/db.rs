//! Database operations for the generation manifest

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::*;
use crate::schema::{CREATE_SCHEMA, SCHEMA_VERSION};

const SELECT_ENTRY: &str = "SELECT package, distro, architecture, fingerprint, source_url, version, bump, recorded_at
     FROM generation_manifest";

/// SQLite manifest database
pub struct ManifestDatabase {
    conn: Connection,
}

impl ManifestDatabase {
    /// Open or create a manifest database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        let needs_init: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_info'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count == 0)?;

        if needs_init {
            self.conn.execute_batch(CREATE_SCHEMA)?;
            self.conn.execute(
                "INSERT INTO schema_info (version, description) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, "Initial schema"],
            )?;
            return Ok(());
        }

        let found: i32 = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_info", [], |row| row.get(0))?;
        if found != SCHEMA_VERSION {
            return Err(Error::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ManifestEntry> {
        Ok(ManifestEntry {
            key: TupleKey {
                package: row.get(0)?,
                distro: row.get(1)?,
                architecture: row.get(2)?,
            },
            fingerprint: row.get(3)?,
            source_url: row.get(4)?,
            version: row.get(5)?,
            bump: row.get(6)?,
            recorded_at: row
                .get::<_, String>(7)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }

    /// Get the entry of a tuple
    pub fn get(&self, key: &TupleKey) -> Result<Option<ManifestEntry>> {
        let result = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE package = ?1 AND distro = ?2 AND architecture = ?3",
                    SELECT_ENTRY
                ),
                params![key.package, key.distro, key.architecture],
                Self::row_to_entry,
            )
            .optional()?;

        Ok(result)
    }

    /// Snapshot of every entry, handed read-only to workers
    pub fn all(&self) -> Result<HashMap<TupleKey, ManifestEntry>> {
        let mut stmt = self.conn.prepare(SELECT_ENTRY)?;
        let rows = stmt.query_map([], Self::row_to_entry)?;

        let mut entries = HashMap::new();
        for entry in rows {
            let entry = entry?;
            entries.insert(entry.key.clone(), entry);
        }
        Ok(entries)
    }

    /// Insert or replace entries in a single transaction
    pub fn record_many(&mut self, entries: &[ManifestEntry]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO generation_manifest
                    (package, distro, architecture, fingerprint, source_url, version, bump, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(package, distro, architecture) DO UPDATE SET
                    fingerprint = ?4,
                    source_url = ?5,
                    version = ?6,
                    bump = ?7,
                    recorded_at = ?8",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.key.package,
                    entry.key.distro,
                    entry.key.architecture,
                    entry.fingerprint,
                    entry.source_url,
                    entry.version,
                    entry.bump,
                    entry.recorded_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Recorded {} manifest entries", entries.len());
        Ok(())
    }

    /// Remove the entry of a tuple. Returns whether it existed.
    pub fn remove(&self, key: &TupleKey) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM generation_manifest WHERE package = ?1 AND distro = ?2 AND architecture = ?3",
            params![key.package, key.distro, key.architecture],
        )?;
        Ok(removed > 0)
    }

    /// Remove every entry whose tuple is not in `keep`. Returns the removed keys, sorted.
    pub fn remove_stale(&self, keep: &HashSet<TupleKey>) -> Result<Vec<TupleKey>> {
        let mut stale: Vec<TupleKey> = self
            .all()?
            .into_keys()
            .filter(|key| !keep.contains(key))
            .collect();
        stale.sort();
        for key in &stale {
            self.remove(key)?;
        }
        Ok(stale)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM generation_manifest", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
