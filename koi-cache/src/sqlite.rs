use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection};

use koi_types::bundle::Bundle;
use koi_types::rid::{Rid, RidType};

use crate::error::CacheError;
use crate::traits::Cache;

/// SQLite-backed cache. One `bundles` table keyed by the RID's text form,
/// with the RID type denormalized for filtered listings.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) a SQLite cache at the given path.
    /// Use `:memory:` for an in-memory database (useful for tests).
    pub fn new(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bundles (
                rid      TEXT PRIMARY KEY,
                rid_type TEXT NOT NULL,
                bundle   TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bundles_rid_type ON bundles (rid_type)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Cache for SqliteCache {
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>, CacheError> {
        let conn = self.conn.lock().map_err(|e| CacheError::ReadError {
            reason: e.to_string(),
        })?;
        let mut stmt = conn.prepare_cached("SELECT bundle FROM bundles WHERE rid = ?1")?;
        let mut rows = stmt.query(params![rid.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let encoded: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&encoded)?))
            }
            None => Ok(None),
        }
    }

    fn write(&self, bundle: &Bundle) -> Result<(), CacheError> {
        let conn = self.conn.lock().map_err(|e| CacheError::WriteError {
            reason: e.to_string(),
        })?;
        let encoded = serde_json::to_string(bundle)?;
        conn.execute(
            "INSERT OR REPLACE INTO bundles (rid, rid_type, bundle) VALUES (?1, ?2, ?3)",
            params![
                bundle.rid().to_string(),
                bundle.rid().rid_type().to_string(),
                encoded
            ],
        )?;
        Ok(())
    }

    fn delete(&self, rid: &Rid) -> Result<bool, CacheError> {
        let conn = self.conn.lock().map_err(|e| CacheError::WriteError {
            reason: e.to_string(),
        })?;
        let changed = conn.execute(
            "DELETE FROM bundles WHERE rid = ?1",
            params![rid.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn exists(&self, rid: &Rid) -> Result<bool, CacheError> {
        let conn = self.conn.lock().map_err(|e| CacheError::ReadError {
            reason: e.to_string(),
        })?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM bundles WHERE rid = ?1")?;
        let mut rows = stmt.query(params![rid.to_string()])?;
        Ok(rows.next()?.is_some())
    }

    fn list_rids(&self, rid_types: &[RidType]) -> Result<Vec<Rid>, CacheError> {
        let conn = self.conn.lock().map_err(|e| CacheError::ReadError {
            reason: e.to_string(),
        })?;

        fn collect(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<String>, CacheError> {
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get(0)?);
            }
            Ok(out)
        }

        let raw = if rid_types.is_empty() {
            let mut stmt = conn.prepare_cached("SELECT rid FROM bundles ORDER BY rid")?;
            let mut rows = stmt.query([])?;
            collect(&mut rows)?
        } else {
            let placeholders = vec!["?"; rid_types.len()].join(", ");
            let sql =
                format!("SELECT rid FROM bundles WHERE rid_type IN ({placeholders}) ORDER BY rid");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(rid_types.iter().map(|t| t.to_string())))?;
            collect(&mut rows)?
        };

        let mut rids = Vec::with_capacity(raw.len());
        for encoded in raw {
            let rid = encoded
                .parse::<Rid>()
                .map_err(|e| CacheError::SerializationError {
                    reason: e.to_string(),
                })?;
            rids.push(rid);
        }
        Ok(rids)
    }
}
