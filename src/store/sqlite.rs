//! Device and record persistence using SQLite.
//!
//! A single key/value table mirrors the logical layout: one row per
//! `devices:{user_id}` and `records:{user_id}` key, JSON-encoded values.

use super::{devices_key, records_key, DataStore, DEVICES_PREFIX};
use crate::device::{ConnectedDevice, DeviceRecord};
use crate::error::{SyncError, SyncResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Persists device and record collections in SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the SQLite database and ensures the table exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open records DB at {}", db_path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_table()?;
        Ok(store)
    }

    fn create_table(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS collections (
                    key        TEXT PRIMARY KEY,
                    value      TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );",
            )
            .context("Failed to create collections table")?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Records store connection lock poisoned"))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM collections WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read {}", key))?;

        match value {
            Some(json) => {
                serde_json::from_str(&json).with_context(|| format!("Corrupt collection {}", key))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Writes (or deletes, for an empty collection) one key inside `conn`.
    fn write<T: Serialize>(conn: &Connection, key: &str, items: &[T]) -> Result<()> {
        if items.is_empty() {
            conn.execute("DELETE FROM collections WHERE key = ?1", params![key])
                .with_context(|| format!("Failed to clear {}", key))?;
            return Ok(());
        }

        let json = serde_json::to_string(items)
            .with_context(|| format!("Failed to encode {}", key))?;
        conn.execute(
            "INSERT INTO collections (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to write {}", key))?;
        Ok(())
    }

    fn write_all(
        &self,
        user_id: &str,
        devices: &[ConnectedDevice],
        records: &[DeviceRecord],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        Self::write(&tx, &devices_key(user_id), devices)?;
        Self::write(&tx, &records_key(user_id), records)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(())
    }

    fn users(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM collections WHERE key LIKE 'devices:%' ORDER BY key")
            .context("Failed to prepare list_users query")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to list users")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read user keys")?;

        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(DEVICES_PREFIX).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn load_devices(&self, user_id: &str) -> SyncResult<Vec<ConnectedDevice>> {
        self.read(&devices_key(user_id)).map_err(SyncError::storage)
    }

    async fn save_devices(&self, user_id: &str, devices: &[ConnectedDevice]) -> SyncResult<()> {
        let conn = self.conn().map_err(SyncError::storage)?;
        Self::write(&conn, &devices_key(user_id), devices).map_err(SyncError::storage)
    }

    async fn load_records(&self, user_id: &str) -> SyncResult<Vec<DeviceRecord>> {
        self.read(&records_key(user_id)).map_err(SyncError::storage)
    }

    async fn save_records(&self, user_id: &str, records: &[DeviceRecord]) -> SyncResult<()> {
        let conn = self.conn().map_err(SyncError::storage)?;
        Self::write(&conn, &records_key(user_id), records).map_err(SyncError::storage)
    }

    async fn save_all(
        &self,
        user_id: &str,
        devices: &[ConnectedDevice],
        records: &[DeviceRecord],
    ) -> SyncResult<()> {
        self.write_all(user_id, devices, records)
            .map_err(SyncError::storage)
    }

    async fn list_users(&self) -> SyncResult<Vec<String>> {
        self.users().map_err(SyncError::storage)
    }
}
