use super::{devices_key, records_key, DataStore, DEVICES_PREFIX};
use crate::device::{ConnectedDevice, DeviceRecord};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// In-memory key/value store holding JSON collections.
///
/// Used by tests and demo mode. `with_latency` makes every load and save
/// suspend, which widens race windows for concurrent-writer tests;
/// `set_fail_writes` injects storage failures.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    latency: Option<Duration>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            latency: None,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Makes every subsequent save fail with `SyncError::Storage`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn entries(&self) -> SyncResult<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Storage("memory store lock poisoned".to_string()))
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("write rejected by memory store".to_string()));
        }
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Vec<T>> {
        match self.entries()?.get(key) {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Vec::new()),
        }
    }

    fn encode<T: Serialize>(items: &[T]) -> SyncResult<Option<String>> {
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(items)?))
    }

    fn apply(entries: &mut HashMap<String, String>, key: String, value: Option<String>) {
        match value {
            Some(json) => {
                entries.insert(key, json);
            }
            None => {
                entries.remove(&key);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn load_devices(&self, user_id: &str) -> SyncResult<Vec<ConnectedDevice>> {
        self.pause().await;
        self.read(&devices_key(user_id))
    }

    async fn save_devices(&self, user_id: &str, devices: &[ConnectedDevice]) -> SyncResult<()> {
        self.pause().await;
        self.check_writable()?;
        let value = Self::encode(devices)?;
        Self::apply(&mut *self.entries()?, devices_key(user_id), value);
        Ok(())
    }

    async fn load_records(&self, user_id: &str) -> SyncResult<Vec<DeviceRecord>> {
        self.pause().await;
        self.read(&records_key(user_id))
    }

    async fn save_records(&self, user_id: &str, records: &[DeviceRecord]) -> SyncResult<()> {
        self.pause().await;
        self.check_writable()?;
        let value = Self::encode(records)?;
        Self::apply(&mut *self.entries()?, records_key(user_id), value);
        Ok(())
    }

    async fn save_all(
        &self,
        user_id: &str,
        devices: &[ConnectedDevice],
        records: &[DeviceRecord],
    ) -> SyncResult<()> {
        self.pause().await;
        self.check_writable()?;
        // Encode both before touching the map so a failure leaves it unchanged
        let devices = Self::encode(devices)?;
        let records = Self::encode(records)?;

        let mut entries = self.entries()?;
        Self::apply(&mut entries, devices_key(user_id), devices);
        Self::apply(&mut entries, records_key(user_id), records);
        Ok(())
    }

    async fn list_users(&self) -> SyncResult<Vec<String>> {
        let mut users: Vec<String> = self
            .entries()?
            .keys()
            .filter_map(|k| k.strip_prefix(DEVICES_PREFIX))
            .map(str::to_string)
            .collect();
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProviderType;

    fn device(user_id: &str) -> ConnectedDevice {
        ConnectedDevice::new(user_id, ProviderType::Ring, "Ring", "cred-1".into())
    }

    #[tokio::test]
    async fn test_empty_user() {
        let store = MemoryStore::new();
        assert!(store.load_devices("u1").await.unwrap().is_empty());
        assert!(store.load_records("u1").await.unwrap().is_empty());
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_devices() {
        let store = MemoryStore::new();
        let devices = vec![device("u1")];
        store.save_devices("u1", &devices).await.unwrap();

        assert_eq!(store.load_devices("u1").await.unwrap(), devices);
        assert!(store.load_devices("u2").await.unwrap().is_empty());
        assert_eq!(store.list_users().await.unwrap(), vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_saving_empty_list_removes_user() {
        let store = MemoryStore::new();
        store.save_devices("u1", &[device("u1")]).await.unwrap();
        store.save_devices("u1", &[]).await.unwrap();
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_writes_leaves_state() {
        let store = MemoryStore::new();
        let devices = vec![device("u1")];
        store.save_devices("u1", &devices).await.unwrap();

        store.set_fail_writes(true);
        let err = store.save_all("u1", &[], &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(store.load_devices("u1").await.unwrap(), devices);
    }
}
