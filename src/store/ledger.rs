use super::{DataStore, KeyedLocks};
use crate::device::{ConnectedDevice, DeviceRecord, MetricType};
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;

/// Serialized access to a [`DataStore`].
///
/// Every read-modify-write of a user's collections holds that user's lock
/// from load to save, so concurrent writers (connects, syncs, disconnects)
/// never overwrite each other's changes. Reads take no lock.
pub struct Ledger {
    store: Arc<dyn DataStore>,
    user_locks: KeyedLocks,
}

impl Ledger {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            user_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub async fn devices(&self, user_id: &str) -> SyncResult<Vec<ConnectedDevice>> {
        self.store.load_devices(user_id).await
    }

    pub async fn device(&self, user_id: &str, device_id: &str) -> SyncResult<ConnectedDevice> {
        self.devices(user_id)
            .await?
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| SyncError::device_not_found(device_id))
    }

    pub async fn records(&self, user_id: &str) -> SyncResult<Vec<DeviceRecord>> {
        self.store.load_records(user_id).await
    }

    /// Records of one device, ordered by date then metric.
    pub async fn device_records(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> SyncResult<Vec<DeviceRecord>> {
        let mut records: Vec<DeviceRecord> = self
            .records(user_id)
            .await?
            .into_iter()
            .filter(|r| r.device_id == device_id)
            .collect();
        records.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.metric.as_str().cmp(b.metric.as_str()))
        });
        Ok(records)
    }

    pub async fn latest(
        &self,
        user_id: &str,
        metric: MetricType,
    ) -> SyncResult<Option<DeviceRecord>> {
        self.store.get_latest(user_id, metric).await
    }

    pub async fn users(&self) -> SyncResult<Vec<String>> {
        self.store.list_users().await
    }

    /// Applies `f` to the user's device list and saves the result.
    ///
    /// If `f` returns an error nothing is written.
    pub async fn update_devices<T, F>(&self, user_id: &str, f: F) -> SyncResult<T>
    where
        T: Send,
        F: FnOnce(&mut Vec<ConnectedDevice>) -> SyncResult<T> + Send,
    {
        let _guard = self.user_locks.acquire(user_id).await;
        let mut devices = self.store.load_devices(user_id).await?;
        let out = f(&mut devices)?;
        self.store.save_devices(user_id, &devices).await?;
        Ok(out)
    }

    /// Applies `f` to both collections and saves them in one atomic write.
    pub async fn update_all<T, F>(&self, user_id: &str, f: F) -> SyncResult<T>
    where
        T: Send,
        F: FnOnce(&mut Vec<ConnectedDevice>, &mut Vec<DeviceRecord>) -> SyncResult<T> + Send,
    {
        let _guard = self.user_locks.acquire(user_id).await;
        let mut devices = self.store.load_devices(user_id).await?;
        let mut records = self.store.load_records(user_id).await?;
        let out = f(&mut devices, &mut records)?;
        self.store.save_all(user_id, &devices, &records).await?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProviderType;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn device(user_id: &str, provider: ProviderType) -> ConnectedDevice {
        ConnectedDevice::new(user_id, provider, provider.as_str(), format!("cred-{}", provider))
    }

    #[tokio::test]
    async fn test_device_not_found() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()));
        let err = ledger.device("u1", "ring-missing").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_closure_error_writes_nothing() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()));
        let result: SyncResult<()> = ledger
            .update_devices("u1", |devices| {
                devices.push(device("u1", ProviderType::Ring));
                Err(SyncError::Validation("rejected".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(ledger.devices("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_naive_writers_lose_updates() {
        // Two unserialized load/modify/save cycles against a slow store: the
        // second save clobbers the first. This is what the ledger prevents.
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(20)));

        let naive_add = |provider: ProviderType| {
            let store = Arc::clone(&store);
            async move {
                let mut devices = store.load_devices("u1").await.unwrap();
                devices.push(device("u1", provider));
                store.save_devices("u1", &devices).await.unwrap();
            }
        };

        tokio::join!(naive_add(ProviderType::Ring), naive_add(ProviderType::Band));
        assert_eq!(store.load_devices("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::with_latency(
            Duration::from_millis(20),
        ))));

        let handles: Vec<_> = ProviderType::ALL
            .iter()
            .map(|&provider| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    ledger
                        .update_devices("u1", |devices| {
                            devices.push(device("u1", provider));
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let devices = ledger.devices("u1").await.unwrap();
        assert_eq!(devices.len(), ProviderType::ALL.len());
    }

    #[tokio::test]
    async fn test_users_do_not_block_each_other() {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new())));

        let (a, b) = tokio::join!(
            ledger.update_devices("u1", |d| {
                d.push(device("u1", ProviderType::Ring));
                Ok(())
            }),
            ledger.update_devices("u2", |d| {
                d.push(device("u2", ProviderType::Ring));
                Ok(())
            }),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(ledger.users().await.unwrap(), vec!["u1", "u2"]);
    }
}
