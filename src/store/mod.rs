//! Durable per-user persistence of devices and records.
//!
//! The [`DataStore`] contract is whole-collection read/replace under two keys
//! per user (`devices:{user_id}`, `records:{user_id}`). Read-modify-write
//! cycles must go through [`Ledger`], which serializes them per user.

use crate::device::{ConnectedDevice, DeviceRecord, MetricType};
use crate::error::SyncResult;
use async_trait::async_trait;

mod ledger;
mod locks;
mod memory;
mod sqlite;

pub use ledger::Ledger;
pub use locks::KeyedLocks;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

const DEVICES_PREFIX: &str = "devices:";
const RECORDS_PREFIX: &str = "records:";

pub fn devices_key(user_id: &str) -> String {
    format!("{}{}", DEVICES_PREFIX, user_id)
}

pub fn records_key(user_id: &str) -> String {
    format!("{}{}", RECORDS_PREFIX, user_id)
}

/// Keyed persistence of device and record collections.
///
/// Saving an empty collection removes its key, so `list_users` only reports
/// users that still own devices.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn load_devices(&self, user_id: &str) -> SyncResult<Vec<ConnectedDevice>>;

    async fn save_devices(&self, user_id: &str, devices: &[ConnectedDevice]) -> SyncResult<()>;

    async fn load_records(&self, user_id: &str) -> SyncResult<Vec<DeviceRecord>>;

    async fn save_records(&self, user_id: &str, records: &[DeviceRecord]) -> SyncResult<()>;

    /// Replaces both collections in one atomic write: either both land or neither.
    async fn save_all(
        &self,
        user_id: &str,
        devices: &[ConnectedDevice],
        records: &[DeviceRecord],
    ) -> SyncResult<()>;

    /// Users with at least one stored device.
    async fn list_users(&self) -> SyncResult<Vec<String>>;

    /// Record with the most recent date across all of the user's devices.
    async fn get_latest(
        &self,
        user_id: &str,
        metric: MetricType,
    ) -> SyncResult<Option<DeviceRecord>> {
        let records = self.load_records(user_id).await?;
        let devices = self.load_devices(user_id).await?;
        Ok(latest_record(&records, &devices, metric).cloned())
    }
}

/// Latest record for `metric`: greatest date, then the most recently synced
/// device, then the highest device id.
pub fn latest_record<'a>(
    records: &'a [DeviceRecord],
    devices: &[ConnectedDevice],
    metric: MetricType,
) -> Option<&'a DeviceRecord> {
    let synced_at = |record: &DeviceRecord| {
        devices
            .iter()
            .find(|d| d.id == record.device_id)
            .and_then(|d| d.last_synced)
    };

    records
        .iter()
        .filter(|r| r.metric == metric)
        .max_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| synced_at(a).cmp(&synced_at(b)))
                .then_with(|| a.device_id.cmp(&b.device_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ProviderType, RecordKey};
    use chrono::{Duration, NaiveDate, Utc};
    use serde_json::json;

    fn device(id: &str, synced_minutes_ago: Option<i64>) -> ConnectedDevice {
        let mut d = ConnectedDevice::new("u1", ProviderType::Ring, "Ring", "cred".into());
        d.id = id.to_string();
        d.last_synced = synced_minutes_ago.map(|m| Utc::now() - Duration::minutes(m));
        d
    }

    fn record(device_id: &str, date: &str, metric: MetricType) -> DeviceRecord {
        let date: NaiveDate = date.parse().unwrap();
        DeviceRecord {
            id: RecordKey {
                device_id: device_id.to_string(),
                date,
                metric,
            }
            .record_id(),
            user_id: "u1".to_string(),
            device_id: device_id.to_string(),
            date,
            metric,
            payload: json!({}),
            source: ProviderType::Ring,
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(devices_key("u1"), "devices:u1");
        assert_eq!(records_key("u1"), "records:u1");
    }

    #[test]
    fn test_latest_picks_most_recent_date() {
        let devices = vec![device("a", Some(5)), device("b", Some(1))];
        let records = vec![
            record("a", "2026-10-19", MetricType::Sleep),
            record("b", "2026-10-18", MetricType::Sleep),
            record("b", "2026-10-20", MetricType::Readiness),
        ];

        let latest = latest_record(&records, &devices, MetricType::Sleep).unwrap();
        assert_eq!(latest.device_id, "a");
        assert_eq!(latest.date.to_string(), "2026-10-19");
    }

    #[test]
    fn test_latest_tie_broken_by_sync_recency() {
        let devices = vec![device("a", Some(1)), device("z", Some(60))];
        let records = vec![
            record("a", "2026-10-19", MetricType::Sleep),
            record("z", "2026-10-19", MetricType::Sleep),
        ];

        let latest = latest_record(&records, &devices, MetricType::Sleep).unwrap();
        assert_eq!(latest.device_id, "a");
    }

    #[test]
    fn test_latest_tie_without_sync_uses_device_id() {
        let devices = vec![device("a", None), device("b", None)];
        let records = vec![
            record("b", "2026-10-19", MetricType::Activity),
            record("a", "2026-10-19", MetricType::Activity),
        ];

        let latest = latest_record(&records, &devices, MetricType::Activity).unwrap();
        assert_eq!(latest.device_id, "b");
    }

    #[test]
    fn test_latest_none_for_missing_metric() {
        let records = vec![record("a", "2026-10-19", MetricType::Sleep)];
        assert!(latest_record(&records, &[], MetricType::Nutrition).is_none());
    }
}
