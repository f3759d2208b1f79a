use crate::error::SyncError;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
mod tests;

/// External data source a user can connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Ring,
    Band,
    PhoneHealth,
    RunApp,
    FoodApp,
}

impl ProviderType {
    pub const ALL: [ProviderType; 5] = [
        ProviderType::Ring,
        ProviderType::Band,
        ProviderType::PhoneHealth,
        ProviderType::RunApp,
        ProviderType::FoodApp,
    ];

    /// Wire name, also used as the device id prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Ring => "ring",
            ProviderType::Band => "band",
            ProviderType::PhoneHealth => "phone-health",
            ProviderType::RunApp => "run-app",
            ProviderType::FoodApp => "food-app",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SyncError::Validation(format!("unknown provider type '{}'", s)))
    }
}

/// Canonical measurement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Sleep,
    Activity,
    Readiness,
    HeartRate,
    Workout,
    Nutrition,
}

impl MetricType {
    pub const ALL: [MetricType; 6] = [
        MetricType::Sleep,
        MetricType::Activity,
        MetricType::Readiness,
        MetricType::HeartRate,
        MetricType::Workout,
        MetricType::Nutrition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Sleep => "sleep",
            MetricType::Activity => "activity",
            MetricType::Readiness => "readiness",
            MetricType::HeartRate => "heart_rate",
            MetricType::Workout => "workout",
            MetricType::Nutrition => "nutrition",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| SyncError::Validation(format!("unknown metric type '{}'", s)))
    }
}

/// Connection lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    /// Credential is gone; the provider must be connected again
    Disconnected,
    Syncing,
    Error,
}

/// A provider connection owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    /// `<provider>-<token>`, unique across users
    pub id: String,
    pub user_id: String,
    pub provider: ProviderType,
    pub display_name: String,
    pub state: ConnectionState,
    /// Set only after a successful merge-write
    pub last_synced: Option<DateTime<Utc>>,
    /// Opaque handle into the credential vault
    pub credential_ref: String,
    pub created_at: DateTime<Utc>,
    /// Message of the most recent failed sync, cleared on success
    #[serde(default)]
    pub last_error: Option<String>,
}

impl ConnectedDevice {
    /// Creates a device in state `Connected` with a freshly generated id.
    pub fn new(
        user_id: &str,
        provider: ProviderType,
        display_name: &str,
        credential_ref: String,
    ) -> Self {
        Self {
            id: generate_device_id(provider),
            user_id: user_id.to_string(),
            provider,
            display_name: display_name.to_string(),
            state: ConnectionState::Connected,
            last_synced: None,
            credential_ref,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Generate device ID: {provider}-{random_8chars}
pub fn generate_device_id(provider: ProviderType) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect();
    format!("{}-{}", provider.as_str(), random)
}

/// Identity of a record: one per device, date and metric
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub device_id: String,
    pub date: NaiveDate,
    pub metric: MetricType,
}

impl RecordKey {
    /// Deterministic record id derived from the key
    pub fn record_id(&self) -> String {
        format!("{}:{}:{}", self.device_id, self.date, self.metric)
    }
}

/// A single normalized, dated, typed measurement from one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub date: NaiveDate,
    pub metric: MetricType,
    pub payload: serde_json::Value,
    pub source: ProviderType,
}

impl DeviceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            device_id: self.device_id.clone(),
            date: self.date,
            metric: self.metric,
        }
    }
}

/// Counts produced by [`merge_records`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub replaced: usize,
}

/// Merge-write: every incoming record replaces an existing record with the same
/// key, or is appended. Duplicate keys within `incoming` collapse to the last one.
pub fn merge_records(existing: &mut Vec<DeviceRecord>, incoming: Vec<DeviceRecord>) -> MergeStats {
    let mut stats = MergeStats::default();

    for record in incoming {
        let key = record.key();
        match existing.iter_mut().find(|r| r.key() == key) {
            Some(slot) => {
                *slot = record;
                stats.replaced += 1;
            }
            None => {
                existing.push(record);
                stats.inserted += 1;
            }
        }
    }

    stats
}
