use chrono::{DateTime, NaiveDate, Utc};
use healthsync::{
    ConnectedDevice, DeviceRecord, MetricType, ProviderType, RecordKey, SyncError,
};
use serde::{Deserialize, Serialize};

/// OAuth configuration for a provider adapter.
///
/// Defines the token endpoint and scopes required to obtain access tokens
/// for the provider's API.
///
/// # Example
/// ```
/// use sync_manager::OAuthConfig;
///
/// let config = OAuthConfig {
///     token_url: "https://ring.example.com/oauth/token".to_string(),
///     scopes: vec!["daily".to_string(), "heartrate".to_string()],
/// };
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Scopes requested for this provider
    pub scopes: Vec<String>,
}

/// One provider-shaped document, attributable to a single date and metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub date: NaiveDate,
    pub metric: MetricType,
    pub body: serde_json::Value,
}

impl RawPayload {
    pub fn new(date: NaiveDate, metric: MetricType, body: serde_json::Value) -> Self {
        Self { date, metric, body }
    }
}

/// Identity of the device whose payloads are being normalized.
#[derive(Clone, Debug)]
pub struct RecordContext {
    pub user_id: String,
    pub device_id: String,
    pub provider: ProviderType,
}

impl RecordContext {
    pub fn for_device(device: &ConnectedDevice) -> Self {
        Self {
            user_id: device.user_id.clone(),
            device_id: device.id.clone(),
            provider: device.provider,
        }
    }

    /// Builds the canonical record for `(date, metric)` with a derived id.
    pub fn record(
        &self,
        date: NaiveDate,
        metric: MetricType,
        payload: serde_json::Value,
    ) -> DeviceRecord {
        let key = RecordKey {
            device_id: self.device_id.clone(),
            date,
            metric,
        };
        DeviceRecord {
            id: key.record_id(),
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            date,
            metric,
            payload,
            source: self.provider,
        }
    }
}

/// Outcome of one successful device sync.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncSummary {
    pub device_id: String,
    /// Records that did not exist before this sync
    pub inserted: usize,
    /// Records that replaced an earlier version with the same key
    pub replaced: usize,
    pub last_synced: DateTime<Utc>,
}

/// Per-device entry of a `sync_all` run.
#[derive(Clone, Debug)]
pub struct SyncReport {
    pub device_id: String,
    pub provider: ProviderType,
    pub result: Result<SyncSummary, SyncError>,
}

impl SyncReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}
