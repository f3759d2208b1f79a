use crate::adapters::http::{build_client, get_json};
use chrono::NaiveDate;
use healthsync::{MetricType, ProviderAccess, ProviderType, SyncResult};
use reqwest::Client;
use serde::Deserialize;

/// Band REST endpoints, one per metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandEndpoint {
    Sleep,
    HeartRate,
    Activity,
}

impl BandEndpoint {
    pub const ALL: [BandEndpoint; 3] = [
        BandEndpoint::Sleep,
        BandEndpoint::HeartRate,
        BandEndpoint::Activity,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            BandEndpoint::Sleep => "/v1/sleep",
            BandEndpoint::HeartRate => "/v1/heart_rate/daily",
            BandEndpoint::Activity => "/v1/activity/daily",
        }
    }

    pub fn metric(&self) -> MetricType {
        match self {
            BandEndpoint::Sleep => MetricType::Sleep,
            BandEndpoint::HeartRate => MetricType::HeartRate,
            BandEndpoint::Activity => MetricType::Activity,
        }
    }
}

/// A dated band entry; all other fields are kept as sent.
#[derive(Debug, Deserialize)]
pub struct BandEntry {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BandResponse {
    records: Vec<BandEntry>,
}

/// HTTP client for the band REST API.
pub struct BandClient {
    http_client: Client,
    base_url: String,
}

impl BandClient {
    pub fn new(base_url: String) -> SyncResult<Self> {
        Ok(Self {
            http_client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch entries dated `from` or later.
    pub async fn fetch(
        &self,
        access: &ProviderAccess,
        endpoint: BandEndpoint,
        from: NaiveDate,
    ) -> SyncResult<Vec<BandEntry>> {
        let url = format!("{}{}?from={}", self.base_url, endpoint.path(), from);
        let response: BandResponse =
            get_json(&self.http_client, access, ProviderType::Band, &url).await?;
        Ok(response.records)
    }
}
