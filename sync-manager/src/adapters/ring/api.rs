use crate::adapters::http::{build_client, get_json};
use chrono::NaiveDate;
use healthsync::{MetricType, ProviderAccess, ProviderType, SyncResult};
use reqwest::Client;
use serde::Deserialize;

/// Daily collections exposed by the ring's usercollection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyCollection {
    Sleep,
    Readiness,
    Activity,
}

impl DailyCollection {
    pub const ALL: [DailyCollection; 3] = [
        DailyCollection::Sleep,
        DailyCollection::Readiness,
        DailyCollection::Activity,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            DailyCollection::Sleep => "/v2/usercollection/daily_sleep",
            DailyCollection::Readiness => "/v2/usercollection/daily_readiness",
            DailyCollection::Activity => "/v2/usercollection/daily_activity",
        }
    }

    pub fn metric(&self) -> MetricType {
        match self {
            DailyCollection::Sleep => MetricType::Sleep,
            DailyCollection::Readiness => MetricType::Readiness,
            DailyCollection::Activity => MetricType::Activity,
        }
    }
}

/// One day of one collection. Everything except `day` is kept verbatim.
#[derive(Debug, Deserialize)]
pub struct RingDocument {
    pub day: NaiveDate,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RingPage {
    data: Vec<RingDocument>,
}

/// HTTP client for the ring REST API.
pub struct RingClient {
    http_client: Client,
    base_url: String,
}

impl RingClient {
    pub fn new(base_url: String) -> SyncResult<Self> {
        Ok(Self {
            http_client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch one daily collection starting at `start_date` (inclusive).
    pub async fn fetch_daily(
        &self,
        access: &ProviderAccess,
        collection: DailyCollection,
        start_date: NaiveDate,
    ) -> SyncResult<Vec<RingDocument>> {
        let url = format!(
            "{}{}?start_date={}",
            self.base_url,
            collection.path(),
            start_date
        );
        let page: RingPage = get_json(&self.http_client, access, ProviderType::Ring, &url).await?;
        Ok(page.data)
    }
}
