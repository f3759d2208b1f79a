pub mod api;
pub mod transformer;

use crate::types::{OAuthConfig, RawPayload, RecordContext};
use crate::ProviderAdapter;
use async_trait::async_trait;
use chrono::NaiveDate;
use healthsync::config::ProviderEndpoint;
use healthsync::{DeviceRecord, ProviderAccess, ProviderType, SyncResult};
use tracing::debug;

use self::api::{BandClient, BandEndpoint};

pub const SCOPES: &[&str] = &["sleep", "heart_rate", "activity"];

/// Band adapter: pulls sleep, daily heart rate and daily activity.
pub struct BandAdapter {
    client: BandClient,
    token_url: String,
}

impl BandAdapter {
    pub fn new(endpoint: &ProviderEndpoint) -> SyncResult<Self> {
        Ok(Self {
            client: BandClient::new(endpoint.base_url.clone())?,
            token_url: endpoint.token_url.clone(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for BandAdapter {
    fn provider(&self) -> ProviderType {
        ProviderType::Band
    }

    fn display_name(&self) -> &str {
        "Fitness Band"
    }

    fn oauth_config(&self) -> Option<OAuthConfig> {
        Some(OAuthConfig {
            token_url: self.token_url.clone(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        })
    }

    async fn fetch_raw(
        &self,
        access: &ProviderAccess,
        since: NaiveDate,
    ) -> SyncResult<Vec<RawPayload>> {
        let mut raw = Vec::new();

        for endpoint in BandEndpoint::ALL {
            let entries = self.client.fetch(access, endpoint, since).await?;
            debug!(endpoint = ?endpoint, count = entries.len(), "Fetched band entries");
            raw.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.date >= since)
                    .map(|entry| {
                        RawPayload::new(
                            entry.date,
                            endpoint.metric(),
                            serde_json::Value::Object(entry.fields),
                        )
                    }),
            );
        }

        Ok(raw)
    }

    fn normalize(
        &self,
        context: &RecordContext,
        raw: Vec<RawPayload>,
    ) -> SyncResult<Vec<DeviceRecord>> {
        transformer::normalize(context, raw)
    }
}
