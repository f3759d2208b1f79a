pub mod api;
pub mod transformer;

use crate::types::{OAuthConfig, RawPayload, RecordContext};
use crate::ProviderAdapter;
use async_trait::async_trait;
use chrono::NaiveDate;
use healthsync::config::ProviderEndpoint;
use healthsync::{DeviceRecord, ProviderAccess, ProviderType, SyncResult};
use tracing::debug;

use self::api::{DailyCollection, RingClient};

pub const SCOPES: &[&str] = &["daily", "heartrate", "personal"];

/// Ring adapter: pulls daily sleep, readiness and activity documents.
pub struct RingAdapter {
    client: RingClient,
    token_url: String,
}

impl RingAdapter {
    pub fn new(endpoint: &ProviderEndpoint) -> SyncResult<Self> {
        Ok(Self {
            client: RingClient::new(endpoint.base_url.clone())?,
            token_url: endpoint.token_url.clone(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for RingAdapter {
    fn provider(&self) -> ProviderType {
        ProviderType::Ring
    }

    fn display_name(&self) -> &str {
        "Smart Ring"
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

        for collection in DailyCollection::ALL {
            let docs = self.client.fetch_daily(access, collection, since).await?;
            debug!(collection = ?collection, count = docs.len(), "Fetched ring collection");
            raw.extend(
                docs.into_iter()
                    .filter(|doc| doc.day >= since)
                    .map(|doc| {
                        RawPayload::new(
                            doc.day,
                            collection.metric(),
                            serde_json::Value::Object(doc.fields),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::access_for;
    use healthsync::MetricType;
    use mockito::Server;

    fn endpoint(base_url: String) -> ProviderEndpoint {
        ProviderEndpoint {
            base_url,
            token_url: "https://ring.example.com/oauth/token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_raw_collects_all_collections() {
        let mut server = Server::new_async().await;
        let (_vault, access) = access_for(ProviderType::Ring).await;

        let _sleep = server
            .mock("GET", "/v2/usercollection/daily_sleep?start_date=2026-10-18")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [
                    {"day": "2026-10-17", "score": 60, "total_sleep_duration": 20000},
                    {"day": "2026-10-18", "score": 82, "total_sleep_duration": 27000}
                ]}"#,
            )
            .create_async()
            .await;
        let _readiness = server
            .mock("GET", "/v2/usercollection/daily_readiness?start_date=2026-10-18")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"day": "2026-10-19", "score": 77}]}"#)
            .create_async()
            .await;
        let _activity = server
            .mock("GET", "/v2/usercollection/daily_activity?start_date=2026-10-18")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": []}"#)
            .create_async()
            .await;

        let adapter = RingAdapter::new(&endpoint(server.url())).unwrap();
        let raw = adapter
            .fetch_raw(&access, "2026-10-18".parse().unwrap())
            .await
            .unwrap();

        // The 2026-10-17 document predates `since` and is dropped
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].metric, MetricType::Sleep);
        assert_eq!(raw[0].body["score"], 82);
        assert_eq!(raw[1].metric, MetricType::Readiness);
    }

    #[test]
    fn test_oauth_config() {
        let adapter = RingAdapter::new(&endpoint("http://localhost".to_string())).unwrap();
        assert_eq!(adapter.provider(), ProviderType::Ring);

        let oauth = adapter.oauth_config().unwrap();
        assert_eq!(oauth.token_url, "https://ring.example.com/oauth/token");
        assert_eq!(oauth.scopes, vec!["daily", "heartrate", "personal"]);
    }
}
