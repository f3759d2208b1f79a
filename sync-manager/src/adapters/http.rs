use healthsync::{ProviderAccess, ProviderType, SyncError, SyncResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

const USER_AGENT: &str = "healthsync-sync-manager/1.0";

/// Builds the HTTP client shared by one adapter instance.
pub(crate) fn build_client() -> SyncResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {}", e)))
}

/// Sends an authorized GET and decodes the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    access: &ProviderAccess,
    provider: ProviderType,
    url: &str,
) -> SyncResult<T> {
    let response = access
        .authorize(client.get(url))
        .send()
        .await
        .map_err(|e| SyncError::Network(format!("{} request failed: {}", provider, e)))?;

    check_response_status(provider, &response)?;
    response
        .json::<T>()
        .await
        .map_err(|e| SyncError::Validation(format!("malformed {} response: {}", provider, e)))
}

/// Maps provider status codes onto sync errors.
///
/// - 401/403 → auth error (token expired, revoked or lacking scope)
/// - 429 → network error carrying `Retry-After`
/// - Other non-2xx → network error
pub(crate) fn check_response_status(
    provider: ProviderType,
    response: &reqwest::Response,
) -> SyncResult<()> {
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Auth(format!(
            "{} rejected the access token ({})",
            provider,
            response.status()
        ))),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            Err(SyncError::Network(format!(
                "{} rate limit exceeded (Retry-After: {})",
                provider, retry_after
            )))
        }
        s if !s.is_success() => Err(SyncError::Network(format!("{} API error: {}", provider, s))),
        _ => Ok(()),
    }
}

