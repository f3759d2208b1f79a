//! Token issuers: where fresh access tokens come from.

use crate::device::ProviderType;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

/// Token grant as returned by a provider's token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: i64,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish_non_exhaustive()
    }
}

/// Source of provider tokens.
///
/// `issue` is called once at connect time, `refresh` whenever a stored access
/// token has expired. A rejected refresh token must surface as `SyncError::Auth`.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, provider: ProviderType) -> SyncResult<TokenGrant>;

    async fn refresh(&self, provider: ProviderType, refresh_token: &str)
        -> SyncResult<TokenGrant>;
}

/// Deterministic in-process issuer for demo mode and tests.
///
/// Tokens are numbered (`stub-ring-access-1`, `stub-ring-access-2`, ...).
pub struct StubIssuer {
    lifetime_secs: i64,
    refresh_fails: AtomicBool,
    counter: AtomicU64,
    refresh_calls: AtomicU64,
}

impl StubIssuer {
    /// Issues tokens valid for one hour
    pub fn new() -> Self {
        Self::with_lifetime(3600)
    }

    /// Issues tokens valid for `lifetime_secs` (zero or negative: already expired)
    pub fn with_lifetime(lifetime_secs: i64) -> Self {
        Self {
            lifetime_secs,
            refresh_fails: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            refresh_calls: AtomicU64::new(0),
        }
    }

    /// Makes every subsequent refresh fail with `SyncError::Auth`
    pub fn set_refresh_fails(&self, fails: bool) {
        self.refresh_fails.store(fails, Ordering::SeqCst);
    }

    /// Number of grants handed out so far (issue + refresh)
    pub fn grants_issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Number of refresh requests received, successful or not
    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn next_grant(&self, provider: ProviderType, refresh_token: Option<String>) -> TokenGrant {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        TokenGrant {
            access_token: format!("stub-{}-access-{}", provider, n),
            refresh_token: refresh_token
                .or_else(|| Some(format!("stub-{}-refresh-{}", provider, n))),
            expires_in_seconds: self.lifetime_secs,
        }
    }
}

impl Default for StubIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenIssuer for StubIssuer {
    async fn issue(&self, provider: ProviderType) -> SyncResult<TokenGrant> {
        Ok(self.next_grant(provider, None))
    }

    async fn refresh(
        &self,
        provider: ProviderType,
        refresh_token: &str,
    ) -> SyncResult<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(SyncError::Auth(format!(
                "refresh token rejected by {}",
                provider
            )));
        }
        Ok(self.next_grant(provider, Some(refresh_token.to_string())))
    }
}

/// OAuth token endpoint and client credentials for one provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl OAuthClient {
    /// Reads `HEALTHSYNC_OAUTH_<PROVIDER>_CLIENT_ID` / `_CLIENT_SECRET` if set.
    pub fn from_env(provider: ProviderType, token_url: &str) -> Self {
        let prefix = format!(
            "HEALTHSYNC_OAUTH_{}",
            provider.as_str().to_uppercase().replace('-', "_")
        );
        Self {
            token_url: token_url.to_string(),
            client_id: std::env::var(format!("{}_CLIENT_ID", prefix)).ok(),
            client_secret: std::env::var(format!("{}_CLIENT_SECRET", prefix)).ok(),
        }
    }
}

/// Token response (standard OAuth 2.0)
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Access token lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Issuer backed by each provider's OAuth 2.0 token endpoint.
///
/// Issuance uses `grant_type=client_credentials`; refresh uses
/// `grant_type=refresh_token`. 400/401/403 from the endpoint are auth failures,
/// anything else (transport errors, 5xx) is a network failure.
pub struct OAuthIssuer {
    http_client: reqwest::Client,
    clients: HashMap<ProviderType, OAuthClient>,
}

impl OAuthIssuer {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            clients: HashMap::new(),
        }
    }

    pub fn with_client(mut self, provider: ProviderType, client: OAuthClient) -> Self {
        self.clients.insert(provider, client);
        self
    }

    async fn request_token(
        &self,
        provider: ProviderType,
        mut form: HashMap<&'static str, String>,
    ) -> SyncResult<TokenGrant> {
        let client = self.clients.get(&provider).ok_or_else(|| {
            SyncError::Validation(format!("no OAuth client configured for {}", provider))
        })?;

        // Include client credentials if configured in the environment
        if let Some(client_id) = &client.client_id {
            form.insert("client_id", client_id.clone());
        }
        if let Some(client_secret) = &client.client_secret {
            form.insert("client_secret", client_secret.clone());
        }

        debug!(provider = %provider, token_url = %client.token_url, "Requesting token");

        let response = self
            .http_client
            .post(&client.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("token request to {} failed: {}", provider, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            let message = format!("token endpoint returned {}: {}", status, body);
            return Err(match status.as_u16() {
                400 | 401 | 403 => SyncError::Auth(message),
                _ => SyncError::Network(message),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("invalid token response: {}", e)))?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in_seconds: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
        })
    }
}

impl Default for OAuthIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenIssuer for OAuthIssuer {
    async fn issue(&self, provider: ProviderType) -> SyncResult<TokenGrant> {
        let mut form = HashMap::new();
        form.insert("grant_type", "client_credentials".to_string());
        let grant = self.request_token(provider, form).await?;
        info!(provider = %provider, "Issued provider token");
        Ok(grant)
    }

    async fn refresh(
        &self,
        provider: ProviderType,
        refresh_token: &str,
    ) -> SyncResult<TokenGrant> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_token.to_string());
        let mut grant = self.request_token(provider, form).await?;

        // Keep the existing refresh token if the provider did not rotate it
        if grant.refresh_token.is_none() {
            grant.refresh_token = Some(refresh_token.to_string());
        }
        Ok(grant)
    }
}
