//! Credential vault: issue, validate, refresh and revoke provider credentials.

use super::{Credential, CredentialStore, ProviderAccess, StoredCredential, TokenGrant, TokenIssuer};
use crate::device::ProviderType;
use crate::error::{SyncError, SyncResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Owns every provider credential. Callers only ever see credential refs and
/// [`ProviderAccess`] capabilities.
///
/// The vault is an injected instance; there is no process-wide token table.
pub struct CredentialVault {
    store: CredentialStore,
    issuer: Arc<dyn TokenIssuer>,
}

impl CredentialVault {
    pub fn new(store: CredentialStore, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    /// In-memory vault with a random master key, for tests and demo mode.
    pub fn in_memory(issuer: Arc<dyn TokenIssuer>) -> anyhow::Result<Self> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let store = CredentialStore::new(":memory:", &BASE64.encode(key))?;
        Ok(Self::new(store, issuer))
    }

    /// Obtains a fresh grant for `provider` and stores it for `user_id`.
    ///
    /// Returns the opaque credential ref to keep on the device.
    pub async fn issue(&self, user_id: &str, provider: ProviderType) -> SyncResult<String> {
        let grant = self.issuer.issue(provider).await?;
        let credential_ref = format!("cred-{}", Uuid::new_v4());

        self.store
            .put(&credential_ref, user_id, provider, &to_credential(grant, Utc::now()))
            .map_err(SyncError::storage)?;

        info!(user_id = %user_id, provider = %provider, "Credential issued");
        Ok(credential_ref)
    }

    /// True iff the stored access token is still valid at `now`.
    pub fn is_valid(&self, credential_ref: &str, now: DateTime<Utc>) -> SyncResult<bool> {
        let stored = self
            .store
            .get(credential_ref)
            .map_err(SyncError::storage)?
            .ok_or_else(|| credential_not_found(credential_ref))?;
        Ok(stored.credential.is_valid_at(now))
    }

    /// Capability for the current access token, without any expiry check.
    pub fn access(&self, user_id: &str, credential_ref: &str) -> SyncResult<ProviderAccess> {
        let stored = self.load(user_id, credential_ref)?;
        Ok(ProviderAccess::new(credential_ref, &stored.credential))
    }

    /// Exchanges the refresh token for a new access token and persists it.
    ///
    /// A missing or rejected refresh token is `SyncError::Auth`. A rejected
    /// refresh token is dropped from the stored credential, so it is never
    /// sent to the provider again; the access token is kept.
    pub async fn refresh(&self, user_id: &str, credential_ref: &str) -> SyncResult<ProviderAccess> {
        let stored = self.load(user_id, credential_ref)?;

        let refresh_token = stored.credential.refresh_token.as_deref().ok_or_else(|| {
            SyncError::Auth(format!("credential {} has no refresh token", credential_ref))
        })?;

        let grant = match self.issuer.refresh(stored.provider, refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    provider = %stored.provider,
                    error = %e,
                    "Credential refresh failed"
                );
                if matches!(e, SyncError::Auth(_)) {
                    self.drop_refresh_token(credential_ref, &stored);
                }
                return Err(e);
            }
        };

        let mut credential = to_credential(grant, Utc::now());
        // Keep the existing refresh token if the provider did not rotate it
        if credential.refresh_token.is_none() {
            credential.refresh_token = stored.credential.refresh_token.clone();
        }

        self.store
            .put(credential_ref, user_id, stored.provider, &credential)
            .map_err(SyncError::storage)?;

        info!(user_id = %user_id, provider = %stored.provider, "Credential refreshed");
        Ok(ProviderAccess::new(credential_ref, &credential))
    }

    /// Returns a usable capability, refreshing first when the access token is
    /// expired at `now + skew`.
    pub async fn ensure_fresh(
        &self,
        user_id: &str,
        credential_ref: &str,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> SyncResult<ProviderAccess> {
        let stored = self.load(user_id, credential_ref)?;
        if stored.credential.is_valid_at(now + skew) {
            return Ok(ProviderAccess::new(credential_ref, &stored.credential));
        }

        match self.refresh(user_id, credential_ref).await {
            Ok(access) => Ok(access),
            // Early refresh failed, but the current token still works
            Err(e) if stored.credential.is_valid_at(now) => {
                warn!(
                    user_id = %user_id,
                    provider = %stored.provider,
                    error = %e,
                    expires_at = %stored.credential.expires_at,
                    "Using access token until it expires"
                );
                Ok(ProviderAccess::new(credential_ref, &stored.credential))
            }
            Err(e) => Err(e),
        }
    }

    /// True when the credential can no longer be used without the user: the
    /// access token is expired at `now` and no refresh token is left.
    ///
    /// A missing credential is not reported here; it surfaces as
    /// `SyncError::NotFound` from the other operations.
    pub fn is_rejected(
        &self,
        user_id: &str,
        credential_ref: &str,
        now: DateTime<Utc>,
    ) -> SyncResult<bool> {
        match self.load(user_id, credential_ref) {
            Ok(stored) => Ok(!stored.credential.is_valid_at(now)
                && stored.credential.refresh_token.is_none()),
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deletes a credential. Returns false if nothing was stored under the ref.
    pub fn revoke(&self, credential_ref: &str) -> SyncResult<bool> {
        self.store.delete(credential_ref).map_err(SyncError::storage)
    }

    /// Credential refs currently held for a user.
    pub fn credential_refs(&self, user_id: &str) -> SyncResult<Vec<String>> {
        self.store.list_by_user(user_id).map_err(SyncError::storage)
    }

    fn drop_refresh_token(&self, credential_ref: &str, stored: &StoredCredential) {
        let mut credential = stored.credential.clone();
        credential.refresh_token = None;
        if let Err(e) = self
            .store
            .put(credential_ref, &stored.user_id, stored.provider, &credential)
        {
            warn!(credential_ref = %credential_ref, error = %e, "Failed to drop rejected refresh token");
        }
    }

    /// Loads a credential, treating a ref owned by another user as missing.
    fn load(&self, user_id: &str, credential_ref: &str) -> SyncResult<StoredCredential> {
        match self.store.get(credential_ref).map_err(SyncError::storage)? {
            Some(stored) if stored.user_id == user_id => Ok(stored),
            _ => Err(credential_not_found(credential_ref)),
        }
    }
}

fn to_credential(grant: TokenGrant, now: DateTime<Utc>) -> Credential {
    Credential {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_at: now + Duration::seconds(grant.expires_in_seconds),
    }
}

fn credential_not_found(credential_ref: &str) -> SyncError {
    SyncError::NotFound(format!("credential {}", credential_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StubIssuer;

    fn vault_with(issuer: Arc<StubIssuer>) -> CredentialVault {
        CredentialVault::in_memory(issuer).unwrap()
    }

    #[tokio::test]
    async fn test_issue_then_valid() {
        let vault = vault_with(Arc::new(StubIssuer::new()));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();

        assert!(cref.starts_with("cred-"));
        assert!(vault.is_valid(&cref, Utc::now()).unwrap());
        assert!(!vault
            .is_valid(&cref, Utc::now() + Duration::hours(2))
            .unwrap());
        assert_eq!(vault.credential_refs("u1").unwrap(), vec![cref]);
    }

    #[tokio::test]
    async fn test_is_valid_unknown_ref() {
        let vault = vault_with(Arc::new(StubIssuer::new()));
        let err = vault.is_valid("cred-missing", Utc::now()).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_access_is_scoped_to_owner() {
        let vault = vault_with(Arc::new(StubIssuer::new()));
        let cref = vault.issue("u1", ProviderType::Band).await.unwrap();

        assert!(vault.access("u1", &cref).is_ok());
        let err = vault.access("u2", &cref).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_fresh_refreshes_expired() {
        let issuer = Arc::new(StubIssuer::with_lifetime(-10));
        let vault = vault_with(Arc::clone(&issuer));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();
        assert!(!vault.is_valid(&cref, Utc::now()).unwrap());

        vault
            .ensure_fresh("u1", &cref, Utc::now(), Duration::zero())
            .await
            .unwrap();
        // issue + refresh
        assert_eq!(issuer.grants_issued(), 2);
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_valid() {
        let issuer = Arc::new(StubIssuer::new());
        let vault = vault_with(Arc::clone(&issuer));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();

        vault
            .ensure_fresh("u1", &cref, Utc::now(), Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(issuer.grants_issued(), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_honours_skew() {
        let issuer = Arc::new(StubIssuer::with_lifetime(30));
        let vault = vault_with(Arc::clone(&issuer));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();

        vault
            .ensure_fresh("u1", &cref, Utc::now(), Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(issuer.grants_issued(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_credential() {
        let issuer = Arc::new(StubIssuer::with_lifetime(-10));
        let vault = vault_with(Arc::clone(&issuer));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();
        issuer.set_refresh_fails(true);

        let err = vault.refresh("u1", &cref).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        // Still stored, still expired
        assert!(!vault.is_valid(&cref, Utc::now()).unwrap());
        assert!(vault.is_rejected("u1", &cref, Utc::now()).unwrap());

        // The rejected refresh token is never sent again
        let err = vault
            .ensure_fresh("u1", &cref, Utc::now(), Duration::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(issuer.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_early_refresh_keeps_valid_token() {
        let issuer = Arc::new(StubIssuer::with_lifetime(60));
        let vault = vault_with(Arc::clone(&issuer));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();
        issuer.set_refresh_fails(true);

        let access = vault
            .ensure_fresh("u1", &cref, Utc::now(), Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(access.credential_ref(), cref);
        assert_eq!(issuer.refresh_calls(), 1);
        // Usable until it expires, then it needs a reconnect
        assert!(!vault.is_rejected("u1", &cref, Utc::now()).unwrap());
        assert!(vault
            .is_rejected("u1", &cref, Utc::now() + Duration::seconds(120))
            .unwrap());
    }

    #[tokio::test]
    async fn test_network_refresh_failure_keeps_refresh_token() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl TokenIssuer for Unreachable {
            async fn issue(&self, _provider: ProviderType) -> SyncResult<TokenGrant> {
                Ok(TokenGrant {
                    access_token: "a".to_string(),
                    refresh_token: Some("r".to_string()),
                    expires_in_seconds: -10,
                })
            }

            async fn refresh(
                &self,
                _provider: ProviderType,
                _refresh_token: &str,
            ) -> SyncResult<TokenGrant> {
                Err(SyncError::Network("token endpoint down".to_string()))
            }
        }

        let vault = CredentialVault::in_memory(Arc::new(Unreachable)).unwrap();
        let cref = vault.issue("u1", ProviderType::Band).await.unwrap();

        let err = vault.refresh("u1", &cref).await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(!vault.is_rejected("u1", &cref, Utc::now()).unwrap());
    }

    #[tokio::test]
    async fn test_revoke() {
        let vault = vault_with(Arc::new(StubIssuer::new()));
        let cref = vault.issue("u1", ProviderType::Ring).await.unwrap();

        assert!(vault.revoke(&cref).unwrap());
        assert!(!vault.revoke(&cref).unwrap());
        assert!(matches!(
            vault.access("u1", &cref).unwrap_err(),
            SyncError::NotFound(_)
        ));
    }
}
