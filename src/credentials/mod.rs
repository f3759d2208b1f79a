//! Credential lifecycle for provider connections.
//!
//! Tokens are issued at connect time, stored encrypted, checked for expiry
//! before every sync and refreshed through the provider's token endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialVault                    │
//! │  - issue / is_valid / refresh / revoke   │
//! │  - hands out ProviderAccess capabilities │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (TokenIssuer)        (CredentialStore)
//!          ↓                    ↑
//! ┌──────────────────┐  ┌──────────────────────┐
//! │ StubIssuer        │  │ SQLite, AES-256-GCM  │
//! │ OAuthIssuer       │  │ encrypted at rest    │
//! └──────────────────┘  └──────────────────────┘
//! ```
//!
//! Raw tokens never leave this module. Adapters receive a [`ProviderAccess`],
//! which can sign an outgoing request but cannot reveal the refresh token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod encryption;
mod issuer;
mod storage;
mod vault;

pub use encryption::{MasterKey, SealedValue};
pub use issuer::{OAuthClient, OAuthIssuer, StubIssuer, TokenGrant, TokenIssuer};
pub use storage::{CredentialStore, StoredCredential};
pub use vault::CredentialVault;

/// Access/refresh token pair plus expiry for one provider connection.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True iff `now` is strictly before expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Capability handed to adapters for one fetch.
///
/// Authorizes requests with the current access token without exposing it.
#[derive(Clone)]
pub struct ProviderAccess {
    credential_ref: String,
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl ProviderAccess {
    pub(crate) fn new(credential_ref: &str, credential: &Credential) -> Self {
        Self {
            credential_ref: credential_ref.to_string(),
            access_token: credential.access_token.clone(),
            expires_at: credential.expires_at,
        }
    }

    /// Adds `Authorization: Bearer <access token>` to an outgoing provider request.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    pub fn credential_ref(&self) -> &str {
        &self.credential_ref
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for ProviderAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAccess")
            .field("credential_ref", &self.credential_ref)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
