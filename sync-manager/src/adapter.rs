use crate::types::{OAuthConfig, RawPayload, RecordContext};
use async_trait::async_trait;
use chrono::NaiveDate;
use healthsync::{DeviceRecord, ProviderAccess, ProviderType, SyncResult};

/// Provider integration interface.
///
/// One adapter per [`ProviderType`], registered once at startup in the
/// [`AdapterRegistry`](crate::registry::AdapterRegistry). Adapters are
/// stateless with respect to users: credentials, devices and records are
/// managed by the orchestrator.
///
/// # Lifecycle
/// 1. The orchestrator obtains a fresh [`ProviderAccess`] from the vault
/// 2. `fetch_raw(access, since)` pulls provider-shaped documents
/// 3. `normalize(context, raw)` turns them into canonical records
/// 4. The orchestrator merge-writes the records
///
/// # Example
/// ```no_run
/// use async_trait::async_trait;
/// use chrono::NaiveDate;
/// use healthsync::{DeviceRecord, ProviderAccess, ProviderType, SyncResult};
/// use sync_manager::{ProviderAdapter, RawPayload, RecordContext};
///
/// struct RunAppAdapter;
///
/// #[async_trait]
/// impl ProviderAdapter for RunAppAdapter {
///     fn provider(&self) -> ProviderType {
///         ProviderType::RunApp
///     }
///
///     fn display_name(&self) -> &str {
///         "Run App"
///     }
///
///     async fn fetch_raw(
///         &self,
///         access: &ProviderAccess,
///         since: NaiveDate,
///     ) -> SyncResult<Vec<RawPayload>> {
///         // Call the provider API with access.authorize(request)
///         Ok(vec![])
///     }
///
///     fn normalize(
///         &self,
///         context: &RecordContext,
///         raw: Vec<RawPayload>,
///     ) -> SyncResult<Vec<DeviceRecord>> {
///         Ok(raw
///             .into_iter()
///             .map(|p| context.record(p.date, p.metric, p.body))
///             .collect())
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider this adapter serves.
    fn provider(&self) -> ProviderType;

    /// Human readable name, used as the default device display name.
    fn display_name(&self) -> &str;

    /// OAuth token endpoint and scopes, for adapters that talk to a real API.
    fn oauth_config(&self) -> Option<OAuthConfig> {
        None
    }

    /// Fetches provider-shaped documents dated `since` or later.
    ///
    /// # Error Handling
    /// - Rejected access token → `SyncError::Auth`
    /// - Transport failures, 5xx, rate limits → `SyncError::Network`
    /// - Response bodies that cannot be parsed → `SyncError::Validation`
    async fn fetch_raw(
        &self,
        access: &ProviderAccess,
        since: NaiveDate,
    ) -> SyncResult<Vec<RawPayload>>;

    /// Converts raw documents into canonical records.
    ///
    /// Pure: no I/O, and identical input always yields identical output.
    /// A malformed payload is a `SyncError::Validation`.
    fn normalize(
        &self,
        context: &RecordContext,
        raw: Vec<RawPayload>,
    ) -> SyncResult<Vec<DeviceRecord>>;
}
