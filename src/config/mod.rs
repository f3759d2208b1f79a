use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete HealthSync configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthSyncConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Database locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding `devices:{user}` / `records:{user}` collections
    #[serde(default = "default_records_db")]
    pub records_db: String,
    /// SQLite file holding encrypted credentials
    #[serde(default = "default_credentials_db")]
    pub credentials_db: String,
}

fn default_records_db() -> String {
    "healthsync.db".to_string()
}

fn default_credentials_db() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_db: default_records_db(),
            credentials_db: default_credentials_db(),
        }
    }
}

/// Sync behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for a single adapter fetch (seconds)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Background sync_all period (seconds)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// How far back the first sync of a device reaches (days)
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Refresh credentials this many seconds before they expire
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: i64,
    /// Run a sync right after a new device is connected
    #[serde(default = "default_initial_sync")]
    pub initial_sync: bool,
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_interval() -> u64 {
    900
}

fn default_lookback_days() -> i64 {
    7
}

fn default_refresh_skew() -> i64 {
    90
}

fn default_initial_sync() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            interval_secs: default_interval(),
            lookback_days: default_lookback_days(),
            refresh_skew_secs: default_refresh_skew(),
            initial_sync: default_initial_sync(),
        }
    }
}

/// Which adapters and token issuer the process runs with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// Fixture adapters for every provider, in-process token issuer
    #[default]
    Demo,
    /// HTTP adapters for configured providers, OAuth token endpoints
    Live,
}

/// Provider endpoints (live mode)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub mode: ProviderMode,
    #[serde(default)]
    pub ring: Option<ProviderEndpoint>,
    #[serde(default)]
    pub band: Option<ProviderEndpoint>,
}

/// REST base URL and OAuth token endpoint of one provider.
///
/// Client id and secret are read from `HEALTHSYNC_OAUTH_<PROVIDER>_CLIENT_ID` /
/// `HEALTHSYNC_OAUTH_<PROVIDER>_CLIENT_SECRET`, never from the file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub token_url: String,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3001
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HealthSyncConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: HealthSyncConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<HealthSyncConfig> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(HealthSyncConfig::default())
    }
}
