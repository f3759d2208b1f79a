// Provider, device and record types
pub mod device;

// Error taxonomy
pub mod error;

// TOML configuration
pub mod config;

// Credential vault and token issuers
pub mod credentials;

// Durable per-user storage
pub mod store;

pub use config::HealthSyncConfig;
pub use credentials::{CredentialVault, ProviderAccess};
pub use device::{
    ConnectedDevice, ConnectionState, DeviceRecord, MergeStats, MetricType, ProviderType,
    RecordKey,
};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use store::{DataStore, Ledger};
