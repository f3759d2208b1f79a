//! Sync orchestration: fetch, normalize and merge-write one device at a time.
//!
//! # State machine
//!
//! ```text
//! Connected | Error ──sync_one──► Syncing ──ok──► Connected (last_synced = now)
//!                                    │
//!                                    └──err──► Error (last_error set)
//!                                    └──credential gone──► Disconnected
//! ```
//!
//! A per-device guard keeps two syncs of the same device from overlapping;
//! the merge-write and the device update land in one atomic store write.

use crate::registry::AdapterRegistry;
use crate::types::{RecordContext, SyncReport, SyncSummary};
use chrono::{DateTime, Duration as DateDuration, NaiveDate, Utc};
use futures::future::join_all;
use healthsync::config::SyncConfig;
use healthsync::device::merge_records;
use healthsync::store::KeyedLocks;
use healthsync::{
    ConnectedDevice, ConnectionState, CredentialVault, DeviceRecord, Ledger, MetricType,
    SyncError, SyncResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tunables taken from `[sync]` in the config file.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub fetch_timeout: Duration,
    pub lookback_days: i64,
    pub refresh_skew: DateDuration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            lookback_days: config.lookback_days,
            refresh_skew: DateDuration::seconds(config.refresh_skew_secs),
        }
    }
}

/// Why a sync stopped, and which state the device should be left in.
struct SyncFailure {
    error: SyncError,
    state: ConnectionState,
}

impl From<SyncError> for SyncFailure {
    fn from(error: SyncError) -> Self {
        Self {
            error,
            state: ConnectionState::Error,
        }
    }
}

/// Guard key of a device; scoped per user so no caller can touch another
/// user's guard.
pub(crate) fn device_key(user_id: &str, device_id: &str) -> String {
    format!("{}:{}", user_id, device_id)
}

pub struct SyncOrchestrator {
    ledger: Arc<Ledger>,
    vault: Arc<CredentialVault>,
    adapters: Arc<AdapterRegistry>,
    device_locks: KeyedLocks,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        vault: Arc<CredentialVault>,
        adapters: Arc<AdapterRegistry>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            ledger,
            vault,
            adapters,
            device_locks: KeyedLocks::new(),
            settings,
        }
    }

    /// Per-device guards shared with disconnect, keyed by [`device_key`].
    pub(crate) fn device_locks(&self) -> &KeyedLocks {
        &self.device_locks
    }

    /// Syncs one device.
    ///
    /// Fails fast with `SyncError::Busy` if the device is already syncing.
    /// On failure the device moves to `Error` (or `Disconnected` when its
    /// credential is gone) and its stored records and `last_synced` are left
    /// as they were. A device whose credential was rejected fails with
    /// `SyncError::Auth` without contacting the provider again.
    pub async fn sync_one(&self, user_id: &str, device_id: &str) -> SyncResult<SyncSummary> {
        // Unknown ids never get a guard slot
        self.ledger.device(user_id, device_id).await?;

        let key = device_key(user_id, device_id);
        let Some(guard) = self.device_locks.try_acquire(&key) else {
            debug!(user_id = %user_id, device_id = %device_id, "Sync already in flight");
            return Err(SyncError::Busy(device_id.to_string()));
        };

        let device = match self.ledger.device(user_id, device_id).await {
            Ok(device) => device,
            Err(e) => {
                // Disconnected in between
                drop(guard);
                self.device_locks.forget(&key);
                return Err(e);
            }
        };
        match device.state {
            ConnectionState::Syncing => return Err(SyncError::Busy(device_id.to_string())),
            ConnectionState::Disconnected => {
                return Err(SyncError::Auth(format!(
                    "device {} is disconnected; connect {} again",
                    device_id, device.provider
                )))
            }
            ConnectionState::Connected | ConnectionState::Error => {}
        }

        if self
            .vault
            .is_rejected(user_id, &device.credential_ref, Utc::now())?
        {
            return Err(rejected_credential(&device));
        }

        self.set_state(user_id, device_id, ConnectionState::Syncing, None)
            .await?;
        debug!(user_id = %user_id, device_id = %device_id, "Sync started");

        match self.run(&device).await {
            Ok(summary) => {
                info!(
                    user_id = %user_id,
                    device_id = %device_id,
                    provider = %device.provider,
                    inserted = summary.inserted,
                    replaced = summary.replaced,
                    "Sync completed"
                );
                Ok(summary)
            }
            Err(failure) => {
                warn!(
                    user_id = %user_id,
                    device_id = %device_id,
                    provider = %device.provider,
                    error = %failure.error,
                    "Sync failed"
                );
                let message = failure.error.to_string();
                if let Err(e) = self
                    .set_state(user_id, device_id, failure.state, Some(message))
                    .await
                {
                    // A device removed mid-sync has nothing left to update
                    if !matches!(e, SyncError::NotFound(_)) {
                        warn!(device_id = %device_id, error = %e, "Failed to record sync failure");
                    }
                }
                Err(failure.error)
            }
        }
    }

    async fn run(&self, device: &ConnectedDevice) -> Result<SyncSummary, SyncFailure> {
        let now = Utc::now();

        let access = match self
            .vault
            .ensure_fresh(
                &device.user_id,
                &device.credential_ref,
                now,
                self.settings.refresh_skew,
            )
            .await
        {
            Ok(access) => access,
            Err(SyncError::NotFound(_)) => {
                return Err(SyncFailure {
                    error: SyncError::Auth(format!(
                        "credential for device {} is missing; connect {} again",
                        device.id, device.provider
                    )),
                    state: ConnectionState::Disconnected,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let adapter = self.adapters.get(device.provider)?;
        let since = self.since(device, now.date_naive());

        let raw = timeout(self.settings.fetch_timeout, adapter.fetch_raw(&access, since))
            .await
            .map_err(|_| {
                SyncError::Network(format!(
                    "{} fetch timed out after {}s",
                    device.provider,
                    self.settings.fetch_timeout.as_secs_f64()
                ))
            })??;
        debug!(device_id = %device.id, payloads = raw.len(), since = %since, "Fetched raw payloads");

        let records = adapter.normalize(&RecordContext::for_device(device), raw)?;

        let synced_at = Utc::now();
        let device_id = device.id.clone();
        let stats = self
            .ledger
            .update_all(&device.user_id, move |devices, stored| {
                let slot = devices
                    .iter_mut()
                    .find(|d| d.id == device_id)
                    .ok_or_else(|| SyncError::device_not_found(&device_id))?;
                slot.state = ConnectionState::Connected;
                slot.last_synced = Some(synced_at);
                slot.last_error = None;
                Ok(merge_records(stored, records))
            })
            .await?;

        Ok(SyncSummary {
            device_id: device.id.clone(),
            inserted: stats.inserted,
            replaced: stats.replaced,
            last_synced: synced_at,
        })
    }

    /// First day to fetch: the day before the last sync, or the lookback window.
    ///
    /// Saturates at the earliest representable date.
    fn since(&self, device: &ConnectedDevice, today: NaiveDate) -> NaiveDate {
        let since = match device.last_synced {
            Some(last) => last.date_naive().pred_opt(),
            None => DateDuration::try_days(self.settings.lookback_days.max(0))
                .and_then(|lookback| today.checked_sub_signed(lookback)),
        };
        since.unwrap_or(NaiveDate::MIN)
    }

    /// Syncs every device of `user_id` concurrently.
    ///
    /// One device failing never affects another; each outcome is reported.
    pub async fn sync_all(&self, user_id: &str) -> SyncResult<Vec<SyncReport>> {
        let devices = self.ledger.devices(user_id).await?;
        Ok(self.sync_devices(user_id, &devices).await)
    }

    /// Like [`sync_all`](Self::sync_all), but leaves out devices that cannot
    /// sync until the user connects them again (`Disconnected`, or holding a
    /// rejected credential).
    ///
    /// Returns the reports and the number of devices skipped.
    pub async fn sync_unattended(&self, user_id: &str) -> SyncResult<(Vec<SyncReport>, usize)> {
        let now = Utc::now();
        let devices = self.ledger.devices(user_id).await?;

        let mut due = Vec::with_capacity(devices.len());
        let mut skipped = 0;
        for device in devices {
            if self.needs_reconnect(&device, now)? {
                debug!(user_id = %user_id, device_id = %device.id, "Skipping device until reconnect");
                skipped += 1;
            } else {
                due.push(device);
            }
        }

        Ok((self.sync_devices(user_id, &due).await, skipped))
    }

    /// True when only a new connect can make the device sync again.
    pub fn needs_reconnect(
        &self,
        device: &ConnectedDevice,
        now: DateTime<Utc>,
    ) -> SyncResult<bool> {
        if device.state == ConnectionState::Disconnected {
            return Ok(true);
        }
        self.vault
            .is_rejected(&device.user_id, &device.credential_ref, now)
    }

    async fn sync_devices(&self, user_id: &str, devices: &[ConnectedDevice]) -> Vec<SyncReport> {
        let reports = join_all(devices.iter().map(|device| async move {
            SyncReport {
                device_id: device.id.clone(),
                provider: device.provider,
                result: self.sync_one(user_id, &device.id).await,
            }
        }))
        .await;

        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        info!(
            user_id = %user_id,
            devices = reports.len(),
            failed = failed,
            "Sync all completed"
        );
        reports
    }

    /// Moves devices stuck in `Syncing` (left by a crashed process) to `Error`.
    ///
    /// Returns the number of devices recovered.
    pub async fn recover_interrupted(&self, user_id: &str) -> SyncResult<usize> {
        let recovered = self
            .ledger
            .update_devices(user_id, |devices| {
                let mut count = 0;
                for device in devices
                    .iter_mut()
                    .filter(|d| d.state == ConnectionState::Syncing)
                    .filter(|d| !self.device_locks.is_locked(&device_key(user_id, &d.id)))
                {
                    device.state = ConnectionState::Error;
                    device.last_error = Some("sync was interrupted".to_string());
                    count += 1;
                }
                Ok(count)
            })
            .await?;

        if recovered > 0 {
            info!(user_id = %user_id, recovered = recovered, "Recovered interrupted syncs");
        }
        Ok(recovered)
    }

    /// Deletes every stored record of a device, keeping the device itself.
    ///
    /// Waits for an in-flight sync of the device to finish first.
    pub async fn purge_records(&self, user_id: &str, device_id: &str) -> SyncResult<usize> {
        self.ledger.device(user_id, device_id).await?;
        let key = device_key(user_id, device_id);
        let guard = self.device_locks.acquire(&key).await;

        let removed = self
            .ledger
            .update_all(user_id, |devices, records| {
                if !devices.iter().any(|d| d.id == device_id) {
                    return Err(SyncError::device_not_found(device_id));
                }
                let before = records.len();
                records.retain(|r| r.device_id != device_id);
                Ok(before - records.len())
            })
            .await;
        drop(guard);

        let removed = match removed {
            Ok(removed) => removed,
            Err(e) => {
                if matches!(e, SyncError::NotFound(_)) {
                    self.device_locks.forget(&key);
                }
                return Err(e);
            }
        };

        info!(user_id = %user_id, device_id = %device_id, removed = removed, "Records purged");
        Ok(removed)
    }

    /// Records of one device, ordered by date.
    pub async fn device_data(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> SyncResult<Vec<DeviceRecord>> {
        self.ledger.device(user_id, device_id).await?;
        self.ledger.device_records(user_id, device_id).await
    }

    /// Most recent record for `metric` across all of the user's devices.
    pub async fn latest(
        &self,
        user_id: &str,
        metric: MetricType,
    ) -> SyncResult<Option<DeviceRecord>> {
        self.ledger.latest(user_id, metric).await
    }

    /// Users that currently own at least one device.
    pub async fn users(&self) -> SyncResult<Vec<String>> {
        self.ledger.users().await
    }

    async fn set_state(
        &self,
        user_id: &str,
        device_id: &str,
        state: ConnectionState,
        last_error: Option<String>,
    ) -> SyncResult<()> {
        self.ledger
            .update_devices(user_id, |devices| {
                let device = devices
                    .iter_mut()
                    .find(|d| d.id == device_id)
                    .ok_or_else(|| SyncError::device_not_found(device_id))?;
                device.state = state;
                if last_error.is_some() {
                    device.last_error = last_error;
                }
                Ok(())
            })
            .await
    }
}

fn rejected_credential(device: &ConnectedDevice) -> SyncError {
    SyncError::Auth(format!(
        "credential for device {} was rejected by {}; connect {} again",
        device.id, device.provider, device.provider
    ))
}
