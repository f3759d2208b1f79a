//! Connection registry: device lifecycle per (user, provider).
//!
//! Connect calls for the same user and provider are serialized, so concurrent
//! connects produce exactly one device. Disconnect waits for any in-flight
//! sync of the device, then removes it and its records in one write.

use crate::orchestrator::{device_key, SyncOrchestrator};
use crate::registry::AdapterRegistry;
use healthsync::store::KeyedLocks;
use healthsync::{
    ConnectedDevice, ConnectionState, CredentialVault, Ledger, ProviderType, SyncError,
    SyncResult,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConnectionRegistry {
    ledger: Arc<Ledger>,
    vault: Arc<CredentialVault>,
    adapters: Arc<AdapterRegistry>,
    orchestrator: Arc<SyncOrchestrator>,
    connect_locks: KeyedLocks,
    initial_sync: bool,
}

fn connect_key(user_id: &str, provider: ProviderType) -> String {
    format!("{}:{}", user_id, provider)
}

impl ConnectionRegistry {
    pub fn new(
        ledger: Arc<Ledger>,
        vault: Arc<CredentialVault>,
        adapters: Arc<AdapterRegistry>,
        orchestrator: Arc<SyncOrchestrator>,
    ) -> Self {
        Self {
            ledger,
            vault,
            adapters,
            orchestrator,
            connect_locks: KeyedLocks::new(),
            initial_sync: true,
        }
    }

    /// Whether `connect` runs a sync right after creating a device.
    pub fn with_initial_sync(mut self, enabled: bool) -> Self {
        self.initial_sync = enabled;
        self
    }

    /// Connects `provider` for `user_id`, returning the existing device if
    /// there already is one.
    ///
    /// A new device gets a freshly issued credential and, unless disabled, an
    /// initial sync. A failed initial sync shows up in the returned device's
    /// state and `last_error`; connect itself still succeeds.
    pub async fn connect(
        &self,
        user_id: &str,
        provider: ProviderType,
    ) -> SyncResult<ConnectedDevice> {
        self.connect_with(user_id, provider, false).await
    }

    /// Like [`connect`](Self::connect), but an existing device for the
    /// provider is a `SyncError::DuplicateConnection`.
    pub async fn connect_strict(
        &self,
        user_id: &str,
        provider: ProviderType,
    ) -> SyncResult<ConnectedDevice> {
        self.connect_with(user_id, provider, true).await
    }

    async fn connect_with(
        &self,
        user_id: &str,
        provider: ProviderType,
        strict: bool,
    ) -> SyncResult<ConnectedDevice> {
        if user_id.trim().is_empty() {
            return Err(SyncError::Validation("user id must not be empty".to_string()));
        }
        let adapter = self.adapters.get(provider)?;

        let _guard = self
            .connect_locks
            .acquire(&connect_key(user_id, provider))
            .await;

        let existing = self
            .ledger
            .devices(user_id)
            .await?
            .into_iter()
            .find(|d| d.provider == provider);

        let device = match existing {
            Some(device) if strict => {
                return Err(SyncError::DuplicateConnection {
                    provider: provider.to_string(),
                    device_id: device.id,
                })
            }
            Some(device) if self.orchestrator.needs_reconnect(&device, Utc::now())? => {
                self.reconnect(device).await?
            }
            Some(device) => {
                debug!(user_id = %user_id, device_id = %device.id, "Provider already connected");
                return Ok(device);
            }
            None => self.create(user_id, provider, adapter.display_name()).await?,
        };

        if !self.initial_sync {
            return Ok(device);
        }

        if let Err(e) = self.orchestrator.sync_one(user_id, &device.id).await {
            warn!(
                user_id = %user_id,
                device_id = %device.id,
                error = %e,
                "Initial sync failed"
            );
        }
        self.ledger.device(user_id, &device.id).await
    }

    async fn create(
        &self,
        user_id: &str,
        provider: ProviderType,
        display_name: &str,
    ) -> SyncResult<ConnectedDevice> {
        let credential_ref = self.vault.issue(user_id, provider).await?;
        let device = ConnectedDevice::new(user_id, provider, display_name, credential_ref);

        let stored = device.clone();
        let persisted = self
            .ledger
            .update_devices(user_id, move |devices| {
                devices.push(stored);
                Ok(())
            })
            .await;

        if let Err(e) = persisted {
            self.discard_credential(&device.credential_ref);
            return Err(e);
        }

        info!(
            user_id = %user_id,
            device_id = %device.id,
            provider = %provider,
            "Device connected"
        );
        Ok(device)
    }

    /// Gives a device that lost its credential a new one and marks it connected.
    async fn reconnect(&self, device: ConnectedDevice) -> SyncResult<ConnectedDevice> {
        let credential_ref = self.vault.issue(&device.user_id, device.provider).await?;

        let device_id = device.id.clone();
        let new_ref = credential_ref.clone();
        let updated = self
            .ledger
            .update_devices(&device.user_id, move |devices| {
                let slot = devices
                    .iter_mut()
                    .find(|d| d.id == device_id)
                    .ok_or_else(|| SyncError::device_not_found(&device_id))?;
                slot.credential_ref = new_ref;
                slot.state = ConnectionState::Connected;
                slot.last_error = None;
                Ok(slot.clone())
            })
            .await;

        match updated {
            Ok(updated) => {
                // The old credential is normally gone already
                self.discard_credential(&device.credential_ref);
                info!(
                    user_id = %updated.user_id,
                    device_id = %updated.id,
                    provider = %updated.provider,
                    "Device reconnected"
                );
                Ok(updated)
            }
            Err(e) => {
                self.discard_credential(&credential_ref);
                Err(e)
            }
        }
    }

    /// Removes a device, all of its records and its credential.
    ///
    /// Waits for an in-flight sync of the device to finish. Returns
    /// `SyncError::NotFound` if the user has no such device.
    pub async fn disconnect(&self, user_id: &str, device_id: &str) -> SyncResult<bool> {
        self.ledger.device(user_id, device_id).await?;

        let key = device_key(user_id, device_id);
        let locks = self.orchestrator.device_locks();
        let guard = locks.acquire(&key).await;

        // Re-read under the guard; a reconnect may have swapped the credential
        let outcome = self
            .ledger
            .update_all(user_id, |devices, records| {
                let position = devices
                    .iter()
                    .position(|d| d.id == device_id)
                    .ok_or_else(|| SyncError::device_not_found(device_id))?;
                let device = devices.remove(position);
                let records_before = records.len();
                records.retain(|r| r.device_id != device_id);
                Ok((device.credential_ref, records_before - records.len()))
            })
            .await;
        drop(guard);

        let (credential_ref, removed) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, SyncError::NotFound(_)) {
                    locks.forget(&key);
                }
                return Err(e);
            }
        };
        locks.forget(&key);
        self.discard_credential(&credential_ref);

        info!(
            user_id = %user_id,
            device_id = %device_id,
            records_removed = removed,
            "Device disconnected"
        );
        Ok(true)
    }

    /// Devices of `user_id`, in connection order.
    pub async fn list(&self, user_id: &str) -> SyncResult<Vec<ConnectedDevice>> {
        self.ledger.devices(user_id).await
    }

    /// Best-effort credential removal; failures are logged, not returned.
    fn discard_credential(&self, credential_ref: &str) {
        match self.vault.revoke(credential_ref) {
            Ok(true) => debug!(credential_ref = %credential_ref, "Credential revoked"),
            Ok(false) => {}
            Err(e) => warn!(credential_ref = %credential_ref, error = %e, "Credential revoke failed"),
        }
    }
}
