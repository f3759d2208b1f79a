//! Background sync scheduler.
//!
//! On start it recovers devices left in `Syncing` by a previous process, then
//! runs `sync_all` for every stored user on a fixed interval.

use crate::orchestrator::SyncOrchestrator;
use chrono::{DateTime, Utc};
use healthsync::SyncResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Status information for the scheduler.
#[derive(Clone, Debug, Default)]
pub struct SchedulerStatus {
    /// When the last full pass finished
    pub last_run: Option<DateTime<Utc>>,
    /// Total number of completed passes
    pub run_count: u64,
    /// Device syncs that failed across all passes
    pub device_failures: u64,
    /// Last pass-level error (if any)
    pub last_error: Option<String>,
}

/// Outcome of one pass over all users.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub users: usize,
    pub devices: usize,
    pub failures: usize,
    /// Devices left alone until the user connects them again
    pub skipped: usize,
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    period: Duration,
    status: Arc<Mutex<SchedulerStatus>>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, period: Duration) -> Self {
        Self {
            orchestrator,
            // tokio intervals panic on a zero period
            period: period.max(Duration::from_secs(1)),
            status: Arc::new(Mutex::new(SchedulerStatus::default())),
        }
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<Mutex<SchedulerStatus>> {
        Arc::clone(&self.status)
    }

    /// Moves interrupted syncs of every user back to a retryable state.
    pub async fn recover(&self) -> SyncResult<usize> {
        let mut recovered = 0;
        for user_id in self.orchestrator.users().await? {
            match self.orchestrator.recover_interrupted(&user_id).await {
                Ok(count) => recovered += count,
                Err(e) => warn!(user_id = %user_id, error = %e, "Recovery failed"),
            }
        }
        Ok(recovered)
    }

    /// Syncs every user's devices once.
    ///
    /// Devices that need a reconnect are skipped rather than retried against
    /// the provider. Per-user failures are counted and logged; only failing to
    /// list users fails the pass.
    pub async fn run_once(&self) -> SyncResult<PassSummary> {
        let users = self.orchestrator.users().await?;
        let mut summary = PassSummary {
            users: users.len(),
            ..Default::default()
        };

        for user_id in &users {
            match self.orchestrator.sync_unattended(user_id).await {
                Ok((reports, skipped)) => {
                    summary.skipped += skipped;
                    summary.devices += reports.len();
                    summary.failures += reports.iter().filter(|r| !r.is_ok()).count();
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Sync all failed");
                    summary.failures += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Starts the scheduling loop (non-blocking).
    ///
    /// Returns a JoinHandle; abort it for shutdown.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.period.as_secs(), "Starting sync scheduler");

            match self.recover().await {
                Ok(0) => {}
                Ok(count) => info!(recovered = count, "Recovered interrupted syncs"),
                Err(e) => error!(error = %e, "Failed to recover interrupted syncs"),
            }

            let mut ticker = interval(self.period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                debug!("Scheduled sync pass");

                let result = self.run_once().await;
                let mut status = self.status.lock().await;
                match result {
                    Ok(summary) => {
                        info!(
                            users = summary.users,
                            devices = summary.devices,
                            failures = summary.failures,
                            skipped = summary.skipped,
                            "Sync pass completed"
                        );
                        status.last_run = Some(Utc::now());
                        status.run_count += 1;
                        status.device_failures += summary.failures as u64;
                        status.last_error = None;
                    }
                    Err(e) => {
                        error!(error = %e, "Sync pass failed");
                        status.last_error = Some(e.to_string());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixture::FixtureAdapter;
    use crate::testing::{Harness, HarnessOptions};
    use healthsync::credentials::StubIssuer;
    use healthsync::{ConnectionState, ProviderType, SyncError};

    #[tokio::test]
    async fn test_run_once_counts_failures() {
        let ring = Arc::new(FixtureAdapter::demo(ProviderType::Ring));
        let band = Arc::new(FixtureAdapter::demo(ProviderType::Band));
        let h = Harness::with_fixtures(&[ring, band.clone()]);

        h.connections.connect("u1", ProviderType::Ring).await.unwrap();
        h.connections.connect("u2", ProviderType::Band).await.unwrap();
        band.fail_with(Some(SyncError::Network("down".into())));

        let scheduler = SyncScheduler::new(h.orchestrator.clone(), Duration::from_secs(60));
        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(
            summary,
            PassSummary {
                users: 2,
                devices: 2,
                failures: 1,
                skipped: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_not_retried() {
        let h = HarnessOptions {
            issuer: StubIssuer::with_lifetime(-10),
            initial_sync: false,
            ..Default::default()
        }
        .build(crate::registry::AdapterRegistry::demo());
        let device = h.connections.connect("u1", ProviderType::Ring).await.unwrap();
        h.issuer.set_refresh_fails(true);

        let err = h.orchestrator.sync_one("u1", &device.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(h.issuer.refresh_calls(), 1);

        let scheduler = SyncScheduler::new(h.orchestrator.clone(), Duration::from_secs(60));
        for _ in 0..5 {
            let summary = scheduler.run_once().await.unwrap();
            assert_eq!(summary.skipped, 1);
            assert_eq!(summary.devices, 0);
        }
        // Manual syncs are refused without asking the provider either
        let err = h.orchestrator.sync_one("u1", &device.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(h.issuer.refresh_calls(), 1);

        let stored = h.ledger.device("u1", &device.id).await.unwrap();
        assert_eq!(stored.state, ConnectionState::Error);

        // Connecting again issues a new credential and syncing resumes
        h.issuer.set_refresh_fails(false);
        let reconnected = h.connections.connect("u1", ProviderType::Ring).await.unwrap();
        assert_eq!(reconnected.id, device.id);
        assert_ne!(reconnected.credential_ref, device.credential_ref);
        let summary = scheduler.run_once().await.unwrap();
        assert_eq!((summary.devices, summary.failures, summary.skipped), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_recover_across_users() {
        let h = HarnessOptions {
            initial_sync: false,
            ..Default::default()
        }
        .build(crate::registry::AdapterRegistry::demo());

        for user in ["u1", "u2"] {
            h.connections.connect(user, ProviderType::Ring).await.unwrap();
            h.ledger
                .update_devices(user, |devices| {
                    devices[0].state = ConnectionState::Syncing;
                    Ok(())
                })
                .await
                .unwrap();
        }

        let scheduler = SyncScheduler::new(h.orchestrator.clone(), Duration::from_secs(60));
        assert_eq!(scheduler.recover().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_start_updates_status() {
        let h = Harness::demo();
        h.connections.connect("u1", ProviderType::Ring).await.unwrap();

        let scheduler = SyncScheduler::new(h.orchestrator.clone(), Duration::from_millis(20));
        let status = scheduler.status();
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        let status = status.lock().await;
        assert!(status.run_count >= 1);
        assert!(status.last_run.is_some());
        assert_eq!(status.device_failures, 0);
    }
}
