//! Shared fixtures for unit tests.

use crate::adapters::fixture::FixtureAdapter;
use crate::connections::ConnectionRegistry;
use crate::orchestrator::{SyncOrchestrator, SyncSettings};
use crate::registry::AdapterRegistry;
use healthsync::credentials::StubIssuer;
use healthsync::store::MemoryStore;
use healthsync::{CredentialVault, Ledger, ProviderAccess, ProviderType};
use std::sync::Arc;

/// A vault holding one freshly issued stub credential, and access to it.
pub(crate) async fn access_for(provider: ProviderType) -> (Arc<CredentialVault>, ProviderAccess) {
    let vault = Arc::new(CredentialVault::in_memory(Arc::new(StubIssuer::new())).unwrap());
    let credential_ref = vault.issue("test-user", provider).await.unwrap();
    let access = vault.access("test-user", &credential_ref).unwrap();
    (vault, access)
}

/// Registry serving exactly the given fixture adapters.
pub(crate) fn fixtures(adapters: &[Arc<FixtureAdapter>]) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter.clone()).unwrap();
    }
    registry
}

pub(crate) struct HarnessOptions {
    pub issuer: StubIssuer,
    pub store: MemoryStore,
    pub settings: SyncSettings,
    pub initial_sync: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            issuer: StubIssuer::new(),
            store: MemoryStore::new(),
            settings: SyncSettings::default(),
            initial_sync: true,
        }
    }
}

impl HarnessOptions {
    pub fn build(self, adapters: AdapterRegistry) -> Harness {
        let store = Arc::new(self.store);
        let issuer = Arc::new(self.issuer);
        let ledger = Arc::new(Ledger::new(store.clone()));
        let vault = Arc::new(CredentialVault::in_memory(issuer.clone()).unwrap());
        let adapters = Arc::new(adapters);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            ledger.clone(),
            vault.clone(),
            adapters.clone(),
            self.settings,
        ));
        let connections = Arc::new(
            ConnectionRegistry::new(
                ledger.clone(),
                vault.clone(),
                adapters.clone(),
                orchestrator.clone(),
            )
            .with_initial_sync(self.initial_sync),
        );

        Harness {
            store,
            ledger,
            issuer,
            vault,
            adapters,
            orchestrator,
            connections,
        }
    }
}

/// Fully wired in-memory stack.
pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<Ledger>,
    pub issuer: Arc<StubIssuer>,
    pub vault: Arc<CredentialVault>,
    pub adapters: Arc<AdapterRegistry>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub connections: Arc<ConnectionRegistry>,
}

impl Harness {
    /// Demo fixtures for every provider, default options.
    pub fn demo() -> Self {
        HarnessOptions::default().build(AdapterRegistry::demo())
    }

    pub fn with_fixtures(adapters: &[Arc<FixtureAdapter>]) -> Self {
        HarnessOptions::default().build(fixtures(adapters))
    }
}
