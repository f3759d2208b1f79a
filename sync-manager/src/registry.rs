//! Adapter registry: typed map from provider to its adapter.
//!
//! Populated once at startup, either with fixture adapters for every provider
//! (demo mode) or with the HTTP adapters whose endpoints are configured
//! (live mode).

use crate::adapters::band::BandAdapter;
use crate::adapters::fixture::FixtureAdapter;
use crate::adapters::ring::RingAdapter;
use crate::ProviderAdapter;
use healthsync::config::{ProviderMode, ProvidersConfig};
use healthsync::credentials::{OAuthClient, OAuthIssuer};
use healthsync::{ProviderType, SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct AdapterRegistry {
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Fixture adapters for every provider.
    pub fn demo() -> Self {
        let mut registry = Self::new();
        for provider in ProviderType::ALL {
            registry
                .adapters
                .insert(provider, Arc::new(FixtureAdapter::demo(provider)));
        }
        registry
    }

    /// Builds the registry for the configured provider mode.
    pub fn from_config(config: &ProvidersConfig) -> SyncResult<Self> {
        let registry = match config.mode {
            ProviderMode::Demo => Self::demo(),
            ProviderMode::Live => {
                let mut registry = Self::new();
                if let Some(endpoint) = &config.ring {
                    registry.register(Arc::new(RingAdapter::new(endpoint)?))?;
                }
                if let Some(endpoint) = &config.band {
                    registry.register(Arc::new(BandAdapter::new(endpoint)?))?;
                }
                registry
            }
        };

        info!(
            mode = ?config.mode,
            providers = ?registry.providers(),
            "Adapter registry ready"
        );
        Ok(registry)
    }

    /// Adds an adapter. A second adapter for the same provider is rejected.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> SyncResult<()> {
        let provider = adapter.provider();
        if self.adapters.contains_key(&provider) {
            return Err(SyncError::Validation(format!(
                "an adapter for {} is already registered",
                provider
            )));
        }
        self.adapters.insert(provider, adapter);
        Ok(())
    }

    /// Adapter for `provider`, or a validation error if none is registered.
    pub fn get(&self, provider: ProviderType) -> SyncResult<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            SyncError::Validation(format!("provider {} is not supported", provider))
        })
    }

    /// Registered providers in declaration order.
    pub fn providers(&self) -> Vec<ProviderType> {
        ProviderType::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }

    /// OAuth issuer covering every adapter that declares a token endpoint.
    pub fn oauth_issuer(&self) -> OAuthIssuer {
        self.providers()
            .into_iter()
            .filter_map(|provider| {
                let oauth = self.adapters.get(&provider)?.oauth_config()?;
                Some((provider, OAuthClient::from_env(provider, &oauth.token_url)))
            })
            .fold(OAuthIssuer::new(), |issuer, (provider, client)| {
                issuer.with_client(provider, client)
            })
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync::config::ProviderEndpoint;

    fn endpoint() -> ProviderEndpoint {
        ProviderEndpoint {
            base_url: "http://localhost:9".to_string(),
            token_url: "http://localhost:9/oauth/token".to_string(),
        }
    }

    #[test]
    fn test_demo_covers_every_provider() {
        let registry = AdapterRegistry::demo();
        assert_eq!(registry.providers(), ProviderType::ALL.to_vec());
        for provider in ProviderType::ALL {
            assert_eq!(registry.get(provider).unwrap().provider(), provider);
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(Arc::new(FixtureAdapter::demo(ProviderType::Ring)))
            .unwrap();
        let err = registry
            .register(Arc::new(FixtureAdapter::demo(ProviderType::Ring)))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_provider_is_validation_error() {
        let registry = AdapterRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(ProviderType::FoodApp),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_live_mode_registers_configured_providers() {
        let config = ProvidersConfig {
            mode: ProviderMode::Live,
            ring: Some(endpoint()),
            band: None,
        };
        let registry = AdapterRegistry::from_config(&config).unwrap();
        assert_eq!(registry.providers(), vec![ProviderType::Ring]);
        assert!(registry.get(ProviderType::Band).is_err());
    }

    #[test]
    fn test_demo_mode_from_config() {
        let registry = AdapterRegistry::from_config(&ProvidersConfig::default()).unwrap();
        assert_eq!(registry.len(), ProviderType::ALL.len());
    }
}
