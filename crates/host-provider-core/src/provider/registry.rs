// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Explicit provider registry.
//!
//! Back-ends are registered by identifier at startup; nothing is discovered at
//! runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::traits::Provider;
use crate::config::ClientSettings;
use crate::error::{Error, Result};
use crate::persistence::CredentialStore;

/// What a factory needs to build providers.
#[derive(Clone)]
pub struct ProviderContext {
    /// Credential source for lazily loaded credential views.
    pub credentials: Arc<dyn CredentialStore>,
    /// Vendor client settings.
    pub settings: ClientSettings,
}

/// Builds request-scoped providers of one back-end.
pub trait ProviderFactory: Send + Sync {
    /// Identifier of the providers this factory builds.
    fn provider_id(&self) -> &'static str;

    /// Build a provider for (environment, engine).
    fn build(&self, environment: &str, engine: &str, context: &ProviderContext)
    -> Box<dyn Provider>;

    /// Validate credential content before it is stored.
    fn validate_credential(&self, content: &Map<String, Value>) -> Result<()> {
        let _ = content;
        Ok(())
    }
}

/// Identifier to factory map.
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
    context: ProviderContext,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new(context: ProviderContext) -> Self {
        Self {
            factories: BTreeMap::new(),
            context,
        }
    }

    /// Register a factory, replacing one with the same identifier.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) -> &mut Self {
        self.factories.insert(factory.provider_id(), factory);
        self
    }

    /// Builder form of [`ProviderRegistry::register`].
    pub fn with(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Factory for `provider`.
    pub fn factory(&self, provider: &str) -> Result<&Arc<dyn ProviderFactory>> {
        self.factories
            .get(provider)
            .ok_or_else(|| Error::not_found("provider", provider))
    }

    /// Build a provider for (provider, environment, engine).
    pub fn build(
        &self,
        provider: &str,
        environment: &str,
        engine: &str,
    ) -> Result<Box<dyn Provider>> {
        Ok(self
            .factory(provider)?
            .build(environment, engine, &self.context))
    }

    /// Registered identifiers, sorted.
    pub fn provider_ids(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Shared context.
    pub fn context(&self) -> &ProviderContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::provider::mock::MockFactory;

    fn context() -> ProviderContext {
        ProviderContext {
            credentials: Arc::new(MemoryStore::new()),
            settings: ClientSettings::default(),
        }
    }

    #[test]
    fn test_registry_builds_registered_provider() {
        let factory = MockFactory::new();
        let registry = ProviderRegistry::new(context()).with(Arc::new(factory));

        assert_eq!(registry.provider_ids(), vec!["mock"]);
        let provider = registry.build("mock", "dev", "mongodb_4_2_3").unwrap();
        assert_eq!(provider.provider_id(), "mock");
        assert_eq!(provider.environment(), "dev");
        assert_eq!(provider.engine(), "mongodb_4_2_3");
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = ProviderRegistry::new(context());
        let err = registry.build("openstack", "dev", "redis").err().unwrap();
        assert!(matches!(err, Error::NotFound { kind: "provider", .. }));
    }
}
