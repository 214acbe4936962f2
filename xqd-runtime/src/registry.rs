//! `RuntimeConfig` / `RegistryBuilder` / `Registry`: the programmatic, code-only configuration
//! surface (§4.16). There is deliberately no file-format or CLI loader here — see the Non-goals
//! in §1.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::acl::AclObj;
use crate::backend::{Backend, BackendHandler, HyperBackendHandler};
use crate::cache::CacheEngine;
use crate::config_store::ConfigStoreObj;
use crate::dictionary::DictionaryObj;
use crate::geo::{GeoLookup, NoopGeoLookup};
use crate::kv_store::KvStoreObj;
use crate::log::LogEndpointObj;
use crate::secret_store::SecretStoreObj;

/// Process-wide knobs that aren't tied to any one capability: pool sizing and the epoch-tick
/// interval driving deadline interruption (§4.12).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub pool_capacity: usize,
    pub epoch_tick_interval: Duration,
    /// The identifier compared against inbound `cdn-loop` header values (§4.12, §6).
    pub host_identifier: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_capacity: num_cpus_hint().min(16),
            epoch_tick_interval: Duration::from_millis(10),
            host_identifier: "xqd-host".to_string(),
        }
    }
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// The immutable, `Arc`-shared set of registered capabilities every instance is built against
/// (§3 "Lifecycle": "Capability registry is populated at construction... immutable during
/// requests").
pub struct Registry {
    pub config: RuntimeConfig,
    pub backends: HashMap<String, Backend>,
    pub backend_handler: Arc<dyn BackendHandler>,
    pub dictionaries: HashMap<String, DictionaryObj>,
    pub config_stores: HashMap<String, ConfigStoreObj>,
    pub secret_stores: HashMap<String, SecretStoreObj>,
    pub kv_stores: HashMap<String, Arc<KvStoreObj>>,
    pub acls: HashMap<String, AclObj>,
    pub loggers: HashMap<String, Arc<LogEndpointObj>>,
    pub cache: Arc<CacheEngine>,
    pub geo: Arc<dyn GeoLookup>,
}

impl Registry {
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.get(name)
    }
}

/// Accumulates named capabilities, then finalizes into an immutable [`Registry`].
pub struct RegistryBuilder {
    config: RuntimeConfig,
    backends: HashMap<String, Backend>,
    backend_handler: Option<Arc<dyn BackendHandler>>,
    dictionaries: HashMap<String, DictionaryObj>,
    config_stores: HashMap<String, ConfigStoreObj>,
    secret_stores: HashMap<String, SecretStoreObj>,
    kv_stores: HashMap<String, Arc<KvStoreObj>>,
    acls: HashMap<String, AclObj>,
    loggers: HashMap<String, Arc<LogEndpointObj>>,
    geo: Option<Arc<dyn GeoLookup>>,
}

impl RegistryBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            backend_handler: None,
            dictionaries: HashMap::new(),
            config_stores: HashMap::new(),
            secret_stores: HashMap::new(),
            kv_stores: HashMap::new(),
            acls: HashMap::new(),
            loggers: HashMap::new(),
            geo: None,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backends.insert(backend.name.clone(), backend);
        self
    }

    pub fn with_backend_handler(mut self, handler: Arc<dyn BackendHandler>) -> Self {
        self.backend_handler = Some(handler);
        self
    }

    pub fn with_dictionary(mut self, name: impl Into<String>, dict: DictionaryObj) -> Self {
        self.dictionaries.insert(name.into(), dict);
        self
    }

    pub fn with_config_store(mut self, name: impl Into<String>, store: ConfigStoreObj) -> Self {
        self.config_stores.insert(name.into(), store);
        self
    }

    pub fn with_secret_store(mut self, name: impl Into<String>, store: SecretStoreObj) -> Self {
        self.secret_stores.insert(name.into(), store);
        self
    }

    pub fn with_kv_store(mut self, name: impl Into<String>, store: KvStoreObj) -> Self {
        self.kv_stores.insert(name.into(), Arc::new(store));
        self
    }

    pub fn with_acl(mut self, name: impl Into<String>, acl: AclObj) -> Self {
        self.acls.insert(name.into(), acl);
        self
    }

    pub fn with_logger(mut self, endpoint: LogEndpointObj) -> Self {
        self.loggers
            .insert(endpoint.name().to_string(), Arc::new(endpoint));
        self
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            config: self.config,
            backends: self.backends,
            backend_handler: self
                .backend_handler
                .unwrap_or_else(|| Arc::new(HyperBackendHandler::default())),
            dictionaries: self.dictionaries,
            config_stores: self.config_stores,
            secret_stores: self.secret_stores,
            kv_stores: self.kv_stores,
            acls: self.acls,
            loggers: self.loggers,
            cache: Arc::new(CacheEngine::new()),
            geo: self.geo.unwrap_or_else(|| Arc::new(NoopGeoLookup)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_resolves_registered_backend_by_name() {
        let registry = RegistryBuilder::new(RuntimeConfig::default())
            .with_backend(Backend::new("origin", "https://example.org"))
            .build();
        assert!(registry.backend("origin").is_some());
        assert!(registry.backend("missing").is_none());
    }

    #[test]
    fn default_config_bounds_pool_capacity_to_sixteen() {
        assert!(RuntimeConfig::default().pool_capacity <= 16);
    }
}
