//! A bounded pool of pre-warmed instances (§4.13).

use std::sync::Arc;

use tokio::sync::mpsc;
use wasmtime::{Engine, Module};

use crate::error::RuntimeError;
use crate::instance::Instance;
use crate::registry::Registry;

/// `Instantiate()` never blocks: it drains the pool non-blockingly and falls back to building a
/// fresh instance. Returning an instance is likewise non-blocking: `try_send` drops it silently
/// if the pool is already full.
pub struct Pool {
    engine: Engine,
    module: Module,
    registry: Arc<Registry>,
    ready: mpsc::Sender<Instance>,
    take: std::sync::Mutex<mpsc::Receiver<Instance>>,
    capacity: usize,
}

impl Pool {
    pub fn new(engine: Engine, module: Module, registry: Arc<Registry>) -> Self {
        let capacity = registry.config.pool_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            engine,
            module,
            registry,
            ready: tx,
            take: std::sync::Mutex::new(rx),
            capacity,
        }
    }

    /// `Warmup(n)`: pre-construct up to `n` instances (capped at the pool's capacity).
    pub fn warmup(&self, n: usize) -> Result<(), RuntimeError> {
        for _ in 0..n.min(self.capacity) {
            let instance = Instance::new(&self.engine, &self.module, self.registry.clone())?;
            if self.ready.try_send(instance).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// `Instantiate()`: take a ready instance if one exists, else build one fresh.
    pub fn take(&self) -> Result<Instance, RuntimeError> {
        let maybe = self.take.lock().unwrap().try_recv().ok();
        match maybe {
            Some(instance) => Ok(instance),
            None => Instance::new(&self.engine, &self.module, self.registry.clone()),
        }
    }

    /// Offer a used instance back; dropped if the pool is already full.
    pub fn offer(&self, instance: Instance) {
        let _ = self.ready.try_send(instance);
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RuntimeConfig;

    fn tiny_wat_module(engine: &Engine) -> Module {
        Module::new(engine, r#"(module (func (export "main")))"#).unwrap()
    }

    #[test]
    fn take_builds_fresh_when_pool_is_empty() {
        let engine = crate::instance::build_engine().unwrap();
        let module = tiny_wat_module(&engine);
        let registry = crate::registry::RegistryBuilder::new(RuntimeConfig {
            pool_capacity: 2,
            ..Default::default()
        })
        .build();
        let pool = Pool::new(engine, module, registry);
        assert!(pool.take().is_ok());
    }

    #[test]
    fn warmup_then_take_reuses_a_warmed_instance() {
        let engine = crate::instance::build_engine().unwrap();
        let module = tiny_wat_module(&engine);
        let registry = crate::registry::RegistryBuilder::new(RuntimeConfig {
            pool_capacity: 2,
            ..Default::default()
        })
        .build();
        let pool = Pool::new(engine, module, registry);
        pool.warmup(2).unwrap();
        assert!(pool.take().is_ok());
        assert!(pool.take().is_ok());
    }
}
