//! Per-request instance lifecycle: store setup, entry-point invocation, epoch-deadline
//! interruption, and CPU-time pause/resume accounting (§4.12).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmtime::{Config, Engine, Linker, Module, Store};

use crate::acl::AclObj;
use crate::cache::engine::Transaction as CacheTransaction;
use crate::config_store::ConfigStoreObj;
use crate::dictionary::DictionaryObj;
use crate::error::RuntimeError;
use crate::handle::{Handle, HandleTable};
use crate::http::body::BodyObj;
use crate::http::request::pending::PendingRequestObj;
use crate::http::request::RequestObj;
use crate::http::response::ResponseObj;
use crate::kv_store::KvStoreObj;
use crate::log::LogEndpointObj;
use crate::registry::Registry;
use crate::secret_store::{SecretObj, SecretStoreObj};

/// Guest entry point every module is expected to export, mirroring the teacher's
/// `fastly_macros::main`-generated `_start`/entry wiring.
pub const ENTRY_POINT: &str = "main";

/// Everything one served request owns: the registry it was built against, every handle table
/// (§4.2), and CPU-time accounting (§5 "CPU time vs. wall time"). One `InstanceState` backs one
/// `wasmtime::Store`, created fresh per request per §9 ("build one linker per request that
/// closes over the instance").
pub struct InstanceState {
    pub registry: Arc<Registry>,

    pub requests: HandleTable<RequestObj>,
    pub responses: HandleTable<ResponseObj>,
    pub bodies: HandleTable<BodyObj>,
    pub pending_requests: HandleTable<PendingRequestObj>,
    pub cache_transactions: HandleTable<CacheTransaction>,
    pub opened_kv_stores: HandleTable<Arc<KvStoreObj>>,
    pub opened_secret_stores: HandleTable<SecretStoreObj>,
    pub secrets: HandleTable<SecretObj>,
    pub opened_dictionaries: HandleTable<DictionaryObj>,
    pub opened_config_stores: HandleTable<ConfigStoreObj>,
    pub opened_acls: HandleTable<AclObj>,
    pub opened_loggers: HandleTable<Arc<LogEndpointObj>>,

    pub downstream_request: Option<Handle<RequestObj>>,
    pub downstream_response: Option<Handle<ResponseObj>>,

    cpu_time_us: Arc<AtomicU64>,
    slice_started_at: Option<Instant>,
}

impl InstanceState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            requests: HandleTable::new(),
            responses: HandleTable::new(),
            bodies: HandleTable::new(),
            pending_requests: HandleTable::new(),
            cache_transactions: HandleTable::new(),
            opened_kv_stores: HandleTable::new(),
            opened_secret_stores: HandleTable::new(),
            secrets: HandleTable::new(),
            opened_dictionaries: HandleTable::new(),
            opened_config_stores: HandleTable::new(),
            opened_acls: HandleTable::new(),
            opened_loggers: HandleTable::new(),
            downstream_request: None,
            downstream_response: None,
            cpu_time_us: Arc::new(AtomicU64::new(0)),
            slice_started_at: Some(Instant::now()),
        }
    }

    /// Reset every table to empty, for pooled reuse (§3 "Lifecycle", §4.13).
    pub fn reset(&mut self) {
        self.requests.reset();
        self.responses.reset();
        self.bodies.reset();
        self.pending_requests.reset();
        self.cache_transactions.reset();
        self.opened_kv_stores.reset();
        self.opened_secret_stores.reset();
        self.secrets.reset();
        self.opened_dictionaries.reset();
        self.opened_config_stores.reset();
        self.opened_acls.reset();
        self.opened_loggers.reset();
        self.downstream_request = None;
        self.downstream_response = None;
        self.cpu_time_us.store(0, Ordering::Relaxed);
        self.slice_started_at = Some(Instant::now());
    }

    /// Stop the CPU-time accumulator on entry to a suspension point (§5).
    pub fn pause_cpu_timer(&mut self) {
        if let Some(started) = self.slice_started_at.take() {
            self.cpu_time_us
                .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        }
    }

    /// Resume the CPU-time accumulator on exit from a suspension point.
    pub fn resume_cpu_timer(&mut self) {
        self.slice_started_at.get_or_insert_with(Instant::now);
    }

    pub fn cpu_time_us(&self) -> u64 {
        let mut total = self.cpu_time_us.load(Ordering::Relaxed);
        if let Some(started) = self.slice_started_at {
            total += started.elapsed().as_micros() as u64;
        }
        total
    }
}

/// Builds the shared `wasmtime::Engine` every instance instantiates modules against. One engine
/// per process; epoch interruption is enabled so a per-request deadline can trap a runaway
/// guest (§4.12).
pub fn build_engine() -> anyhow::Result<Engine> {
    let mut config = Config::new();
    config.epoch_interruption(true);
    Engine::new(&config).map_err(RuntimeError::Instantiation).map_err(Into::into)
}

/// One served request's guest invocation: a fresh store, a fresh linker closing over a fresh
/// `InstanceState`, instantiation, and the entry-point call, all torn down after one use (§3
/// "Lifecycle", §9 "Cyclic references between instance and host-exported functions").
pub struct Instance {
    store: Store<InstanceState>,
    entry: wasmtime::TypedFunc<(), ()>,
}

impl Instance {
    /// Builds a fresh store, a fresh linker closing over it, instantiates `module` against that
    /// linker, and resolves its entry point — all in one pass, since a `wasmtime::Instance` is
    /// only valid for the store it was instantiated into.
    pub fn new(engine: &Engine, module: &Module, registry: Arc<Registry>) -> Result<Self, RuntimeError> {
        let mut store = Store::new(engine, InstanceState::new(registry));
        store.set_epoch_deadline(1);

        let mut linker: Linker<InstanceState> = Linker::new(engine);
        crate::abi::link_host_functions(&mut linker).map_err(RuntimeError::Instantiation)?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(RuntimeError::Instantiation)?;
        let entry = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_POINT)
            .map_err(RuntimeError::Instantiation)?;

        Ok(Self { store, entry })
    }

    /// Calls the guest's entry point. The caller is expected to have armed cancellation via the
    /// epoch watcher beforehand.
    pub fn call_entry_point(&mut self) -> Result<(), RuntimeError> {
        self.entry.call(&mut self.store, ()).map_err(RuntimeError::Trap)
    }

    pub fn state(&self) -> &InstanceState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut InstanceState {
        self.store.data_mut()
    }
}

/// Spawns the single process-wide background task that ticks the engine epoch at
/// `interval`, so that any store's `epoch_deadline_trap` fires promptly (§4.12).
pub fn spawn_epoch_ticker(engine: Engine, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            engine.increment_epoch();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_downstream_handles_and_cpu_time() {
        let registry = crate::registry::RegistryBuilder::new(Default::default()).build();
        let mut state = InstanceState::new(registry);
        state.downstream_request = Some(Handle::from_u32(0));
        state.reset();
        assert!(state.downstream_request.is_none());
    }

    #[test]
    fn pause_then_resume_accumulates_elapsed_time() {
        let registry = crate::registry::RegistryBuilder::new(Default::default()).build();
        let mut state = InstanceState::new(registry);
        std::thread::sleep(Duration::from_millis(1));
        state.pause_cpu_timer();
        let after_pause = state.cpu_time_us();
        assert!(after_pause > 0);
        state.resume_cpu_timer();
        assert!(state.cpu_time_us() >= after_pause);
    }
}
