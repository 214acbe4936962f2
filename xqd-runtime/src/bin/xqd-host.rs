//! Example host binary: loads a guest module, builds a registry with one `httpbin`-style
//! backend, warms an instance pool, and serves downstream HTTP on `127.0.0.1:7878`.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use wasmtime::Module;
use xqd_runtime::instance::{build_engine, spawn_epoch_ticker};
use xqd_runtime::pool::Pool;
use xqd_runtime::registry::{RegistryBuilder, RuntimeConfig};
use xqd_runtime::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let module_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "guest.wasm".to_string());

    let config = RuntimeConfig::default();
    let engine = build_engine()?;
    let module = Module::from_file(&engine, &module_path)?;

    let registry = RegistryBuilder::new(config)
        .with_backend(xqd_runtime::backend::Backend::new("httpbin", "https://httpbin.org"))
        .build();

    let pool = Arc::new(Pool::new(engine.clone(), module, registry.clone()));
    pool.warmup(registry.config.pool_capacity)?;

    spawn_epoch_ticker(engine, registry.config.epoch_tick_interval);

    let addr: SocketAddr = env::var("XQD_HOST_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| "127.0.0.1:7878".parse().unwrap());

    server::serve(addr, pool).await
}
