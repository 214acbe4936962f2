//! The `wasmtime::Linker` registration layer: the ~150 `xqd_*` host-exported functions,
//! grouped by resource-kind prefix (§4.3-§4.11). Each submodule registers one prefix group.
//!
//! Every function follows the same shape: read typed arguments out of guest linear memory (via
//! [`crate::memory::GuestMemory`]), perform the operation against a handle table or domain
//! object on [`crate::instance::InstanceState`], write typed results back, and return an
//! `i32` status converted from an [`crate::error::AsStatus`] implementor.

pub mod async_io;
pub mod body;
pub mod cache;
pub mod geo;
pub(crate) mod headers;
pub mod kv;
pub mod log;
pub mod purge;
pub mod req;
pub mod resp;
pub mod secret;
pub mod send;
pub mod store;

use wasmtime::Linker;

use crate::instance::InstanceState;

/// The single module name every `xqd_*` import is declared under, matching the guest-side
/// `#[link(wasm_import_module = "env")]` convention the teacher's `fastly-sys` crate uses.
pub const ABI_MODULE: &str = "env";

/// Registers every ABI function group against a freshly constructed linker. Called once per
/// request, closing over that request's `InstanceState` (§9 "Cyclic references between
/// instance and host-exported functions").
pub fn link_host_functions(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    req::link(linker)?;
    resp::link(linker)?;
    body::link(linker)?;
    send::link(linker)?;
    cache::link(linker)?;
    kv::link(linker)?;
    store::link(linker)?;
    secret::link(linker)?;
    log::link(linker)?;
    purge::link(linker)?;
    geo::link(linker)?;
    async_io::link(linker)?;
    Ok(())
}
