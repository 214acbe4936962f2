// Warnings (other than unused variables) in doctests are promoted to errors.
#![doc(test(attr(deny(warnings))))]
#![doc(test(attr(allow(dead_code))))]
#![doc(test(attr(allow(unused_variables))))]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]

//! # xqd-runtime
//!
//! A host runtime that executes sandboxed guest WebAssembly modules against the `xqd`
//! edge-compute ABI: one guest module per served HTTP request, instantiated fresh (or drawn
//! from a warm [`pool`]), linked against host-exported `xqd_*` functions ([`abi`]), and torn
//! down or recycled once the request finishes.
//!
//! Start with [`registry::RegistryBuilder`] to declare the backends, stores, and loggers a
//! deployment exposes, [`pool::Pool`] to manage instances against a compiled guest `Module`,
//! and [`server::serve`] to bind a downstream HTTP listener in front of it all.

mod abi;

pub mod acl;
pub mod backend;
pub mod cache;
pub mod config_store;
pub mod dictionary;
pub mod error;
pub mod geo;
pub mod handle;
pub mod http;
pub mod instance;
pub mod kv_store;
pub mod log;
pub mod memory;
pub mod multivalue;
pub mod pool;
pub mod registry;
pub mod secret_store;
pub mod server;

pub use crate::error::RuntimeError;
pub use crate::instance::{Instance, InstanceState};
pub use crate::pool::Pool;
pub use crate::registry::{Registry, RegistryBuilder, RuntimeConfig};
