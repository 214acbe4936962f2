//! `xqd_cache_*` / `xqd_http_cache_*`: the transactional cache protocol (§4.8).
//!
//! Registered with `func_wrap`, never `func_wrap_async` (see `abi::async_io`'s module comment):
//! `busy_handle_wait` blocks the calling `spawn_blocking` thread via
//! `tokio::runtime::Handle::current().block_on`, the same bridge `abi::send` uses for subrequest
//! dispatch, rather than registering an async hostcall against an engine with no async support.

use std::collections::HashSet;

use tokio::runtime::Handle as TokioHandle;
use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::cache::engine::{now_ns, CachedObject};
use crate::handle::Handle;
use crate::http::body::BodyObj;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_cache_lookup",
        |mut caller: Caller<'_, InstanceState>, key_ptr: u32, key_len: u32, state_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_bytes(key_ptr, key_len) {
                Ok(k) => k,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let state = caller.data().registry.cache.lookup(&key).bits();
            match mem.write_u32(state_out, state) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_transaction_lookup",
        |mut caller: Caller<'_, InstanceState>,
         key_ptr: u32,
         key_len: u32,
         state_out: u32,
         handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_bytes(key_ptr, key_len) {
                Ok(k) => k,
                Err(_) => return XqdStatus::ERROR.code,
            };

            let cache = caller.data().registry.cache.clone();
            let txn = cache.transaction_lookup(&key);
            let state = txn.state.bits();
            let handle = caller.data_mut().cache_transactions.insert(txn);

            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_u32(state_out, state).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(handle_out, handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_busy_handle_wait",
        |mut caller: Caller<'_, InstanceState>, handle: u32| {
            let slot = match caller.data().cache_transactions.get(Handle::from_u32(handle)) {
                Some(txn) => txn.slot.clone(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            caller.data_mut().pause_cpu_timer();
            TokioHandle::current().block_on(slot.wait());
            caller.data_mut().resume_cpu_timer();
            XqdStatus::OK.code
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_transaction_insert",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         body_handle: u32,
         max_age_ns: u64,
         stale_while_revalidate_ns: u64| {
            let mut body = match caller.data_mut().bodies.take(Handle::from_u32(body_handle)) {
                Some(b) => b,
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let bytes = drain_all(&mut body);
            insert_object(&mut caller, handle, bytes, max_age_ns, stale_while_revalidate_ns)
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_transaction_insert_and_stream_back",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         body_handle: u32,
         max_age_ns: u64,
         stale_while_revalidate_ns: u64,
         cache_body_handle_out: u32| {
            let mut body = match caller.data_mut().bodies.take(Handle::from_u32(body_handle)) {
                Some(b) => b,
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let bytes = drain_all(&mut body);
            let readback = crate::http::body::BufferedBody::from_bytes(bytes::Bytes::from(bytes.clone()));
            let status = insert_object(&mut caller, handle, bytes, max_age_ns, stale_while_revalidate_ns);
            if XqdStatus::from(status).is_err() {
                return status;
            }
            let readback_handle = caller.data_mut().bodies.insert(BodyObj::Buffered(readback));
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(cache_body_handle_out, readback_handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_transaction_update",
        |mut caller: Caller<'_, InstanceState>, handle: u32, max_age_ns: u64| {
            let cache = caller.data().registry.cache.clone();
            match caller.data().cache_transactions.get(Handle::from_u32(handle)) {
                Some(txn) => {
                    cache.transaction_update(txn, max_age_ns);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_transaction_cancel",
        |mut caller: Caller<'_, InstanceState>, handle: u32| {
            let cache = caller.data().registry.cache.clone();
            match caller.data().cache_transactions.get(Handle::from_u32(handle)) {
                Some(txn) => {
                    cache.transaction_cancel(txn);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_get_state",
        |mut caller: Caller<'_, InstanceState>, handle: u32, state_out: u32| {
            let cache = caller.data().registry.cache.clone();
            let state = match caller.data().cache_transactions.get(Handle::from_u32(handle)) {
                Some(txn) => cache.state_of(&txn.slot).bits(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(state_out, state) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_get_age_ns",
        |mut caller: Caller<'_, InstanceState>, handle: u32, age_out: u32| {
            let age = match object_of(&caller, handle) {
                Some(obj) => obj.age_ns(now_ns()),
                None => return XqdStatus::NONE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u64(age_out, age) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_get_hits",
        |mut caller: Caller<'_, InstanceState>, handle: u32, hits_out: u32| {
            let hits = match caller.data().cache_transactions.get(Handle::from_u32(handle)) {
                Some(txn) => txn.slot.hits(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u64(hits_out, hits) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_get_length",
        |mut caller: Caller<'_, InstanceState>, handle: u32, length_out: u32| {
            let length = match object_of(&caller, handle) {
                Some(obj) => obj.content_length.unwrap_or(obj.body.len() as u64),
                None => return XqdStatus::NONE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u64(length_out, length) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_cache_get_body",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         from: u32,
         to: u32,
         options_mask: u32,
         body_handle_out: u32| {
            const FROM: u32 = 1 << 1;
            const TO: u32 = 1 << 2;
            let obj = match object_of(&caller, handle) {
                Some(obj) => obj,
                None => return XqdStatus::NONE.code,
            };
            let from = if options_mask & FROM != 0 { Some(from as u64) } else { None };
            let to = if options_mask & TO != 0 { Some(to as u64) } else { None };
            let slice = match obj.body_range(from, to) {
                Ok(s) => s.to_vec(),
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            let body = BodyObj::Buffered(crate::http::body::BufferedBody::from_bytes(bytes::Bytes::from(slice)));
            let body_handle = caller.data_mut().bodies.insert(body);
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(body_handle_out, body_handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_http_cache_is_request_cacheable",
        |mut caller: Caller<'_, InstanceState>, method_ptr: u32, method_len: u32, result_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let method_bytes = match mem.read_bytes(method_ptr, method_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let method = match http::Method::from_bytes(&method_bytes) {
                Ok(m) => m,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            let cacheable = crate::cache::CacheEngine::is_request_cacheable(&method) as u32;
            match mem.write_u32(result_out, cacheable) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_http_cache_get_suggested_cache_key",
        |mut caller: Caller<'_, InstanceState>, url_ptr: u32, url_len: u32, buf_ptr: u32, maxlen: u32, nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let url = match mem.read_string_lossy(url_ptr, url_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let digest = crate::cache::CacheEngine::suggested_cache_key(&url);
            if (digest.len() as u32) > maxlen {
                let _ = mem.write_u32(nwritten_out, digest.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            if mem.write_bytes(buf_ptr, &digest).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, digest.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    Ok(())
}

/// Drains a body fully regardless of shape, in bounded chunks (a single `read(usize::MAX)`
/// would overflow `Vec`'s allocator for a streaming body with no known length).
fn drain_all(body: &mut BodyObj) -> Vec<u8> {
    const CHUNK: usize = 64 * 1024;
    let mut out = Vec::new();
    loop {
        let chunk = body.read(CHUNK);
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    out
}

fn object_of(caller: &Caller<'_, InstanceState>, handle: u32) -> Option<CachedObject> {
    caller
        .data()
        .cache_transactions
        .get(Handle::from_u32(handle))
        .and_then(|txn| txn.slot.object())
}

fn insert_object(
    caller: &mut Caller<'_, InstanceState>,
    handle: u32,
    body: Vec<u8>,
    max_age_ns: u64,
    stale_while_revalidate_ns: u64,
) -> i32 {
    let cache = caller.data().registry.cache.clone();
    let txn = match caller.data().cache_transactions.get(Handle::from_u32(handle)) {
        Some(txn) => txn,
        None => return XqdStatus::INVALID_HANDLE.code,
    };
    let object = CachedObject {
        key: Vec::new(),
        content_length: Some(body.len() as u64),
        body,
        metadata: Vec::new(),
        max_age_ns,
        stale_while_revalidate_ns: if stale_while_revalidate_ns > 0 {
            Some(stale_while_revalidate_ns)
        } else {
            None
        },
        edge_max_age_ns: None,
        inserted_at_ns: now_ns(),
        surrogate_keys: HashSet::new(),
        sensitive: false,
        vary_rule: String::new(),
    };
    cache.transaction_insert(txn, object);
    XqdStatus::OK.code
}
