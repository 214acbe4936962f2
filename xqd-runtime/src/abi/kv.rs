//! `xqd_kv_store_open` / `xqd_kv_*`: KV store lookup/insert/delete (§4.9). Opening a store by
//! name resolves a handle into `opened_kv_stores`, mirroring the open/operate shape the
//! dictionary, config-store, and secret-store ABI groups use (`abi::store`). Modeled as
//! `Wait`-style blocking completion at the protocol level, but since the store is in-process the
//! completion is always immediate (§4.9), so these are plain synchronous host functions.

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::handle::Handle;
use crate::instance::InstanceState;
use crate::kv_store::InsertMode;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_kv_store_open",
        |mut caller: Caller<'_, InstanceState>, name_ptr: u32, name_len: u32, handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let store = match caller.data().registry.kv_stores.get(&name) {
                Some(s) => s.clone(),
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().opened_kv_stores.insert(store);
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(handle_out, handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_kv_lookup",
        |mut caller: Caller<'_, InstanceState>,
         store_handle: u32,
         key_ptr: u32,
         key_len: u32,
         buf_ptr: u32,
         buf_len: u32,
         metadata_buf_ptr: u32,
         metadata_max_len: u32,
         generation_out: u32,
         metadata_nwritten_out: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_string_lossy(key_ptr, key_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };

            let store = match caller.data().opened_kv_stores.get(Handle::from_u32(store_handle)) {
                Some(s) => s.clone(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let value = match store.lookup(&key) {
                Some(v) => v,
                None => return XqdStatus::NONE.code,
            };
            if (value.body.len() as u32) > buf_len || (value.metadata.len() as u32) > metadata_max_len {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, value.body.len() as u32);
                let _ = mem.write_u32(metadata_nwritten_out, value.metadata.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, &value.body).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_bytes(metadata_buf_ptr, value.metadata.as_bytes()).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_u64(generation_out, value.generation).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_u32(metadata_nwritten_out, value.metadata.len() as u32).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, value.body.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_kv_insert",
        |mut caller: Caller<'_, InstanceState>,
         store_handle: u32,
         key_ptr: u32,
         key_len: u32,
         body_ptr: u32,
         body_len: u32,
         metadata_ptr: u32,
         metadata_len: u32,
         ttl_ns: u64,
         mode: u32,
         if_generation_match: u64,
         generation_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_string_lossy(key_ptr, key_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let body = match mem.read_bytes(body_ptr, body_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let metadata = if metadata_len > 0 {
                match mem.read_string_lossy(metadata_ptr, metadata_len) {
                    Ok(s) => s,
                    Err(_) => return XqdStatus::ERROR.code,
                }
            } else {
                String::new()
            };

            let store = match caller.data().opened_kv_stores.get(Handle::from_u32(store_handle)) {
                Some(s) => s.clone(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mode = match mode {
                0 => InsertMode::Overwrite,
                1 => InsertMode::Add,
                2 => InsertMode::Append,
                3 => InsertMode::Prepend,
                _ => return XqdStatus::INVALID_ARGUMENT.code,
            };
            let ttl = if ttl_ns > 0 { Some(std::time::Duration::from_nanos(ttl_ns)) } else { None };
            let if_generation_match = if if_generation_match > 0 { Some(if_generation_match) } else { None };
            let generation = match store.insert(&key, body, metadata, ttl, mode, if_generation_match) {
                Ok(generation) => generation,
                Err(xqd_shared::KvError::PreconditionFailed) => return XqdStatus::INVALID_ARGUMENT.code,
                Err(xqd_shared::KvError::BadRequest) => return XqdStatus::INVALID_ARGUMENT.code,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u64(generation_out, generation) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_kv_delete",
        |mut caller: Caller<'_, InstanceState>, store_handle: u32, key_ptr: u32, key_len: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_string_lossy(key_ptr, key_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match caller.data().opened_kv_stores.get(Handle::from_u32(store_handle)) {
                Some(store) => {
                    store.delete(&key);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_kv_list",
        |mut caller: Caller<'_, InstanceState>,
         store_handle: u32,
         prefix_ptr: u32,
         prefix_len: u32,
         cursor_ptr: u32,
         cursor_len: u32,
         limit: u32,
         buf_ptr: u32,
         buf_len: u32,
         next_cursor_buf_ptr: u32,
         next_cursor_max_len: u32,
         next_cursor_nwritten_out: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let prefix = match mem.read_string_lossy(prefix_ptr, prefix_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let cursor = if cursor_len > 0 {
                match mem.read_string_lossy(cursor_ptr, cursor_len) {
                    Ok(s) => Some(s),
                    Err(_) => return XqdStatus::ERROR.code,
                }
            } else {
                None
            };
            let store = match caller.data().opened_kv_stores.get(Handle::from_u32(store_handle)) {
                Some(s) => s.clone(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let limit = if limit > 0 { Some(limit as usize) } else { None };
            let (keys, next_cursor) = match store.list(&prefix, limit, cursor.as_deref()) {
                Ok(r) => r,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            let joined = keys.join("\n");
            let next_cursor = next_cursor.unwrap_or_default();
            if (joined.len() as u32) > buf_len || (next_cursor.len() as u32) > next_cursor_max_len {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, joined.len() as u32);
                let _ = mem.write_u32(next_cursor_nwritten_out, next_cursor.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, joined.as_bytes()).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_bytes(next_cursor_buf_ptr, next_cursor.as_bytes()).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_u32(next_cursor_nwritten_out, next_cursor.len() as u32).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, joined.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    Ok(())
}
