//! `xqd_dictionary_*` / `xqd_config_store_*` / `xqd_acl_*`: the three flat named-lookup stores
//! that share an open-by-name-then-get shape (§4.10).

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::acl::AclLookupResult;
use crate::handle::Handle;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_dictionary_open",
        |mut caller: Caller<'_, InstanceState>, name_ptr: u32, name_len: u32, handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(n) => n,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let dict = match caller.data().registry.dictionaries.get(&name) {
                Some(d) => d.clone(),
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().opened_dictionaries.insert(dict);
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
        "xqd_dictionary_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         key_ptr: u32,
         key_len: u32,
         buf_ptr: u32,
         buf_len: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_string_lossy(key_ptr, key_len) {
                Ok(k) => k,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let value = match caller.data().opened_dictionaries.get(Handle::from_u32(handle)) {
                Some(dict) => dict.get(&key).map(str::to_string),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let value = match value {
                Some(v) => v,
                None => return XqdStatus::NONE.code,
            };
            if (value.len() as u32) > buf_len {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, value.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, value.as_bytes()).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, value.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_config_store_open",
        |mut caller: Caller<'_, InstanceState>, name_ptr: u32, name_len: u32, handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(n) => n,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let store = match caller.data().registry.config_stores.get(&name) {
                Some(s) => s.clone(),
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().opened_config_stores.insert(store);
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
        "xqd_config_store_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         key_ptr: u32,
         key_len: u32,
         buf_ptr: u32,
         buf_len: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let key = match mem.read_string_lossy(key_ptr, key_len) {
                Ok(k) => k,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let value = match caller.data().opened_config_stores.get(Handle::from_u32(handle)) {
                Some(store) => store.get(&key).map(str::to_string),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let value = match value {
                Some(v) => v,
                None => return XqdStatus::NONE.code,
            };
            if (value.len() as u32) > buf_len {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, value.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, value.as_bytes()).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, value.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_acl_open",
        |mut caller: Caller<'_, InstanceState>, name_ptr: u32, name_len: u32, handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(n) => n,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let acl = match caller.data().registry.acls.get(&name) {
                Some(a) => a.clone(),
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().opened_acls.insert(acl);
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
        "xqd_acl_lookup",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         addr_ptr: u32,
         addr_len: u32,
         result_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let addr = match mem.read_string_lossy(addr_ptr, addr_len) {
                Ok(a) => a,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let result = match caller.data().opened_acls.get(Handle::from_u32(handle)) {
                Some(acl) => acl.lookup(&addr),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let matched = matches!(result, AclLookupResult::Match);
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(result_out, matched as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    Ok(())
}
