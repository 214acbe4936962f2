//! `xqd_secret_store_open` / `xqd_secret_store_get` / `xqd_secret_from_bytes` /
//! `xqd_secret_plaintext`: the two-level secret-store protocol (§4.10). Kept separate from
//! `abi::store`'s flat dictionary/config-store/acl group since a secret resolves to a second
//! handle kind (`Secret`) rather than a value read straight back to the guest.

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::handle::Handle;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;
use crate::secret_store::SecretObj;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_secret_store_open",
        |mut caller: Caller<'_, InstanceState>, name_ptr: u32, name_len: u32, handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(n) => n,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let store = match caller.data().registry.secret_stores.get(&name) {
                Some(s) => s.clone(),
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().opened_secret_stores.insert(store);
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
        "xqd_secret_store_get",
        |mut caller: Caller<'_, InstanceState>,
         store_handle: u32,
         name_ptr: u32,
         name_len: u32,
         secret_handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(n) => n,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let secret = match caller.data().opened_secret_stores.get(Handle::from_u32(store_handle)) {
                Some(store) => store.get(&name),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let secret = match secret {
                Some(s) => s,
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().secrets.insert(secret);
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(secret_handle_out, handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_secret_from_bytes",
        |mut caller: Caller<'_, InstanceState>, buf_ptr: u32, buf_len: u32, secret_handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let bytes = match mem.read_bytes(buf_ptr, buf_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let handle = caller.data_mut().secrets.insert(SecretObj::from_bytes(bytes));
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(secret_handle_out, handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_secret_plaintext",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         buf_ptr: u32,
         buf_len: u32,
         nwritten_out: u32| {
            let plaintext = match caller.data().secrets.get(Handle::from_u32(handle)) {
                Some(secret) => secret.plaintext().clone(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            if (plaintext.len() as u32) > buf_len {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, plaintext.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, &plaintext).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, plaintext.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    Ok(())
}
