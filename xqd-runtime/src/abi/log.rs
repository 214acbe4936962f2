//! `xqd_log_endpoint_get` / `xqd_log_write`: named log endpoints (§4.11).

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::handle::Handle;
use crate::instance::InstanceState;
use crate::log::validate_endpoint_name;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_log_endpoint_get",
        |mut caller: Caller<'_, InstanceState>, name_ptr: u32, name_len: u32, handle_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match mem.read_string_lossy(name_ptr, name_len) {
                Ok(n) => n,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if validate_endpoint_name(&name).is_err() {
                return XqdStatus::INVALID_ARGUMENT.code;
            }
            let endpoint = match caller.data().registry.loggers.get(&name) {
                Some(e) => e.clone(),
                None => return XqdStatus::NONE.code,
            };
            let handle = caller.data_mut().opened_loggers.insert(endpoint);
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
        "xqd_log_write",
        |mut caller: Caller<'_, InstanceState>, handle: u32, msg_ptr: u32, msg_len: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let message = match mem.read_string_lossy(msg_ptr, msg_len) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match caller.data().opened_loggers.get(Handle::from_u32(handle)) {
                Some(endpoint) => match endpoint.write_line(&message) {
                    Ok(()) => XqdStatus::OK.code,
                    Err(_) => XqdStatus::ERROR.code,
                },
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    Ok(())
}
