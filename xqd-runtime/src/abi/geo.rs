//! `xqd_geo_lookup`: resolve a client IP address to a JSON geolocation blob via the registry's
//! [`crate::geo::GeoLookup`] callback slot. The core never implements an actual geo database
//! (§1 Non-goals); it just plumbs the callback's result (or `XqdErrNone` if unknown) to the
//! guest, matching the teacher's `geo::geo_lookup` hostcall shape (address in, JSON string out).

use std::net::IpAddr;

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_geo_lookup",
        |mut caller: Caller<'_, InstanceState>,
         addr_ptr: u32,
         addr_len: u32,
         buf_ptr: u32,
         maxlen: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let addr_str = match mem.read_string_lossy(addr_ptr, addr_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if addr_str.parse::<IpAddr>().is_err() {
                return XqdStatus::INVALID_ARGUMENT.code;
            }

            let json = match caller.data().registry.geo.lookup(&addr_str) {
                Some(json) => json,
                None => return XqdStatus::NONE.code,
            };

            if json.len() > maxlen as usize {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, json.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }

            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, json.as_bytes()).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, json.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    Ok(())
}
