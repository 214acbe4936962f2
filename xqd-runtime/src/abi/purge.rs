//! `xqd_purge_surrogate_key`: invalidating cached objects by surrogate key (§4.8, §4.12).

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::http::purge::{purge_surrogate_key, PurgeOptionsMask};
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_purge_surrogate_key",
        |mut caller: Caller<'_, InstanceState>, key_ptr: u32, key_len: u32, options_mask: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let surrogate_key = match mem.read_string_lossy(key_ptr, key_len) {
                Ok(k) => k,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let soft = PurgeOptionsMask::from_bits_truncate(options_mask).contains(PurgeOptionsMask::SOFT_PURGE);
            purge_surrogate_key(&caller.data().registry.cache, &surrogate_key, soft);
            XqdStatus::OK.code
        },
    )?;

    Ok(())
}
