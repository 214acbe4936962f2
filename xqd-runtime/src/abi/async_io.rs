//! `xqd_async_io_select`: wait on the first of several pending subrequests to complete (§4.6,
//! §4.9's "all operations are expressed as ... Wait-style blocking completion" applied to
//! subrequest dispatch).
//!
//! Registered with `func_wrap`, not `func_wrap_async`: the engine built by
//! `crate::instance::build_engine` has no `async_support`, since the guest entry point is
//! invoked synchronously from a `spawn_blocking` thread (§4.12 "Instance orchestrator"). A sync
//! host function can still block that thread; it just can't `.await` directly.

use std::thread;
use std::time::Duration;

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::handle::Handle;
use crate::http::request::pending::PendingRequestObj;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

/// How long to sleep between poll sweeps while no pending item is ready yet.
/// `oneshot::Receiver::try_recv` has no wake-on-any-of primitive without collecting owned
/// futures into a `FuturesUnordered` (which would require taking every handle out of the table
/// up front); a short poll loop keeps every other handle untouched until it actually wins.
const POLL_INTERVAL: Duration = Duration::from_micros(500);

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_async_io_select",
        |mut caller: Caller<'_, InstanceState>,
         handles_ptr: u32,
         handles_len: u32,
         index_out: u32,
         response_handle_out: u32,
         body_handle_out: u32| {
            let handles: Vec<Handle<PendingRequestObj>> = {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let mut out = Vec::with_capacity(handles_len as usize);
                for i in 0..handles_len {
                    let raw = match mem.read_u32(handles_ptr + i * 4) {
                        Ok(v) => v,
                        Err(_) => return XqdStatus::ERROR.code,
                    };
                    out.push(Handle::from_u32(raw));
                }
                out
            };
            if handles.is_empty() {
                return XqdStatus::INVALID_ARGUMENT.code;
            }

            caller.data_mut().pause_cpu_timer();
            let (winner_index, winner_handle, result) = loop {
                let mut found = None;
                for (i, handle) in handles.iter().enumerate() {
                    let ready = match caller.data_mut().pending_requests.get_mut(*handle) {
                        Some(pending) => pending.poll(),
                        None => None,
                    };
                    if let Some(result) = ready {
                        found = Some((i, *handle, result));
                        break;
                    }
                }
                if let Some(found) = found {
                    break found;
                }
                thread::sleep(POLL_INTERVAL);
            };
            caller.data_mut().resume_cpu_timer();

            caller.data_mut().pending_requests.take(winner_handle);

            match result {
                Ok((response, body)) => {
                    let state = caller.data_mut();
                    let body_handle = state.bodies.insert(body);
                    let response_handle = state.responses.insert(response);
                    let mut mem = match GuestMemory::new(&mut caller) {
                        Ok(m) => m,
                        Err(_) => return XqdStatus::ERROR.code,
                    };
                    if mem.write_u32(index_out, winner_index as u32).is_err() {
                        return XqdStatus::ERROR.code;
                    }
                    if mem
                        .write_u32(response_handle_out, response_handle.as_u32())
                        .is_err()
                    {
                        return XqdStatus::ERROR.code;
                    }
                    match mem.write_u32(body_handle_out, body_handle.as_u32()) {
                        Ok(()) => XqdStatus::OK.code,
                        Err(_) => XqdStatus::ERROR.code,
                    }
                }
                Err(_) => {
                    let mut mem = match GuestMemory::new(&mut caller) {
                        Ok(m) => m,
                        Err(_) => return XqdStatus::ERROR.code,
                    };
                    let _ = mem.write_u32(index_out, winner_index as u32);
                    XqdStatus::ERROR.code
                }
            }
        },
    )?;

    Ok(())
}
