//! `xqd_body_*` / `xqd_trailer_*`: body creation, read/write, append, and trailers (§4.4).

use wasmtime::{Caller, Linker};
use xqd_shared::{BodyWriteEnd, XqdStatus};

use crate::abi::headers;
use crate::handle::Handle;
use crate::http::body::BodyObj;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap("env", "xqd_body_new", |mut caller: Caller<'_, InstanceState>, handle_out: u32| {
        let handle = caller.data_mut().bodies.insert(BodyObj::new());
        let mut mem = match GuestMemory::new(&mut caller) {
            Ok(m) => m,
            Err(_) => return XqdStatus::ERROR.code,
        };
        match mem.write_u32(handle_out, handle.as_u32()) {
            Ok(()) => XqdStatus::OK.code,
            Err(_) => XqdStatus::ERROR.code,
        }
    })?;

    linker.func_wrap(
        "env",
        "xqd_body_write",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         buf_ptr: u32,
         buf_len: u32,
         end: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let data = match mem.read_bytes(buf_ptr, buf_len) {
                Ok(d) => d,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let end = if end == 1 { BodyWriteEnd::Front } else { BodyWriteEnd::Back };
            let n = match caller.data_mut().bodies.get_mut(Handle::from_u32(handle)) {
                Some(body) => match body.write(&data, end) {
                    Ok(n) => n,
                    Err(_) => return XqdStatus::ERROR.code,
                },
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(nwritten_out, n as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_body_read",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         buf_ptr: u32,
         buf_len: u32,
         nwritten_out: u32| {
            let data = match caller.data_mut().bodies.get_mut(Handle::from_u32(handle)) {
                Some(body) => body.read(buf_len as usize),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_bytes(buf_ptr, &data).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, data.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_body_append",
        |mut caller: Caller<'_, InstanceState>, dest: u32, src: u32| {
            let source = match caller.data_mut().bodies.take(Handle::from_u32(src)) {
                Some(b) => b,
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            match caller.data_mut().bodies.get_mut(Handle::from_u32(dest)) {
                Some(body) => match body.append(source) {
                    Ok(()) => XqdStatus::OK.code,
                    Err(_) => XqdStatus::ERROR.code,
                },
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_body_known_length",
        |mut caller: Caller<'_, InstanceState>, handle: u32, length_out: u32| {
            let length = match caller.data().bodies.get(Handle::from_u32(handle)) {
                Some(body) => body.known_length(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            match length {
                None => XqdStatus::NONE.code,
                Some(len) => {
                    let mut mem = match GuestMemory::new(&mut caller) {
                        Ok(m) => m,
                        Err(_) => return XqdStatus::ERROR.code,
                    };
                    match mem.write_u64(length_out, len) {
                        Ok(()) => XqdStatus::OK.code,
                        Err(_) => XqdStatus::ERROR.code,
                    }
                }
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_body_close",
        |mut caller: Caller<'_, InstanceState>, handle: u32| {
            match caller.data_mut().bodies.get_mut(Handle::from_u32(handle)) {
                Some(body) => {
                    body.close();
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_body_abandon",
        |mut caller: Caller<'_, InstanceState>, handle: u32| {
            match caller.data_mut().bodies.take(Handle::from_u32(handle)) {
                Some(_) => XqdStatus::OK.code,
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_trailer_append",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         name_ptr: u32,
         name_len: u32,
         value_ptr: u32,
         value_len: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name_bytes = match mem.read_bytes(name_ptr, name_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let value_bytes = match mem.read_bytes(value_ptr, value_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match headers::parse_name(&name_bytes) {
                Ok(n) => n,
                Err(status) => return status.code,
            };
            let value = match headers::parse_value(&value_bytes) {
                Ok(v) => v,
                Err(status) => return status.code,
            };
            match caller.data_mut().bodies.get_mut(Handle::from_u32(handle)) {
                Some(body) => {
                    headers::append(body.trailers_mut(), name, value);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_trailer_names_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         buf_ptr: u32,
         maxlen: u32,
         cursor: i64,
         ending_cursor_out: u32,
         nwritten_out: u32| {
            let names = match caller.data().bodies.get(Handle::from_u32(handle)) {
                Some(body) => headers::sorted_names(body.trailers()),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            headers::write_multivalue_step(
                &mut mem,
                &names,
                cursor,
                buf_ptr,
                maxlen,
                nwritten_out,
                ending_cursor_out,
            )
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_trailer_value_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         name_ptr: u32,
         name_len: u32,
         buf_ptr: u32,
         maxlen: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name_bytes = match mem.read_bytes(name_ptr, name_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match headers::parse_name(&name_bytes) {
                Ok(n) => n,
                Err(status) => return status.code,
            };
            let value = match caller.data().bodies.get(Handle::from_u32(handle)) {
                Some(body) => body.trailers().get(&name).map(|v| v.as_bytes().to_vec()),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let value = match value {
                Some(v) => v,
                None => return XqdStatus::NONE.code,
            };
            if value.len() > maxlen as usize {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let _ = mem.write_u32(nwritten_out, value.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            if mem.write_bytes(buf_ptr, &value).is_err() {
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
        "xqd_trailer_values_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         name_ptr: u32,
         name_len: u32,
         buf_ptr: u32,
         maxlen: u32,
         cursor: i64,
         ending_cursor_out: u32,
         nwritten_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name_bytes = match mem.read_bytes(name_ptr, name_len) {
                Ok(b) => b,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let name = match headers::parse_name(&name_bytes) {
                Ok(n) => n,
                Err(status) => return status.code,
            };
            let values = match caller.data().bodies.get(Handle::from_u32(handle)) {
                Some(body) => headers::sorted_values(body.trailers(), &name),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            headers::write_multivalue_step(
                &mut mem,
                &values,
                cursor,
                buf_ptr,
                maxlen,
                nwritten_out,
                ending_cursor_out,
            )
        },
    )?;

    Ok(())
}
