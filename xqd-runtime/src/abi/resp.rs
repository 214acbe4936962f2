//! `xqd_resp_*`: response-handle creation and field access (§4.3).

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::abi::headers;
use crate::handle::Handle;
use crate::http::response::ResponseObj;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap("env", "xqd_resp_new", |mut caller: Caller<'_, InstanceState>, handle_out: u32| {
        let handle = caller.data_mut().responses.insert(ResponseObj::new());
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
        "xqd_resp_status_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, status: u32| {
            let status = match u16::try_from(status) {
                Ok(s) => s,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => match resp.set_status(status) {
                    Ok(()) => XqdStatus::OK.code,
                    Err(()) => XqdStatus::INVALID_ARGUMENT.code,
                },
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_status_get",
        |mut caller: Caller<'_, InstanceState>, handle: u32, status_out: u32| {
            let status = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => resp.status.as_u16() as u32,
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(status_out, status) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_version_get",
        |mut caller: Caller<'_, InstanceState>, handle: u32, version_out: u32| {
            let version = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => xqd_shared::HttpVersion::from(resp.version).as_u32(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(version_out, version) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_version_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, version: u32| {
            use xqd_shared::HttpVersion as V;
            let version = match xqd_shared::HttpVersion::try_from(version) {
                Ok(v @ (V::Http09 | V::Http10 | V::Http11)) => v,
                Ok(V::H2 | V::H3) | Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => {
                    resp.version = version.into();
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_framing_headers_mode_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, mode: u32| {
            let mode = match xqd_shared::FramingHeadersMode::try_from(mode) {
                Ok(m) => m,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => {
                    if mode == xqd_shared::FramingHeadersMode::ManuallyFromHeaders {
                        if let Err(reason) =
                            crate::http::request::validate_manual_framing_headers(&resp.headers)
                        {
                            tracing::warn!(reason, "manual framing headers invalid, falling back to automatic");
                            resp.headers.remove(http::header::CONTENT_LENGTH);
                            resp.headers.remove(http::header::TRANSFER_ENCODING);
                            resp.framing_headers_mode = xqd_shared::FramingHeadersMode::Automatic;
                            return XqdStatus::OK.code;
                        }
                    }
                    resp.framing_headers_mode = mode;
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_http_keepalive_mode_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, mode: u32| {
            let mode = match mode {
                0 => xqd_shared::HttpKeepaliveMode::Automatic,
                1 => xqd_shared::HttpKeepaliveMode::NoKeepalive,
                _ => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => {
                    resp.keepalive_mode = mode;
                    if mode == xqd_shared::HttpKeepaliveMode::NoKeepalive {
                        resp.close = true;
                    }
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_close",
        |mut caller: Caller<'_, InstanceState>, handle: u32| {
            match caller.data_mut().responses.take(Handle::from_u32(handle)) {
                Some(_) => XqdStatus::OK.code,
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_get_addr_dest_ip",
        |mut caller: Caller<'_, InstanceState>, handle: u32, buf_ptr: u32, maxlen: u32, nwritten_out: u32| {
            let ip_bytes = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => match resp.remote_addr {
                    Some(addr) => match addr.ip() {
                        std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
                        std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
                    },
                    None => return XqdStatus::NONE.code,
                },
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if ip_bytes.len() > maxlen as usize {
                let _ = mem.write_u32(nwritten_out, ip_bytes.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            if mem.write_bytes(buf_ptr, &ip_bytes).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, ip_bytes.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_get_addr_dest_port",
        |mut caller: Caller<'_, InstanceState>, handle: u32, port_out: u32| {
            let port = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => match resp.remote_addr {
                    Some(addr) => addr.port(),
                    None => return XqdStatus::NONE.code,
                },
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(port_out, port as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_send_downstream",
        |mut caller: Caller<'_, InstanceState>, handle: u32, body_handle: u32, _streaming: u32| {
            let state = caller.data_mut();
            let resp_handle = Handle::from_u32(handle);
            match state.responses.get_mut(resp_handle) {
                Some(resp) => {
                    resp.body = Some(Handle::from_u32(body_handle));
                    state.downstream_response = Some(resp_handle);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_header_names_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         buf_ptr: u32,
         maxlen: u32,
         cursor: i64,
         ending_cursor_out: u32,
         nwritten_out: u32| {
            let names = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => headers::sorted_names(&resp.headers),
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
        "xqd_resp_header_value_get",
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
            let value = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => resp.headers.get(&name).map(|v| v.as_bytes().to_vec()),
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
        "xqd_resp_header_values_get",
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
            let values = match caller.data().responses.get(Handle::from_u32(handle)) {
                Some(resp) => headers::sorted_values(&resp.headers, &name),
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

    linker.func_wrap(
        "env",
        "xqd_resp_header_insert",
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
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => {
                    headers::insert(&mut resp.headers, name, value);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_header_append",
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
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => {
                    headers::append(&mut resp.headers, name, value);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_resp_header_remove",
        |mut caller: Caller<'_, InstanceState>, handle: u32, name_ptr: u32, name_len: u32| {
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
            match caller.data_mut().responses.get_mut(Handle::from_u32(handle)) {
                Some(resp) => match headers::remove(&mut resp.headers, &name) {
                    Ok(()) => XqdStatus::OK.code,
                    Err(()) => XqdStatus::INVALID_ARGUMENT.code,
                },
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    Ok(())
}
