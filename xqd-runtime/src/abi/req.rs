//! `xqd_req_*`: request-handle creation and field access (§4.3).

use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::abi::headers;
use crate::error::AsStatus;
use crate::handle::Handle;
use crate::http::request::RequestObj;
use crate::instance::InstanceState;
use crate::memory::GuestMemory;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap("env", "xqd_req_new", |mut caller: Caller<'_, InstanceState>, handle_out: u32| {
        let handle = caller.data_mut().requests.insert(RequestObj::new());
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
        "xqd_req_body_downstream_get",
        |mut caller: Caller<'_, InstanceState>, req_handle_out: u32, body_handle_out: u32| {
            let state = caller.data();
            let req_handle = match state.downstream_request {
                Some(h) => h,
                None => return XqdStatus::NONE.code,
            };
            let body_handle = match state.requests.get(req_handle).and_then(|r| r.body) {
                Some(h) => h,
                None => return XqdStatus::NONE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_u32(req_handle_out, req_handle.as_u32()).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(body_handle_out, body_handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_method_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, method_ptr: u32, method_len: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let method_str = match mem.read_string_lossy(method_ptr, method_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let method = match http::Method::from_bytes(method_str.as_bytes()) {
                Ok(m) => m,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    req.method = method;
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_method_get",
        |mut caller: Caller<'_, InstanceState>, handle: u32, buf_ptr: u32, maxlen: u32, nwritten_out: u32| {
            let method = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => req.method.as_str().as_bytes().to_vec(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if method.len() > maxlen as usize {
                let _ = mem.write_u32(nwritten_out, method.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            if mem.write_bytes(buf_ptr, &method).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, method.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_uri_get",
        |mut caller: Caller<'_, InstanceState>, handle: u32, buf_ptr: u32, maxlen: u32, nwritten_out: u32| {
            let uri = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => req.uri.to_string().into_bytes(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if uri.len() > maxlen as usize {
                let _ = mem.write_u32(nwritten_out, uri.len() as u32);
                return XqdStatus::BUFFER_LENGTH.code;
            }
            if mem.write_bytes(buf_ptr, &uri).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(nwritten_out, uri.len() as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_uri_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, uri_ptr: u32, uri_len: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let uri_str = match mem.read_string_lossy(uri_ptr, uri_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let uri = match uri_str.parse::<http::Uri>() {
                Ok(u) => u,
                Err(_) => return XqdStatus::HTTP_PARSE.code,
            };
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    req.uri = uri;
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_version_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, version: u32| {
            let version = match xqd_shared::HttpVersion::try_from(version) {
                Ok(v) => v,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => match req.set_version(version) {
                    Ok(()) => XqdStatus::OK.code,
                    Err(()) => XqdStatus::INVALID_ARGUMENT.code,
                },
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_version_get",
        |mut caller: Caller<'_, InstanceState>, handle: u32, version_out: u32| {
            let version = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => xqd_shared::HttpVersion::from(req.version).as_u32(),
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
        "xqd_req_framing_headers_mode_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, mode: u32| {
            let mode = match xqd_shared::FramingHeadersMode::try_from(mode) {
                Ok(m) => m,
                Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    if mode == xqd_shared::FramingHeadersMode::ManuallyFromHeaders {
                        if let Err(reason) =
                            crate::http::request::validate_manual_framing_headers(&req.headers)
                        {
                            tracing::warn!(reason, "manual framing headers invalid, falling back to automatic");
                            req.headers.remove(http::header::CONTENT_LENGTH);
                            req.headers.remove(http::header::TRANSFER_ENCODING);
                            req.framing_headers_mode = xqd_shared::FramingHeadersMode::Automatic;
                            return XqdStatus::OK.code;
                        }
                    }
                    req.framing_headers_mode = mode;
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_auto_decompress_response_set",
        |mut caller: Caller<'_, InstanceState>, handle: u32, encodings: u32| {
            const GZIP: u32 = 1 << 0;
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    req.auto_decompress_gzip = encodings & GZIP != 0;
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_cache_override_set",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         tag: u32,
         ttl: u32,
         swr: u32,
         sk_ptr: u32,
         sk_len: u32| {
            let surrogate_key = if sk_len > 0 {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                let bytes = match mem.read_bytes(sk_ptr, sk_len) {
                    Ok(b) => b,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                match http::HeaderValue::from_bytes(&bytes) {
                    Ok(v) => Some(v),
                    Err(_) => return XqdStatus::INVALID_ARGUMENT.code,
                }
            } else {
                None
            };
            let override_value = match xqd_shared::CacheOverride::from_abi(tag, ttl, swr, surrogate_key) {
                Some(v) => v,
                None => return XqdStatus::INVALID_ARGUMENT.code,
            };
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    req.cache_override = override_value;
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_close",
        |mut caller: Caller<'_, InstanceState>, handle: u32| {
            match caller.data_mut().requests.take(Handle::from_u32(handle)) {
                Some(_) => XqdStatus::OK.code,
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_cdn_loop_contains",
        move |mut caller: Caller<'_, InstanceState>,
              handle: u32,
              ident_ptr: u32,
              ident_len: u32,
              result_out: u32| {
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let identifier = match mem.read_string_lossy(ident_ptr, ident_len) {
                Ok(s) => s,
                Err(_) => return XqdStatus::ERROR.code,
            };
            let found = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => req.has_cdn_loop(&identifier),
                None => return XqdStatus::INVALID_HANDLE.code,
            };
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(result_out, found as u32) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_header_names_get",
        |mut caller: Caller<'_, InstanceState>,
         handle: u32,
         buf_ptr: u32,
         maxlen: u32,
         cursor: i64,
         ending_cursor_out: u32,
         nwritten_out: u32| {
            let names = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => headers::sorted_names(&req.headers),
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
        "xqd_req_header_value_get",
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
            let value = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => req.headers.get(&name).map(|v| v.as_bytes().to_vec()),
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
        "xqd_req_header_values_get",
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
            let values = match caller.data().requests.get(Handle::from_u32(handle)) {
                Some(req) => headers::sorted_values(&req.headers, &name),
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
        "xqd_req_header_insert",
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
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    headers::insert(&mut req.headers, name, value);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_header_append",
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
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => {
                    headers::append(&mut req.headers, name, value);
                    XqdStatus::OK.code
                }
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_header_remove",
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
            match caller.data_mut().requests.get_mut(Handle::from_u32(handle)) {
                Some(req) => match headers::remove(&mut req.headers, &name) {
                    Ok(()) => XqdStatus::OK.code,
                    Err(()) => XqdStatus::INVALID_ARGUMENT.code,
                },
                None => XqdStatus::INVALID_HANDLE.code,
            }
        },
    )?;

    Ok(())
}

/// Surfaces a [`crate::error::HandleError`] as the status the guest observes, used by every ABI
/// group once a handle lookup fails. Kept here rather than duplicated per group.
pub(crate) fn handle_error_status<E: AsStatus>(err: E) -> i32 {
    err.as_status().code
}
