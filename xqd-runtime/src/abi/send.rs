//! `xqd_req_send` / `xqd_req_send_async` / `xqd_pending_req_wait` / `xqd_pending_req_poll`:
//! subrequest dispatch through a registered backend (§4.6).
//!
//! Registered with `func_wrap`, never `func_wrap_async` (see `abi::async_io`'s module comment
//! for why). The blocking variant bridges into the async [`crate::backend::BackendHandler`] via
//! `Handle::current().block_on`, which is sound here because every ABI function runs on the
//! `spawn_blocking` thread `Instance::call_entry_point` is invoked from (§4.12), never on a task
//! being polled as part of the tokio reactor itself.

use std::io::Read;

use flate2::read::GzDecoder;
use tokio::runtime::Handle as TokioHandle;
use wasmtime::{Caller, Linker};
use xqd_shared::XqdStatus;

use crate::handle::Handle;
use crate::http::body::{BodyObj, BufferedBody};
use crate::http::request::pending::{PendingRequestObj, SubrequestResult};
use crate::http::request::RequestObj;
use crate::http::response::{unknown_backend_response, ResponseObj};
use crate::instance::InstanceState;
use crate::memory::GuestMemory;
use crate::registry::Registry;

pub fn link(linker: &mut Linker<InstanceState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "xqd_req_send",
        |mut caller: Caller<'_, InstanceState>,
         req_handle: u32,
         body_handle: u32,
         backend_ptr: u32,
         backend_len: u32,
         resp_handle_out: u32,
         resp_body_handle_out: u32| {
            let backend_name = {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                match mem.read_string_lossy(backend_ptr, backend_len) {
                    Ok(s) => s,
                    Err(_) => return XqdStatus::ERROR.code,
                }
            };

            let (req, body, registry) = {
                let state = caller.data_mut();
                let req = match state.requests.get(Handle::from_u32(req_handle)) {
                    Some(r) => r.clone(),
                    None => return XqdStatus::INVALID_HANDLE.code,
                };
                let body = match state.bodies.take(Handle::from_u32(body_handle)) {
                    Some(b) => b,
                    None => return XqdStatus::INVALID_HANDLE.code,
                };
                (req, body, state.registry.clone())
            };

            caller.data_mut().pause_cpu_timer();
            let result = TokioHandle::current().block_on(dispatch(&registry, &req, body, &backend_name));
            caller.data_mut().resume_cpu_timer();

            write_result(&mut caller, result, resp_handle_out, resp_body_handle_out)
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_req_send_async",
        |mut caller: Caller<'_, InstanceState>,
         req_handle: u32,
         body_handle: u32,
         backend_ptr: u32,
         backend_len: u32,
         pending_handle_out: u32| {
            let backend_name = {
                let mut mem = match GuestMemory::new(&mut caller) {
                    Ok(m) => m,
                    Err(_) => return XqdStatus::ERROR.code,
                };
                match mem.read_string_lossy(backend_ptr, backend_len) {
                    Ok(s) => s,
                    Err(_) => return XqdStatus::ERROR.code,
                }
            };

            let (req, body, registry) = {
                let state = caller.data_mut();
                let req = match state.requests.get(Handle::from_u32(req_handle)) {
                    Some(r) => r.clone(),
                    None => return XqdStatus::INVALID_HANDLE.code,
                };
                let body = match state.bodies.take(Handle::from_u32(body_handle)) {
                    Some(b) => b,
                    None => return XqdStatus::INVALID_HANDLE.code,
                };
                (req, body, state.registry.clone())
            };

            let (sender, pending) = PendingRequestObj::channel();
            TokioHandle::current().spawn(async move {
                let result = dispatch(&registry, &req, body, &backend_name).await;
                let _ = sender.send(result);
            });

            let pending_handle = caller.data_mut().pending_requests.insert(pending);
            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            match mem.write_u32(pending_handle_out, pending_handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_pending_req_wait",
        |mut caller: Caller<'_, InstanceState>,
         pending_handle: u32,
         resp_handle_out: u32,
         resp_body_handle_out: u32| {
            let pending = match caller.data_mut().pending_requests.take(Handle::from_u32(pending_handle)) {
                Some(p) => p,
                None => return XqdStatus::INVALID_HANDLE.code,
            };

            caller.data_mut().pause_cpu_timer();
            let result = TokioHandle::current().block_on(pending.wait());
            caller.data_mut().resume_cpu_timer();

            write_result(&mut caller, result, resp_handle_out, resp_body_handle_out)
        },
    )?;

    linker.func_wrap(
        "env",
        "xqd_pending_req_poll",
        |mut caller: Caller<'_, InstanceState>,
         pending_handle: u32,
         is_done_out: u32,
         resp_handle_out: u32,
         resp_body_handle_out: u32| {
            let result = match caller.data_mut().pending_requests.get_mut(Handle::from_u32(pending_handle)) {
                Some(pending) => pending.poll(),
                None => return XqdStatus::INVALID_HANDLE.code,
            };

            let result = match result {
                Some(r) => r,
                None => {
                    let mut mem = match GuestMemory::new(&mut caller) {
                        Ok(m) => m,
                        Err(_) => return XqdStatus::ERROR.code,
                    };
                    return match mem.write_u32(is_done_out, 0) {
                        Ok(()) => XqdStatus::OK.code,
                        Err(_) => XqdStatus::ERROR.code,
                    };
                }
            };
            caller.data_mut().pending_requests.take(Handle::from_u32(pending_handle));

            let mut mem = match GuestMemory::new(&mut caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_u32(is_done_out, 1).is_err() {
                return XqdStatus::ERROR.code;
            }
            drop(mem);

            write_result(&mut caller, result, resp_handle_out, resp_body_handle_out)
        },
    )?;

    Ok(())
}

/// Inserts the dispatch outcome's response/body into the instance's handle tables and writes
/// both out-params, or surfaces a host error. Shared by the blocking, wait, and poll paths.
fn write_result<'a>(
    caller: &'a mut Caller<'a, InstanceState>,
    result: SubrequestResult,
    resp_handle_out: u32,
    resp_body_handle_out: u32,
) -> i32 {
    match result {
        Ok((resp, body)) => {
            let state = caller.data_mut();
            let body_handle = state.bodies.insert(body);
            let resp_handle = state.responses.insert(resp);
            let mut mem = match GuestMemory::new(caller) {
                Ok(m) => m,
                Err(_) => return XqdStatus::ERROR.code,
            };
            if mem.write_u32(resp_handle_out, resp_handle.as_u32()).is_err() {
                return XqdStatus::ERROR.code;
            }
            match mem.write_u32(resp_body_handle_out, body_handle.as_u32()) {
                Ok(()) => XqdStatus::OK.code,
                Err(_) => XqdStatus::ERROR.code,
            }
        }
        Err(_) => XqdStatus::ERROR.code,
    }
}

/// Dispatches one subrequest: resolves the backend (or synthesizes the 502 diagnostic response
/// for an unknown one), calls the registry's `BackendHandler`, and applies gzip
/// auto-decompression per the request's `auto_decompress_gzip` flag.
async fn dispatch(
    registry: &Registry,
    req: &RequestObj,
    body: BodyObj,
    backend_name: &str,
) -> SubrequestResult {
    let backend = match registry.backend(backend_name) {
        Some(b) => b.clone(),
        None => {
            let (status, message) = unknown_backend_response(backend_name);
            let mut resp = ResponseObj::new();
            resp.status = status;
            return Ok((resp, BodyObj::Buffered(BufferedBody::from_bytes(message))));
        }
    };

    let parts = build_request_parts(req);
    let (resp_parts, resp_body) = registry.backend_handler.send(&backend, parts, body).await?;

    let mut resp = ResponseObj::new();
    resp.status = resp_parts.status;
    resp.version = resp_parts.version;
    resp.headers = resp_parts.headers;

    let resp_body = maybe_decompress_gzip(req.auto_decompress_gzip, &mut resp.headers, resp_body);

    Ok((resp, resp_body))
}

fn build_request_parts(req: &RequestObj) -> http::request::Parts {
    let mut parts = http::Request::new(()).into_parts().0;
    parts.method = req.method.clone();
    parts.uri = req.uri.clone();
    parts.version = req.version;
    parts.headers = req.headers.clone();
    parts
}

/// Decodes a gzip response body and strips `Content-Encoding`/`Content-Length` when the guest
/// asked for auto-decompression and the backend actually sent gzip. On malformed gzip bytes the
/// headers are still stripped (the guest asked not to see a compressed body) but the original
/// bytes are returned unchanged, since `BodyObj` has no error-carrying variant to report the
/// decode failure through.
fn maybe_decompress_gzip(auto_decompress: bool, headers: &mut http::HeaderMap, body: BodyObj) -> BodyObj {
    if !auto_decompress {
        return body;
    }
    let is_gzip = headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !is_gzip {
        return body;
    }
    headers.remove(http::header::CONTENT_ENCODING);
    headers.remove(http::header::CONTENT_LENGTH);

    let raw = match &body {
        BodyObj::Buffered(b) => b.as_slice().to_vec(),
        BodyObj::Streaming(_) => return body,
    };
    let mut decoder = GzDecoder::new(&raw[..]);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => BodyObj::Buffered(BufferedBody::from_bytes(out)),
        Err(_) => BodyObj::Buffered(BufferedBody::from_bytes(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, StatusCode};

    #[test]
    fn unknown_backend_yields_bad_gateway_diagnostic_body() {
        let registry = crate::registry::RegistryBuilder::new(Default::default()).build();
        let req = RequestObj::new();
        let body = BodyObj::new();
        let result = tokio_test_block_on(dispatch(&registry, &req, body, "ghost"));
        let (resp, mut body) = result.expect("synthetic response is always Ok");
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
        let bytes = body.read(1024);
        assert!(String::from_utf8_lossy(&bytes).contains("ghost"));
    }

    #[test]
    fn gzip_decompression_strips_headers_and_inflates_body() {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"hello").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("5"));

        let mut body = maybe_decompress_gzip(
            true,
            &mut headers,
            BodyObj::Buffered(BufferedBody::from_bytes(compressed)),
        );
        assert!(headers.get(http::header::CONTENT_ENCODING).is_none());
        assert!(headers.get(http::header::CONTENT_LENGTH).is_none());
        assert_eq!(body.read(1024), b"hello");
    }

    #[test]
    fn decompression_is_noop_when_not_requested() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = maybe_decompress_gzip(
            false,
            &mut headers,
            BodyObj::Buffered(BufferedBody::from_bytes(&b"raw"[..])),
        );
        assert!(headers.get(http::header::CONTENT_ENCODING).is_some());
        match body {
            BodyObj::Buffered(b) => assert_eq!(b.as_slice(), b"raw"),
            BodyObj::Streaming(_) => panic!("expected buffered body"),
        }
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("building a current-thread runtime for a unit test")
            .block_on(f)
    }
}
