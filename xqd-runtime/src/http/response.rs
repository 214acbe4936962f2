//! The `ResponseHandle` domain object and the `xqd_resp_*` ABI surface.

use std::net::SocketAddr;

use http::{HeaderMap, StatusCode, Version};
use xqd_shared::{FramingHeadersMode, HttpKeepaliveMode};

use crate::handle::Handle;
use crate::http::body::BodyObj;

/// In-memory representation of a guest-visible HTTP response, the counterpart of
/// [`RequestObj`][crate::http::request::RequestObj].
#[derive(Debug, Clone)]
pub struct ResponseObj {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Handle<BodyObj>>,
    pub version: Version,
    pub framing_headers_mode: FramingHeadersMode,
    pub keepalive_mode: HttpKeepaliveMode,
    pub close: bool,
    /// Origin IP:port for upstream (subrequest) responses; `None` for the downstream response
    /// the guest constructs itself.
    pub remote_addr: Option<SocketAddr>,
}

impl Default for ResponseObj {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            version: Version::HTTP_11,
            framing_headers_mode: FramingHeadersMode::Automatic,
            keepalive_mode: HttpKeepaliveMode::Automatic,
            close: false,
            remote_addr: None,
        }
    }
}

impl ResponseObj {
    pub fn new() -> Self {
        Self::default()
    }

    /// `xqd_resp_status_set`: valid range is `100..=999`; anything else leaves the handle
    /// unchanged and the caller reports `InvalidArgument` (§8 round-trip law).
    pub fn set_status(&mut self, code: u16) -> Result<(), ()> {
        if (100..=999).contains(&code) {
            self.status = StatusCode::from_u16(code).map_err(|_| ())?;
            Ok(())
        } else {
            Err(())
        }
    }

    pub fn no_content(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Builds the literal 500 diagnostic response produced on a guest trap (§6, §7): the body
/// carries a fixed prefix plus the trap's display string, and when the trap was caused by
/// epoch-deadline interruption (i.e. cancellation), that string contains the literal substring
/// `wasm trap: interrupt`.
pub fn trap_response(trap_display: &str) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("guest execution failed: {trap_display}"),
    )
}

/// The literal 508 loop-detection response (§4.12, §6).
pub fn loop_detected_response() -> StatusCode {
    StatusCode::LOOP_DETECTED
}

/// The literal 502 response for an unrecognized backend name (§4.6, §7).
pub fn unknown_backend_response(name: &str) -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, format!("unknown backend {name:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_status_accepts_boundary_values() {
        let mut resp = ResponseObj::new();
        assert!(resp.set_status(100).is_ok());
        assert_eq!(resp.status.as_u16(), 100);
        assert!(resp.set_status(999).is_ok());
    }

    #[test]
    fn set_status_rejects_out_of_range() {
        let mut resp = ResponseObj::new();
        let before = resp.status;
        assert!(resp.set_status(99).is_err());
        assert_eq!(resp.status, before);
        assert!(resp.set_status(1000).is_err());
        assert_eq!(resp.status, before);
    }

    #[test]
    fn trap_response_contains_interrupt_literal_on_cancellation() {
        let (status, body) = trap_response("wasm trap: interrupt");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("wasm trap: interrupt"));
    }
}
