//! The `RequestHandle` domain object and the `xqd_req_*` ABI surface.

use http::{HeaderMap, Method, Uri, Version};
use xqd_shared::{CacheOverride, FramingHeadersMode};

use crate::handle::Handle;
use crate::http::body::BodyObj;

pub mod pending;

/// In-memory representation of a guest-visible HTTP request.
///
/// Mirrors the fields the teacher's guest-side `RequestHandle` manipulates through hostcalls
/// (`fastly/src/http/request/handle.rs`): method, URL, headers, an optional body, the declared
/// HTTP version, framing-headers mode, auto-decompression bitmask, cache override, and the
/// backend selected for sending. On the host side these are simply struct fields instead of
/// hostcall targets.
#[derive(Debug, Clone)]
pub struct RequestObj {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Handle<BodyObj>>,
    pub version: Version,
    pub framing_headers_mode: FramingHeadersMode,
    pub auto_decompress_gzip: bool,
    pub cache_override: CacheOverride,
    pub backend: Option<String>,
}

impl Default for RequestObj {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            body: None,
            version: Version::HTTP_11,
            framing_headers_mode: FramingHeadersMode::Automatic,
            auto_decompress_gzip: false,
            cache_override: CacheOverride::None,
            backend: None,
        }
    }
}

impl RequestObj {
    pub fn new() -> Self {
        Self::default()
    }

    /// `xqd_req_version_set`: only HTTP/0.9, 1.0, and 1.1 may be set explicitly by the guest;
    /// HTTP/2 and HTTP/3 are negotiated by the host's connection layer and rejected here with
    /// `InvalidArgument`.
    pub fn set_version(&mut self, version: xqd_shared::HttpVersion) -> Result<(), ()> {
        use xqd_shared::HttpVersion as V;
        match version {
            V::Http09 | V::Http10 | V::Http11 => {
                self.version = version.into();
                Ok(())
            }
            V::H2 | V::H3 => Err(()),
        }
    }

    /// `xqd_req_cdn_loop_contains`-style loop detection (§4.12): true if any `cdn-loop` header
    /// value contains `identifier` (case-sensitive substring match, matching the reference
    /// behavior of comparing literal host identifiers).
    pub fn has_cdn_loop(&self, identifier: &str) -> bool {
        self.headers
            .get_all("cdn-loop")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(identifier))
    }
}

/// Validates a guest-supplied manual framing-headers header set, per §4.7.
///
/// Returns `Ok(())` if the headers are a valid manual framing (exactly one well-formed
/// `Content-Length`, xor exactly one `chunked` `Transfer-Encoding`), or `Err(reason)` describing
/// why the set doesn't qualify, in which case the caller downgrades to automatic mode and
/// strips both framing headers.
pub fn validate_manual_framing_headers(headers: &HeaderMap) -> Result<(), &'static str> {
    let content_lengths: Vec<_> = headers.get_all(http::header::CONTENT_LENGTH).iter().collect();
    let transfer_encodings: Vec<_> = headers
        .get_all(http::header::TRANSFER_ENCODING)
        .iter()
        .collect();

    match (content_lengths.len(), transfer_encodings.len()) {
        (1, 0) => {
            let value = content_lengths[0].to_str().map_err(|_| "non-ASCII content-length")?;
            if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                Ok(())
            } else {
                Err("malformed content-length")
            }
        }
        (0, 1) => {
            let value = transfer_encodings[0]
                .to_str()
                .map_err(|_| "non-ASCII transfer-encoding")?;
            if value.eq_ignore_ascii_case("chunked") {
                Ok(())
            } else {
                Err("unsupported transfer-encoding")
            }
        }
        (0, 0) => Err("no framing headers present"),
        _ => Err("conflicting or duplicate framing headers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn cdn_loop_detection_matches_substring() {
        let mut req = RequestObj::new();
        req.headers
            .insert("cdn-loop", HeaderValue::from_static("other-host, my-host"));
        assert!(req.has_cdn_loop("my-host"));
        assert!(!req.has_cdn_loop("unrelated-host"));
    }

    #[test]
    fn manual_framing_accepts_valid_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(validate_manual_framing_headers(&headers).is_ok());
    }

    #[test]
    fn manual_framing_rejects_malformed_content_length() {
        for bad in ["abc", "123 ", "-123", ""] {
            let mut headers = HeaderMap::new();
            if let Ok(v) = HeaderValue::from_str(bad) {
                headers.insert(http::header::CONTENT_LENGTH, v);
            }
            assert!(validate_manual_framing_headers(&headers).is_err());
        }
    }

    #[test]
    fn manual_framing_accepts_chunked_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::TRANSFER_ENCODING,
            HeaderValue::from_static("CHUNKED"),
        );
        assert!(validate_manual_framing_headers(&headers).is_ok());
    }

    #[test]
    fn manual_framing_rejects_gzip_transfer_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::TRANSFER_ENCODING,
            HeaderValue::from_static("gzip"),
        );
        assert!(validate_manual_framing_headers(&headers).is_err());
    }

    #[test]
    fn manual_framing_rejects_both_headers_present() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("1"));
        headers.insert(
            http::header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        assert!(validate_manual_framing_headers(&headers).is_err());
    }
}
