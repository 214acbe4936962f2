//! Shared header/trailer manipulation helpers for `abi::req`, `abi::resp`, and `abi::body`'s
//! `xqd_trailer_*` functions (§4.3, §4.4, §4.5). Pure data operations over an `http::HeaderMap`;
//! callers own the guest-memory plumbing and the cursor wire format via [`crate::multivalue`].

use http::{HeaderMap, HeaderName, HeaderValue};
use xqd_shared::XqdStatus;

use crate::memory::GuestMemory;
use crate::multivalue;

/// Maximum header name length per §4.3; exceeding it is `XqdErrInvalidArgument`.
const MAX_HEADER_NAME_BYTES: usize = 65535;

/// Distinct header names present in `headers`, sorted and deduplicated, encoded as raw bytes
/// (no trailing terminator — that's added by the multi-value cursor step).
pub fn sorted_names(headers: &HeaderMap) -> Vec<Vec<u8>> {
    let mut names: Vec<Vec<u8>> = headers
        .keys()
        .map(|name| name.as_str().as_bytes().to_vec())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// All values for `name`, sorted, encoded as raw bytes. Empty if the name is absent.
pub fn sorted_values(headers: &HeaderMap, name: &HeaderName) -> Vec<Vec<u8>> {
    let mut values: Vec<Vec<u8>> = headers
        .get_all(name)
        .iter()
        .map(|v| v.as_bytes().to_vec())
        .collect();
    values.sort();
    values
}

/// Parse a guest-supplied header name, enforcing the §4.3 length cap and HTTP token rules.
pub fn parse_name(bytes: &[u8]) -> Result<HeaderName, XqdStatus> {
    if bytes.is_empty() || bytes.len() > MAX_HEADER_NAME_BYTES {
        return Err(XqdStatus::INVALID_ARGUMENT);
    }
    HeaderName::from_bytes(bytes).map_err(|_| XqdStatus::INVALID_ARGUMENT)
}

pub fn parse_value(bytes: &[u8]) -> Result<HeaderValue, XqdStatus> {
    HeaderValue::from_bytes(bytes).map_err(|_| XqdStatus::INVALID_ARGUMENT)
}

/// `header_insert`: replace every existing value for `name` with the single given `value`.
pub fn insert(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    headers.insert(name, value);
}

/// `header_append` / `trailer_append`: add `value` alongside any existing values for `name`.
pub fn append(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    headers.append(name, value);
}

/// `header_remove`: `Err(())` if the name was absent, matching §4.3's
/// "fails `XqdErrInvalidArgument` if absent".
pub fn remove(headers: &mut HeaderMap, name: &HeaderName) -> Result<(), ()> {
    if headers.remove(name).is_some() {
        Ok(())
    } else {
        Err(())
    }
}

/// Drive one step of the §4.5 multi-value cursor protocol against an already-sorted value list,
/// writing the result (or the `BUFFER_LENGTH`/terminal cases) into guest memory.
pub fn write_multivalue_step<T>(
    mem: &mut GuestMemory<'_, '_, T>,
    values: &[Vec<u8>],
    cursor: i64,
    buf_ptr: u32,
    maxlen: u32,
    nwritten_out: u32,
    ending_cursor_out: u32,
) -> i32 {
    match multivalue::step(values, cursor, maxlen as usize, 0) {
        Ok(None) => {
            if mem.write_u32(nwritten_out, 0).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_i64(ending_cursor_out, -1).is_err() {
                return XqdStatus::ERROR.code;
            }
            XqdStatus::OK.code
        }
        Ok(Some(step)) => {
            if mem.write_bytes(buf_ptr, &step.bytes).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_u32(nwritten_out, step.bytes.len() as u32).is_err() {
                return XqdStatus::ERROR.code;
            }
            if mem.write_i64(ending_cursor_out, step.ending_cursor).is_err() {
                return XqdStatus::ERROR.code;
            }
            XqdStatus::OK.code
        }
        Err(status) => status.code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_names_dedups_and_sorts() {
        let mut headers = HeaderMap::new();
        headers.append("zeta", HeaderValue::from_static("1"));
        headers.append("alpha", HeaderValue::from_static("2"));
        headers.append("alpha", HeaderValue::from_static("3"));
        assert_eq!(sorted_names(&headers), vec![b"alpha".to_vec(), b"zeta".to_vec()]);
    }

    #[test]
    fn sorted_values_collects_all_for_name() {
        let mut headers = HeaderMap::new();
        headers.append("x", HeaderValue::from_static("b"));
        headers.append("x", HeaderValue::from_static("a"));
        let name = HeaderName::from_static("x");
        assert_eq!(sorted_values(&headers, &name), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn parse_name_rejects_oversized() {
        let oversized = vec![b'a'; MAX_HEADER_NAME_BYTES + 1];
        assert!(parse_name(&oversized).is_err());
    }

    #[test]
    fn remove_reports_absent_name() {
        let mut headers = HeaderMap::new();
        let name = HeaderName::from_static("x");
        assert!(remove(&mut headers, &name).is_err());
        headers.insert(name.clone(), HeaderValue::from_static("1"));
        assert!(remove(&mut headers, &name).is_ok());
    }
}
