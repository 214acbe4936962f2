//! The cursor-based multi-value enumeration protocol shared by header names, header values,
//! and trailers.
//!
//! Guest calls pass a cursor (`0` to start); each call writes one null-terminated value into
//! guest memory and reports either the next cursor or `-1` for "no more." This is the host-side
//! counterpart of the teacher's `MultiValueHostcall<F>` iterator (which drives the same
//! protocol from the guest, repeatedly invoking a hostcall closure and growing its buffer on
//! `BUFLEN`). Here the host already holds the full, sorted list of values in memory, so there
//! is no retry loop: a single comparison against `maxlen` decides the outcome.

use xqd_shared::XqdStatus;

/// The result of serving one step of the multi-value cursor protocol.
pub struct MultiValueStep {
    /// Bytes to write at the guest's destination address, including the trailing terminator.
    pub bytes: Vec<u8>,
    /// The value for `ending_cursor_out`: `-1` if this was the last value, else `cursor + 1`.
    pub ending_cursor: i64,
}

/// Serve one step of the cursor protocol against a sorted list of already-encoded values.
///
/// `cursor` is the 0-based index into `values` of the next value to emit. `maxlen` is the
/// guest-supplied destination buffer size. Returns `Ok(None)` when the cursor is at or past the
/// end (`nwritten_out = 0`, `ending_cursor_out = -1`, status `OK`), `Ok(Some(step))` when a
/// value is emitted, or `Err(XqdStatus::BUFFER_LENGTH)` (without advancing the cursor) if the
/// value plus its terminator would not fit in `maxlen`.
pub fn step(
    values: &[Vec<u8>],
    cursor: i64,
    maxlen: usize,
    term: u8,
) -> Result<Option<MultiValueStep>, XqdStatus> {
    if cursor < 0 || cursor as usize >= values.len() {
        return Ok(None);
    }
    let idx = cursor as usize;
    let mut bytes = values[idx].clone();
    bytes.push(term);
    if bytes.len() > maxlen {
        return Err(XqdStatus::BUFFER_LENGTH);
    }
    let ending_cursor = if idx + 1 >= values.len() {
        -1
    } else {
        (idx + 1) as i64
    };
    Ok(Some(MultiValueStep {
        bytes,
        ending_cursor,
    }))
}

/// Split a `values_set`-style payload (a sequence of values each terminated by `term`, minus
/// the final terminator per the wire format) into individual value byte strings.
pub fn split_terminated(payload: &[u8], term: u8) -> Vec<Vec<u8>> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload
        .split(|&b| b == term)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_reports_done_immediately() {
        let values: Vec<Vec<u8>> = Vec::new();
        assert!(step(&values, 0, 1024, 0).unwrap().is_none());
    }

    #[test]
    fn steps_through_values_and_terminates() {
        let values = vec![b"a".to_vec(), b"bb".to_vec()];
        let first = step(&values, 0, 1024, 0).unwrap().unwrap();
        assert_eq!(first.bytes, b"a\0");
        assert_eq!(first.ending_cursor, 1);

        let second = step(&values, 1, 1024, 0).unwrap().unwrap();
        assert_eq!(second.bytes, b"bb\0");
        assert_eq!(second.ending_cursor, -1);

        assert!(step(&values, 2, 1024, 0).unwrap().is_none());
    }

    #[test]
    fn buffer_too_small_does_not_advance_cursor() {
        let values = vec![b"hello".to_vec()];
        let err = step(&values, 0, 2, 0).unwrap_err();
        assert_eq!(err, XqdStatus::BUFFER_LENGTH);
    }

    #[test]
    fn split_terminated_round_trips() {
        let payload = b"v1\0v2\0v3".to_vec();
        let values = split_terminated(&payload, 0);
        assert_eq!(values, vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]);
    }
}
