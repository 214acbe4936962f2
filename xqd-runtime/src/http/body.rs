//! The `BodyHandle` domain object and the `xqd_body_*` / `xqd_trailer_*` ABI surface.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue};
use xqd_shared::BodyWriteEnd;

/// One HTTP message body, in either of the two shapes the spec's data model describes (§3
/// "BodyHandle").
///
/// *Buffered* bodies are both reader and writer over the same in-memory byte sequence; reads
/// drain from the front, writes append to the back (or front, for `BodyWriteEnd::Front`).
/// *Streaming* bodies are backed by a bounded pipe so that a subrequest's response body (or a
/// cache insert) can be forwarded to the guest without buffering the whole thing first.
pub enum BodyObj {
    Buffered(BufferedBody),
    Streaming(StreamingBody),
}

impl Default for BodyObj {
    fn default() -> Self {
        BodyObj::Buffered(BufferedBody::default())
    }
}

impl BodyObj {
    pub fn new() -> Self {
        Self::default()
    }

    /// `body_write`: append or prepend bytes. For a streaming body this only makes sense at the
    /// write (sink) end; prepending to an in-flight stream is not meaningful and is rejected.
    pub fn write(&mut self, data: &[u8], end: BodyWriteEnd) -> Result<usize, BodyError> {
        match self {
            BodyObj::Buffered(b) => {
                match end {
                    BodyWriteEnd::Back => b.buf.extend_from_slice(data),
                    BodyWriteEnd::Front => {
                        let mut new_buf = BytesMut::from(data);
                        new_buf.extend_from_slice(&b.buf);
                        b.buf = new_buf;
                    }
                }
                Ok(data.len())
            }
            BodyObj::Streaming(s) => match end {
                BodyWriteEnd::Back => {
                    s.sink.push_back(Bytes::copy_from_slice(data));
                    Ok(data.len())
                }
                BodyWriteEnd::Front => Err(BodyError::PrependNotSupportedOnStream),
            },
        }
    }

    /// `body_read`: copy up to `maxlen` bytes out, draining what was read.
    pub fn read(&mut self, maxlen: usize) -> Vec<u8> {
        match self {
            BodyObj::Buffered(b) => {
                let n = maxlen.min(b.buf.len());
                let out = b.buf.split_to(n);
                out.to_vec()
            }
            BodyObj::Streaming(s) => {
                let mut out = Vec::with_capacity(maxlen);
                while out.len() < maxlen {
                    let Some(front) = s.sink.front_mut() else {
                        break;
                    };
                    let need = maxlen - out.len();
                    if front.len() <= need {
                        out.extend_from_slice(front);
                        s.sink.pop_front();
                    } else {
                        out.extend_from_slice(&front[..need]);
                        front.advance(need);
                    }
                }
                out
            }
        }
    }

    /// `body_append`: splice `source` onto the end of `self`, draining `source` entirely. The
    /// destination's unread remainder becomes `remainder + source`.
    pub fn append(&mut self, source: BodyObj) -> Result<(), BodyError> {
        let source_bytes = match source {
            BodyObj::Buffered(b) => b.buf.to_vec(),
            BodyObj::Streaming(mut s) => {
                let mut all = Vec::new();
                while let Some(chunk) = s.sink.pop_front() {
                    all.extend_from_slice(&chunk);
                }
                all
            }
        };
        match self {
            BodyObj::Buffered(b) => {
                b.buf.extend_from_slice(&source_bytes);
                Ok(())
            }
            BodyObj::Streaming(s) => {
                s.sink.push_back(Bytes::from(source_bytes));
                Ok(())
            }
        }
    }

    /// `body_known_length`: `Some(n)` for a buffered body (its remaining unread length), `None`
    /// ("unknown", `XqdErrNone`) for a streaming body, per §4.4.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            BodyObj::Buffered(b) => Some(b.buf.len() as u64),
            BodyObj::Streaming(_) => None,
        }
    }

    /// `trailer_append`.
    pub fn trailers_mut(&mut self) -> &mut HeaderMap {
        match self {
            BodyObj::Buffered(b) => &mut b.trailers,
            BodyObj::Streaming(s) => &mut s.trailers,
        }
    }

    pub fn trailers(&self) -> &HeaderMap {
        match self {
            BodyObj::Buffered(b) => &b.trailers,
            BodyObj::Streaming(s) => &s.trailers,
        }
    }

    /// Close the sink end. For a streaming body this marks end-of-stream; readers drain
    /// whatever is already queued and then see EOF (§9 open question, decided: "return what is
    /// available, then EOF").
    pub fn close(&mut self) {
        if let BodyObj::Streaming(s) = self {
            s.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            BodyObj::Buffered(_) => true,
            BodyObj::Streaming(s) => s.closed && s.sink.is_empty(),
        }
    }
}

#[derive(Default)]
pub struct BufferedBody {
    buf: BytesMut,
    trailers: HeaderMap,
}

impl BufferedBody {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            buf: BytesMut::from(&data.into()[..]),
            trailers: HeaderMap::new(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// A bounded single-producer/single-consumer pipe, per the design notes' "Streaming bodies"
/// section. Modeled here as a plain `VecDeque<Bytes>` rather than an actual channel: the
/// producer and consumer are always driven from the same single-threaded guest call sequence
/// (write then later read), so no cross-task synchronization is needed — the bound is enforced
/// at the call site (the ABI layer refuses additional writes past a configured backlog) rather
/// than inside this type.
#[derive(Default)]
pub struct StreamingBody {
    sink: VecDeque<Bytes>,
    trailers: HeaderMap,
    closed: bool,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum BodyError {
    #[error("cannot prepend to a streaming body")]
    PrependNotSupportedOnStream,
}

pub fn append_trailer(trailers: &mut HeaderMap, name: http::HeaderName, value: HeaderValue) {
    trailers.append(name, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_body_read_write_round_trip() {
        let mut body = BodyObj::new();
        body.write(b"hello ", BodyWriteEnd::Back).unwrap();
        body.write(b"world", BodyWriteEnd::Back).unwrap();
        assert_eq!(body.read(1024), b"hello world");
    }

    #[test]
    fn prepend_puts_bytes_before_remainder() {
        let mut body = BodyObj::new();
        body.write(b"world", BodyWriteEnd::Back).unwrap();
        body.write(b"hello ", BodyWriteEnd::Front).unwrap();
        assert_eq!(body.read(1024), b"hello world");
    }

    #[test]
    fn append_splices_source_onto_destination() {
        let mut a = BodyObj::new();
        a.write(b"original\n", BodyWriteEnd::Back).unwrap();
        let mut b = BodyObj::new();
        b.write(b"appended", BodyWriteEnd::Back).unwrap();
        a.append(b).unwrap();
        assert_eq!(a.read(1024), b"original\nappended");
    }

    #[test]
    fn known_length_none_for_streaming() {
        let body = BodyObj::Streaming(StreamingBody::default());
        assert_eq!(body.known_length(), None);
    }

    #[test]
    fn known_length_some_for_buffered() {
        let mut body = BodyObj::new();
        body.write(b"abc", BodyWriteEnd::Back).unwrap();
        assert_eq!(body.known_length(), Some(3));
    }

    #[test]
    fn streaming_read_drains_then_eofs_after_close() {
        let mut body = BodyObj::Streaming(StreamingBody::default());
        body.write(b"partial", BodyWriteEnd::Back).unwrap();
        body.close();
        assert_eq!(body.read(1024), b"partial");
        assert_eq!(body.read(1024), b"");
        assert!(body.is_closed());
    }
}
