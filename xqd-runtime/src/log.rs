//! The guest-facing `xqd_log_*` ABI surface (§4.11): named log endpoints the guest writes
//! lines to. Distinct from host-operator observability (§4.14/§4.15, `tracing`), which this
//! module never touches.
//!
//! Grounded on the teacher's `log.rs` `Endpoint`/`LogError` shape, inverted from a guest-side
//! hostcall wrapper (`abi::fastly_log::write`) into the host-side sink those hostcalls wrote
//! through.

use std::io::Write;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("endpoint not found, or is reserved")]
    InvalidEndpoint,
    #[error("malformed endpoint name")]
    MalformedEndpointName,
}

const RESERVED_NAMES: [&str; 3] = ["stdout", "stderr", "stdin"];

/// One named sink a guest can open and write lines to. Writes are serialized behind a mutex
/// since a single instance's guest calls are sequential but the sink itself may be shared
/// (e.g. a test harness collecting output from concurrent requests).
pub struct LogEndpointObj {
    name: String,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl LogEndpointObj {
    pub fn new(name: impl Into<String>, sink: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            sink: Mutex::new(sink),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `log_write`: escapes embedded newlines as the literal two-character sequence `\n` and
    /// appends exactly one trailing newline, prefixed with `"name: "`.
    pub fn write_line(&self, message: &str) -> std::io::Result<()> {
        let escaped = message.replace('\n', "\\n");
        let mut sink = self.sink.lock().unwrap();
        writeln!(sink, "{}: {}", self.name, escaped)
    }
}

/// Validates a guest-supplied endpoint name per §4.11: non-empty, and not one of the three
/// reserved stdio names (unlike the ABI this runtime replaces, there is no dynamic creation —
/// an unregistered name simply fails to resolve).
pub fn validate_endpoint_name(name: &str) -> Result<(), LogError> {
    if name.is_empty() {
        return Err(LogError::MalformedEndpointName);
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(LogError::InvalidEndpoint);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_rejected() {
        assert!(validate_endpoint_name("stdout").is_err());
        assert!(validate_endpoint_name("stderr").is_err());
        assert!(validate_endpoint_name("app").is_ok());
    }

    #[test]
    fn write_line_escapes_newlines_and_prefixes_name() {
        use std::sync::Arc;

        #[derive(Clone)]
        struct SharedBuf(Arc<Mutex<Vec<u8>>>);
        impl Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let shared = Arc::new(Mutex::new(Vec::new()));
        let endpoint = LogEndpointObj::new("app", Box::new(SharedBuf(shared.clone())));
        endpoint.write_line("hello\nworld").unwrap();
        let written = String::from_utf8(shared.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "app: hello\\nworld\n");
    }
}
