//! Error taxonomy for the host runtime.
//!
//! `XqdStatus` (from `xqd-shared`) is the wire-level error type that crosses the ABI boundary.
//! Everything in this module lives on the host side of that boundary: it is how internal
//! fallible operations are represented in Rust before they get turned into a status code, a
//! trap, or a fatal startup error.

pub use anyhow::{anyhow, bail, ensure, Context, Error};
use std::fmt;

use xqd_shared::XqdStatus;

/// Top-level error type for operations that are not themselves ABI calls: registry
/// construction, instance instantiation, and anything the example binary or tests report
/// through `anyhow`.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    /// The guest trapped, whether from an unhandled exception or an epoch-deadline
    /// interruption.
    #[error("guest trapped: {0}")]
    Trap(#[from] wasmtime::Trap),

    /// Module instantiation failed: missing memory export, missing entry point, or a linker
    /// mismatch. Fatal at instance construction time.
    #[error("failed to instantiate guest module: {0}")]
    Instantiation(#[source] anyhow::Error),

    /// The registry was asked to resolve a name (backend, dictionary, store) it does not
    /// know about.
    #[error("unknown {kind} {name:?}")]
    UnknownCapability {
        /// The kind of capability that was missing, e.g. `"backend"`.
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// The instance pool could not be constructed (e.g. warmup failed for every slot). This
    /// is never returned at request-serving time: `Pool::instantiate` always produces an
    /// instance, falling back to building one fresh.
    #[error("instance pool exhausted during warmup")]
    PoolExhausted,
}

impl RuntimeError {
    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownCapability {
            kind,
            name: name.into(),
        }
    }
}

/// Enum describing what kind of buffer had insufficient size, in a [`BufferSizeError`].
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// The too-small buffer is for holding a header name.
    HeaderName,
    /// The too-small buffer is for holding a header value.
    HeaderValue,
    /// The too-small buffer is for holding an HTTP method.
    HttpMethod,
    /// The too-small buffer is for holding a URL.
    Url,
    /// The too-small buffer is for holding a suggested cache key.
    CacheKey,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BufferKind::HttpMethod => write!(f, "HTTP method"),
            BufferKind::HeaderName => write!(f, "header name"),
            BufferKind::HeaderValue => write!(f, "header value"),
            BufferKind::Url => write!(f, "URL"),
            BufferKind::CacheKey => write!(f, "cache key"),
        }
    }
}

/// Insufficient buffer size error.
///
/// Carries enough information for an ABI function implementation to write `needed_buf_size`
/// into the guest's `nwritten_out` slot and return `XqdStatus::BUFFER_LENGTH`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("insufficient buffer size {buf_size} for buffer '{buffer_kind}'; value requires {needed_buf_size} bytes")]
pub struct BufferSizeError {
    pub buf_size: usize,
    pub needed_buf_size: usize,
    pub buffer_kind: BufferKind,
}

impl BufferSizeError {
    pub fn new(buf_size: usize, needed_buf_size: usize, buffer_kind: BufferKind) -> Self {
        Self {
            buf_size,
            needed_buf_size,
            buffer_kind,
        }
    }
}

#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
/// Errors arising from the handle-table subsystem: looking up a handle of the wrong kind, or
/// one that was already closed/reset.
pub enum HandleError {
    #[error("handle for {0} was already closed")]
    ClosedHandle(HandleKind),
    #[error("handle did not exist or was the wrong type")]
    InvalidHandle,
}

#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The resource kind a [`HandleError`] refers to.
pub enum HandleKind {
    Response,
    Request,
    Body,
    PendingRequest,
    Cache,
    KvStore,
    SecretStore,
    Secret,
    Acl,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Request => write!(f, "request"),
            Self::Body => write!(f, "body"),
            Self::PendingRequest => write!(f, "pending request"),
            Self::Cache => write!(f, "cache"),
            Self::KvStore => write!(f, "kv store"),
            Self::SecretStore => write!(f, "secret store"),
            Self::Secret => write!(f, "secret"),
            Self::Acl => write!(f, "acl"),
        }
    }
}

/// Implemented by every ABI-surface error enum so the function implementations can convert
/// a Rust-level failure into the status code written back to the guest, uniformly.
pub trait AsStatus {
    fn as_status(&self) -> XqdStatus;
}

impl AsStatus for HandleError {
    fn as_status(&self) -> XqdStatus {
        XqdStatus::INVALID_HANDLE
    }
}

impl AsStatus for BufferSizeError {
    fn as_status(&self) -> XqdStatus {
        XqdStatus::BUFFER_LENGTH
    }
}
