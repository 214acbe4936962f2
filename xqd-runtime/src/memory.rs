//! Typed access to a guest module's linear memory.
//!
//! Every ABI function implementation receives a [`GuestMemory`] borrowed from the
//! `wasmtime::Caller` for the duration of the call. All multi-byte integers on the wire are
//! little-endian, matching the ABI's documented byte order. Grounded on the `memory_get` /
//! `slice_from_memory` / `string_from_memory` helpers used to bridge `wasmtime::Memory` in the
//! wasi-experimental-http-wasmtime reference sample, generalized here into read/write for every
//! integer width the ABI uses instead of just byte slices.

use wasmtime::{AsContextMut, Caller, Extern, Memory};
use xqd_shared::XqdStatus;

const MEMORY_EXPORT_NAME: &str = "memory";

/// Errors accessing guest linear memory. These always translate to `XqdStatus::ERROR`; a
/// misbehaving guest (no memory export, or an out-of-bounds offset) cannot get a more specific
/// status because the protocol has no way to express "your memory export is missing."
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("guest module does not export a memory named \"{0}\"")]
    NoMemoryExport(&'static str),
    #[error("offset {offset} + length {len} is out of bounds for memory of size {size}")]
    OutOfBounds {
        offset: u32,
        len: u32,
        size: usize,
    },
}

impl From<MemoryError> for XqdStatus {
    fn from(_: MemoryError) -> Self {
        XqdStatus::ERROR
    }
}

/// Borrowed access to one guest instance's linear memory for the duration of a single ABI
/// call.
///
/// `'a` is the borrow of the caller for this call; `'c` is the `Caller`'s own lifetime
/// parameter. Keeping them distinct (rather than unifying both into one `'a`, which `&mut`'s
/// invariance would force to match the `Caller` type's own lifetime exactly) lets `new` borrow
/// a local `Caller<'c, T>` for just the duration of the call instead of its entire type-level
/// lifetime.
pub struct GuestMemory<'a, 'c, T> {
    memory: Memory,
    caller: &'a mut Caller<'c, T>,
}

impl<'a, 'c, T> GuestMemory<'a, 'c, T> {
    /// Look up the guest's exported `memory` and wrap it for typed access.
    pub fn new(caller: &'a mut Caller<'c, T>) -> Result<Self, MemoryError> {
        match caller.get_export(MEMORY_EXPORT_NAME) {
            Some(Extern::Memory(memory)) => Ok(Self { memory, caller }),
            _ => Err(MemoryError::NoMemoryExport(MEMORY_EXPORT_NAME)),
        }
    }

    /// `offset`/`len` are guest-controlled `u32`s; summing them as `usize` (64-bit on every
    /// host this runtime targets) cannot overflow, so the real memory size is always what gets
    /// reported in the `OutOfBounds` diagnostic.
    fn bounds_check(&mut self, offset: u32, len: u32) -> Result<(), MemoryError> {
        let size = self.memory.data_size(&mut *self.caller);
        let end = offset as usize + len as usize;
        if end > size {
            return Err(MemoryError::OutOfBounds { offset, len, size });
        }
        Ok(())
    }

    /// Read `len` raw bytes at `offset`.
    pub fn read_bytes(&mut self, offset: u32, len: u32) -> Result<Vec<u8>, MemoryError> {
        self.bounds_check(offset, len)?;
        let mut buf = vec![0u8; len as usize];
        self.memory
            .read(&mut *self.caller, offset as usize, &mut buf)
            .map_err(|_| MemoryError::OutOfBounds {
                offset,
                len,
                size: self.memory.data_size(&mut *self.caller),
            })?;
        Ok(buf)
    }

    /// Read a UTF-8 string of byte length `len` at `offset`. Invalid UTF-8 is replaced with
    /// the Unicode replacement character rather than failing the call, since guests write
    /// arbitrary byte strings (e.g. header values) that are not necessarily meant to be UTF-8.
    pub fn read_string_lossy(&mut self, offset: u32, len: u32) -> Result<String, MemoryError> {
        let bytes = self.read_bytes(offset, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.bounds_check(offset, data.len() as u32)?;
        self.memory
            .write(&mut *self.caller, offset as usize, data)
            .map_err(|_| MemoryError::OutOfBounds {
                offset,
                len: data.len() as u32,
                size: self.memory.data_size(&mut *self.caller),
            })
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, offset: u32, value: u64) -> Result<(), MemoryError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub fn write_i64(&mut self, offset: u32, value: i64) -> Result<(), MemoryError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub fn read_u32(&mut self, offset: u32) -> Result<u32, MemoryError> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self, offset: u32) -> Result<u64, MemoryError> {
        let bytes = self.read_bytes(offset, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i64(&mut self, offset: u32) -> Result<i64, MemoryError> {
        let bytes = self.read_bytes(offset, 8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }
}
