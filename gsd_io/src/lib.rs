//! Positional I/O primitives shared by the GSD engine.
//!
//! Generalizes the disk-driver abstraction used by ext2-style filesystem
//! code (a small trait over an open device, backed either by a real file or
//! an in-memory buffer) to the needs of an append-friendly trajectory
//! container: 64-bit offsets, short-transfer retry, a synchronous flush, and
//! a read-only memory map of an arbitrary byte range.

use anyhow::Result;

pub mod file;
pub mod memory;

/// On platforms whose positional I/O cannot accept transfers larger than
/// 2^31 bytes, a single `pread`/`pwrite` call is capped at this size and the
/// caller loops. We apply the cap unconditionally rather than only on the
/// platforms that need it, so there is one code path to trust.
pub const MAX_IO_CHUNK: usize = 1 << 30; // ~1 GiB

/// A read-only mapping of a byte range of a backend. `FileBackend` returns a
/// real `memmap2::Mmap`; `MemoryBackend` cannot be mapped and returns `None`
/// from `mmap`.
pub type Mmap = memmap2::Mmap;

/// Byte-addressable resource with 64-bit offsets. All operations are
/// positional: they never move a shared cursor, so concurrent-looking calls
/// from a single-threaded caller never interfere with each other's offsets.
pub trait PositionalIo {
    /// Read up to `buf.len()` bytes starting at `offset`. Short reads caused
    /// by hitting end-of-file are not an error: the number of bytes actually
    /// read is returned. Short reads for any other reason are retried until
    /// `buf` is full or an error occurs.
    fn pread_all(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write exactly `buf.len()` bytes starting at `offset`. Short writes are
    /// retried until the full buffer is written or an error occurs.
    fn pwrite_all(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Current length of the backing resource in bytes.
    fn len(&mut self) -> Result<u64>;

    /// Grow or shrink the backing resource to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Request that previously written bytes become durable.
    fn sync(&mut self) -> Result<()>;

    /// Map `len` bytes starting at `offset` read-only, if the backend
    /// supports mapping. The page-aligned-offset bookkeeping described for
    /// manual `mmap(2)` use is handled internally by `memmap2`.
    fn mmap(&self, offset: u64, len: usize) -> Result<Option<Mmap>>;
}

/// Zero a byte range with a pattern the compiler cannot optimize away, for
/// callers that need "this memory really was cleared" rather than "the
/// compiler decided the store was dead".
pub fn volatile_zero(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        unsafe { std::ptr::write_volatile(byte, 0) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatile_zero_clears_buffer() {
        let mut buf = vec![0xAAu8; 64];
        volatile_zero(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
