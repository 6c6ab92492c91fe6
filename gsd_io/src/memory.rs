use anyhow::{anyhow, Result};

use crate::{Mmap, PositionalIo};

/// A `PositionalIo` backend over a heap buffer, for engine unit tests that
/// want to exercise the read/write/grow logic without a real file
/// descriptor. Does not support memory-mapped reads.
#[derive(Default)]
pub struct MemoryBackend {
    data: Vec<u8>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl PositionalIo for MemoryBackend {
    fn pread_all(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let available = self.data.len() - offset;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn pwrite_all(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let offset = offset as usize;
        let end = offset
            .checked_add(buf.len())
            .ok_or_else(|| anyhow!("write offset overflow"))?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn mmap(&self, _offset: u64, _len: usize) -> Result<Option<Mmap>> {
        Ok(None)
    }
}
