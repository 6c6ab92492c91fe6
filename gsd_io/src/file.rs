use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::*;

use crate::{Mmap, PositionalIo, MAX_IO_CHUNK};

/// A `PositionalIo` backend over a real file descriptor.
pub struct FileBackend {
    file: File,
}

impl FileBackend {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

impl PositionalIo for FileBackend {
    fn pread_all(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            let chunk_len = (buf.len() - done).min(MAX_IO_CHUNK);
            let n = self
                .file
                .read_at(&mut buf[done..done + chunk_len], offset + done as u64)
                .context("positional read")?;
            if n == 0 {
                // Hit EOF before filling the buffer: not an error, just short.
                trace!("pread_all short read at offset {} ({} of {})", offset, done, buf.len());
                return Ok(done);
            }
            done += n;
        }
        Ok(done)
    }

    fn pwrite_all(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let chunk_len = (buf.len() - done).min(MAX_IO_CHUNK);
            let n = self
                .file
                .write_at(&buf[done..done + chunk_len], offset + done as u64)
                .context("positional write")?;
            if n == 0 {
                return Err(anyhow!("positional write returned zero bytes at offset {}", offset + done as u64));
            }
            done += n;
        }
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata().context("stat for length")?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len).context("truncate/extend")
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data().context("fsync")
    }

    fn mmap(&self, offset: u64, len: usize) -> Result<Option<Mmap>> {
        if len == 0 {
            return Ok(None);
        }
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(offset)
                .len(len)
                .map(&self.file)
                .with_context(|| format!("mmap at offset {} len {}", offset, len))?
        };
        Ok(Some(mmap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_bytes() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let mut backend = FileBackend::create(tmp.path())?;
        backend.set_len(128)?;
        backend.pwrite_all(16, b"hello world")?;
        backend.sync()?;
        let mut buf = [0u8; 11];
        let n = backend.pread_all(16, &mut buf)?;
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
        Ok(())
    }

    #[test]
    fn short_read_at_eof_is_not_an_error() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let mut backend = FileBackend::create(tmp.path())?;
        backend.set_len(4)?;
        backend.pwrite_all(0, b"abcd")?;
        let mut buf = [0u8; 16];
        let n = backend.pread_all(0, &mut buf)?;
        assert_eq!(n, 4);
        Ok(())
    }

    #[test]
    fn mmap_sees_written_bytes() -> Result<()> {
        let tmp = NamedTempFile::new()?;
        let mut backend = FileBackend::create(tmp.path())?;
        backend.set_len(64)?;
        backend.pwrite_all(0, b"mapped-region-contents")?;
        backend.sync()?;
        let mmap = backend.mmap(0, 64)?.expect("file backend supports mmap");
        assert_eq!(&mmap[..22], b"mapped-region-contents");
        Ok(())
    }
}
