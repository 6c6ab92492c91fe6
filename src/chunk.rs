//! Chunk read/write API (spec.md §4.6, §4.8): `write_chunk`, `end_frame`,
//! `find_chunk`, `read_chunk`, `find_matching_chunk_name`, `nframes`.

use crate::error::{GsdError, Result};
use crate::handle::GsdFile;
use crate::layout::IndexEntry;
use crate::types::sizeof_tag;

impl GsdFile {
    /// Number of complete frames currently in the file.
    pub fn nframes(&self) -> u64 {
        self.cur_frame()
    }

    /// Append one chunk's data to the current (not yet committed) frame.
    /// The name is interned on first use; `M` must be nonzero and `data`
    /// must be exactly `N * M * sizeof(type)` bytes (spec.md §4.6, §4.7).
    /// `N == 0` is accepted and stores an empty chunk.
    pub fn write_chunk(&mut self, name: &str, type_tag: u8, n: u64, m: u32, data: &[u8]) -> Result<()> {
        self.require_writable("write_chunk")?;
        if m == 0 {
            return Err(GsdError::InvalidArgument("M must be nonzero".into()));
        }
        let elem_size = sizeof_tag(type_tag);
        if elem_size == 0 {
            return Err(GsdError::InvalidArgument(format!(
                "unknown element type tag {}",
                type_tag
            )));
        }
        let expected_len = n as usize * m as usize * elem_size;
        if data.len() != expected_len {
            return Err(GsdError::InvalidArgument(format!(
                "data length {} does not match N*M*sizeof(type) = {}",
                data.len(),
                expected_len
            )));
        }

        let (io, namelist) = self.io_and_namelist_mut();
        let id = namelist.intern(io, name, true)?;

        let location = self.file_size();
        if !data.is_empty() {
            self.io_mut().pwrite_all(location, data)?;
        }
        let frame = self.cur_frame();
        let entry = IndexEntry {
            frame,
            n,
            location,
            m,
            id,
            type_tag,
            flags: 0,
        };

        let written_file_size = location + data.len() as u64;
        let (io, index, header) = self.io_index_header_mut();
        index.insert(io, header, written_file_size, entry)?;

        let actual_len = self.io_mut().len()?;
        self.set_file_size(actual_len);
        Ok(())
    }

    /// Commit the current frame: flush its chunk data, its index entries,
    /// and any newly interned names, then advance to the next frame
    /// (spec.md §4.6, §5). Every `write_chunk` call since the previous
    /// `end_frame` becomes durable and visible to readers as one unit.
    pub fn end_frame(&mut self) -> Result<()> {
        self.require_writable("end_frame")?;
        self.io_mut().sync()?;
        let (io, index) = self.io_and_index_mut();
        index.commit(io)?;
        io.sync()?;
        self.namelist_mut().clear_needs_sync();
        self.set_cur_frame(self.cur_frame() + 1);
        Ok(())
    }

    /// Look up the entry for `name` at `frame`. Returns `Ok(None)` rather
    /// than an error both when `frame >= nframes()` and when `name` was
    /// never interned (spec.md §4.6).
    pub fn find_chunk(&self, frame: u64, name: &str) -> Result<Option<IndexEntry>> {
        self.require_readable("find_chunk")?;
        if frame >= self.nframes() {
            return Ok(None);
        }
        let id = match self.namelist().find(name) {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(self.index().find(frame, id))
    }

    /// Read a chunk's payload into `out`, which must be exactly
    /// `entry.payload_size()` bytes. Validates the entry's type, that it is
    /// actually used, and that its payload lies inside the file, then
    /// requires the read to fill `out` completely (spec.md §4.6).
    pub fn read_chunk(&mut self, entry: &IndexEntry, out: &mut [u8]) -> Result<()> {
        self.require_readable("read_chunk")?;
        if sizeof_tag(entry.type_tag) == 0 {
            return Err(GsdError::InvalidArgument(format!(
                "unknown element type tag {}",
                entry.type_tag
            )));
        }
        if entry.location == 0 {
            return Err(GsdError::NotFound("chunk entry is unused".into()));
        }
        let expected = entry.payload_size();
        let file_size = self.file_size();
        if entry.location + expected > file_size {
            return Err(GsdError::CorruptFile(format!(
                "chunk payload [{}, {}) extends past file size {}",
                entry.location,
                entry.location + expected,
                file_size
            )));
        }
        if out.len() as u64 != expected {
            return Err(GsdError::InvalidArgument(format!(
                "output buffer is {} bytes, chunk payload is {} bytes",
                out.len(),
                expected
            )));
        }
        if expected == 0 {
            return Ok(());
        }
        let done = self.io_mut().pread_all(entry.location, out)?;
        if done as u64 != expected {
            return Err(GsdError::Io(format!(
                "short read at offset {}: got {} of {} bytes",
                entry.location, done, expected
            )));
        }
        Ok(())
    }

    /// Next interned name starting with `prefix`, strictly after `previous`
    /// in interning order (spec.md §4.3, §4.6). `previous = None` starts
    /// from the beginning.
    pub fn find_matching_chunk_name(&self, prefix: &str, previous: Option<u16>) -> Result<Option<(u16, &str)>> {
        self.require_readable("find_matching_chunk_name")?;
        Ok(self.namelist().find_matching(prefix, previous))
    }
}
