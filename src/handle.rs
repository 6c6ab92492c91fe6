//! The file handle: lifecycle, header validation, and the open-mode state
//! machine (spec.md §4.2, §4.5, §4.8).

use std::path::Path;

use gsd_io::file::FileBackend;
use gsd_io::PositionalIo;
use log::*;

use crate::error::{GsdError, Result};
use crate::index::{Index, LoadMode};
use crate::layout::{Header, INITIAL_INDEX_ENTRIES, INITIAL_NAMELIST_ENTRIES};
use crate::namelist::Namelist;
use crate::types::{version_supported, Version, CURRENT_VERSION};

/// How a file was opened, which bounds which operations are legal
/// (spec.md §4.2, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// No writes; reads and queries only.
    ReadOnly,
    /// Reads and writes against an existing file.
    ReadWrite,
    /// Writes only; no reads, no `find_chunk` (spec.md §4.8).
    Append,
}

pub struct GsdFile {
    io: Box<dyn PositionalIo>,
    mode: OpenMode,
    header: Header,
    index: Index,
    namelist: Namelist,
    file_size: u64,
    cur_frame: u64,
}

impl std::fmt::Debug for GsdFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsdFile")
            .field("mode", &self.mode)
            .field("header", &self.header)
            .field("index", &self.index)
            .field("namelist", &self.namelist)
            .field("file_size", &self.file_size)
            .field("cur_frame", &self.cur_frame)
            .finish()
    }
}

impl GsdFile {
    /// Create a new, empty file on disk: header, an empty index block sized
    /// to `INITIAL_INDEX_ENTRIES`, and an empty namelist block sized to
    /// `INITIAL_NAMELIST_ENTRIES` (spec.md §4.1).
    pub fn create(
        path: &Path,
        application: &str,
        schema: &str,
        schema_version: u32,
    ) -> Result<()> {
        let header = Header::new(application, schema, schema_version, CURRENT_VERSION.0);
        let total_len = header.namelist_location
            + header.namelist_allocated_entries * crate::layout::NAMELIST_ENTRY_SIZE as u64;
        let mut backend = FileBackend::create(path)?;
        backend.set_len(total_len)?;
        backend.pwrite_all(0, &header.to_bytes())?;
        backend.sync()?;
        info!(
            "created {} ({} index slots, {} namelist slots)",
            path.display(),
            INITIAL_INDEX_ENTRIES,
            INITIAL_NAMELIST_ENTRIES
        );
        Ok(())
    }

    /// Create a new file and open it in one step. `mode` must not be
    /// `ReadOnly` — there would be nothing to read from a file that was
    /// just created empty (spec.md §7 reserves `FileMustBeWritable` for
    /// exactly this call).
    pub fn create_and_open(
        path: &Path,
        application: &str,
        schema: &str,
        schema_version: u32,
        mode: OpenMode,
    ) -> Result<Self> {
        if mode == OpenMode::ReadOnly {
            return Err(GsdError::FileMustBeWritable(
                "create_and_open cannot be called with OpenMode::ReadOnly".into(),
            ));
        }
        Self::create(path, application, schema, schema_version)?;
        Self::open(path, mode)
    }

    /// Open an existing file, validating the header and loading the index
    /// and namelist per spec.md §4.2 and §4.5.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let writable = mode != OpenMode::ReadOnly;
        let mut io: Box<dyn PositionalIo> = Box::new(FileBackend::open(path, writable)?);

        let mut header_buf = [0u8; crate::layout::HEADER_SIZE];
        io.pread_all(0, &mut header_buf)?;
        let header = Header::from_bytes(&header_buf)?;

        if header.magic != crate::layout::MAGIC {
            return Err(GsdError::InvalidFile(format!(
                "{} is not a GSD file (bad magic)",
                path.display()
            )));
        }
        let version = Version(header.version);
        if !version_supported(version) {
            return Err(GsdError::InvalidFile(format!(
                "unsupported file version {}.{}",
                version.major(),
                version.minor()
            )));
        }

        let file_size = io.len()?;
        let load_mode = match mode {
            OpenMode::ReadOnly => LoadMode::ReadOnly,
            OpenMode::ReadWrite => LoadMode::ReadWrite,
            OpenMode::Append => LoadMode::Append,
        };
        let (index, last) = Index::open(
            io.as_mut(),
            header.index_location,
            header.index_allocated_entries,
            file_size,
            load_mode,
        )?;
        let cur_frame = last.map(|e| e.frame + 1).unwrap_or(0);

        let namelist = Namelist::load(
            io.as_mut(),
            header.namelist_location,
            header.namelist_allocated_entries,
        )?;

        debug!(
            "opened {} mode={:?} nframes={} namelist_entries={}",
            path.display(),
            mode,
            cur_frame,
            namelist.num_entries()
        );

        Ok(GsdFile {
            io,
            mode,
            header,
            index,
            namelist,
            file_size,
            cur_frame,
        })
    }

    /// Reinitialize a writable file to zero frames, keeping its application
    /// and schema identity (spec.md §4.1).
    pub fn truncate(&mut self) -> Result<()> {
        self.require_writable("truncate")?;
        let fresh = Header::new(
            &self.header.application_str(),
            &self.header.schema_str(),
            self.header.schema_version,
            self.header.version,
        );
        let total_len = fresh.namelist_location
            + fresh.namelist_allocated_entries * crate::layout::NAMELIST_ENTRY_SIZE as u64;
        self.io.set_len(total_len)?;
        self.io.pwrite_all(0, &fresh.to_bytes())?;
        self.io.sync()?;
        self.file_size = total_len;
        self.header = fresh;
        let load_mode = match self.mode {
            OpenMode::ReadWrite => LoadMode::ReadWrite,
            OpenMode::Append => LoadMode::Append,
            OpenMode::ReadOnly => unreachable!("require_writable rejects read-only handles"),
        };
        let (index, _) = Index::open(
            self.io.as_mut(),
            self.header.index_location,
            self.header.index_allocated_entries,
            self.file_size,
            load_mode,
        )?;
        self.index = index;
        self.namelist = Namelist::load(
            self.io.as_mut(),
            self.header.namelist_location,
            self.header.namelist_allocated_entries,
        )?;
        self.cur_frame = 0;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.io.sync()?;
        Ok(())
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn application(&self) -> String {
        self.header.application_str()
    }

    pub fn schema(&self) -> String {
        self.header.schema_str()
    }

    pub fn schema_version(&self) -> u32 {
        self.header.schema_version
    }

    pub fn version(&self) -> Version {
        Version(self.header.version)
    }

    pub(crate) fn require_writable(&self, op: &str) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument(format!(
                "cannot {} a file opened read-only",
                op
            )));
        }
        Ok(())
    }

    pub(crate) fn require_readable(&self, op: &str) -> Result<()> {
        if self.mode == OpenMode::Append {
            return Err(GsdError::InvalidArgument(format!(
                "cannot {} a file opened in append mode",
                op
            )));
        }
        Ok(())
    }

    pub(crate) fn io_mut(&mut self) -> &mut dyn PositionalIo {
        self.io.as_mut()
    }

    pub(crate) fn io_and_index_mut(&mut self) -> (&mut dyn PositionalIo, &mut Index) {
        (self.io.as_mut(), &mut self.index)
    }

    pub(crate) fn io_and_namelist_mut(&mut self) -> (&mut dyn PositionalIo, &mut Namelist) {
        (self.io.as_mut(), &mut self.namelist)
    }

    pub(crate) fn io_index_header_mut(
        &mut self,
    ) -> (&mut dyn PositionalIo, &mut Index, &mut Header) {
        (self.io.as_mut(), &mut self.index, &mut self.header)
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub(crate) fn index(&self) -> &Index {
        &self.index
    }

    pub(crate) fn index_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    pub(crate) fn namelist(&self) -> &Namelist {
        &self.namelist
    }

    pub(crate) fn namelist_mut(&mut self) -> &mut Namelist {
        &mut self.namelist
    }

    pub(crate) fn file_size(&self) -> u64 {
        self.file_size
    }

    pub(crate) fn set_file_size(&mut self, size: u64) {
        self.file_size = size;
    }

    pub(crate) fn cur_frame(&self) -> u64 {
        self.cur_frame
    }

    pub(crate) fn set_cur_frame(&mut self, frame: u64) {
        self.cur_frame = frame;
    }
}
