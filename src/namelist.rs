//! Namelist manager: interns chunk names to 16-bit ids (spec.md §4.3).

use gsd_io::PositionalIo;

use crate::error::{GsdError, Result};
use crate::layout::{namelist_slot_bytes, namelist_slot_name, NAMELIST_ENTRY_SIZE};

#[derive(Debug)]
pub struct Namelist {
    location: u64,
    allocated: u64,
    names: Vec<String>,
    /// Set when a name was appended since the last frame boundary; the
    /// handle flushes and clears this at `end_frame` (spec.md §4.3, §4.6).
    needs_sync: bool,
}

impl Namelist {
    /// Load the whole namelist into memory, scanning for the first
    /// zero-byte (empty-string) terminator to find `namelist_num_entries`
    /// (spec.md §4.5).
    pub fn load(io: &mut dyn PositionalIo, location: u64, allocated: u64) -> Result<Self> {
        let mut names = Vec::new();
        let mut buf = vec![0u8; NAMELIST_ENTRY_SIZE];
        for slot in 0..allocated {
            let offset = location + slot * NAMELIST_ENTRY_SIZE as u64;
            io.pread_all(offset, &mut buf)?;
            match namelist_slot_name(&buf) {
                Some(name) => names.push(name),
                None => break,
            }
        }
        Ok(Namelist {
            location,
            allocated,
            names,
            needs_sync: false,
        })
    }

    pub fn num_entries(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, id: u16) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn find(&self, name: &str) -> Option<u16> {
        self.names.iter().position(|n| n == name).map(|i| i as u16)
    }

    /// Intern `name`, appending a new slot if `may_append` is true, the
    /// handle is writable, and there's room. Returns `GsdError::NotFound`
    /// when the name isn't interned and appending wasn't possible — callers
    /// in the write path treat that as a write error (spec.md §4.3).
    pub fn intern(
        &mut self,
        io: &mut dyn PositionalIo,
        name: &str,
        may_append: bool,
    ) -> Result<u16> {
        if let Some(id) = self.find(name) {
            return Ok(id);
        }
        if !may_append {
            return Err(GsdError::NotFound(format!("chunk name '{}' not interned", name)));
        }
        if self.names.len() as u64 >= self.allocated {
            // The engine does not grow the namelist block (spec.md §4.3, §9).
            return Err(GsdError::NotFound(format!(
                "namelist is full ({} entries), cannot intern '{}'",
                self.allocated, name
            )));
        }
        let slot = self.names.len() as u64;
        let offset = self.location + slot * NAMELIST_ENTRY_SIZE as u64;
        let bytes = namelist_slot_bytes(name);
        io.pwrite_all(offset, &bytes)?;
        self.names.push(name.to_string());
        self.needs_sync = true;
        Ok(slot as u16)
    }

    pub fn needs_sync(&self) -> bool {
        self.needs_sync
    }

    pub fn clear_needs_sync(&mut self) {
        self.needs_sync = false;
    }

    /// Next entry (by ordinal id) whose name starts with `prefix`, strictly
    /// after `previous`. Returns an opaque `(id, name)` cursor rather than a
    /// raw pointer into the namelist buffer (spec.md §9 calls the original
    /// pointer-returning API out as something a reimplementation should
    /// avoid).
    pub fn find_matching(&self, prefix: &str, previous: Option<u16>) -> Option<(u16, &str)> {
        let start = match previous {
            Some(id) => id as usize + 1,
            None => 0,
        };
        self.names
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, n)| n.starts_with(prefix))
            .map(|(i, n)| (i as u16, n.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsd_io::memory::MemoryBackend;

    fn backend_with_empty_namelist(allocated: u64) -> MemoryBackend {
        let mut io = MemoryBackend::new();
        io.set_len(allocated * NAMELIST_ENTRY_SIZE as u64).unwrap();
        io
    }

    #[test]
    fn intern_appends_and_reuses() {
        let mut io = backend_with_empty_namelist(4);
        let mut nl = Namelist::load(&mut io, 0, 4).unwrap();
        let a = nl.intern(&mut io, "pos", true).unwrap();
        let b = nl.intern(&mut io, "vel", true).unwrap();
        let a2 = nl.intern(&mut io, "pos", false).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(a2, a);
        assert!(nl.needs_sync());
    }

    #[test]
    fn lookup_without_append_fails_for_unknown_name() {
        let mut io = backend_with_empty_namelist(4);
        let mut nl = Namelist::load(&mut io, 0, 4).unwrap();
        let err = nl.intern(&mut io, "missing", false).unwrap_err();
        assert!(matches!(err, GsdError::NotFound(_)));
    }

    #[test]
    fn full_namelist_rejects_append() {
        let mut io = backend_with_empty_namelist(2);
        let mut nl = Namelist::load(&mut io, 0, 2).unwrap();
        nl.intern(&mut io, "a", true).unwrap();
        nl.intern(&mut io, "b", true).unwrap();
        let err = nl.intern(&mut io, "c", true).unwrap_err();
        assert!(matches!(err, GsdError::NotFound(_)));
    }

    #[test]
    fn reload_recovers_names_in_order() {
        let mut io = backend_with_empty_namelist(8);
        {
            let mut nl = Namelist::load(&mut io, 0, 8).unwrap();
            nl.intern(&mut io, "pos", true).unwrap();
            nl.intern(&mut io, "vel", true).unwrap();
        }
        let nl2 = Namelist::load(&mut io, 0, 8).unwrap();
        assert_eq!(nl2.num_entries(), 2);
        assert_eq!(nl2.name(0), Some("pos"));
        assert_eq!(nl2.name(1), Some("vel"));
    }

    #[test]
    fn find_matching_iterates_by_prefix() {
        let mut io = backend_with_empty_namelist(8);
        let mut nl = Namelist::load(&mut io, 0, 8).unwrap();
        nl.intern(&mut io, "particles/position", true).unwrap();
        nl.intern(&mut io, "particles/velocity", true).unwrap();
        nl.intern(&mut io, "log/time", true).unwrap();

        let first = nl.find_matching("particles/", None).unwrap();
        assert_eq!(first.0, 0);
        let second = nl.find_matching("particles/", Some(first.0)).unwrap();
        assert_eq!(second.0, 1);
        assert!(nl.find_matching("particles/", Some(second.0)).is_none());
    }
}
