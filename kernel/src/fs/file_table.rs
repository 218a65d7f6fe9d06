//! The per-process file-descriptor table.

use super::file_handle::FileLike;
use crate::prelude::*;

pub type FileDesc = i32;

/// Hard ceiling independent of RLIMIT_NOFILE.
const TABLE_MAX: usize = 4096;

bitflags! {
    pub struct FdFlags: u32 {
        const CLOEXEC = 1;
    }
}

#[derive(Clone)]
pub struct FileTableEntry {
    file: Arc<dyn FileLike>,
    flags: FdFlags,
}

impl FileTableEntry {
    pub fn new(file: Arc<dyn FileLike>, flags: FdFlags) -> Self {
        Self { file, flags }
    }

    pub fn file(&self) -> &Arc<dyn FileLike> {
        &self.file
    }
}

pub struct FileTable {
    table: Vec<Option<FileTableEntry>>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub const fn new() -> Self {
        Self { table: Vec::new() }
    }

    /// Install `file` at the lowest free descriptor at or above
    /// `min_fd`.
    pub fn insert_from(
        &mut self,
        file: Arc<dyn FileLike>,
        flags: FdFlags,
        min_fd: FileDesc,
    ) -> Result<FileDesc> {
        let min_fd = min_fd.max(0) as usize;
        let fd = (min_fd..TABLE_MAX)
            .find(|&fd| self.table.get(fd).map_or(true, |slot| slot.is_none()))
            .ok_or(Error::with_message(Errno::EMFILE, "file table full"))?;
        if fd >= self.table.len() {
            self.table.resize(fd + 1, None);
        }
        self.table[fd] = Some(FileTableEntry::new(file, flags));
        Ok(fd as FileDesc)
    }

    pub fn insert(&mut self, file: Arc<dyn FileLike>, flags: FdFlags) -> Result<FileDesc> {
        self.insert_from(file, flags, 0)
    }

    /// Install at exactly `fd` (dup2), closing whatever was there.
    pub fn insert_at(
        &mut self,
        fd: FileDesc,
        file: Arc<dyn FileLike>,
        flags: FdFlags,
    ) -> Result<Option<Arc<dyn FileLike>>> {
        if fd < 0 || fd as usize >= TABLE_MAX {
            return_errno!(Errno::EBADF);
        }
        let fd = fd as usize;
        if fd >= self.table.len() {
            self.table.resize(fd + 1, None);
        }
        let old = self.table[fd].replace(FileTableEntry::new(file, flags));
        Ok(old.map(|entry| entry.file))
    }

    pub fn get(&self, fd: FileDesc) -> Result<Arc<dyn FileLike>> {
        self.entry(fd).map(|entry| entry.file.clone())
    }

    fn entry(&self, fd: FileDesc) -> Result<&FileTableEntry> {
        if fd < 0 {
            return_errno!(Errno::EBADF);
        }
        self.table
            .get(fd as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(Error::with_message(Errno::EBADF, "bad file descriptor"))
    }

    pub fn fd_flags(&self, fd: FileDesc) -> Result<FdFlags> {
        self.entry(fd).map(|entry| entry.flags)
    }

    pub fn set_fd_flags(&mut self, fd: FileDesc, flags: FdFlags) -> Result<()> {
        if fd < 0 {
            return_errno!(Errno::EBADF);
        }
        let entry = self
            .table
            .get_mut(fd as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Error::new(Errno::EBADF))?;
        entry.flags = flags;
        Ok(())
    }

    pub fn dup(&mut self, fd: FileDesc, min_fd: FileDesc, flags: FdFlags) -> Result<FileDesc> {
        let file = self.get(fd)?;
        self.insert_from(file, flags, min_fd)
    }

    pub fn close(&mut self, fd: FileDesc) -> Result<Arc<dyn FileLike>> {
        if fd < 0 {
            return_errno!(Errno::EBADF);
        }
        self.table
            .get_mut(fd as usize)
            .and_then(|slot| slot.take())
            .map(|entry| entry.file)
            .ok_or(Error::with_message(Errno::EBADF, "bad file descriptor"))
    }

    /// Close every descriptor, returning the files so the caller
    /// controls when release hooks run.
    pub fn close_all(&mut self) -> Vec<Arc<dyn FileLike>> {
        self.table
            .iter_mut()
            .filter_map(|slot| slot.take())
            .map(|entry| entry.file)
            .collect()
    }

    /// The exec sweep: drop everything marked close-on-exec.
    pub fn close_cloexec(&mut self) -> Vec<Arc<dyn FileLike>> {
        self.table
            .iter_mut()
            .filter_map(|slot| {
                if slot
                    .as_ref()
                    .is_some_and(|e| e.flags.contains(FdFlags::CLOEXEC))
                {
                    slot.take().map(|e| e.file)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Deep copy for fork without CLONE_FILES.
    pub fn duplicate(&self) -> FileTable {
        FileTable {
            table: self.table.clone(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.table.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileDesc, &FileTableEntry)> {
        self.table
            .iter()
            .enumerate()
            .filter_map(|(fd, slot)| slot.as_ref().map(|entry| (fd as FileDesc, entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::utils::Metadata;

    struct NullFile;

    impl FileLike for NullFile {
        fn metadata(&self) -> Metadata {
            Metadata::new_file(0, crate::fs::utils::InodeMode::from_bits_truncate(0o666), 512)
        }
    }

    fn file() -> Arc<dyn FileLike> {
        Arc::new(NullFile)
    }

    #[test]
    fn lowest_free_descriptor_wins() {
        let mut table = FileTable::new();
        assert_eq!(table.insert(file(), FdFlags::empty()).unwrap(), 0);
        assert_eq!(table.insert(file(), FdFlags::empty()).unwrap(), 1);
        assert_eq!(table.insert(file(), FdFlags::empty()).unwrap(), 2);
        table.close(1).unwrap();
        assert_eq!(table.insert(file(), FdFlags::empty()).unwrap(), 1);
    }

    #[test]
    fn dup_respects_min_fd() {
        let mut table = FileTable::new();
        let fd = table.insert(file(), FdFlags::empty()).unwrap();
        let dup = table.dup(fd, 10, FdFlags::empty()).unwrap();
        assert_eq!(dup, 10);
        assert!(Arc::ptr_eq(&table.get(fd).unwrap(), &table.get(dup).unwrap()));
    }

    #[test]
    fn cloexec_sweep_only_hits_marked() {
        let mut table = FileTable::new();
        let keep = table.insert(file(), FdFlags::empty()).unwrap();
        let drop_fd = table.insert(file(), FdFlags::CLOEXEC).unwrap();
        let closed = table.close_cloexec();
        assert_eq!(closed.len(), 1);
        assert!(table.get(keep).is_ok());
        assert_eq!(table.get(drop_fd).unwrap_err().error(), Errno::EBADF);
    }

    #[test]
    fn bad_descriptor_is_ebadf() {
        let table = FileTable::new();
        assert_eq!(table.get(0).unwrap_err().error(), Errno::EBADF);
        assert_eq!(table.get(-1).unwrap_err().error(), Errno::EBADF);
    }
}
