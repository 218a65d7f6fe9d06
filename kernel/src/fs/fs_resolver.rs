//! Path resolution: component walking, symlink following, mountpoint
//! crossing, and the open-with-creation entry point.

use super::{
    file_table::FileDesc,
    inode_handle::InodeHandle,
    path::Path,
    utils::{
        AccessMode, CreationFlags, InodeMode, InodeType, Metadata, StatusFlags, PATH_MAX,
        SYMLINK_MAX,
    },
};
use crate::prelude::*;

pub const AT_FDCWD: FileDesc = -100;

/// Per-process filesystem context: root, cwd and the file-creation
/// mask. Shared or copied by `clone` as one unit.
#[derive(Debug, Clone)]
pub struct FsResolver {
    root: Option<Path>,
    cwd: Option<Path>,
    umask: u16,
}

impl FsResolver {
    /// Context with no root yet; every lookup fails until the root
    /// filesystem is mounted and installed.
    pub fn unrooted() -> Self {
        Self {
            root: None,
            cwd: None,
            umask: 0o022,
        }
    }

    pub fn new_with_root(root: Path) -> Self {
        Self {
            root: Some(root.clone()),
            cwd: Some(root),
            umask: 0o022,
        }
    }

    pub fn root(&self) -> Result<Path> {
        self.root
            .clone()
            .ok_or(Error::with_message(Errno::ENOENT, "no root filesystem"))
    }

    pub fn cwd(&self) -> Result<Path> {
        self.cwd
            .clone()
            .ok_or(Error::with_message(Errno::ENOENT, "no working directory"))
    }

    pub fn set_cwd(&mut self, path: Path) {
        self.cwd = Some(path);
    }

    pub fn set_root(&mut self, path: Path) {
        self.cwd = Some(path.clone());
        self.root = Some(path);
    }

    pub fn umask(&self) -> u16 {
        self.umask
    }

    pub fn set_umask(&mut self, new: u16) -> u16 {
        core::mem::replace(&mut self.umask, new & 0o777)
    }

    /// Resolve to a location, following tail symlinks.
    pub fn lookup(&self, path: &FsPath) -> Result<Path> {
        self.lookup_inner(path, true)
    }

    /// Resolve without following a tail symlink.
    pub fn lookup_no_follow(&self, path: &FsPath) -> Result<Path> {
        self.lookup_inner(path, false)
    }

    fn lookup_inner(&self, path: &FsPath, follow_tail: bool) -> Result<Path> {
        let (start, rel) = self.start_of(path)?;
        let mut depth = 0;
        self.resolve(start, rel, follow_tail, &mut depth)
    }

    fn start_of<'a>(&self, path: &'a FsPath) -> Result<(Path, &'a str)> {
        match &path.inner {
            FsPathInner::Absolute(rel) => Ok((self.root()?, rel.trim_start_matches('/'))),
            FsPathInner::CwdRelative(rel) => Ok((self.cwd()?, rel)),
            FsPathInner::FdRelative(fd, rel) => Ok((self.path_of_fd(*fd)?, rel)),
            FsPathInner::Fd(fd) => Ok((self.path_of_fd(*fd)?, "")),
        }
    }

    fn path_of_fd(&self, fd: FileDesc) -> Result<Path> {
        let file = current!().file_table().lock().get(fd)?;
        let handle = file
            .downcast_ref::<InodeHandle>()
            .ok_or(Error::with_message(Errno::ENOTDIR, "fd is not a directory"))?;
        Ok(handle.path().clone())
    }

    fn resolve(
        &self,
        start: Path,
        rel: &str,
        follow_tail: bool,
        depth: &mut usize,
    ) -> Result<Path> {
        let comps: Vec<&str> = rel.split('/').filter(|c| !c.is_empty()).collect();
        let mut cur = start;
        for (i, comp) in comps.iter().enumerate() {
            let is_last = i == comps.len() - 1;
            let next = cur.lookup_child(comp)?;
            if next.type_() == InodeType::SymLink && (!is_last || follow_tail) {
                *depth += 1;
                if *depth > SYMLINK_MAX {
                    return_errno_with_message!(Errno::ELOOP, "too many symbolic links");
                }
                let target = next.inode().read_link()?;
                let base = if target.starts_with('/') {
                    self.root()?
                } else {
                    cur.clone()
                };
                cur = self.resolve(base, target.trim_start_matches('/'), true, depth)?;
            } else {
                cur = next;
            }
        }
        Ok(cur)
    }

    /// Resolve the parent directory and return it with the final
    /// component, for create/unlink/rename-style calls.
    pub fn lookup_dir_and_base<'a>(&self, path: &FsPath<'a>) -> Result<(Path, &'a str)> {
        let rel = path.rel();
        let trimmed = rel.trim_end_matches('/');
        if trimmed.is_empty() {
            return_errno_with_message!(Errno::EINVAL, "no final component");
        }
        let (dir_part, base) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos + 1], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        if base == "." || base == ".." {
            return_errno_with_message!(Errno::EINVAL, "invalid final component");
        }
        let dir_path = path.with_rel(if dir_part.is_empty() { "." } else { dir_part });
        let dir = self.lookup_inner(&dir_path, true)?;
        if dir.type_() != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        Ok((dir, base))
    }

    /// Open (and possibly create) the file at `path`.
    pub fn open(&self, path: &FsPath, flags: u32, mode: u16) -> Result<InodeHandle> {
        let creation_flags = CreationFlags::from_bits_truncate(flags);
        let status_flags = StatusFlags::from_bits_truncate(flags);
        let access_mode = AccessMode::from_u32(flags)?;

        let follow_tail = !(creation_flags.contains(CreationFlags::O_NOFOLLOW)
            || creation_flags.contains(CreationFlags::O_CREAT)
                && creation_flags.contains(CreationFlags::O_EXCL));
        let location = match self.lookup_inner(path, follow_tail) {
            Ok(location) => {
                let type_ = location.type_();
                if type_ == InodeType::SymLink {
                    return_errno_with_message!(Errno::ELOOP, "file is a symlink");
                }
                if creation_flags.contains(CreationFlags::O_CREAT)
                    && creation_flags.contains(CreationFlags::O_EXCL)
                {
                    return_errno_with_message!(Errno::EEXIST, "file exists");
                }
                if creation_flags.contains(CreationFlags::O_DIRECTORY) && type_ != InodeType::Dir
                {
                    return_errno_with_message!(Errno::ENOTDIR, "not a directory");
                }
                if type_ == InodeType::Dir && access_mode.is_writable() {
                    return_errno!(Errno::EISDIR);
                }
                may_access(
                    &location.inode().metadata(),
                    access_mode.is_readable(),
                    access_mode.is_writable(),
                    false,
                )?;
                if creation_flags.contains(CreationFlags::O_TRUNC)
                    && type_ == InodeType::File
                    && access_mode.is_writable()
                {
                    location.inode().resize(0)?;
                }
                location
            }
            Err(err)
                if err.error() == Errno::ENOENT
                    && creation_flags.contains(CreationFlags::O_CREAT) =>
            {
                let (dir, base) = self.lookup_dir_and_base(path)?;
                may_access(&dir.inode().metadata(), false, true, false)?;
                let masked =
                    InodeMode::from_bits_truncate(mode & !self.umask & 0o777);
                dir.create(base, InodeType::File, masked)?
            }
            Err(err) => return Err(err),
        };
        InodeHandle::new(location, access_mode, status_flags)
    }
}

/// Classic owner/group/other permission check against the current
/// credentials; root passes everything except exec on non-executables.
pub fn may_access(meta: &Metadata, read: bool, write: bool, exec: bool) -> Result<()> {
    let Some(current) = crate::process::current_opt() else {
        return Ok(());
    };
    let creds = current.creds();
    if creds.is_superuser() {
        if exec && meta.type_ == InodeType::File && meta.mode.bits() & 0o111 == 0 {
            return_errno!(Errno::EACCES);
        }
        return Ok(());
    }
    let mode = meta.mode.bits();
    let class_shift = if creds.euid() == meta.uid {
        6
    } else if creds.in_group(meta.gid) {
        3
    } else {
        0
    };
    let class = (mode >> class_shift) & 0o7;
    if read && class & 0o4 == 0 {
        return_errno!(Errno::EACCES);
    }
    if write && class & 0o2 == 0 {
        return_errno!(Errno::EACCES);
    }
    if exec && class & 0o1 == 0 {
        return_errno!(Errno::EACCES);
    }
    Ok(())
}

enum FsPathInner<'a> {
    Absolute(&'a str),
    CwdRelative(&'a str),
    FdRelative(FileDesc, &'a str),
    Fd(FileDesc),
}

/// A user-supplied path plus the directory it is relative to.
pub struct FsPath<'a> {
    inner: FsPathInner<'a>,
}

impl<'a> FsPath<'a> {
    pub fn new(dirfd: FileDesc, path: &'a str) -> Result<Self> {
        if path.len() > PATH_MAX {
            return_errno_with_message!(Errno::ENAMETOOLONG, "path is too long");
        }
        let inner = if path.starts_with('/') {
            FsPathInner::Absolute(path)
        } else if path.is_empty() {
            if dirfd == AT_FDCWD {
                return_errno_with_message!(Errno::ENOENT, "empty path");
            }
            FsPathInner::Fd(dirfd)
        } else if dirfd == AT_FDCWD {
            FsPathInner::CwdRelative(path)
        } else {
            FsPathInner::FdRelative(dirfd, path)
        };
        Ok(Self { inner })
    }

    fn rel(&self) -> &'a str {
        match &self.inner {
            FsPathInner::Absolute(rel)
            | FsPathInner::CwdRelative(rel)
            | FsPathInner::FdRelative(_, rel) => rel,
            FsPathInner::Fd(_) => "",
        }
    }

    fn with_rel(&self, rel: &'a str) -> FsPath<'a> {
        let inner = match &self.inner {
            FsPathInner::Absolute(_) => {
                if rel.starts_with('/') {
                    FsPathInner::Absolute(rel)
                } else {
                    // The directory part of an absolute path keeps its
                    // leading slash, so this only happens for ".".
                    FsPathInner::CwdRelative(rel)
                }
            }
            FsPathInner::CwdRelative(_) => FsPathInner::CwdRelative(rel),
            FsPathInner::FdRelative(fd, _) => FsPathInner::FdRelative(*fd, rel),
            FsPathInner::Fd(fd) => FsPathInner::FdRelative(*fd, rel),
        };
        FsPath { inner }
    }
}

impl TryFrom<&'static str> for FsPath<'static> {
    type Error = Error;

    fn try_from(path: &'static str) -> Result<FsPath<'static>> {
        FsPath::new(AT_FDCWD, path)
    }
}
