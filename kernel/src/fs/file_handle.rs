//! The operations defined on an open file.

use crate::{
    events::{IoEvents, Poller},
    fs::utils::{AccessMode, DirentVisitor, Metadata, SeekFrom, StatusFlags},
    net::socket::Socket,
    prelude::*,
};

/// An entry in the file-descriptor table: a regular file, directory,
/// device, pipe end, socket or TTY. Defaults return the error a file
/// of the wrong kind would.
pub trait FileLike: Send + Sync + Any {
    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        return_errno_with_message!(Errno::EBADF, "the file is not valid for reading")
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        return_errno_with_message!(Errno::EBADF, "the file is not valid for writing")
    }

    /// Positioned read; does not move the file offset.
    fn read_at(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize> {
        return_errno_with_message!(Errno::ESPIPE, "read_at is not supported")
    }

    /// Positioned write; does not move the file offset.
    fn write_at(&self, _offset: usize, _buf: &[u8]) -> Result<usize> {
        return_errno_with_message!(Errno::ESPIPE, "write_at is not supported")
    }

    fn seek(&self, _pos: SeekFrom) -> Result<usize> {
        return_errno_with_message!(Errno::ESPIPE, "seek is not supported")
    }

    fn readdir(&self, _visitor: &mut dyn DirentVisitor) -> Result<usize> {
        return_errno_with_message!(Errno::ENOTDIR, "not a directory")
    }

    fn ioctl(&self, _cmd: u32, _arg: usize) -> Result<i32> {
        return_errno_with_message!(Errno::ENOTTY, "ioctl is not supported")
    }

    fn resize(&self, _new_size: usize) -> Result<()> {
        return_errno_with_message!(Errno::EINVAL, "resize is not supported")
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn metadata(&self) -> Metadata;

    fn poll(&self, mask: IoEvents, _poller: Option<&Poller>) -> IoEvents {
        (IoEvents::IN | IoEvents::OUT) & mask
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::empty()
    }

    fn set_status_flags(&self, _new_flags: StatusFlags) -> Result<()> {
        return_errno_with_message!(Errno::EINVAL, "set_status_flags is not supported")
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDWR
    }

    /// The backing inode, for handles that have one.
    fn inode(&self) -> Option<Arc<dyn crate::fs::utils::Inode>> {
        None
    }

    /// Socket files return themselves for the socket syscalls.
    fn as_socket(&self) -> Option<&dyn Socket> {
        None
    }
}

impl dyn FileLike {
    pub fn downcast_ref<T: FileLike>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

impl Debug for dyn FileLike {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("FileLike").finish_non_exhaustive()
    }
}
