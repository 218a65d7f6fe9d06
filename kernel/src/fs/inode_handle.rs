//! The file description for inode-backed opens: regular files,
//! directories, device nodes and symlink-free leaves.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{
    buffer,
    device::{self, Device, DeviceId},
    file_handle::FileLike,
    path::Path,
    utils::{AccessMode, DirentVisitor, InodeType, Metadata, SeekFrom, StatusFlags},
};
use crate::{
    events::{IoEvents, Poller},
    prelude::*,
};

pub struct InodeHandle {
    path: Path,
    offset: Mutex<usize>,
    access_mode: AccessMode,
    status_flags: AtomicU32,
    /// Present for character-device nodes; reads and writes bypass the
    /// inode entirely.
    device: Option<Arc<dyn Device>>,
}

impl InodeHandle {
    pub fn new(path: Path, access_mode: AccessMode, status_flags: StatusFlags) -> Result<Self> {
        let device = if path.type_() == InodeType::CharDevice {
            let id = path
                .inode()
                .device_id()
                .unwrap_or(DeviceId::from_encoded(path.inode().metadata().rdev));
            Some(device::lookup_char(id)?)
        } else {
            None
        };
        Ok(Self {
            path,
            offset: Mutex::new(0),
            access_mode,
            status_flags: AtomicU32::new(status_flags.bits()),
            device,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dentry(&self) -> &Arc<super::path::Dentry> {
        self.path.dentry()
    }

    /// The driver-provided replacement file, when the device wants one
    /// (the TTY layer does).
    pub fn substituted_file(&self) -> Result<Option<Arc<dyn FileLike>>> {
        match &self.device {
            Some(device) => device.open(),
            None => Ok(None),
        }
    }

    fn check_readable(&self) -> Result<()> {
        if !self.access_mode.is_readable() {
            return_errno!(Errno::EBADF);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.access_mode.is_writable() {
            return_errno!(Errno::EBADF);
        }
        Ok(())
    }

    fn block_dev(&self) -> Result<(DeviceId, usize)> {
        let id = self
            .path
            .inode()
            .device_id()
            .unwrap_or(DeviceId::from_encoded(self.path.inode().metadata().rdev));
        let dev = device::lookup_block(id)?;
        Ok((id, dev.capacity()))
    }
}

const BLKDEV_IO_SIZE: usize = 512;

impl FileLike for InodeHandle {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        match self.path.type_() {
            InodeType::CharDevice => self.device.as_ref().unwrap().read(buf),
            InodeType::Dir => return_errno!(Errno::EISDIR),
            _ => {
                let mut offset = self.offset.lock();
                let read = self.read_at(*offset, buf)?;
                *offset += read;
                Ok(read)
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        match self.path.type_() {
            InodeType::CharDevice => self.device.as_ref().unwrap().write(buf),
            InodeType::Dir => return_errno!(Errno::EISDIR),
            _ => {
                let mut offset = self.offset.lock();
                if self.status_flags().contains(StatusFlags::O_APPEND) {
                    *offset = self.path.inode().size();
                }
                let written = self.write_at(*offset, buf)?;
                *offset += written;
                Ok(written)
            }
        }
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        match self.path.type_() {
            InodeType::BlockDevice => {
                let (dev, capacity) = self.block_dev()?;
                let end = (offset + buf.len()).min(capacity);
                if offset >= end {
                    return Ok(0);
                }
                let mut done = 0;
                while offset + done < end {
                    let pos = offset + done;
                    let block = (pos / BLKDEV_IO_SIZE) as u32;
                    let in_block = pos % BLKDEV_IO_SIZE;
                    let chunk = (BLKDEV_IO_SIZE - in_block).min(end - pos);
                    let bh = buffer::bread(dev, block, BLKDEV_IO_SIZE)?;
                    bh.read_at(in_block, &mut buf[done..done + chunk]);
                    done += chunk;
                }
                Ok(done)
            }
            _ => self.path.inode().read_at(offset, buf),
        }
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        match self.path.type_() {
            InodeType::BlockDevice => {
                let (dev, capacity) = self.block_dev()?;
                let end = (offset + buf.len()).min(capacity);
                if offset >= end {
                    return_errno!(Errno::ENOSPC);
                }
                let mut done = 0;
                while offset + done < end {
                    let pos = offset + done;
                    let block = (pos / BLKDEV_IO_SIZE) as u32;
                    let in_block = pos % BLKDEV_IO_SIZE;
                    let chunk = (BLKDEV_IO_SIZE - in_block).min(end - pos);
                    let bh = if chunk == BLKDEV_IO_SIZE {
                        buffer::getblk(dev, block, BLKDEV_IO_SIZE)?
                    } else {
                        buffer::bread(dev, block, BLKDEV_IO_SIZE)?
                    };
                    bh.write_at(in_block, &buf[done..done + chunk]);
                    done += chunk;
                }
                Ok(done)
            }
            _ => self.path.inode().write_at(offset, buf),
        }
    }

    fn seek(&self, pos: SeekFrom) -> Result<usize> {
        let mut offset = self.offset.lock();
        let end = self.path.inode().size();
        let new = match pos {
            SeekFrom::Start(off) => off as isize,
            SeekFrom::Current(delta) => *offset as isize + delta,
            SeekFrom::End(delta) => end as isize + delta,
        };
        if new < 0 {
            return_errno!(Errno::EINVAL);
        }
        *offset = new as usize;
        Ok(*offset)
    }

    fn readdir(&self, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        // A visitor may stop early (the user buffer filled); keep the
        // offset at the last entry it accepted so iteration resumes.
        struct Tracking<'a> {
            inner: &'a mut dyn DirentVisitor,
            last_accepted: Option<usize>,
        }
        impl DirentVisitor for Tracking<'_> {
            fn visit(
                &mut self,
                name: &str,
                ino: u64,
                type_: super::utils::InodeType,
                offset: usize,
            ) -> Result<()> {
                self.inner.visit(name, ino, type_, offset)?;
                self.last_accepted = Some(offset);
                Ok(())
            }
        }

        let mut offset = self.offset.lock();
        let mut tracking = Tracking {
            inner: visitor,
            last_accepted: None,
        };
        match self.path.inode().readdir_at(*offset, &mut tracking) {
            Ok(new_offset) => {
                *offset = new_offset;
                Ok(new_offset)
            }
            Err(err) => match tracking.last_accepted {
                Some(last) => {
                    *offset = last;
                    Ok(last)
                }
                None => Err(err),
            },
        }
    }

    fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
        match &self.device {
            Some(device) => device.ioctl(cmd, arg),
            None => self.path.inode().ioctl(cmd, arg),
        }
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        self.check_writable()?;
        self.path.inode().resize(new_size)
    }

    fn flush(&self) -> Result<()> {
        self.path.inode().sync()
    }

    fn metadata(&self) -> Metadata {
        self.path.inode().metadata()
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        match &self.device {
            Some(device) => device.poll(mask, poller),
            None => self.path.inode().poll(mask, poller),
        }
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    fn inode(&self) -> Option<Arc<dyn super::utils::Inode>> {
        Some(self.path.inode().clone())
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        if let Some(device) = &self.device {
            device.release();
        }
    }
}

impl Debug for InodeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InodeHandle")
            .field("path", &self.path.abs_path())
            .field("access_mode", &self.access_mode)
            .finish_non_exhaustive()
    }
}
