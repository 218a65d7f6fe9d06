//! Loopback block device.
//!
//! Maps its block numbers through the backing file's `bmap` into real
//! block numbers on the underlying filesystem's device and delegates
//! through the buffer cache; files whose filesystem cannot `bmap`
//! (tmpfs) fall back to plain inode reads and writes. A block-device
//! backing delegates one-to-one.

use crate::{
    fs::{
        buffer,
        device::{BlockDevice, BlockRequest, DeviceId},
        utils::Inode,
    },
    prelude::*,
};

enum Backing {
    File {
        inode: Arc<dyn Inode>,
        /// Device and block size of the filesystem holding the file.
        fs_dev: DeviceId,
        fs_block_size: usize,
    },
    Device(Arc<dyn BlockDevice>),
}

pub struct LoopDevice {
    id: DeviceId,
    backing: SpinLock<Option<Backing>>,
}

impl LoopDevice {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            backing: SpinLock::new(None),
        }
    }

    pub fn set_backing_file(
        &self,
        inode: Arc<dyn Inode>,
        fs_dev: DeviceId,
        fs_block_size: usize,
    ) -> Result<()> {
        let mut backing = self.backing.lock();
        if backing.is_some() {
            return_errno!(Errno::EBUSY);
        }
        *backing = Some(Backing::File {
            inode,
            fs_dev,
            fs_block_size,
        });
        Ok(())
    }

    pub fn set_backing_device(&self, device: Arc<dyn BlockDevice>) -> Result<()> {
        let mut backing = self.backing.lock();
        if backing.is_some() {
            return_errno!(Errno::EBUSY);
        }
        *backing = Some(Backing::Device(device));
        Ok(())
    }

    pub fn clear_backing(&self) -> Result<()> {
        buffer::invalidate_dev(self.id)?;
        *self.backing.lock() = None;
        Ok(())
    }
}

impl BlockDevice for LoopDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn capacity(&self) -> usize {
        match self.backing.lock().as_ref() {
            Some(Backing::File { inode, .. }) => inode.size(),
            Some(Backing::Device(dev)) => dev.capacity(),
            None => 0,
        }
    }

    fn queue_request(&self, req: BlockRequest) -> Result<()> {
        let backing = self.backing.lock();
        let backing = backing
            .as_ref()
            .ok_or(Error::with_message(Errno::ENXIO, "loop device not bound"))?;
        match backing {
            Backing::Device(dev) => dev.queue_request(req),
            Backing::File {
                inode,
                fs_dev,
                fs_block_size,
            } => match req {
                BlockRequest::Read { block, buf } => {
                    remap_read(inode, *fs_dev, *fs_block_size, block, buf)
                }
                BlockRequest::Write { block, buf } => {
                    remap_write(inode, *fs_dev, *fs_block_size, block, buf)
                }
            },
        }
    }
}

fn remap_read(
    inode: &Arc<dyn Inode>,
    fs_dev: DeviceId,
    fs_block_size: usize,
    block: u32,
    buf: &mut [u8],
) -> Result<()> {
    if buf.len() != fs_block_size {
        // Mismatched geometry: go through the file contents.
        let offset = block as usize * buf.len();
        let read = inode.read_at(offset, buf)?;
        buf[read..].fill(0);
        return Ok(());
    }
    match inode.bmap(block) {
        Ok(0) => buf.fill(0),
        Ok(real) => {
            let bh = buffer::bread(fs_dev, real, fs_block_size)?;
            bh.read_at(0, buf);
        }
        Err(_) => {
            let offset = block as usize * buf.len();
            let read = inode.read_at(offset, buf)?;
            buf[read..].fill(0);
        }
    }
    Ok(())
}

fn remap_write(
    inode: &Arc<dyn Inode>,
    fs_dev: DeviceId,
    fs_block_size: usize,
    block: u32,
    buf: &[u8],
) -> Result<()> {
    if buf.len() == fs_block_size {
        if let Ok(real) = inode.bmap(block) {
            if real != 0 {
                let bh = buffer::getblk(fs_dev, real, fs_block_size)?;
                bh.write_at(0, buf);
                return Ok(());
            }
        }
    }
    let offset = block as usize * buf.len();
    inode.write_at(offset, buf)?;
    Ok(())
}
