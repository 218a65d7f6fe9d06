//! RAM-backed block device: the reference driver for the request
//! queue contract and the disk the tests format filesystems onto.

use crate::{
    fs::device::{BlockDevice, BlockRequest, DeviceId},
    prelude::*,
};

pub struct RamDisk {
    id: DeviceId,
    storage: SpinLock<Vec<u8>>,
}

impl RamDisk {
    pub fn new(id: DeviceId, capacity: usize) -> Self {
        Self {
            id,
            storage: SpinLock::new(vec![0u8; capacity]),
        }
    }

    fn span(&self, block: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = block as usize * len;
        let end = start + len;
        if end > self.storage.lock().len() {
            return_errno_with_message!(Errno::EIO, "request beyond end of ram disk");
        }
        Ok(start..end)
    }
}

impl BlockDevice for RamDisk {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn capacity(&self) -> usize {
        self.storage.lock().len()
    }

    fn queue_request(&self, req: BlockRequest) -> Result<()> {
        match req {
            BlockRequest::Read { block, buf } => {
                let span = self.span(block, buf.len())?;
                buf.copy_from_slice(&self.storage.lock()[span]);
            }
            BlockRequest::Write { block, buf } => {
                let span = self.span(block, buf.len())?;
                self.storage.lock()[span].copy_from_slice(buf);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_roundtrip_and_bounds() {
        let disk = RamDisk::new(DeviceId::new(1, 99), 4096);
        disk.queue_request(BlockRequest::Write {
            block: 3,
            buf: &[0xabu8; 512],
        })
        .unwrap();
        let mut out = [0u8; 512];
        disk.queue_request(BlockRequest::Read {
            block: 3,
            buf: &mut out,
        })
        .unwrap();
        assert_eq!(out, [0xabu8; 512]);
        let err = disk
            .queue_request(BlockRequest::Read {
                block: 8,
                buf: &mut out,
            })
            .unwrap_err();
        assert_eq!(err.error(), Errno::EIO);
    }
}
