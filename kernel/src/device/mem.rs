//! The small memory character devices: /dev/null, /dev/zero,
//! /dev/random.

use crate::{
    fs::device::{Device, DeviceId, DeviceType, MEM_MAJOR},
    prelude::*,
    util::random,
};

pub struct Null;

impl Device for Null {
    fn type_(&self) -> DeviceType {
        DeviceType::CharDevice
    }

    fn id(&self) -> DeviceId {
        DeviceId::new(MEM_MAJOR, 3)
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

pub struct Zero;

impl Device for Zero {
    fn type_(&self) -> DeviceType {
        DeviceType::CharDevice
    }

    fn id(&self) -> DeviceId {
        DeviceId::new(MEM_MAJOR, 5)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

pub struct Random;

impl Device for Random {
    fn type_(&self) -> DeviceType {
        DeviceType::CharDevice
    }

    fn id(&self) -> DeviceId {
        DeviceId::new(MEM_MAJOR, 8)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        random::getrandom(buf);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        // Writes stir the pool.
        for chunk in buf.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            random::seed(u64::from_le_bytes(word));
        }
        Ok(buf.len())
    }
}
