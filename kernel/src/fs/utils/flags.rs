use crate::prelude::*;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    O_RDONLY = 0,
    O_WRONLY = 1,
    O_RDWR = 2,
}

impl AccessMode {
    pub fn from_u32(flags: u32) -> Result<Self> {
        match flags & 0x3 {
            0 => Ok(AccessMode::O_RDONLY),
            1 => Ok(AccessMode::O_WRONLY),
            2 => Ok(AccessMode::O_RDWR),
            _ => return_errno_with_message!(Errno::EINVAL, "invalid access mode"),
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, AccessMode::O_RDONLY | AccessMode::O_RDWR)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::O_WRONLY | AccessMode::O_RDWR)
    }
}

bitflags! {
    pub struct CreationFlags: u32 {
        const O_CREAT     = 0o100;
        const O_EXCL      = 0o200;
        const O_NOCTTY    = 0o400;
        const O_TRUNC     = 0o1000;
        const O_DIRECTORY = 0o200000;
        const O_NOFOLLOW  = 0o400000;
        const O_CLOEXEC   = 0o2000000;
    }
}

bitflags! {
    pub struct StatusFlags: u32 {
        const O_APPEND   = 0o2000;
        const O_NONBLOCK = 0o4000;
        const O_DSYNC    = 0o10000;
        const O_SYNC     = 0o4010000;
        const O_NOATIME  = 0o1000000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}
