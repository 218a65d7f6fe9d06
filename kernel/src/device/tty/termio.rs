#![allow(non_camel_case_types)]

//! termios: the knobs the line discipline and output filter obey.

use crate::prelude::*;

pub const KERNEL_NCCS: usize = 19;

pub const CC_VINTR: usize = 0;
pub const CC_VQUIT: usize = 1;
pub const CC_VERASE: usize = 2;
pub const CC_VKILL: usize = 3;
pub const CC_VEOF: usize = 4;
pub const CC_VTIME: usize = 5;
pub const CC_VMIN: usize = 6;
pub const CC_VSTART: usize = 8;
pub const CC_VSTOP: usize = 9;
pub const CC_VSUSP: usize = 10;
pub const CC_VEOL: usize = 11;

bitflags! {
    pub struct C_IFLAGS: u32 {
        const IGNBRK  = 0x001;
        const BRKINT  = 0x002;
        const IGNPAR  = 0x004;
        const PARMRK  = 0x008;
        const INPCK   = 0x010;
        const ISTRIP  = 0x020;
        const INLCR   = 0x040;
        const IGNCR   = 0x080;
        const ICRNL   = 0x100;
        const IUCLC   = 0x0200;
        const IXON    = 0x0400;
        const IXANY   = 0x800;
        const IXOFF   = 0x1000;
        const IMAXBEL = 0x2000;
        const IUTF8   = 0x4000;
    }
}

impl Default for C_IFLAGS {
    fn default() -> Self {
        C_IFLAGS::ICRNL | C_IFLAGS::IXON
    }
}

bitflags! {
    pub struct C_OFLAGS: u32 {
        const OPOST  = 1 << 0;
        const OLCUC  = 1 << 1;
        const ONLCR  = 1 << 2;
        const OCRNL  = 1 << 3;
        const ONOCR  = 1 << 4;
        const ONLRET = 1 << 5;
    }
}

impl Default for C_OFLAGS {
    fn default() -> Self {
        C_OFLAGS::OPOST | C_OFLAGS::ONLCR
    }
}

bitflags! {
    pub struct C_LFLAGS: u32 {
        const ISIG    = 0x00001;
        const ICANON  = 0x00002;
        const XCASE   = 0x00004;
        const ECHO    = 0x00008;
        const ECHOE   = 0x00010;
        const ECHOK   = 0x00020;
        const ECHONL  = 0x00040;
        const NOFLSH  = 0x00080;
        const TOSTOP  = 0x00100;
        const ECHOCTL = 0x00200;
        const ECHOPRT = 0x00400;
        const ECHOKE  = 0x00800;
        const FLUSHO  = 0x01000;
        const PENDIN  = 0x04000;
        const IEXTEN  = 0x08000;
    }
}

impl Default for C_LFLAGS {
    fn default() -> Self {
        C_LFLAGS::ISIG
            | C_LFLAGS::ICANON
            | C_LFLAGS::ECHO
            | C_LFLAGS::ECHOE
            | C_LFLAGS::ECHOK
            | C_LFLAGS::ECHOCTL
            | C_LFLAGS::ECHOKE
            | C_LFLAGS::IEXTEN
    }
}

/// The raw ABI shape of `struct termios`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct termios_t {
    pub c_iflag: u32,
    pub c_oflag: u32,
    pub c_cflag: u32,
    pub c_lflag: u32,
    pub c_line: u8,
    pub c_cc: [u8; KERNEL_NCCS],
}

#[derive(Debug, Clone, Copy)]
pub struct KernelTermios {
    pub c_iflags: C_IFLAGS,
    pub c_oflags: C_OFLAGS,
    pub c_cflags: u32,
    pub c_lflags: C_LFLAGS,
    pub c_line: u8,
    pub c_cc: [u8; KERNEL_NCCS],
}

impl Default for KernelTermios {
    fn default() -> Self {
        let mut c_cc = [0u8; KERNEL_NCCS];
        c_cc[CC_VINTR] = 0x03; // ^C
        c_cc[CC_VQUIT] = 0x1c; // ^\
        c_cc[CC_VERASE] = 0x7f;
        c_cc[CC_VKILL] = 0x15; // ^U
        c_cc[CC_VEOF] = 0x04; // ^D
        c_cc[CC_VMIN] = 1;
        c_cc[CC_VSTART] = 0x11; // ^Q
        c_cc[CC_VSTOP] = 0x13; // ^S
        c_cc[CC_VSUSP] = 0x1a; // ^Z
        Self {
            c_iflags: C_IFLAGS::default(),
            c_oflags: C_OFLAGS::default(),
            c_cflags: 0x0fbf, // B38400 | CS8 | CREAD
            c_lflags: C_LFLAGS::default(),
            c_line: 0,
            c_cc,
        }
    }
}

impl KernelTermios {
    pub fn is_canonical(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ICANON)
    }

    pub fn contains_icrnl(&self) -> bool {
        self.c_iflags.contains(C_IFLAGS::ICRNL)
    }

    pub fn contains_isig(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ISIG)
    }

    pub fn contain_echo(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHO)
    }

    pub fn contain_echo_ctl(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHOCTL)
    }

    pub fn as_raw(&self) -> termios_t {
        termios_t {
            c_iflag: self.c_iflags.bits(),
            c_oflag: self.c_oflags.bits(),
            c_cflag: self.c_cflags,
            c_lflag: self.c_lflags.bits(),
            c_line: self.c_line,
            c_cc: self.c_cc,
        }
    }

    pub fn from_raw(raw: &termios_t) -> Self {
        Self {
            c_iflags: C_IFLAGS::from_bits_truncate(raw.c_iflag),
            c_oflags: C_OFLAGS::from_bits_truncate(raw.c_oflag),
            c_cflags: raw.c_cflag,
            c_lflags: C_LFLAGS::from_bits_truncate(raw.c_lflag),
            c_line: raw.c_line,
            c_cc: raw.c_cc,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WinSize {
    pub ws_row: u16,
    pub ws_col: u16,
    pub ws_xpixel: u16,
    pub ws_ypixel: u16,
}
