use super::SyscallReturn;
use crate::{
    mm::{frame, PAGE_SIZE},
    prelude::*,
    util::user::write_val_to_user,
};

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct sysinfo_t {
    uptime: i32,
    loads: [u32; 3],
    totalram: u32,
    freeram: u32,
    sharedram: u32,
    bufferram: u32,
    totalswap: u32,
    freeswap: u32,
    procs: u16,
    _pad: u16,
    totalhigh: u32,
    freehigh: u32,
    mem_unit: u32,
    _reserved: [u8; 8],
}

pub(super) fn sys_sysinfo(addr: Vaddr) -> Result<SyscallReturn> {
    let info = sysinfo_t {
        uptime: crate::time::uptime_secs() as i32,
        totalram: (frame::total_frames() * PAGE_SIZE) as u32,
        freeram: (frame::free_frames() * PAGE_SIZE) as u32,
        procs: crate::process::table::len() as u16,
        mem_unit: 1,
        ..Default::default()
    };
    write_val_to_user(addr, &info)?;
    Ok(SyscallReturn::Return(0))
}
