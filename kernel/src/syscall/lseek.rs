use super::SyscallReturn;
use crate::{fs::utils::SeekFrom, prelude::*, util::user::write_val_to_user};

#[repr(u32)]
#[derive(Debug, Clone, Copy, TryFromInt)]
enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

fn decode(offset: i64, whence: u32) -> Result<SeekFrom> {
    match Whence::try_from(whence)? {
        Whence::Set => Ok(SeekFrom::Start(offset as usize)),
        Whence::Cur => Ok(SeekFrom::Current(offset as isize)),
        Whence::End => Ok(SeekFrom::End(offset as isize)),
    }
}

pub(super) fn sys_lseek(fd: i32, offset: i32, whence: u32) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let new = file.seek(decode(offset as i64, whence)?)?;
    Ok(SyscallReturn::Return(new as i32))
}

pub(super) fn sys_llseek(
    fd: i32,
    offset_high: u32,
    offset_low: u32,
    result_addr: Vaddr,
    whence: u32,
) -> Result<SyscallReturn> {
    let offset = ((offset_high as i64) << 32) | offset_low as i64;
    let file = current!().file_table().lock().get(fd)?;
    let new = file.seek(decode(offset, whence)?)?;
    write_val_to_user(result_addr, &(new as u64))?;
    Ok(SyscallReturn::Return(0))
}
