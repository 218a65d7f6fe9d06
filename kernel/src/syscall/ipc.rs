//! The i386 `ipc` multiplexer over the System V families.

use super::SyscallReturn;
use crate::{
    ipc::{msg, sem, shm},
    prelude::*,
    util::user::{read_bytes_from_user, read_val_from_user, write_bytes_to_user, write_val_to_user},
};

const SEMOP: u32 = 1;
const SEMGET: u32 = 2;
const SEMCTL: u32 = 3;
const MSGSND: u32 = 11;
const MSGRCV: u32 = 12;
const MSGGET: u32 = 13;
const MSGCTL: u32 = 14;
const SHMAT: u32 = 21;
const SHMDT: u32 = 22;
const SHMGET: u32 = 23;
const SHMCTL: u32 = 24;

pub(super) fn sys_ipc(
    call: u32,
    first: u32,
    second: u32,
    third: u32,
    ptr: Vaddr,
    fifth: u32,
) -> Result<SyscallReturn> {
    match call {
        SEMGET => Ok(SyscallReturn::Return(sem::semget(
            first as i32,
            second as usize,
            third as i32,
        )?)),
        SEMOP => {
            let count = (second as usize).min(32);
            let mut ops = Vec::with_capacity(count);
            for index in 0..count {
                let num: u16 = read_val_from_user(ptr + index * 6)?;
                let op: i16 = read_val_from_user(ptr + index * 6 + 2)?;
                let flags: i16 = read_val_from_user(ptr + index * 6 + 4)?;
                ops.push(sem::SemBuf { num, op, flags });
            }
            sem::semop(first as i32, &ops)?;
            Ok(SyscallReturn::Return(0))
        }
        SEMCTL => Ok(SyscallReturn::Return(sem::semctl(
            first as i32,
            second as usize,
            third as i32,
            read_val_from_user::<i32>(ptr).unwrap_or(0),
        )?)),
        MSGGET => Ok(SyscallReturn::Return(msg::msgget(
            first as i32,
            second as i32,
        )?)),
        MSGSND => {
            // struct msgbuf: the type word, then the payload.
            let mtype: i32 = read_val_from_user(ptr)?;
            let len = second as usize;
            let mut data = vec![0u8; len];
            read_bytes_from_user(ptr + 4, &mut data)?;
            msg::msgsnd(first as i32, mtype as i64, &data, third as i32)?;
            Ok(SyscallReturn::Return(0))
        }
        MSGRCV => {
            let mtype = third as i32 as i64;
            let (found_type, data) =
                msg::msgrcv(first as i32, mtype, second as usize, fifth as i32)?;
            write_val_to_user(ptr, &(found_type as i32))?;
            write_bytes_to_user(ptr + 4, &data)?;
            Ok(SyscallReturn::Return(data.len() as i32))
        }
        MSGCTL => Ok(SyscallReturn::Return(msg::msgctl(
            first as i32,
            second as i32,
        )?)),
        SHMGET => Ok(SyscallReturn::Return(shm::shmget(
            first as i32,
            second as usize,
            third as i32,
        )?)),
        SHMAT => {
            let addr = shm::shmat(first as i32, ptr)?;
            Ok(SyscallReturn::Return(addr as i32))
        }
        SHMDT => {
            shm::shmdt(ptr)?;
            Ok(SyscallReturn::Return(0))
        }
        SHMCTL => Ok(SyscallReturn::Return(shm::shmctl(
            first as i32,
            second as i32,
        )?)),
        _ => return_errno_with_message!(Errno::EINVAL, "unknown ipc call"),
    }
}
