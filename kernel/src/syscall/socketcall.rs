//! The classic i386 multiplexer: one syscall, an opcode, and an array
//! of arguments in user memory.

use super::SyscallReturn;
use crate::{
    fs::{file_handle::FileLike, file_table::FdFlags, utils::StatusFlags},
    net::socket::{
        inet::{DatagramSocket, RawSocket, StreamSocket},
        unix::{unix_socketpair, UnixDgramSocket, UnixStreamSocket},
        SdFlags, Socket, AF_INET, AF_UNIX, SOCK_DGRAM, SOCK_RAW, SOCK_STREAM,
    },
    prelude::*,
    util::user::{
        read_bytes_from_user, read_sockaddr_from_user, read_val_from_user,
        write_bytes_to_user, write_sockaddr_to_user, write_val_to_user,
    },
};

const SYS_SOCKET: u32 = 1;
const SYS_BIND: u32 = 2;
const SYS_CONNECT: u32 = 3;
const SYS_LISTEN: u32 = 4;
const SYS_ACCEPT: u32 = 5;
const SYS_GETSOCKNAME: u32 = 6;
const SYS_GETPEERNAME: u32 = 7;
const SYS_SOCKETPAIR: u32 = 8;
const SYS_SEND: u32 = 9;
const SYS_RECV: u32 = 10;
const SYS_SENDTO: u32 = 11;
const SYS_RECVFROM: u32 = 12;
const SYS_SHUTDOWN: u32 = 13;
const SYS_SETSOCKOPT: u32 = 14;
const SYS_GETSOCKOPT: u32 = 15;
const SYS_SENDMSG: u32 = 16;
const SYS_RECVMSG: u32 = 17;

const SOCK_NONBLOCK: u32 = 0o4000;
const SOCK_CLOEXEC: u32 = 0o2000000;

fn arg(args_addr: Vaddr, index: usize) -> Result<u32> {
    read_val_from_user(args_addr + index * 4)
}

fn socket_file(fd: i32) -> Result<Arc<dyn FileLike>> {
    let file = current!().file_table().lock().get(fd)?;
    if file.as_socket().is_none() {
        return_errno!(Errno::ENOTSOCK);
    }
    Ok(file)
}

fn new_socket(family: u32, type_raw: u32, protocol: u32) -> Result<Arc<dyn FileLike>> {
    let type_ = type_raw & 0xf;
    let file: Arc<dyn FileLike> = match (family, type_) {
        (AF_INET, SOCK_STREAM) => StreamSocket::new(),
        (AF_INET, SOCK_DGRAM) => DatagramSocket::new(),
        (AF_INET, SOCK_RAW) => {
            if !current!().creds().is_superuser() {
                return_errno!(Errno::EPERM);
            }
            RawSocket::new(protocol as u8)
        }
        (AF_UNIX, SOCK_STREAM) => UnixStreamSocket::new(),
        (AF_UNIX, SOCK_DGRAM) => UnixDgramSocket::new(),
        (AF_UNIX | AF_INET, _) => return_errno!(Errno::ESOCKTNOSUPPORT),
        _ => return_errno!(Errno::EAFNOSUPPORT),
    };
    if type_raw & SOCK_NONBLOCK != 0 {
        file.set_status_flags(StatusFlags::O_NONBLOCK)?;
    }
    Ok(file)
}

fn install(file: Arc<dyn FileLike>, type_raw: u32) -> Result<i32> {
    let flags = if type_raw & SOCK_CLOEXEC != 0 {
        FdFlags::CLOEXEC
    } else {
        FdFlags::empty()
    };
    current!().file_table().lock().insert(file, flags)
}

pub(crate) fn sys_socketcall(call: u32, args_addr: Vaddr) -> Result<SyscallReturn> {
    match call {
        SYS_SOCKET => {
            let (family, type_raw, protocol) =
                (arg(args_addr, 0)?, arg(args_addr, 1)?, arg(args_addr, 2)?);
            let file = new_socket(family, type_raw, protocol)?;
            Ok(SyscallReturn::Return(install(file, type_raw)?))
        }
        SYS_BIND => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let addr = read_sockaddr_from_user(
                arg(args_addr, 1)? as Vaddr,
                arg(args_addr, 2)? as usize,
            )?;
            file.as_socket().unwrap().bind(addr)?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_CONNECT => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let addr = read_sockaddr_from_user(
                arg(args_addr, 1)? as Vaddr,
                arg(args_addr, 2)? as usize,
            )?;
            file.as_socket().unwrap().connect(addr)?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_LISTEN => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            file.as_socket().unwrap().listen(arg(args_addr, 1)? as usize)?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_ACCEPT => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let (conn, peer) = file.as_socket().unwrap().accept()?;
            write_sockaddr_to_user(
                &peer,
                arg(args_addr, 1)? as Vaddr,
                arg(args_addr, 2)? as Vaddr,
            )?;
            Ok(SyscallReturn::Return(install(conn, 0)?))
        }
        SYS_GETSOCKNAME => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let addr = file.as_socket().unwrap().addr()?;
            write_sockaddr_to_user(
                &addr,
                arg(args_addr, 1)? as Vaddr,
                arg(args_addr, 2)? as Vaddr,
            )?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_GETPEERNAME => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let addr = file.as_socket().unwrap().peer_addr()?;
            write_sockaddr_to_user(
                &addr,
                arg(args_addr, 1)? as Vaddr,
                arg(args_addr, 2)? as Vaddr,
            )?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_SOCKETPAIR => {
            let (family, type_raw) = (arg(args_addr, 0)?, arg(args_addr, 1)?);
            if family != AF_UNIX || type_raw & 0xf != SOCK_STREAM {
                return_errno!(Errno::EOPNOTSUPP);
            }
            let (a, b) = unix_socketpair();
            let fd_a = install(a, type_raw)?;
            let fd_b = install(b, type_raw)?;
            let fds_addr = arg(args_addr, 3)? as Vaddr;
            write_val_to_user(fds_addr, &fd_a)?;
            write_val_to_user(fds_addr + 4, &fd_b)?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_SEND | SYS_SENDTO => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let len = arg(args_addr, 2)? as usize;
            let mut buf = vec![0u8; len.min(0x7fff_f000)];
            read_bytes_from_user(arg(args_addr, 1)? as Vaddr, &mut buf)?;
            let remote = if call == SYS_SENDTO && arg(args_addr, 4)? != 0 {
                Some(read_sockaddr_from_user(
                    arg(args_addr, 4)? as Vaddr,
                    arg(args_addr, 5)? as usize,
                )?)
            } else {
                None
            };
            let sent =
                file.as_socket()
                    .unwrap()
                    .sendto(&buf, remote, arg(args_addr, 3)?)?;
            Ok(SyscallReturn::Return(sent as i32))
        }
        SYS_RECV | SYS_RECVFROM => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let len = arg(args_addr, 2)? as usize;
            let mut buf = vec![0u8; len.min(0x7fff_f000)];
            let (read, from) = file
                .as_socket()
                .unwrap()
                .recvfrom(&mut buf, arg(args_addr, 3)?)?;
            write_bytes_to_user(arg(args_addr, 1)? as Vaddr, &buf[..read])?;
            if call == SYS_RECVFROM {
                if let Some(from) = from {
                    write_sockaddr_to_user(
                        &from,
                        arg(args_addr, 4)? as Vaddr,
                        arg(args_addr, 5)? as Vaddr,
                    )?;
                }
            }
            Ok(SyscallReturn::Return(read as i32))
        }
        SYS_SHUTDOWN => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let how = SdFlags::from_how(arg(args_addr, 1)?)?;
            file.as_socket().unwrap().shutdown(how)?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_SETSOCKOPT => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let len = (arg(args_addr, 4)? as usize).min(128);
            let mut value = vec![0u8; len];
            read_bytes_from_user(arg(args_addr, 3)? as Vaddr, &mut value)?;
            file.as_socket()
                .unwrap()
                .setsockopt(arg(args_addr, 1)?, arg(args_addr, 2)?, &value)?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_GETSOCKOPT => {
            let file = socket_file(arg(args_addr, 0)? as i32)?;
            let value = file
                .as_socket()
                .unwrap()
                .getsockopt(arg(args_addr, 1)?, arg(args_addr, 2)?)?;
            let out_addr = arg(args_addr, 3)? as Vaddr;
            let len_addr = arg(args_addr, 4)? as Vaddr;
            let capacity: u32 = read_val_from_user(len_addr)?;
            let write = value.len().min(capacity as usize);
            write_bytes_to_user(out_addr, &value[..write])?;
            write_val_to_user(len_addr, &(write as u32))?;
            Ok(SyscallReturn::Return(0))
        }
        SYS_SENDMSG | SYS_RECVMSG => {
            return_errno_with_message!(Errno::EOPNOTSUPP, "msghdr I/O is not wired up")
        }
        _ => return_errno_with_message!(Errno::EINVAL, "unknown socketcall"),
    }
}
