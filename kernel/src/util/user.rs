//! Accessing the calling task's user memory.

use crate::{mm::Vm, net::socket::SocketAddr, prelude::*};

pub fn current_vm() -> Result<Arc<Vm>> {
    current!()
        .vm()
        .ok_or(Error::with_message(Errno::EFAULT, "no user address space"))
}

pub fn read_val_from_user<T: Copy>(addr: Vaddr) -> Result<T> {
    current_vm()?.read_val(addr)
}

pub fn write_val_to_user<T: Copy>(addr: Vaddr, val: &T) -> Result<()> {
    current_vm()?.write_val(addr, val)
}

pub fn read_bytes_from_user(addr: Vaddr, buf: &mut [u8]) -> Result<()> {
    current_vm()?.read_bytes(addr, buf)
}

pub fn write_bytes_to_user(addr: Vaddr, buf: &[u8]) -> Result<()> {
    current_vm()?.write_bytes(addr, buf)
}

pub fn read_cstring_from_user(addr: Vaddr, max: usize) -> Result<CString> {
    current_vm()?.read_cstring(addr, max)
}

/// A NULL-terminated array of string pointers (argv/envp).
pub fn read_cstring_vec(array_addr: Vaddr, max_items: usize, max_len: usize) -> Result<Vec<CString>> {
    let vm = current_vm()?;
    let mut out = Vec::new();
    if array_addr == 0 {
        return Ok(out);
    }
    for index in 0..max_items {
        let ptr: u32 = vm.read_val(array_addr + index * 4)?;
        if ptr == 0 {
            return Ok(out);
        }
        out.push(vm.read_cstring(ptr as Vaddr, max_len)?);
    }
    return_errno_with_message!(Errno::E2BIG, "argument list too long")
}

/// An iovec array, flattened into `(base, len)` pairs.
pub fn read_iovecs(addr: Vaddr, count: usize) -> Result<Vec<(Vaddr, usize)>> {
    if count > 1024 {
        return_errno!(Errno::EINVAL);
    }
    let vm = current_vm()?;
    let mut out = Vec::with_capacity(count);
    for index in 0..count {
        let base: u32 = vm.read_val(addr + index * 8)?;
        let len: u32 = vm.read_val(addr + index * 8 + 4)?;
        out.push((base as Vaddr, len as usize));
    }
    Ok(out)
}

const AF_INET_RAW: u16 = 2;
const AF_UNIX_RAW: u16 = 1;

/// Decode a `sockaddr` the ABI way.
pub fn read_sockaddr_from_user(addr: Vaddr, len: usize) -> Result<SocketAddr> {
    if len < 2 {
        return_errno!(Errno::EINVAL);
    }
    let family: u16 = read_val_from_user(addr)?;
    match family {
        AF_INET_RAW => {
            if len < 8 {
                return_errno!(Errno::EINVAL);
            }
            let port_be: u16 = read_val_from_user(addr + 2)?;
            let ip_bytes: [u8; 4] = read_val_from_user(addr + 4)?;
            Ok(SocketAddr::Inet(
                core::net::Ipv4Addr::from(ip_bytes),
                u16::from_be(port_be),
            ))
        }
        AF_UNIX_RAW => {
            let path_len = (len - 2).min(108);
            let mut raw = vec![0u8; path_len];
            read_bytes_from_user(addr + 2, &mut raw)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let path = String::from_utf8_lossy(&raw[..end]).into_owned();
            Ok(SocketAddr::Unix(path))
        }
        _ => return_errno_with_message!(Errno::EAFNOSUPPORT, "unknown address family"),
    }
}

/// Encode a `SocketAddr` into `(buf, len)` user slots.
pub fn write_sockaddr_to_user(
    sockaddr: &SocketAddr,
    addr: Vaddr,
    len_ptr: Vaddr,
) -> Result<()> {
    if addr == 0 || len_ptr == 0 {
        return Ok(());
    }
    let capacity: u32 = read_val_from_user(len_ptr)?;
    match sockaddr {
        SocketAddr::Inet(ip, port) => {
            let mut raw = [0u8; 16];
            raw[0..2].copy_from_slice(&AF_INET_RAW.to_le_bytes());
            raw[2..4].copy_from_slice(&port.to_be_bytes());
            raw[4..8].copy_from_slice(&ip.octets());
            let write = (capacity as usize).min(raw.len());
            write_bytes_to_user(addr, &raw[..write])?;
            write_val_to_user(len_ptr, &16u32)?;
        }
        SocketAddr::Unix(path) => {
            let mut raw = vec![0u8; 2 + path.len() + 1];
            raw[0..2].copy_from_slice(&AF_UNIX_RAW.to_le_bytes());
            raw[2..2 + path.len()].copy_from_slice(path.as_bytes());
            let write = (capacity as usize).min(raw.len());
            write_bytes_to_user(addr, &raw[..write])?;
            write_val_to_user(len_ptr, &(raw.len() as u32))?;
        }
    }
    Ok(())
}
