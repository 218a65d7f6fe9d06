use super::SyscallReturn;
use crate::{
    fs::inode_handle::InodeHandle,
    mm::{vm::VmaFileBacking, Frame, VmPerms, VmaBacking, VmaFlags, PAGE_SIZE},
    prelude::*,
    util::user::current_vm,
};

const PROT_READ: u32 = 1;
const PROT_WRITE: u32 = 2;
const PROT_EXEC: u32 = 4;

const MAP_SHARED: u32 = 0x01;
const MAP_PRIVATE: u32 = 0x02;
const MAP_FIXED: u32 = 0x10;
const MAP_ANONYMOUS: u32 = 0x20;

fn perms_of(prot: u32) -> VmPerms {
    let mut perms = VmPerms::empty();
    if prot & PROT_READ != 0 {
        perms |= VmPerms::READ;
    }
    if prot & PROT_WRITE != 0 {
        perms |= VmPerms::WRITE;
    }
    if prot & PROT_EXEC != 0 {
        perms |= VmPerms::EXEC;
    }
    perms
}

/// Demand-page source adapting an inode to the fault path.
struct InodeBacking {
    inode: Arc<dyn crate::fs::utils::Inode>,
}

impl VmaFileBacking for InodeBacking {
    fn read_page(&self, offset: usize, frame: &Frame) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let read = self.inode.read_at(offset, &mut buf)?;
        buf[read..].fill(0);
        frame.write_bytes(0, &buf);
        Ok(())
    }
}

pub(super) fn sys_mmap2(
    addr: usize,
    len: usize,
    prot: u32,
    flags: u32,
    fd: i32,
    page_offset: usize,
) -> Result<SyscallReturn> {
    if len == 0 {
        return_errno!(Errno::EINVAL);
    }
    let vm = current_vm()?;
    let mut vma_flags = VmaFlags::empty();
    if flags & MAP_SHARED != 0 {
        vma_flags |= VmaFlags::SHARED;
    }
    let backing = if flags & MAP_ANONYMOUS != 0 {
        VmaBacking::Anonymous
    } else {
        if flags & MAP_SHARED != 0 {
            // Shared file mappings are not carried; private suffices
            // for exec images and libraries.
            return_errno!(Errno::EINVAL);
        }
        let file = current!().file_table().lock().get(fd)?;
        let handle = file
            .downcast_ref::<InodeHandle>()
            .ok_or(Error::new(Errno::EBADF))?;
        VmaBacking::File {
            file: Arc::new(InodeBacking {
                inode: handle.path().inode().clone(),
            }),
            offset: page_offset * PAGE_SIZE,
        }
    };
    let _ = flags & MAP_PRIVATE;
    let mapped = vm.map_region(
        addr,
        len,
        perms_of(prot),
        vma_flags,
        backing,
        flags & MAP_FIXED != 0,
    )?;
    Ok(SyscallReturn::Return(mapped as i32))
}

/// The old mmap: a pointer to a six-word argument block, byte offset.
pub(super) fn sys_old_mmap(arg_addr: Vaddr) -> Result<SyscallReturn> {
    let vm = current_vm()?;
    let mut args = [0u32; 6];
    for (index, slot) in args.iter_mut().enumerate() {
        *slot = vm.read_val(arg_addr + index * 4)?;
    }
    let offset = args[5] as usize;
    if offset % PAGE_SIZE != 0 {
        return_errno!(Errno::EINVAL);
    }
    sys_mmap2(
        args[0] as usize,
        args[1] as usize,
        args[2],
        args[3],
        args[4] as i32,
        offset / PAGE_SIZE,
    )
}

pub(super) fn sys_munmap(addr: usize, len: usize) -> Result<SyscallReturn> {
    current_vm()?.unmap_region(addr, len)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_mprotect(addr: usize, len: usize, prot: u32) -> Result<SyscallReturn> {
    current_vm()?.protect_region(addr, len, perms_of(prot))?;
    Ok(SyscallReturn::Return(0))
}

/// Only the trivial cases: shrink in place, or a move the allocator
/// happens to satisfy.
pub(super) fn sys_mremap(
    addr: usize,
    old_len: usize,
    new_len: usize,
    _flags: u32,
) -> Result<SyscallReturn> {
    if new_len <= old_len {
        if new_len < old_len {
            current_vm()?.unmap_region(addr + new_len, old_len - new_len)?;
        }
        return Ok(SyscallReturn::Return(addr as i32));
    }
    return_errno_with_message!(Errno::ENOMEM, "growing mremap is not supported")
}

pub(super) fn sys_madvise(_addr: usize, _len: usize, _advice: u32) -> Result<SyscallReturn> {
    // Advice is free to ignore.
    Ok(SyscallReturn::Return(0))
}
