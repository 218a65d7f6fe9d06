use super::SyscallReturn;
use crate::{
    fs::{
        file_handle::FileLike,
        file_table::FdFlags,
        fs_resolver::{FsPath, AT_FDCWD},
        inode_handle::InodeHandle,
        named_pipe,
        utils::{AccessMode, CreationFlags, InodeType},
    },
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_open(path_addr: Vaddr, flags: u32, mode: u16) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let path = path.to_str()?;
    let current = current!();

    let handle = {
        let fs = current.fs();
        let resolver = fs.read();
        resolver.open(&FsPath::new(AT_FDCWD, path)?, flags, mode)?
    };

    let creation = CreationFlags::from_bits_truncate(flags);
    let file: Arc<dyn FileLike> = match handle.path().type_() {
        InodeType::NamedPipe => {
            named_pipe::open_fifo(handle.path().inode(), handle.access_mode())?
        }
        InodeType::Socket => return_errno!(Errno::ENXIO),
        _ => match handle.substituted_file()? {
            Some(substitute) => {
                // A terminal open may pick up the controlling tty.
                if !creation.contains(CreationFlags::O_NOCTTY) {
                    if let Some(tty_file) =
                        substitute.downcast_ref::<crate::device::tty::TtyFile>()
                    {
                        tty_file.tty().assign_controlling(&current);
                    }
                }
                substitute
            }
            None => Arc::new(handle),
        },
    };

    let fd_flags = if creation.contains(CreationFlags::O_CLOEXEC) {
        FdFlags::CLOEXEC
    } else {
        FdFlags::empty()
    };
    let fd = current.file_table().lock().insert(file, fd_flags)?;
    Ok(SyscallReturn::Return(fd))
}
