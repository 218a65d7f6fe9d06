use super::SyscallReturn;
use crate::{
    fs::utils::{DirentVisitor, InodeType},
    prelude::*,
    util::user::write_bytes_to_user,
};

/// Serializes entries into the user's `linux_dirent64` buffer.
struct DirentWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl DirentWriter {
    fn type_byte(type_: InodeType) -> u8 {
        match type_ {
            InodeType::NamedPipe => 1,
            InodeType::CharDevice => 2,
            InodeType::Dir => 4,
            InodeType::BlockDevice => 6,
            InodeType::File => 8,
            InodeType::SymLink => 10,
            InodeType::Socket => 12,
        }
    }
}

impl DirentVisitor for DirentWriter {
    fn visit(&mut self, name: &str, ino: u64, type_: InodeType, offset: usize) -> Result<()> {
        // d_ino(8) d_off(8) d_reclen(2) d_type(1) name nul, padded to 8.
        let reclen = (19 + name.len() + 1 + 7) & !7;
        if self.buf.len() + reclen > self.capacity {
            return_errno!(Errno::EINVAL);
        }
        let start = self.buf.len();
        self.buf.resize(start + reclen, 0);
        self.buf[start..start + 8].copy_from_slice(&ino.to_le_bytes());
        self.buf[start + 8..start + 16].copy_from_slice(&(offset as u64).to_le_bytes());
        self.buf[start + 16..start + 18].copy_from_slice(&(reclen as u16).to_le_bytes());
        self.buf[start + 18] = Self::type_byte(type_);
        self.buf[start + 19..start + 19 + name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }
}

pub(super) fn sys_getdents64(fd: i32, buf_addr: Vaddr, count: usize) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let mut writer = DirentWriter {
        buf: Vec::new(),
        capacity: count,
    };
    // A full buffer stops iteration mid-way; the handle offset stays
    // on the last entry that fit.
    file.readdir(&mut writer)?;
    write_bytes_to_user(buf_addr, &writer.buf)?;
    Ok(SyscallReturn::Return(writer.buf.len() as i32))
}
