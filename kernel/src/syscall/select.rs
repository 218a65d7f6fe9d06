use super::SyscallReturn;
use crate::{
    events::{IoEvents, Poller},
    prelude::*,
    sched,
    util::user::{read_val_from_user, write_val_to_user},
};

const FD_SETSIZE: usize = 1024;

struct FdSet {
    bits: [u32; FD_SETSIZE / 32],
}

impl FdSet {
    fn read(addr: Vaddr, nfds: usize) -> Result<Self> {
        let mut bits = [0u32; FD_SETSIZE / 32];
        if addr != 0 {
            for index in 0..nfds.div_ceil(32) {
                bits[index] = read_val_from_user(addr + index * 4)?;
            }
        }
        Ok(Self { bits })
    }

    fn contains(&self, fd: usize) -> bool {
        self.bits[fd / 32] & (1 << (fd % 32)) != 0
    }

    fn set(&mut self, fd: usize) {
        self.bits[fd / 32] |= 1 << (fd % 32);
    }

    fn write(&self, addr: Vaddr, nfds: usize) -> Result<()> {
        if addr == 0 {
            return Ok(());
        }
        for index in 0..nfds.div_ceil(32) {
            write_val_to_user(addr + index * 4, &self.bits[index])?;
        }
        Ok(())
    }
}

pub(super) fn sys_select(
    nfds: usize,
    read_addr: Vaddr,
    write_addr: Vaddr,
    except_addr: Vaddr,
    timeout_addr: Vaddr,
) -> Result<SyscallReturn> {
    if nfds > FD_SETSIZE {
        return_errno!(Errno::EINVAL);
    }
    let current = current!();
    let read_set = FdSet::read(read_addr, nfds)?;
    let write_set = FdSet::read(write_addr, nfds)?;
    let deadline = if timeout_addr != 0 {
        let secs: u32 = read_val_from_user(timeout_addr)?;
        let usecs: u32 = read_val_from_user(timeout_addr + 4)?;
        let ticks =
            secs as u64 * crate::time::HZ + (usecs as u64 * crate::time::HZ).div_ceil(1_000_000);
        Some(crate::time::jiffies() + ticks)
    } else {
        None
    };

    loop {
        let poller = Poller::new();
        let mut ready = 0;
        let mut read_out = FdSet { bits: [0; FD_SETSIZE / 32] };
        let mut write_out = FdSet { bits: [0; FD_SETSIZE / 32] };
        for fd in 0..nfds {
            let wants_read = read_set.contains(fd);
            let wants_write = write_set.contains(fd);
            if !wants_read && !wants_write {
                continue;
            }
            let file = current.file_table().lock().get(fd as i32)?;
            let mut mask = IoEvents::empty();
            if wants_read {
                mask |= IoEvents::IN | IoEvents::HUP;
            }
            if wants_write {
                mask |= IoEvents::OUT;
            }
            let got = file.poll(mask, Some(&poller));
            if wants_read && got.intersects(IoEvents::IN | IoEvents::HUP) {
                read_out.set(fd);
                ready += 1;
            }
            if wants_write && got.contains(IoEvents::OUT) {
                write_out.set(fd);
                ready += 1;
            }
        }
        if ready > 0 || deadline.is_some_and(|d| crate::time::jiffies() >= d) {
            read_out.write(read_addr, nfds)?;
            write_out.write(write_addr, nfds)?;
            // Exceptional conditions are not tracked.
            FdSet { bits: [0; FD_SETSIZE / 32] }.write(except_addr, nfds)?;
            return Ok(SyscallReturn::Return(ready));
        }
        match deadline {
            Some(deadline) => {
                let now = crate::time::jiffies();
                if deadline > now {
                    sched::schedule_timeout(deadline - now);
                }
            }
            None => poller.wait()?,
        }
        if current.has_pending_signal() {
            return_errno!(Errno::ERESTARTSYS);
        }
        #[cfg(test)]
        return Ok(SyscallReturn::Return(0));
    }
}
