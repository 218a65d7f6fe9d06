use super::SyscallReturn;
use crate::{
    events::{IoEvents, Poller},
    prelude::*,
    sched,
    util::user::{read_val_from_user, write_val_to_user},
};

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct pollfd_t {
    fd: i32,
    events: i16,
    revents: i16,
}

pub(super) fn sys_poll(fds_addr: Vaddr, nfds: usize, timeout_ms: i32) -> Result<SyscallReturn> {
    if nfds > 1024 {
        return_errno!(Errno::EINVAL);
    }
    let current = current!();
    let mut fds = Vec::with_capacity(nfds);
    for index in 0..nfds {
        let pfd: pollfd_t = read_val_from_user(fds_addr + index * 8)?;
        fds.push(pfd);
    }
    let deadline = if timeout_ms >= 0 {
        Some(crate::time::jiffies() + (timeout_ms as u64 * crate::time::HZ).div_ceil(1000))
    } else {
        None
    };

    loop {
        let poller = Poller::new();
        let mut ready = 0;
        for pfd in fds.iter_mut() {
            pfd.revents = 0;
            if pfd.fd < 0 {
                continue;
            }
            let Ok(file) = current.file_table().lock().get(pfd.fd) else {
                pfd.revents = IoEvents::NVAL.bits() as i16;
                ready += 1;
                continue;
            };
            let mask = IoEvents::from_bits_truncate(pfd.events as u32)
                | IoEvents::ERR
                | IoEvents::HUP;
            let got = file.poll(mask, Some(&poller));
            if !got.is_empty() {
                pfd.revents = got.bits() as i16;
                ready += 1;
            }
        }
        if ready > 0 || deadline.is_some_and(|d| crate::time::jiffies() >= d) {
            for (index, pfd) in fds.iter().enumerate() {
                write_val_to_user(fds_addr + index * 8, pfd)?;
            }
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
        {
            for (index, pfd) in fds.iter().enumerate() {
                write_val_to_user(fds_addr + index * 8, pfd)?;
            }
            return Ok(SyscallReturn::Return(0));
        }
    }
}
