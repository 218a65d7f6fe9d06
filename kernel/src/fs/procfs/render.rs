//! Content generators for procfs leaves.

use alloc::format;

use super::{GlobalLeaf, PidLeaf};
use crate::{
    mm::{frame, PAGE_SIZE},
    prelude::*,
    process::{table, Process, TaskState},
    time,
};

pub(super) fn global(leaf: GlobalLeaf) -> String {
    match leaf {
        GlobalLeaf::Cpuinfo => String::from(
            "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\nmodel name\t: \
             i586-class processor\nflags\t\t: fpu tsc\n",
        ),
        GlobalLeaf::Meminfo => {
            let total = frame::total_frames() * PAGE_SIZE / 1024;
            let free = frame::free_frames() * PAGE_SIZE / 1024;
            format!(
                "MemTotal: {:>10} kB\nMemFree:  {:>10} kB\nMemAvailable: {:>6} kB\n",
                total, free, free
            )
        }
        GlobalLeaf::Uptime => {
            let secs = time::uptime_secs();
            format!("{}.{:02} {}.{:02}\n", secs, 0, secs, 0)
        }
        GlobalLeaf::Loadavg => {
            let running = count_state(TaskState::Running);
            format!("0.00 0.00 0.00 {}/{} {}\n", running, table::len(), 0)
        }
        GlobalLeaf::Filesystems => {
            let mut out = String::new();
            for name in crate::fs::registered_fs_types() {
                let nodev = matches!(name.as_str(), "tmpfs" | "proc" | "devpts");
                if nodev {
                    out.push_str("nodev\t");
                } else {
                    out.push('\t');
                }
                out.push_str(&name);
                out.push('\n');
            }
            out
        }
        GlobalLeaf::Version => String::from("Ferrite version 0.1.0 (i586)\n"),
        GlobalLeaf::Mounts => {
            // A faithful mounts walk needs the per-mount source; the
            // root plus the standard trees is what the system mounts.
            String::from("/dev/root / ext2 rw 0 0\nproc /proc proc rw 0 0\n")
        }
    }
}

fn count_state(state: TaskState) -> usize {
    let mut count = 0;
    table::for_each(|p| {
        if p.state() == state {
            count += 1;
        }
    });
    count
}

fn state_char(process: &Arc<Process>) -> char {
    match process.state() {
        TaskState::Running => 'R',
        TaskState::Sleeping => 'S',
        TaskState::Stopped => 'T',
        TaskState::Zombie => 'Z',
    }
}

pub(super) fn pid_leaf(process: &Arc<Process>, leaf: PidLeaf) -> String {
    match leaf {
        PidLeaf::Stat => {
            let ppid = process.parent().map(|p| p.pid()).unwrap_or(0);
            let rss = process.vm().map(|vm| vm.rss()).unwrap_or(0);
            format!(
                "{} ({}) {} {} {} {} 0 0 0 0 {} {} {} {} 0 0 {} {} 0 0 {}\n",
                process.pid(),
                process.comm(),
                state_char(process),
                ppid,
                process.pgid(),
                process.sid(),
                process.rusage().min_flt.load(core::sync::atomic::Ordering::Relaxed),
                process.rusage().maj_flt.load(core::sync::atomic::Ordering::Relaxed),
                process.rusage().utime_ticks(),
                process.rusage().stime_ticks(),
                process.priority(),
                process.counter(),
                rss,
            )
        }
        PidLeaf::Status => {
            let ppid = process.parent().map(|p| p.pid()).unwrap_or(0);
            let creds = process.creds();
            format!(
                "Name:\t{}\nState:\t{}\nPid:\t{}\nPPid:\t{}\nUid:\t{}\t{}\nGid:\t{}\t{}\n\
                 VmRSS:\t{} kB\nSigPnd:\t{:016x}\nSigBlk:\t{:016x}\n",
                process.comm(),
                state_char(process),
                process.pid(),
                ppid,
                creds.uid(),
                creds.euid(),
                creds.gid(),
                creds.egid(),
                process.vm().map(|vm| vm.rss() * PAGE_SIZE / 1024).unwrap_or(0),
                process.pending_signals().as_u64(),
                process.sig_mask().as_u64(),
            )
        }
        PidLeaf::Cmdline => read_vm_range(process, |l| (l.arg_start, l.arg_end)),
        PidLeaf::Environ => read_vm_range(process, |l| (l.env_start, l.env_end)),
        PidLeaf::Statm => {
            let rss = process.vm().map(|vm| vm.rss()).unwrap_or(0);
            format!("{} {} 0 0 0 0 0\n", rss, rss)
        }
    }
}

/// NUL-separated argv/envp straight out of the task's stack pages.
fn read_vm_range(
    process: &Arc<Process>,
    range: impl FnOnce(&crate::mm::vm::VmLayout) -> (usize, usize),
) -> String {
    let Some(vm) = process.vm() else {
        return String::new();
    };
    let layout = vm.layout();
    let (start, end) = range(&layout);
    if start == 0 || end <= start || end - start > 4096 {
        return String::new();
    }
    let mut buf = vec![0u8; end - start];
    if vm.read_bytes(start, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
