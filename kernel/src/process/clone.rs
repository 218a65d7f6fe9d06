use super::{credentials::Credentials, table, Process, ProcessBuilder};
use crate::{arch::UserContext, prelude::*, sched};

bitflags! {
    pub struct CloneFlags: u32 {
        const CLONE_VM      = 0x00000100; /* Address space shared with the parent. */
        const CLONE_FS      = 0x00000200; /* Root/cwd/umask shared. */
        const CLONE_FILES   = 0x00000400; /* Open-file table shared. */
        const CLONE_SIGHAND = 0x00000800; /* Signal action table shared. */
        const CLONE_PTRACE  = 0x00002000;
        const CLONE_VFORK   = 0x00004000;
        const CLONE_PARENT  = 0x00008000;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CloneArgs {
    pub flags: CloneFlags,
    pub child_stack: u32,
}

impl CloneArgs {
    pub const fn for_fork() -> Self {
        CloneArgs {
            flags: CloneFlags::empty(),
            child_stack: 0,
        }
    }

    pub const fn new(flags: CloneFlags, child_stack: u32) -> Self {
        CloneArgs { flags, child_stack }
    }
}

/// Duplicate the current process. Each shareable part is either
/// referenced or deep-copied according to the clone flags; the child's
/// saved frame is the parent's with a zero return value.
pub fn clone_process(
    parent: &Arc<Process>,
    parent_ctx: &UserContext,
    args: CloneArgs,
) -> Result<Arc<Process>> {
    let flags = args.flags;

    let vm = {
        let parent_vm = parent
            .vm()
            .ok_or(Error::with_message(Errno::EINVAL, "fork of kernel task"))?;
        if flags.contains(CloneFlags::CLONE_VM) {
            parent_vm
        } else {
            parent_vm.fork()?
        }
    };

    let file_table = if flags.contains(CloneFlags::CLONE_FILES) {
        parent.file_table()
    } else {
        Arc::new(Mutex::new(parent.file_table().lock().duplicate()))
    };

    let fs = if flags.contains(CloneFlags::CLONE_FS) {
        parent.fs()
    } else {
        let copied = parent.fs().read().clone();
        Arc::new(RwLock::new(copied))
    };

    let sig_dispositions = if flags.contains(CloneFlags::CLONE_SIGHAND) {
        parent.sig_dispositions()
    } else {
        let copied = *parent.sig_dispositions().lock();
        Arc::new(Mutex::new(copied))
    };

    // The child resumes at the same user instruction with eax = 0; an
    // explicit stack pointer serves thread-style clones.
    let mut child_ctx = *parent_ctx;
    child_ctx.set_syscall_ret(0);
    if args.child_stack != 0 {
        child_ctx.set_stack_pointer(args.child_stack);
    }

    let child = ProcessBuilder::new(&parent.comm())
        .parent(Arc::downgrade(parent))
        .executable_path(&parent.executable_path())
        .vm(vm)
        .file_table(file_table)
        .fs(fs)
        .sig_dispositions(sig_dispositions)
        .sig_mask(parent.sig_mask())
        .credentials(Credentials::inherit(parent.creds()))
        .rlimits(parent.rlimits().lock().clone())
        .job_control(parent.pgid(), parent.sid())
        .tty(parent.tty())
        .user_ctx(child_ctx)
        .build()?;

    child.set_priority(parent.priority());
    // Split the remaining slice with the child, old-fork style.
    let half = parent.counter() / 2;
    parent.set_counter(half);
    child.set_counter(half);

    sched::enqueue(&child);
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mm::{VmPerms, VmaBacking, VmaFlags, PAGE_SIZE},
        process::{self, TaskState},
    };

    fn user_stub() -> Arc<Process> {
        let vm = crate::mm::Vm::new().unwrap();
        ProcessBuilder::new("stub").vm(vm).build().unwrap()
    }

    #[test]
    fn fork_child_sees_parent_memory_and_returns_zero() {
        let _guard = crate::mm::test_util::serialize_test();
        let parent = user_stub();
        let vm = parent.vm().unwrap();
        let addr = vm
            .map_region(
                0,
                PAGE_SIZE,
                VmPerms::READ | VmPerms::WRITE,
                VmaFlags::empty(),
                VmaBacking::Anonymous,
                false,
            )
            .unwrap();
        vm.write_bytes(addr, b"forked").unwrap();

        let mut ctx = UserContext::default();
        ctx.eax = 9999;
        let child = clone_process(&parent, &ctx, CloneArgs::for_fork()).unwrap();

        assert_eq!(child.user_ctx().syscall_ret(), 0);
        assert_eq!(child.parent().unwrap().pid(), parent.pid());
        assert!(parent.children().lock().contains_key(&child.pid()));
        let mut buf = [0u8; 6];
        child.vm().unwrap().read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"forked");
        assert_eq!(child.state(), TaskState::Running);

        crate::sched::remove_from_run_queue(&child);
        process::table::remove(child.pid());
        process::table::remove(parent.pid());
    }

    #[test]
    fn clone_files_shares_the_table() {
        let _guard = crate::mm::test_util::serialize_test();
        let parent = user_stub();
        let ctx = UserContext::default();
        let shared = clone_process(
            &parent,
            &ctx,
            CloneArgs::new(CloneFlags::CLONE_FILES, 0),
        )
        .unwrap();
        let private = clone_process(&parent, &ctx, CloneArgs::for_fork()).unwrap();

        assert!(Arc::ptr_eq(&parent.file_table(), &shared.file_table()));
        assert!(!Arc::ptr_eq(&parent.file_table(), &private.file_table()));

        for task in [shared, private] {
            crate::sched::remove_from_run_queue(&task);
            process::table::remove(task.pid());
        }
        process::table::remove(parent.pid());
    }
}
