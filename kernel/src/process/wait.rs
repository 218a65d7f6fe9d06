use super::{process_filter::ProcessFilter, stopped_wait_status, table, Pid, Process};
use crate::prelude::*;

bitflags! {
    pub struct WaitOptions: u32 {
        const WNOHANG    = 1;
        const WUNTRACED  = 2;
        const WCONTINUED = 8;
    }
}

enum WaitOutcome {
    Reaped(Pid, u32),
    Stopped(Pid, u32),
    NotReady,
}

/// Wait for a child matching `filter` to exit (or stop, with
/// `WUNTRACED`). Returns `None` when `WNOHANG` found nothing; `ECHILD`
/// when no living child matches at all.
pub fn wait_child_exit(
    filter: ProcessFilter,
    options: WaitOptions,
) -> Result<Option<(Pid, u32)>> {
    let current = current!();
    let outcome: Result<WaitOutcome> = current.children_wait.wait_until(|| {
        let matched: Vec<Arc<Process>> = {
            let children = current.children().lock();
            children
                .values()
                .filter(|child| filter.matches(child))
                .cloned()
                .collect()
        };
        if matched.is_empty() {
            return Some(Err(Error::new(Errno::ECHILD)));
        }
        if let Some(zombie) = matched.iter().find(|child| child.is_zombie()) {
            let status = zombie
                .exit_status()
                .expect("zombie without exit status")
                .as_wait_status();
            return Some(Ok(WaitOutcome::Reaped(zombie.pid(), status)));
        }
        if options.contains(WaitOptions::WUNTRACED) {
            for child in &matched {
                if let Some(num) = child.take_unreported_stop() {
                    return Some(Ok(WaitOutcome::Stopped(
                        child.pid(),
                        stopped_wait_status(num),
                    )));
                }
            }
        }
        if options.contains(WaitOptions::WNOHANG) {
            return Some(Ok(WaitOutcome::NotReady));
        }
        None
    })?;

    match outcome? {
        WaitOutcome::Reaped(pid, status) => {
            reap(&current, pid);
            Ok(Some((pid, status)))
        }
        WaitOutcome::Stopped(pid, status) => Ok(Some((pid, status))),
        WaitOutcome::NotReady => Ok(None),
    }
}

/// Free the reaped child's descriptor: out of the parent's child list
/// and out of the task table.
fn reap(parent: &Arc<Process>, pid: Pid) {
    parent.children().lock().remove(&pid);
    table::remove(pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{
        self, signal::constants::SIGSTOP, ProcessBuilder, TaskState, TermStatus,
    };

    fn with_current<R>(task: &Arc<Process>, f: impl FnOnce() -> R) -> R {
        process::set_current(Some(task.clone()));
        let res = f();
        process::set_current(None);
        res
    }

    #[test]
    fn wnohang_returns_none_while_child_lives() {
        let _guard = crate::mm::test_util::serialize_test();
        let parent = ProcessBuilder::new_kernel_stub().build().unwrap();
        let child = ProcessBuilder::new_kernel_stub()
            .parent(Arc::downgrade(&parent))
            .build()
            .unwrap();
        let res = with_current(&parent, || {
            wait_child_exit(ProcessFilter::Any, WaitOptions::WNOHANG)
        })
        .unwrap();
        assert_eq!(res, None);
        process::table::remove(child.pid());
        process::table::remove(parent.pid());
    }

    #[test]
    fn zombie_child_is_reaped_with_status() {
        let _guard = crate::mm::test_util::serialize_test();
        let parent = ProcessBuilder::new_kernel_stub().build().unwrap();
        let child = ProcessBuilder::new_kernel_stub()
            .parent(Arc::downgrade(&parent))
            .build()
            .unwrap();
        child.set_exit_status(TermStatus::Exited(7));
        child.set_state(TaskState::Zombie);

        let res = with_current(&parent, || {
            wait_child_exit(ProcessFilter::Any, WaitOptions::WNOHANG)
        })
        .unwrap();
        assert_eq!(res, Some((child.pid(), 7 << 8)));
        // Reaped: gone from both the child list and the task table.
        assert!(parent.children().lock().is_empty());
        assert!(process::table::get(child.pid()).is_none());
        process::table::remove(parent.pid());
    }

    #[test]
    fn no_matching_child_is_echild() {
        let _guard = crate::mm::test_util::serialize_test();
        let parent = ProcessBuilder::new_kernel_stub().build().unwrap();
        let err = with_current(&parent, || {
            wait_child_exit(ProcessFilter::Any, WaitOptions::WNOHANG)
        })
        .unwrap_err();
        assert_eq!(err.error(), Errno::ECHILD);
        process::table::remove(parent.pid());
    }

    #[test]
    fn wuntraced_reports_stop_once() {
        let _guard = crate::mm::test_util::serialize_test();
        let parent = ProcessBuilder::new_kernel_stub().build().unwrap();
        let child = ProcessBuilder::new_kernel_stub()
            .parent(Arc::downgrade(&parent))
            .build()
            .unwrap();
        child.mark_stopped(SIGSTOP);

        let opts = WaitOptions::WNOHANG | WaitOptions::WUNTRACED;
        let res =
            with_current(&parent, || wait_child_exit(ProcessFilter::Any, opts)).unwrap();
        assert_eq!(res, Some((child.pid(), (19 << 8) | 0x7f)));
        // The same stop is not reported twice.
        let res =
            with_current(&parent, || wait_child_exit(ProcessFilter::Any, opts)).unwrap();
        assert_eq!(res, None);
        process::table::remove(child.pid());
        process::table::remove(parent.pid());
    }
}
