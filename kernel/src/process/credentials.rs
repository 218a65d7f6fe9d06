use core::sync::atomic::{AtomicU32, Ordering};

use crate::prelude::*;

pub type Uid = u32;
pub type Gid = u32;

/// Per-process user identity. Saved ids and capabilities are not
/// modeled; euid 0 is almighty.
#[derive(Debug)]
pub struct Credentials {
    uid: AtomicU32,
    euid: AtomicU32,
    gid: AtomicU32,
    egid: AtomicU32,
    groups: SpinLock<Vec<Gid>>,
}

impl Credentials {
    pub fn new_root() -> Self {
        Self {
            uid: AtomicU32::new(0),
            euid: AtomicU32::new(0),
            gid: AtomicU32::new(0),
            egid: AtomicU32::new(0),
            groups: SpinLock::new(Vec::new()),
        }
    }

    pub fn inherit(other: &Credentials) -> Self {
        Self {
            uid: AtomicU32::new(other.uid()),
            euid: AtomicU32::new(other.euid()),
            gid: AtomicU32::new(other.gid()),
            egid: AtomicU32::new(other.egid()),
            groups: SpinLock::new(other.groups()),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid.load(Ordering::Relaxed)
    }

    pub fn euid(&self) -> Uid {
        self.euid.load(Ordering::Relaxed)
    }

    pub fn gid(&self) -> Gid {
        self.gid.load(Ordering::Relaxed)
    }

    pub fn egid(&self) -> Gid {
        self.egid.load(Ordering::Relaxed)
    }

    pub fn groups(&self) -> Vec<Gid> {
        self.groups.lock().clone()
    }

    pub fn is_superuser(&self) -> bool {
        self.euid() == 0
    }

    pub fn set_uid(&self, uid: Uid) -> Result<()> {
        if !self.is_superuser() && uid != self.uid() {
            return_errno!(Errno::EPERM);
        }
        self.uid.store(uid, Ordering::Relaxed);
        self.euid.store(uid, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_gid(&self, gid: Gid) -> Result<()> {
        if !self.is_superuser() && gid != self.gid() {
            return_errno!(Errno::EPERM);
        }
        self.gid.store(gid, Ordering::Relaxed);
        self.egid.store(gid, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_groups(&self, groups: Vec<Gid>) -> Result<()> {
        if !self.is_superuser() {
            return_errno!(Errno::EPERM);
        }
        *self.groups.lock() = groups;
        Ok(())
    }

    /// Whether this identity is in group `gid`.
    pub fn in_group(&self, gid: Gid) -> bool {
        self.egid() == gid || self.groups.lock().contains(&gid)
    }
}
