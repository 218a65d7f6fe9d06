#![allow(unused)]

pub(crate) use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet, VecDeque},
    ffi::CString,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::{any::Any, ffi::CStr, fmt::Debug};

pub(crate) use bitflags::bitflags;
pub(crate) use int_to_c_enum::TryFromInt;
pub(crate) use lazy_static::lazy_static;
pub(crate) use log::{debug, error, info, trace, warn};

pub(crate) use crate::{
    error::{Errno, Error},
    mm::{Paddr, Vaddr, PAGE_SIZE},
    sync::{Mutex, MutexGuard, RwLock, SpinLock, SpinLockGuard},
};

/// return current process
#[macro_export]
macro_rules! current {
    () => {
        $crate::process::current()
    };
}

pub(crate) use crate::{current, return_errno, return_errno_with_message};
pub(crate) type Result<T> = core::result::Result<T, Error>;
