#![allow(dead_code)]

/// Error number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,    /* Operation not permitted */
    ENOENT = 2,   /* No such file or directory */
    ESRCH = 3,    /* No such process */
    EINTR = 4,    /* Interrupted system call */
    EIO = 5,      /* I/O error */
    ENXIO = 6,    /* No such device or address */
    E2BIG = 7,    /* Argument list too long */
    ENOEXEC = 8,  /* Exec format error */
    EBADF = 9,    /* Bad file number */
    ECHILD = 10,  /* No child processes */
    EAGAIN = 11,  /* Try again */
    ENOMEM = 12,  /* Out of memory */
    EACCES = 13,  /* Permission denied */
    EFAULT = 14,  /* Bad address */
    ENOTBLK = 15, /* Block device required */
    EBUSY = 16,   /* Device or resource busy */
    EEXIST = 17,  /* File exists */
    EXDEV = 18,   /* Cross-device link */
    ENODEV = 19,  /* No such device */
    ENOTDIR = 20, /* Not a directory */
    EISDIR = 21,  /* Is a directory */
    EINVAL = 22,  /* Invalid argument */
    ENFILE = 23,  /* File table overflow */
    EMFILE = 24,  /* Too many open files */
    ENOTTY = 25,  /* Not a typewriter */
    ETXTBSY = 26, /* Text file busy */
    EFBIG = 27,   /* File too large */
    ENOSPC = 28,  /* No space left on device */
    ESPIPE = 29,  /* Illegal seek */
    EROFS = 30,   /* Read-only file system */
    EMLINK = 31,  /* Too many links */
    EPIPE = 32,   /* Broken pipe */
    EDOM = 33,    /* Math argument out of domain of func */
    ERANGE = 34,  /* Math result not representable */

    EDEADLK = 35,      /* Resource deadlock would occur */
    ENAMETOOLONG = 36, /* File name too long */
    ENOLCK = 37,       /* No record locks available */
    ENOSYS = 38,       /* Invalid system call number */
    ENOTEMPTY = 39,    /* Directory not empty */
    ELOOP = 40,        /* Too many symbolic links encountered */
    ENOMSG = 42,       /* No message of desired type */
    EIDRM = 43,        /* Identifier removed */

    EOVERFLOW = 75, /* Value too large for defined data type */
    EILSEQ = 84,    /* Illegal byte sequence */

    ENOTSOCK = 88,        /* Socket operation on non-socket */
    EDESTADDRREQ = 89,    /* Destination address required */
    EMSGSIZE = 90,        /* Message too long */
    EPROTOTYPE = 91,      /* Protocol wrong type for socket */
    ENOPROTOOPT = 92,     /* Protocol not available */
    EPROTONOSUPPORT = 93, /* Protocol not supported */
    ESOCKTNOSUPPORT = 94, /* Socket type not supported */
    EOPNOTSUPP = 95,      /* Operation not supported on transport endpoint */
    EPFNOSUPPORT = 96,    /* Protocol family not supported */
    EAFNOSUPPORT = 97,    /* Address family not supported by protocol */
    EADDRINUSE = 98,      /* Address already in use */
    EADDRNOTAVAIL = 99,   /* Cannot assign requested address */
    ENETDOWN = 100,       /* Network is down */
    ENETUNREACH = 101,    /* Network is unreachable */
    ENETRESET = 102,      /* Network dropped connection because of reset */
    ECONNABORTED = 103,   /* Software caused connection abort */
    ECONNRESET = 104,     /* Connection reset by peer */
    ENOBUFS = 105,        /* No buffer space available */
    EISCONN = 106,        /* Transport endpoint is already connected */
    ENOTCONN = 107,       /* Transport endpoint is not connected */
    ESHUTDOWN = 108,      /* Cannot send after transport endpoint shutdown */
    ETIMEDOUT = 110,      /* Connection timed out */
    ECONNREFUSED = 111,   /* Connection refused */
    EHOSTDOWN = 112,      /* Host is down */
    EHOSTUNREACH = 113,   /* No route to host */
    EALREADY = 114,       /* Operation already in progress */
    EINPROGRESS = 115,    /* Operation now in progress */
    ESTALE = 116,         /* Stale file handle */

    /* Kernel-internal: the return-to-user path rewinds the trapping
     * instruction so the syscall re-executes. Never leaks to user. */
    ERESTARTSYS = 512,
    /* Kernel-internal: driver had no handler for the ioctl command. */
    ENOIOCTLCMD = 515,
}

/// Error used throughout this crate.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl AsRef<Error> for Error {
    fn as_ref(&self) -> &Error {
        self
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(_: core::str::Utf8Error) -> Self {
        Error::with_message(Errno::EINVAL, "Invalid utf-8 string")
    }
}

impl From<alloc::string::FromUtf8Error> for Error {
    fn from(_: alloc::string::FromUtf8Error) -> Self {
        Error::with_message(Errno::EINVAL, "Invalid utf-8 string")
    }
}

impl From<core::ffi::FromBytesUntilNulError> for Error {
    fn from(_: core::ffi::FromBytesUntilNulError) -> Self {
        Error::with_message(Errno::E2BIG, "Cannot find null in cstring")
    }
}

impl From<alloc::ffi::NulError> for Error {
    fn from(_: alloc::ffi::NulError) -> Self {
        Error::with_message(Errno::E2BIG, "Cannot find null in cstring")
    }
}

impl From<int_to_c_enum::TryFromIntError> for Error {
    fn from(_: int_to_c_enum::TryFromIntError) -> Self {
        Error::with_message(Errno::EINVAL, "Invalid enum value")
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}
