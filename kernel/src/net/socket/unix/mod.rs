//! AF_UNIX sockets.
//!
//! Path-named sockets bind a socket-type inode on the filesystem and
//! register in a kernel table keyed by the absolute path; connect and
//! sendto resolve peers through that table.

pub mod datagram;
pub mod stream;

pub use datagram::UnixDgramSocket;
pub use stream::{socketpair as unix_socketpair, UnixStreamSocket};

use super::SocketAddr;
use crate::{
    fs::{
        fs_resolver::{FsPath, AT_FDCWD},
        utils::{InodeMode, InodeType},
    },
    prelude::*,
};

pub(super) fn expect_unix(addr: &SocketAddr) -> Result<String> {
    match addr {
        SocketAddr::Unix(path) if !path.is_empty() => Ok(path.clone()),
        SocketAddr::Unix(_) => return_errno_with_message!(Errno::EINVAL, "empty socket path"),
        _ => return_errno_with_message!(Errno::EAFNOSUPPORT, "expected a unix address"),
    }
}

/// Create the socket inode for a bound path. Without a rooted
/// filesystem context (early boot) the name lives only in the
/// binding table.
pub(super) fn create_socket_inode(path: &str) -> Result<()> {
    let Some(current) = crate::process::current_opt() else {
        return Ok(());
    };
    let fs = current.fs();
    let resolver = fs.read();
    if resolver.root().is_err() {
        return Ok(());
    }
    let fs_path = FsPath::new(AT_FDCWD, path)?;
    let (dir, name) = resolver.lookup_dir_and_base(&fs_path)?;
    match dir.create(
        name,
        InodeType::Socket,
        InodeMode::from_bits_truncate(0o777 & !resolver.umask()),
    ) {
        Ok(_) => Ok(()),
        Err(err) if err.error() == Errno::EEXIST => {
            return_errno_with_message!(Errno::EADDRINUSE, "socket path exists")
        }
        Err(err) => Err(err),
    }
}
