//! FIFOs: pipes named by a filesystem inode. Every open of the same
//! inode reaches the same in-kernel pipe.

use super::{
    pipe::{new_pipe_pair, PipeReader, PipeWriter},
    utils::{AccessMode, Inode},
};
use crate::{fs::file_handle::FileLike, prelude::*};

struct FifoEnds {
    reader: Weak<PipeReader>,
    writer: Weak<PipeWriter>,
}

lazy_static! {
    /// Live pipe ends keyed by inode address; entries whose ends are
    /// both gone are pruned on the next open.
    static ref FIFOS: SpinLock<BTreeMap<usize, FifoEnds>> = SpinLock::new(BTreeMap::new());
}

/// Open the pipe behind a `NamedPipe` inode.
pub fn open_fifo(inode: &Arc<dyn Inode>, access_mode: AccessMode) -> Result<Arc<dyn FileLike>> {
    let key = Arc::as_ptr(inode) as *const () as usize;
    let mut fifos = FIFOS.lock();
    fifos.retain(|_, ends| {
        ends.reader.strong_count() > 0 || ends.writer.strong_count() > 0
    });
    let (reader, writer) = match fifos.get(&key) {
        Some(ends) => match (ends.reader.upgrade(), ends.writer.upgrade()) {
            (Some(reader), Some(writer)) => (reader, writer),
            _ => {
                let (reader, writer) = new_pipe_pair();
                fifos.insert(
                    key,
                    FifoEnds {
                        reader: Arc::downgrade(&reader),
                        writer: Arc::downgrade(&writer),
                    },
                );
                (reader, writer)
            }
        },
        None => {
            let (reader, writer) = new_pipe_pair();
            fifos.insert(
                key,
                FifoEnds {
                    reader: Arc::downgrade(&reader),
                    writer: Arc::downgrade(&writer),
                },
            );
            (reader, writer)
        }
    };
    match access_mode {
        AccessMode::O_RDONLY => Ok(reader as Arc<dyn FileLike>),
        AccessMode::O_WRONLY => Ok(writer as Arc<dyn FileLike>),
        AccessMode::O_RDWR => {
            return_errno_with_message!(Errno::EINVAL, "fifo cannot be opened read-write")
        }
    }
}
