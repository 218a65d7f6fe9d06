//! Anonymous pipes.

use crate::{
    events::{IoEvents, Pollee, Poller},
    fs::{
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, Metadata, StatusFlags},
    },
    prelude::*,
    process::signal::{constants::SIGPIPE, signals::kernel::KernelSignal},
    util::ring_buffer::RingBuffer,
};
use core::sync::atomic::{AtomicU32, Ordering};

pub const PIPE_CAPACITY: usize = 4096;

struct PipeState {
    buf: RingBuffer<u8>,
    readers: usize,
    writers: usize,
}

struct PipeShared {
    state: SpinLock<PipeState>,
    read_side: Pollee,
    write_side: Pollee,
}

impl PipeShared {
    fn update_events(&self) {
        let state = self.state.lock_irq_disabled();
        if state.buf.is_empty() {
            self.read_side.del_events(IoEvents::IN);
        } else {
            self.read_side.add_events(IoEvents::IN);
        }
        if state.buf.is_full() {
            self.write_side.del_events(IoEvents::OUT);
        } else {
            self.write_side.add_events(IoEvents::OUT);
        }
        if state.writers == 0 {
            self.read_side.add_events(IoEvents::HUP);
        }
        if state.readers == 0 {
            self.write_side.add_events(IoEvents::ERR);
        }
    }
}

pub struct PipeReader {
    shared: Arc<PipeShared>,
    status_flags: AtomicU32,
}

pub struct PipeWriter {
    shared: Arc<PipeShared>,
    status_flags: AtomicU32,
}

/// A connected pipe pair.
pub fn new_pipe_pair() -> (Arc<PipeReader>, Arc<PipeWriter>) {
    let shared = Arc::new(PipeShared {
        state: SpinLock::new(PipeState {
            buf: RingBuffer::new(PIPE_CAPACITY),
            readers: 1,
            writers: 1,
        }),
        read_side: Pollee::new(IoEvents::empty()),
        write_side: Pollee::new(IoEvents::OUT),
    });
    (
        Arc::new(PipeReader {
            shared: shared.clone(),
            status_flags: AtomicU32::new(0),
        }),
        Arc::new(PipeWriter {
            shared,
            status_flags: AtomicU32::new(0),
        }),
    )
}

fn pipe_metadata() -> Metadata {
    Metadata {
        type_: crate::fs::utils::InodeType::NamedPipe,
        ..Metadata::new_file(0, InodeMode::from_bits_truncate(0o600), PIPE_CAPACITY)
    }
}

impl FileLike for PipeReader {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut state = self.shared.state.lock_irq_disabled();
                if !state.buf.is_empty() {
                    let read = state.buf.pop_slice(buf);
                    drop(state);
                    self.shared.update_events();
                    return Ok(read);
                }
                if state.writers == 0 {
                    return Ok(0);
                }
            }
            if self.status_flags().contains(StatusFlags::O_NONBLOCK) {
                return_errno_with_message!(Errno::EAGAIN, "pipe is empty");
            }
            let poller = Poller::new();
            let events = self
                .shared
                .read_side
                .poll(IoEvents::IN | IoEvents::HUP, Some(&poller));
            if events.is_empty() {
                poller.wait()?;
            }
        }
    }

    fn metadata(&self) -> Metadata {
        pipe_metadata()
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.shared.read_side.poll(mask, poller)
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDONLY
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.state.lock_irq_disabled().readers -= 1;
        self.shared.update_events();
    }
}

impl FileLike for PipeWriter {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        loop {
            {
                let mut state = self.shared.state.lock_irq_disabled();
                if state.readers == 0 {
                    drop(state);
                    if let Some(current) = crate::process::current_opt() {
                        current.enqueue_signal(Box::new(KernelSignal::new(SIGPIPE)));
                    }
                    return_errno_with_message!(Errno::EPIPE, "no readers left");
                }
                written += state.buf.push_slice(&buf[written..]);
                if written > 0 {
                    drop(state);
                    self.shared.update_events();
                    if written == buf.len() {
                        return Ok(written);
                    }
                    // Partial writes return early for nonblocking
                    // callers below.
                }
            }
            if written == buf.len() {
                return Ok(written);
            }
            if self.status_flags().contains(StatusFlags::O_NONBLOCK) {
                if written > 0 {
                    return Ok(written);
                }
                return_errno_with_message!(Errno::EAGAIN, "pipe is full");
            }
            let poller = Poller::new();
            let events = self
                .shared
                .write_side
                .poll(IoEvents::OUT | IoEvents::ERR, Some(&poller));
            if events.is_empty() {
                poller.wait()?;
            }
        }
    }

    fn metadata(&self) -> Metadata {
        pipe_metadata()
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.shared.write_side.poll(mask, poller)
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_WRONLY
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.state.lock_irq_disabled().writers -= 1;
        self.shared.update_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_flow_reader_ward() {
        let (reader, writer) = new_pipe_pair();
        assert_eq!(writer.write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn read_after_writer_gone_is_eof() {
        let (reader, writer) = new_pipe_pair();
        writer.write(b"x").unwrap();
        drop(writer);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_without_reader_is_epipe() {
        let (reader, writer) = new_pipe_pair();
        drop(reader);
        assert_eq!(writer.write(b"x").unwrap_err().error(), Errno::EPIPE);
    }

    #[test]
    fn nonblocking_empty_read_is_eagain() {
        let (reader, writer) = new_pipe_pair();
        reader.set_status_flags(StatusFlags::O_NONBLOCK).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap_err().error(), Errno::EAGAIN);
        drop(writer);
    }

    #[test]
    fn poll_tracks_buffer_state() {
        let (reader, writer) = new_pipe_pair();
        assert_eq!(reader.poll(IoEvents::IN, None), IoEvents::empty());
        writer.write(b"data").unwrap();
        assert_eq!(reader.poll(IoEvents::IN, None), IoEvents::IN);
        assert_eq!(writer.poll(IoEvents::OUT, None), IoEvents::OUT);
    }
}
