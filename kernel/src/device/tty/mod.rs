//! TTY core: the terminal object tying a line discipline, an output
//! driver, job control and the character-device surface together.

pub mod line_discipline;
pub mod termio;

use core::sync::atomic::{AtomicU32, Ordering};

use line_discipline::{LdiscOutcome, LineDiscipline};
use termio::{termios_t, KernelTermios, WinSize, C_OFLAGS};

use crate::{
    events::{IoEvents, Poller},
    fs::{
        device::{Device, DeviceId, DeviceType},
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    prelude::*,
    process::signal::send_signal_to_group,
};

pub const TCGETS: u32 = 0x5401;
pub const TCSETS: u32 = 0x5402;
pub const TCSETSW: u32 = 0x5403;
pub const TCSETSF: u32 = 0x5404;
pub const TIOCSCTTY: u32 = 0x540e;
pub const TIOCGPGRP: u32 = 0x540f;
pub const TIOCSPGRP: u32 = 0x5410;
pub const TIOCGWINSZ: u32 = 0x5413;
pub const TIOCSWINSZ: u32 = 0x5414;
pub const TIOCNOTTY: u32 = 0x5422;

/// Where processed output bytes go: a console, a serial port, or the
/// pty peer.
pub trait TtyDriver: Send + Sync {
    fn output(&self, buf: &[u8]) -> Result<usize>;

    /// Echo path; defaults to the output path.
    fn echo(&self, buf: &[u8]) {
        let _ = self.output(buf);
    }
}

pub struct Tty {
    index: u32,
    name: String,
    id: DeviceId,
    ldisc: LineDiscipline,
    driver: SpinLock<Option<Arc<dyn TtyDriver>>>,
    fg_pgid: AtomicU32,
    session: AtomicU32,
    /// The pty peer, when this terminal is half of a pair.
    link: SpinLock<Option<Weak<Tty>>>,
    winsize: SpinLock<WinSize>,
    this: Weak<Tty>,
}

impl Tty {
    pub fn new(index: u32, name: &str, id: DeviceId) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            index,
            name: String::from(name),
            id,
            ldisc: LineDiscipline::new(),
            driver: SpinLock::new(None),
            fg_pgid: AtomicU32::new(0),
            session: AtomicU32::new(0),
            link: SpinLock::new(None),
            winsize: SpinLock::new(WinSize {
                ws_row: 25,
                ws_col: 80,
                ..WinSize::default()
            }),
            this: this.clone(),
        })
    }

    fn this(&self) -> Arc<Tty> {
        self.this.upgrade().unwrap()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ldisc(&self) -> &LineDiscipline {
        &self.ldisc
    }

    pub fn set_driver(&self, driver: Arc<dyn TtyDriver>) {
        *self.driver.lock() = Some(driver);
    }

    pub fn set_link(&self, peer: &Arc<Tty>) {
        *self.link.lock() = Some(Arc::downgrade(peer));
    }

    pub fn link(&self) -> Option<Arc<Tty>> {
        self.link.lock().as_ref().and_then(|weak| weak.upgrade())
    }

    pub fn fg_pgid(&self) -> u32 {
        self.fg_pgid.load(Ordering::Relaxed)
    }

    pub fn set_fg_pgid(&self, pgid: u32) {
        self.fg_pgid.store(pgid, Ordering::Relaxed);
    }

    pub fn session(&self) -> u32 {
        self.session.load(Ordering::Relaxed)
    }

    pub fn set_session(&self, sid: u32) {
        self.session.store(sid, Ordering::Relaxed);
    }

    pub fn winsize(&self) -> WinSize {
        *self.winsize.lock()
    }

    pub fn set_winsize(&self, new: WinSize) {
        *self.winsize.lock() = new;
    }

    /// Interrupt input path: raw bytes in, cooked data and foreground
    /// signals out.
    pub fn input_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.ldisc.push_raw(b);
        }
        self.process_input();
    }

    /// The IRQ bottom half: run the cook and act on its outcomes.
    pub fn process_input(&self) {
        let driver = self.driver.lock().clone();
        let outcomes = self.ldisc.cook_raw(|echo_bytes| {
            if let Some(driver) = &driver {
                driver.echo(echo_bytes);
            }
        });
        for outcome in outcomes {
            if let LdiscOutcome::Signal(num) = outcome {
                let pgid = self.fg_pgid();
                if pgid != 0 {
                    send_signal_to_group(pgid, num);
                }
            }
        }
    }

    /// The write path: output filter, then the driver.
    pub fn push_output(&self, buf: &[u8]) -> Result<usize> {
        let termios = self.ldisc.termios();
        let driver = self.driver.lock().clone();
        let Some(driver) = driver else {
            return Ok(buf.len());
        };
        if !termios.c_oflags.contains(C_OFLAGS::OPOST) {
            driver.output(buf)?;
            return Ok(buf.len());
        }
        let mut staged: Vec<u8> = Vec::with_capacity(buf.len() + 16);
        for &b in buf {
            let mut ch = b;
            if termios.c_oflags.contains(C_OFLAGS::OLCUC) && ch.is_ascii_lowercase() {
                ch = ch.to_ascii_uppercase();
            }
            if ch == b'\n' && termios.c_oflags.contains(C_OFLAGS::ONLCR) {
                staged.push(b'\r');
                staged.push(b'\n');
                continue;
            }
            if ch == b'\r' && termios.c_oflags.contains(C_OFLAGS::OCRNL) {
                staged.push(b'\n');
                continue;
            }
            staged.push(ch);
        }
        driver.output(&staged)?;
        Ok(buf.len())
    }

    fn termios_ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
        let current = current!();
        let vm = current.vm().ok_or(Error::new(Errno::EFAULT))?;
        match cmd {
            TCGETS => {
                let raw = self.ldisc.termios().as_raw();
                vm.write_val(arg, &raw)?;
                Ok(0)
            }
            TCSETS | TCSETSW | TCSETSF => {
                let raw: termios_t = vm.read_val(arg)?;
                self.ldisc.set_termios(KernelTermios::from_raw(&raw));
                if cmd == TCSETSF {
                    self.ldisc.drain();
                }
                Ok(0)
            }
            TIOCGPGRP => {
                vm.write_val(arg, &self.fg_pgid())?;
                Ok(0)
            }
            TIOCSPGRP => {
                let pgid: u32 = vm.read_val(arg)?;
                self.set_fg_pgid(pgid);
                Ok(0)
            }
            TIOCGWINSZ => {
                vm.write_val(arg, &self.winsize())?;
                Ok(0)
            }
            TIOCSWINSZ => {
                let new: WinSize = vm.read_val(arg)?;
                self.set_winsize(new);
                Ok(0)
            }
            TIOCSCTTY => {
                self.assign_controlling(&current);
                Ok(0)
            }
            TIOCNOTTY => {
                current.set_tty(None);
                Ok(0)
            }
            _ => return_errno!(Errno::ENOIOCTLCMD),
        }
    }

    /// Make this terminal the controlling terminal of `process`'s
    /// session.
    pub fn assign_controlling(&self, process: &Arc<crate::process::Process>) {
        if process.tty().is_none() {
            self.set_session(process.sid());
            self.set_fg_pgid(process.pgid());
            process.set_tty(Some(self.this()));
        }
    }
}

impl Debug for Tty {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tty")
            .field("name", &self.name)
            .field("fg_pgid", &self.fg_pgid())
            .finish_non_exhaustive()
    }
}

impl Device for Tty {
    fn type_(&self) -> DeviceType {
        DeviceType::CharDevice
    }

    fn id(&self) -> DeviceId {
        self.id
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ldisc.try_read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.push_output(buf)
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.ldisc.pollee().poll(mask, poller)
    }

    fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
        self.termios_ioctl(cmd, arg)
    }

    fn open(&self) -> Result<Option<Arc<dyn FileLike>>> {
        Ok(Some(Arc::new(TtyFile {
            tty: self.this(),
            status_flags: AtomicU32::new(0),
        })))
    }
}

/// The file description handed out for a TTY open; adds blocking and
/// job-control behavior over the bare device.
pub struct TtyFile {
    tty: Arc<Tty>,
    status_flags: AtomicU32,
}

impl TtyFile {
    pub fn tty(&self) -> &Arc<Tty> {
        &self.tty
    }

    /// A background process reading its controlling terminal gets
    /// SIGTTIN instead of data.
    fn check_fg_read(&self) -> Result<()> {
        let Some(current) = crate::process::current_opt() else {
            return Ok(());
        };
        let fg = self.tty.fg_pgid();
        if fg != 0
            && fg != current.pgid()
            && current
                .tty()
                .is_some_and(|ctty| Arc::ptr_eq(&ctty, &self.tty))
        {
            send_signal_to_group(
                current.pgid(),
                crate::process::signal::constants::SIGTTIN,
            );
            return_errno!(Errno::EINTR);
        }
        Ok(())
    }
}

impl FileLike for TtyFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_fg_read()?;
        loop {
            match self.tty.ldisc.try_read(buf) {
                Ok(read) => return Ok(read),
                Err(err) if err.error() == Errno::EAGAIN => {
                    if self.status_flags().contains(StatusFlags::O_NONBLOCK) {
                        return Err(err);
                    }
                    let poller = Poller::new();
                    let events = self.tty.ldisc.pollee().poll(IoEvents::IN, Some(&poller));
                    if events.is_empty() {
                        poller.wait()?;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.tty.push_output(buf)
    }

    fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
        self.tty.termios_ioctl(cmd, arg)
    }

    fn metadata(&self) -> Metadata {
        Metadata::new_device(
            0,
            InodeType::CharDevice,
            InodeMode::from_bits_truncate(0o620),
            self.tty.id.as_encoded(),
        )
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.tty.ldisc.pollee().poll(mask, poller)
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDWR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CaptureDriver {
        out: SpinLock<Vec<u8>>,
    }

    impl TtyDriver for CaptureDriver {
        fn output(&self, buf: &[u8]) -> Result<usize> {
            self.out.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn onlcr_expands_newlines() {
        let tty = Tty::new(0, "tty0", DeviceId::new(4, 0));
        let driver = Arc::new(CaptureDriver {
            out: SpinLock::new(Vec::new()),
        });
        tty.set_driver(driver.clone());
        tty.push_output(b"a\nb").unwrap();
        assert_eq!(driver.out.lock().as_slice(), b"a\r\nb");
    }

    #[test]
    fn input_is_cooked_and_echoed() {
        let tty = Tty::new(0, "tty0", DeviceId::new(4, 0));
        let driver = Arc::new(CaptureDriver {
            out: SpinLock::new(Vec::new()),
        });
        tty.set_driver(driver.clone());
        tty.input_bytes(b"hi\r");
        // ICRNL turned CR into NL; the line is readable and echoed.
        let mut buf = [0u8; 8];
        let n = tty.ldisc().try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi\n");
        assert_eq!(driver.out.lock().as_slice(), b"hi\n");
    }
}
