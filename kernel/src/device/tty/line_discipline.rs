//! The N_TTY line discipline.
//!
//! Input bytes land in a raw ring from interrupt context; cooking
//! drains them into the cooked ring, applying stripping, case and
//! CR/NL translation, signal generation for the foreground group,
//! line editing and echo. Canonical reads return at most one line.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::termio::{
    KernelTermios, C_IFLAGS, C_LFLAGS, CC_VEOF, CC_VERASE, CC_VINTR, CC_VKILL, CC_VQUIT,
    CC_VSUSP,
};
use crate::{
    events::{IoEvents, Pollee},
    prelude::*,
    process::signal::{
        constants::{SIGINT, SIGQUIT, SIGTSTP},
        sig_num::SigNum,
    },
    util::ring_buffer::RingBuffer,
};

pub const BUFFER_CAPACITY: usize = 4096;

/// What cooking one byte asks the owner to do.
pub enum LdiscOutcome {
    /// Nothing beyond internal state.
    Quiet,
    /// Send this signal to the foreground process group.
    Signal(SigNum),
}

pub struct LineDiscipline {
    /// Raw bytes straight off the interrupt handler.
    raw: SpinLock<RingBuffer<u8>>,
    /// The line being edited (canonical mode only).
    current_line: SpinLock<RingBuffer<u8>>,
    /// Bytes ready for `read`.
    cooked: SpinLock<RingBuffer<u8>>,
    /// Completed canonical lines sitting in `cooked`.
    canon_lines: AtomicUsize,
    termios: SpinLock<KernelTermios>,
    pollee: Pollee,
}

impl Default for LineDiscipline {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDiscipline {
    pub fn new() -> Self {
        Self {
            raw: SpinLock::new(RingBuffer::new(BUFFER_CAPACITY)),
            current_line: SpinLock::new(RingBuffer::new(BUFFER_CAPACITY)),
            cooked: SpinLock::new(RingBuffer::new(BUFFER_CAPACITY)),
            canon_lines: AtomicUsize::new(0),
            termios: SpinLock::new(KernelTermios::default()),
            pollee: Pollee::new(IoEvents::OUT),
        }
    }

    pub fn termios(&self) -> KernelTermios {
        *self.termios.lock_irq_disabled()
    }

    pub fn set_termios(&self, new: KernelTermios) {
        *self.termios.lock_irq_disabled() = new;
    }

    pub fn pollee(&self) -> &Pollee {
        &self.pollee
    }

    /// IRQ half: stash a byte for later cooking.
    pub fn push_raw(&self, ch: u8) {
        self.raw.lock_irq_disabled().push_overwrite(ch);
    }

    /// Bottom half: cook everything the IRQ half queued. `echo` sees
    /// the bytes to render back at the terminal.
    pub fn cook_raw(&self, mut echo: impl FnMut(&[u8])) -> Vec<LdiscOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let ch = self.raw.lock_irq_disabled().pop();
            let Some(ch) = ch else { break };
            if let Some(outcome) = self.cook_byte(ch, &mut echo) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Cooking order: strip, upcase mapping, CR/NL translation, signal
    /// characters, line editing, enqueue.
    fn cook_byte(&self, mut ch: u8, echo: &mut impl FnMut(&[u8])) -> Option<LdiscOutcome> {
        let termios = self.termios();
        if termios.c_iflags.contains(C_IFLAGS::ISTRIP) {
            ch &= 0x7f;
        }
        if termios.c_iflags.contains(C_IFLAGS::IUCLC) && ch.is_ascii_uppercase() {
            ch = ch.to_ascii_lowercase();
        }
        if ch == b'\r' {
            if termios.c_iflags.contains(C_IFLAGS::IGNCR) {
                return None;
            }
            if termios.contains_icrnl() {
                ch = b'\n';
            }
        } else if ch == b'\n' && termios.c_iflags.contains(C_IFLAGS::INLCR) {
            ch = b'\r';
        }

        if termios.contains_isig() {
            let signal = if ch == termios.c_cc[CC_VINTR] {
                Some(SIGINT)
            } else if ch == termios.c_cc[CC_VQUIT] {
                Some(SIGQUIT)
            } else if ch == termios.c_cc[CC_VSUSP] {
                Some(SIGTSTP)
            } else {
                None
            };
            if let Some(num) = signal {
                self.echo_byte(ch, &termios, echo);
                return Some(LdiscOutcome::Signal(num));
            }
        }

        if termios.is_canonical() {
            if ch == termios.c_cc[CC_VEOF] {
                // Flush the partial line as-is; read() then sees a
                // short (possibly empty) "line", which is EOF.
                self.finish_line();
                return None;
            }
            if ch == termios.c_cc[CC_VERASE] {
                if self.current_line.lock_irq_disabled().pop_tail().is_some() {
                    // Wipe the glyph on screen.
                    echo(b"\x08 \x08");
                }
                return None;
            }
            if ch == termios.c_cc[CC_VKILL] {
                let mut line = self.current_line.lock_irq_disabled();
                while line.pop_tail().is_some() {
                    echo(b"\x08 \x08");
                }
                return None;
            }
            self.echo_byte(ch, &termios, echo);
            self.current_line.lock_irq_disabled().push_overwrite(ch);
            if ch == b'\n' {
                self.finish_line();
            }
            return None;
        }

        self.echo_byte(ch, &termios, echo);
        self.cooked.lock_irq_disabled().push_overwrite(ch);
        self.pollee.add_events(IoEvents::IN);
        None
    }

    fn echo_byte(&self, ch: u8, termios: &KernelTermios, echo: &mut impl FnMut(&[u8])) {
        if !termios.contain_echo() {
            if ch == b'\n' && termios.c_lflags.contains(C_LFLAGS::ECHONL) {
                echo(b"\n");
            }
            return;
        }
        if ch.is_ascii_control() && ch != b'\n' && ch != b'\t' {
            if termios.contain_echo_ctl() {
                echo(&[b'^', ch + 0x40]);
            }
        } else {
            echo(&[ch]);
        }
    }

    /// Move the edited line into the cooked ring and make it visible
    /// to canonical reads.
    fn finish_line(&self) {
        let mut line = self.current_line.lock_irq_disabled();
        let mut cooked = self.cooked.lock_irq_disabled();
        while let Some(ch) = line.pop() {
            cooked.push_overwrite(ch);
        }
        drop(cooked);
        drop(line);
        self.canon_lines.fetch_add(1, Ordering::Release);
        self.pollee.add_events(IoEvents::IN);
    }

    /// Inject already-cooked bytes (pty master writes, console paste).
    pub fn push_cooked(&self, buf: &[u8]) {
        {
            let mut cooked = self.cooked.lock_irq_disabled();
            for &ch in buf {
                cooked.push_overwrite(ch);
            }
        }
        if buf.contains(&b'\n') {
            self.canon_lines.fetch_add(
                buf.iter().filter(|&&b| b == b'\n').count(),
                Ordering::Release,
            );
        }
        self.pollee.add_events(IoEvents::IN);
    }

    /// Whether a read could return now.
    pub fn is_readable(&self) -> bool {
        if self.termios().is_canonical() {
            self.canon_lines.load(Ordering::Acquire) > 0
        } else {
            !self.cooked.lock_irq_disabled().is_empty()
        }
    }

    /// Nonblocking read: canonical mode returns at most one line,
    /// raw mode whatever is buffered.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let canonical = self.termios().is_canonical();
        if canonical {
            if self.canon_lines.load(Ordering::Acquire) == 0 {
                return_errno!(Errno::EAGAIN);
            }
            let mut cooked = self.cooked.lock_irq_disabled();
            let mut read = 0;
            while read < buf.len() {
                let Some(ch) = cooked.pop() else { break };
                buf[read] = ch;
                read += 1;
                if ch == b'\n' {
                    break;
                }
            }
            drop(cooked);
            self.canon_lines.fetch_sub(1, Ordering::Release);
            self.update_readable_state();
            Ok(read)
        } else {
            let read = self.cooked.lock_irq_disabled().pop_slice(buf);
            if read == 0 {
                return_errno!(Errno::EAGAIN);
            }
            self.update_readable_state();
            Ok(read)
        }
    }

    fn update_readable_state(&self) {
        if self.is_readable() {
            self.pollee.add_events(IoEvents::IN);
        } else {
            self.pollee.del_events(IoEvents::IN);
        }
    }

    pub fn drain(&self) {
        self.raw.lock_irq_disabled().clear();
        self.current_line.lock_irq_disabled().clear();
        self.cooked.lock_irq_disabled().clear();
        self.canon_lines.store(0, Ordering::Release);
        self.update_readable_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cook(ldisc: &LineDiscipline, bytes: &[u8]) -> (Vec<u8>, Vec<LdiscOutcome>) {
        for &b in bytes {
            ldisc.push_raw(b);
        }
        let mut echoed = Vec::new();
        let outcomes = ldisc.cook_raw(|bytes| echoed.extend_from_slice(bytes));
        (echoed, outcomes)
    }

    #[test]
    fn canonical_read_returns_one_line() {
        let ldisc = LineDiscipline::new();
        cook(&ldisc, b"first\nsecond\n");
        let mut buf = [0u8; 64];
        let n = ldisc.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first\n");
        let n = ldisc.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second\n");
        assert_eq!(ldisc.try_read(&mut buf).unwrap_err().error(), Errno::EAGAIN);
    }

    #[test]
    fn partial_line_is_not_readable_in_canonical_mode() {
        let ldisc = LineDiscipline::new();
        cook(&ldisc, b"no newline yet");
        assert!(!ldisc.is_readable());
        let mut buf = [0u8; 16];
        assert_eq!(ldisc.try_read(&mut buf).unwrap_err().error(), Errno::EAGAIN);
        cook(&ldisc, b"\n");
        assert!(ldisc.is_readable());
    }

    #[test]
    fn erase_edits_the_open_line() {
        let ldisc = LineDiscipline::new();
        cook(&ldisc, b"cat");
        cook(&ldisc, &[0x7f]); // erase the 't'
        cook(&ldisc, b"r\n");
        let mut buf = [0u8; 16];
        let n = ldisc.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"car\n");
    }

    #[test]
    fn cr_maps_to_nl_under_icrnl() {
        let ldisc = LineDiscipline::new();
        cook(&ldisc, b"hi\r");
        let mut buf = [0u8; 8];
        let n = ldisc.try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi\n");
    }

    #[test]
    fn ctrl_c_raises_sigint_without_buffering() {
        let ldisc = LineDiscipline::new();
        let (_, outcomes) = cook(&ldisc, &[0x03]);
        assert!(matches!(
            outcomes.as_slice(),
            [LdiscOutcome::Signal(num)] if *num == SIGINT
        ));
        assert!(!ldisc.is_readable());
    }

    #[test]
    fn raw_mode_returns_available_bytes() {
        let ldisc = LineDiscipline::new();
        let mut termios = ldisc.termios();
        termios.c_lflags.remove(C_LFLAGS::ICANON);
        ldisc.set_termios(termios);
        cook(&ldisc, b"ab");
        let mut buf = [0u8; 8];
        assert_eq!(ldisc.try_read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
    }

    #[test]
    fn echo_renders_control_chars_caret_style() {
        let ldisc = LineDiscipline::new();
        let (echoed, _) = cook(&ldisc, &[0x03]);
        assert_eq!(echoed, b"^C");
        let (echoed, _) = cook(&ldisc, b"x");
        assert_eq!(echoed, b"x");
    }
}
