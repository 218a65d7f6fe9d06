//! Scan-code translation.
//!
//! The keyboard-controller IRQ hands raw set-1 scan codes to
//! [`handle_scancode`]; they become byte sequences on the active
//! terminal's input queue. Alt+Fn switches virtual terminals. The
//! i8042 poke-and-ack sequence itself lives with the boot glue.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::device::console::vt;

const RELEASE_BIT: u8 = 0x80;
const EXTENDED_PREFIX: u8 = 0xe0;

// Modifier scan codes.
const SC_LSHIFT: u8 = 0x2a;
const SC_RSHIFT: u8 = 0x36;
const SC_CTRL: u8 = 0x1d;
const SC_ALT: u8 = 0x38;
const SC_CAPS: u8 = 0x3a;

/// Scan codes 0x00..=0x3a, unshifted.
const PLAIN_MAP: [u8; 0x3b] = [
    0, 0x1b, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08,
    b'\t', b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\r', 0,
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z',
    b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0,
];

/// The same codes with shift held.
const SHIFT_MAP: [u8; 0x3b] = [
    0, 0x1b, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08,
    b'\t', b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\r', 0,
    b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z',
    b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', 0,
];

static SHIFT: AtomicBool = AtomicBool::new(false);
static CTRL: AtomicBool = AtomicBool::new(false);
static ALT: AtomicBool = AtomicBool::new(false);
static CAPS: AtomicBool = AtomicBool::new(false);
static EXTENDED: AtomicBool = AtomicBool::new(false);

/// Feed one scan code from the keyboard IRQ.
pub fn handle_scancode(code: u8) {
    if code == EXTENDED_PREFIX {
        EXTENDED.store(true, Ordering::Relaxed);
        return;
    }
    let extended = EXTENDED.swap(false, Ordering::Relaxed);
    let released = code & RELEASE_BIT != 0;
    let code = code & !RELEASE_BIT;

    match code {
        SC_LSHIFT | SC_RSHIFT => {
            SHIFT.store(!released, Ordering::Relaxed);
            return;
        }
        SC_CTRL => {
            CTRL.store(!released, Ordering::Relaxed);
            return;
        }
        SC_ALT => {
            ALT.store(!released, Ordering::Relaxed);
            return;
        }
        SC_CAPS => {
            if !released {
                let old = CAPS.load(Ordering::Relaxed);
                CAPS.store(!old, Ordering::Relaxed);
            }
            return;
        }
        _ => {}
    }
    if released {
        return;
    }

    if extended {
        // Cursor keys produce ANSI sequences.
        let seq: Option<&[u8]> = match code {
            0x48 => Some(b"\x1b[A"),
            0x50 => Some(b"\x1b[B"),
            0x4d => Some(b"\x1b[C"),
            0x4b => Some(b"\x1b[D"),
            0x47 => Some(b"\x1b[H"),
            0x4f => Some(b"\x1b[F"),
            0x53 => Some(b"\x1b[3~"),
            _ => None,
        };
        if let Some(seq) = seq {
            vt::active_tty().input_bytes(seq);
        }
        return;
    }

    // Alt+F1..F4 switches terminals.
    if ALT.load(Ordering::Relaxed) && (0x3b..0x3b + vt::NR_CONSOLES as u8).contains(&code) {
        let _ = vt::switch_to((code - 0x3b) as usize);
        return;
    }

    if code as usize >= PLAIN_MAP.len() {
        return;
    }
    let shifted = SHIFT.load(Ordering::Relaxed);
    let mut ch = if shifted {
        SHIFT_MAP[code as usize]
    } else {
        PLAIN_MAP[code as usize]
    };
    if ch == 0 {
        return;
    }
    if CAPS.load(Ordering::Relaxed) && ch.is_ascii_alphabetic() {
        ch = if shifted {
            ch.to_ascii_lowercase()
        } else {
            ch.to_ascii_uppercase()
        };
    }
    if CTRL.load(Ordering::Relaxed) {
        ch = match ch.to_ascii_uppercase() {
            c @ b'@'..=b'_' => c & 0x1f,
            _ => return,
        };
    }
    vt::active_tty().input_bytes(&[ch]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_shifted_letters() {
        let _guard = crate::mm::test_util::serialize_test();
        crate::device::console::vt::init_for_tests();
        let tty = vt::active_tty();
        tty.ldisc().drain();

        handle_scancode(0x23); // 'h'
        handle_scancode(0xa3); // release
        handle_scancode(SC_LSHIFT);
        handle_scancode(0x17); // 'I' with shift
        handle_scancode(SC_LSHIFT | RELEASE_BIT);
        handle_scancode(0x1c); // enter -> '\r' -> cooked '\n'

        let mut buf = [0u8; 8];
        let n = tty.ldisc().try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hI\n");
    }

    #[test]
    fn ctrl_c_becomes_etx() {
        let _guard = crate::mm::test_util::serialize_test();
        crate::device::console::vt::init_for_tests();
        let tty = vt::active_tty();
        tty.ldisc().drain();
        // ^C raises SIGINT in the ldisc; with no foreground group the
        // byte is consumed without buffering.
        handle_scancode(SC_CTRL);
        handle_scancode(0x2e); // 'c'
        handle_scancode(SC_CTRL | RELEASE_BIT);
        assert!(!tty.ldisc().is_readable());
    }

    #[test]
    fn arrow_keys_emit_ansi_sequences() {
        let _guard = crate::mm::test_util::serialize_test();
        crate::device::console::vt::init_for_tests();
        let tty = vt::active_tty();
        tty.ldisc().drain();
        let saved = tty.ldisc().termios();
        let mut raw = saved;
        raw.c_lflags
            .remove(crate::device::tty::termio::C_LFLAGS::ICANON);
        raw.c_lflags
            .remove(crate::device::tty::termio::C_LFLAGS::ECHO);
        tty.ldisc().set_termios(raw);

        handle_scancode(EXTENDED_PREFIX);
        handle_scancode(0x48); // up

        let mut buf = [0u8; 8];
        let n = tty.ldisc().try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x1b[A");
        tty.ldisc().set_termios(saved);
    }
}
