//! Virtual terminals: a fixed set of consoles multiplexed onto one
//! display, plus screen selection.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Once;

use super::{framebuffer::FrameBuffer, Console};
use crate::{
    device::tty::{Tty, TtyDriver},
    fs::device::{DeviceId, TTY_MAJOR},
    prelude::*,
};

pub const NR_CONSOLES: usize = 4;

struct Vt {
    console: Arc<Console>,
    tty: Arc<Tty>,
}

static VTS: Once<Vec<Vt>> = Once::new();
static ACTIVE: AtomicUsize = AtomicUsize::new(0);

lazy_static! {
    static ref DISPLAY: SpinLock<Option<Arc<dyn FrameBuffer>>> = SpinLock::new(None);
    /// Selection anchor and end, in linear cell coordinates.
    static ref SELECTION: SpinLock<Option<(usize, usize)>> = SpinLock::new(None);
}

/// Output side of a VT's TTY.
struct ConsoleDriver {
    console: Arc<Console>,
}

impl TtyDriver for ConsoleDriver {
    fn output(&self, buf: &[u8]) -> Result<usize> {
        self.console.write(buf);
        Ok(buf.len())
    }
}

/// Bring up the VT set on `display`. The display geometry decides the
/// console geometry.
pub fn init(display: Arc<dyn FrameBuffer>) {
    let (rows, cols) = display.size();
    VTS.call_once(|| {
        let vts: Vec<Vt> = (0..NR_CONSOLES)
            .map(|index| {
                let console = Console::new(rows, cols);
                let tty = Tty::new(
                    index as u32,
                    &alloc::format!("tty{}", index + 1),
                    DeviceId::new(TTY_MAJOR, index as u32 + 1),
                );
                tty.set_driver(Arc::new(ConsoleDriver {
                    console: console.clone(),
                }));
                crate::fs::device::register_char(tty.clone());
                Vt { console, tty }
            })
            .collect();
        vts[0].console.attach_fb(display.clone());
        vts
    });
    *DISPLAY.lock() = Some(display);
}

fn vts() -> &'static Vec<Vt> {
    VTS.get().expect("virtual terminals not initialized")
}

pub fn active_index() -> usize {
    ACTIVE.load(Ordering::Relaxed)
}

pub fn active_tty() -> Arc<Tty> {
    vts()[active_index()].tty.clone()
}

pub fn active_console() -> Arc<Console> {
    vts()[active_index()].console.clone()
}

pub fn console_tty(index: usize) -> Option<Arc<Tty>> {
    vts().get(index).map(|vt| vt.tty.clone())
}

/// Switch the display to VT `index`.
pub fn switch_to(index: usize) -> Result<()> {
    let vts = vts();
    if index >= vts.len() {
        return_errno!(Errno::EINVAL);
    }
    let old = ACTIVE.swap(index, Ordering::Relaxed);
    if old == index {
        return Ok(());
    }
    vts[old].console.detach_fb();
    *SELECTION.lock() = None;
    let display = DISPLAY.lock().clone();
    if let Some(display) = display {
        vts[index].console.attach_fb(display);
    }
    Ok(())
}

/// Remember a selection over the active console, `(start, end)` in
/// screen-cell coordinates, inclusive.
pub fn set_selection(start: (usize, usize), end: (usize, usize)) {
    let console = active_console();
    let (_, cols) = console.size();
    let a = start.0 * cols + start.1;
    let b = end.0 * cols + end.1;
    *SELECTION.lock() = Some((a.min(b), a.max(b)));
}

/// The selected characters, rows joined with newlines.
pub fn selection_text() -> Option<String> {
    let (start, end) = (*SELECTION.lock())?;
    let console = active_console();
    let (_, cols) = console.size();
    let mut text = String::new();
    for index in start..=end {
        text.push(console.char_at(index / cols, index % cols) as char);
        if index % cols == cols - 1 && index != end {
            // Trim the padding the row leaves behind.
            while text.ends_with(' ') {
                text.pop();
            }
            text.push('\n');
        }
    }
    Some(text)
}

/// Paste the selection into the active terminal's input queue.
pub fn paste_selection() {
    let Some(text) = selection_text() else {
        return;
    };
    active_tty().input_bytes(text.as_bytes());
}

/// Test scaffolding: bring the VTs up on a capture framebuffer.
#[cfg(test)]
pub(crate) fn init_for_tests() {
    crate::mm::test_util::ensure_mm_init();
    if VTS.get().is_none() {
        init(Arc::new(super::framebuffer::TextFb::new(25, 80)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_vts() {
        init_for_tests();
    }

    #[test]
    fn selection_copy_and_paste_roundtrip() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_vts();
        switch_to(0).unwrap();
        let console = active_console();
        console.write(b"\x1b[2J\x1b[Hselect me");
        set_selection((0, 0), (0, 8));
        assert_eq!(selection_text().unwrap(), "select me");

        // Raw mode so the injected bytes are readable immediately.
        let tty = active_tty();
        let saved = tty.ldisc().termios();
        let mut termios = saved;
        termios
            .c_lflags
            .remove(crate::device::tty::termio::C_LFLAGS::ICANON);
        termios
            .c_lflags
            .remove(crate::device::tty::termio::C_LFLAGS::ECHO);
        tty.ldisc().set_termios(termios);

        paste_selection();
        let mut buf = [0u8; 32];
        let read = tty.ldisc().try_read(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"select me");

        tty.ldisc().set_termios(saved);
    }

    #[test]
    fn vt_switch_moves_the_display() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_vts();
        switch_to(0).unwrap();
        switch_to(1).unwrap();
        assert_eq!(active_index(), 1);
        // Writing on VT 0 while inactive must not touch the display;
        // its cells still update.
        let bg_console = vts()[0].console.clone();
        bg_console.write(b"\x1b[2J\x1b[Hhidden");
        assert_eq!(bg_console.char_at(0, 0), b'h');
        switch_to(0).unwrap();
        assert_eq!(active_index(), 0);
        assert_eq!(switch_to(99).unwrap_err().error(), Errno::EINVAL);
    }
}
