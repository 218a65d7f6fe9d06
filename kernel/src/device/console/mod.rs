//! ANSI text consoles.
//!
//! Each virtual terminal owns a cell grid and an escape-sequence
//! interpreter; the active one also owns the framebuffer and mirrors
//! every change to it.

pub mod framebuffer;
pub mod vt;

use framebuffer::{cell, cell_char, Cell, FrameBuffer};

use crate::prelude::*;

const MAX_PARAMS: usize = 16;
const DEFAULT_ATTR: u8 = 0x07;

/// ANSI to EGA color order.
const COLOR_TABLE: [u8; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Normal,
    Escape,
    Square,
    GetPars,
    GotPars,
}

struct ConsoleState {
    cells: Vec<Cell>,
    row: usize,
    col: usize,
    attr: u8,
    reverse: bool,
    bold: bool,
    state: ParserState,
    params: [u32; MAX_PARAMS],
    nparams: usize,
    question: bool,
    scroll_top: usize,
    scroll_bottom: usize,
    cursor_visible: bool,
    saved_cursor: (usize, usize),
    dirty: Option<(usize, usize)>,
}

pub struct Console {
    rows: usize,
    cols: usize,
    inner: SpinLock<ConsoleState>,
    fb: SpinLock<Option<Arc<dyn FrameBuffer>>>,
}

impl Console {
    pub fn new(rows: usize, cols: usize) -> Arc<Self> {
        Arc::new(Self {
            rows,
            cols,
            inner: SpinLock::new(ConsoleState {
                cells: vec![cell(b' ', DEFAULT_ATTR); rows * cols],
                row: 0,
                col: 0,
                attr: DEFAULT_ATTR,
                reverse: false,
                bold: false,
                state: ParserState::Normal,
                params: [0; MAX_PARAMS],
                nparams: 0,
                question: false,
                scroll_top: 0,
                scroll_bottom: rows - 1,
                cursor_visible: true,
                saved_cursor: (0, 0),
                dirty: None,
            }),
            fb: SpinLock::new(None),
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Attach the display (VT switch-in); repaints everything.
    pub fn attach_fb(&self, fb: Arc<dyn FrameBuffer>) {
        {
            let inner = self.inner.lock_irq_disabled();
            fb.update_region(&inner.cells, 0, inner.cells.len());
            fb.update_cursor(inner.row, inner.col);
            fb.show_cursor(inner.cursor_visible);
        }
        *self.fb.lock() = Some(fb);
    }

    pub fn detach_fb(&self) {
        *self.fb.lock() = None;
    }

    /// The character at `(row, col)`, for selection and tests.
    pub fn char_at(&self, row: usize, col: usize) -> u8 {
        cell_char(self.inner.lock_irq_disabled().cells[row * self.cols + col])
    }

    pub fn cursor(&self) -> (usize, usize) {
        let inner = self.inner.lock_irq_disabled();
        (inner.row, inner.col)
    }

    /// Feed output bytes through the ANSI interpreter.
    pub fn write(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock_irq_disabled();
        for &b in bytes {
            self.process_byte(&mut inner, b);
        }
        self.flush(&mut inner);
    }

    fn flush(&self, inner: &mut ConsoleState) {
        let fb = self.fb.lock().clone();
        if let Some(fb) = fb {
            if let Some((start, end)) = inner.dirty.take() {
                fb.update_region(&inner.cells, start, end);
            }
            fb.update_cursor(inner.row, inner.col);
            fb.show_cursor(inner.cursor_visible);
        } else {
            inner.dirty = None;
        }
    }

    fn mark_dirty(&self, inner: &mut ConsoleState, start: usize, end: usize) {
        inner.dirty = Some(match inner.dirty {
            None => (start, end),
            Some((s, e)) => (s.min(start), e.max(end)),
        });
    }

    fn process_byte(&self, inner: &mut ConsoleState, b: u8) {
        match inner.state {
            ParserState::Normal => match b {
                0x1b => inner.state = ParserState::Escape,
                b'\n' => self.line_feed(inner),
                b'\r' => inner.col = 0,
                0x08 => inner.col = inner.col.saturating_sub(1),
                b'\t' => {
                    inner.col = ((inner.col / 8) + 1) * 8;
                    if inner.col >= self.cols {
                        inner.col = self.cols - 1;
                    }
                }
                0x07 => {} // bell
                _ if b >= 0x20 => self.put_char(inner, b),
                _ => {}
            },
            ParserState::Escape => match b {
                b'[' => {
                    inner.params = [0; MAX_PARAMS];
                    inner.nparams = 0;
                    inner.question = false;
                    inner.state = ParserState::Square;
                }
                b'7' => {
                    inner.saved_cursor = (inner.row, inner.col);
                    inner.state = ParserState::Normal;
                }
                b'8' => {
                    inner.row = inner.saved_cursor.0;
                    inner.col = inner.saved_cursor.1;
                    inner.state = ParserState::Normal;
                }
                b'M' => {
                    self.reverse_line_feed(inner);
                    inner.state = ParserState::Normal;
                }
                b'D' => {
                    self.line_feed(inner);
                    inner.state = ParserState::Normal;
                }
                b'c' => {
                    self.reset(inner);
                    inner.state = ParserState::Normal;
                }
                _ => inner.state = ParserState::Normal,
            },
            ParserState::Square => {
                if b == b'?' {
                    inner.question = true;
                    inner.state = ParserState::GetPars;
                    return;
                }
                inner.state = ParserState::GetPars;
                self.process_byte(inner, b);
            }
            ParserState::GetPars => match b {
                b'0'..=b'9' => {
                    let slot = inner.nparams.min(MAX_PARAMS - 1);
                    inner.params[slot] = inner.params[slot] * 10 + (b - b'0') as u32;
                }
                b';' => {
                    if inner.nparams < MAX_PARAMS - 1 {
                        inner.nparams += 1;
                    }
                }
                _ => {
                    inner.nparams += 1;
                    inner.state = ParserState::GotPars;
                    self.process_byte(inner, b);
                }
            },
            ParserState::GotPars => {
                inner.state = ParserState::Normal;
                self.do_command(inner, b);
            }
        }
    }

    fn effective_attr(&self, inner: &ConsoleState) -> u8 {
        let mut attr = inner.attr;
        if inner.bold {
            attr |= 0x08;
        }
        if inner.reverse {
            attr = (attr & 0x88) | ((attr & 0x07) << 4) | ((attr >> 4) & 0x07);
        }
        attr
    }

    fn put_char(&self, inner: &mut ConsoleState, ch: u8) {
        if inner.col >= self.cols {
            inner.col = 0;
            self.line_feed(inner);
        }
        let index = inner.row * self.cols + inner.col;
        let attr = self.effective_attr(inner);
        inner.cells[index] = cell(ch, attr);
        self.mark_dirty(inner, index, index + 1);
        inner.col += 1;
    }

    fn line_feed(&self, inner: &mut ConsoleState) {
        if inner.row == inner.scroll_bottom {
            self.scroll_up(inner, 1);
        } else if inner.row + 1 < self.rows {
            inner.row += 1;
        }
    }

    fn reverse_line_feed(&self, inner: &mut ConsoleState) {
        if inner.row == inner.scroll_top {
            self.scroll_down(inner, 1);
        } else {
            inner.row -= 1;
        }
    }

    fn scroll_up(&self, inner: &mut ConsoleState, lines: usize) {
        let top = inner.scroll_top;
        let bottom = inner.scroll_bottom;
        let blank = cell(b' ', self.effective_attr(inner));
        let cols = self.cols;
        inner
            .cells
            .copy_within((top + lines) * cols..(bottom + 1) * cols, top * cols);
        for slot in &mut inner.cells[(bottom + 1 - lines) * cols..(bottom + 1) * cols] {
            *slot = blank;
        }
        self.mark_dirty(inner, top * cols, (bottom + 1) * cols);
    }

    fn scroll_down(&self, inner: &mut ConsoleState, lines: usize) {
        let top = inner.scroll_top;
        let bottom = inner.scroll_bottom;
        let blank = cell(b' ', self.effective_attr(inner));
        let cols = self.cols;
        inner
            .cells
            .copy_within(top * cols..(bottom + 1 - lines) * cols, (top + lines) * cols);
        for slot in &mut inner.cells[top * cols..(top + lines) * cols] {
            *slot = blank;
        }
        self.mark_dirty(inner, top * cols, (bottom + 1) * cols);
    }

    fn clear_cells(&self, inner: &mut ConsoleState, start: usize, end: usize) {
        let blank = cell(b' ', self.effective_attr(inner));
        for slot in &mut inner.cells[start..end] {
            *slot = blank;
        }
        self.mark_dirty(inner, start, end);
    }

    fn reset(&self, inner: &mut ConsoleState) {
        inner.attr = DEFAULT_ATTR;
        inner.bold = false;
        inner.reverse = false;
        inner.row = 0;
        inner.col = 0;
        inner.scroll_top = 0;
        inner.scroll_bottom = self.rows - 1;
        inner.cursor_visible = true;
        let len = inner.cells.len();
        self.clear_cells(inner, 0, len);
    }

    fn do_command(&self, inner: &mut ConsoleState, cmd: u8) {
        let p0 = inner.params[0] as usize;
        let p1 = inner.params.get(1).copied().unwrap_or(0) as usize;
        match cmd {
            b'A' => inner.row = inner.row.saturating_sub(p0.max(1)),
            b'B' => inner.row = (inner.row + p0.max(1)).min(self.rows - 1),
            b'C' => inner.col = (inner.col + p0.max(1)).min(self.cols - 1),
            b'D' => inner.col = inner.col.saturating_sub(p0.max(1)),
            b'H' | b'f' => {
                inner.row = p0.saturating_sub(1).min(self.rows - 1);
                inner.col = p1.saturating_sub(1).min(self.cols - 1);
            }
            b'G' | b'`' => inner.col = p0.saturating_sub(1).min(self.cols - 1),
            b'd' => inner.row = p0.saturating_sub(1).min(self.rows - 1),
            b'J' => {
                let cursor = inner.row * self.cols + inner.col;
                let len = inner.cells.len();
                match p0 {
                    0 => self.clear_cells(inner, cursor, len),
                    1 => self.clear_cells(inner, 0, cursor + 1),
                    2 => self.clear_cells(inner, 0, len),
                    _ => {}
                }
            }
            b'K' => {
                let line_start = inner.row * self.cols;
                let cursor = line_start + inner.col;
                match p0 {
                    0 => self.clear_cells(inner, cursor, line_start + self.cols),
                    1 => self.clear_cells(inner, line_start, cursor + 1),
                    2 => self.clear_cells(inner, line_start, line_start + self.cols),
                    _ => {}
                }
            }
            b'P' => {
                // Delete characters: pull the rest of the line left.
                let count = p0.max(1).min(self.cols - inner.col);
                let line_start = inner.row * self.cols;
                let cursor = line_start + inner.col;
                let line_end = line_start + self.cols;
                inner.cells.copy_within(cursor + count..line_end, cursor);
                let blank = cell(b' ', self.effective_attr(inner));
                for slot in &mut inner.cells[line_end - count..line_end] {
                    *slot = blank;
                }
                self.mark_dirty(inner, cursor, line_end);
            }
            b'm' => self.set_attributes(inner),
            b'r' => {
                let top = p0.saturating_sub(1);
                let bottom = if p1 == 0 { self.rows - 1 } else { p1 - 1 };
                if top < bottom && bottom < self.rows {
                    inner.scroll_top = top;
                    inner.scroll_bottom = bottom;
                    inner.row = top;
                    inner.col = 0;
                }
            }
            b'h' if inner.question && p0 == 25 => inner.cursor_visible = true,
            b'l' if inner.question && p0 == 25 => inner.cursor_visible = false,
            b's' => inner.saved_cursor = (inner.row, inner.col),
            b'u' => {
                inner.row = inner.saved_cursor.0;
                inner.col = inner.saved_cursor.1;
            }
            _ => {}
        }
    }

    fn set_attributes(&self, inner: &mut ConsoleState) {
        for i in 0..inner.nparams.max(1) {
            match inner.params[i] {
                0 => {
                    inner.attr = DEFAULT_ATTR;
                    inner.bold = false;
                    inner.reverse = false;
                }
                1 => inner.bold = true,
                7 => inner.reverse = true,
                27 => inner.reverse = false,
                30..=37 => {
                    inner.attr =
                        (inner.attr & 0xf8) | COLOR_TABLE[(inner.params[i] - 30) as usize];
                }
                39 => inner.attr = (inner.attr & 0xf8) | (DEFAULT_ATTR & 0x07),
                40..=47 => {
                    inner.attr = (inner.attr & 0x8f)
                        | (COLOR_TABLE[(inner.params[i] - 40) as usize] << 4);
                }
                49 => inner.attr &= 0x8f,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(console: &Console, row: usize) -> String {
        let (_, cols) = console.size();
        (0..cols)
            .map(|col| console.char_at(row, col) as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn clear_screen_and_home() {
        let console = Console::new(25, 80);
        console.write(b"A\x1b[2J\x1b[HBC");
        assert_eq!(console.char_at(0, 0), b'B');
        assert_eq!(console.char_at(0, 1), b'C');
        // Everything else is blank, including where 'A' was.
        for row in 0..25 {
            for col in 0..80 {
                if (row, col) != (0, 0) && (row, col) != (0, 1) {
                    assert_eq!(console.char_at(row, col), b' ');
                }
            }
        }
    }

    #[test]
    fn cursor_movement_commands() {
        let console = Console::new(25, 80);
        console.write(b"\x1b[5;10Hx");
        assert_eq!(console.char_at(4, 9), b'x');
        console.write(b"\x1b[2Ay");
        // Up two rows from (4, 10).
        assert_eq!(console.char_at(2, 10), b'y');
        console.write(b"\x1b[3Gz");
        assert_eq!(console.char_at(2, 2), b'z');
    }

    #[test]
    fn newline_scrolls_at_bottom() {
        let console = Console::new(3, 10);
        console.write(b"one\r\ntwo\r\nthree\r\nfour");
        assert_eq!(text_of(&console, 0), "two");
        assert_eq!(text_of(&console, 1), "three");
        assert_eq!(text_of(&console, 2), "four");
    }

    #[test]
    fn delete_chars_pulls_line_left() {
        let console = Console::new(2, 10);
        console.write(b"abcdef\x1b[1;2H\x1b[2P");
        assert_eq!(text_of(&console, 0), "adef");
    }

    #[test]
    fn erase_line_variants() {
        let console = Console::new(2, 8);
        console.write(b"abcdefgh\x1b[1;4H\x1b[K");
        assert_eq!(text_of(&console, 0), "abc");
        console.write(b"\x1b[2K");
        assert_eq!(text_of(&console, 0), "");
    }

    #[test]
    fn attributes_track_colors_and_reverse() {
        let console = Console::new(2, 8);
        console.write(b"\x1b[31mr");
        let red_attr = {
            let inner = console.inner.lock();
            framebuffer::cell_attr(inner.cells[0])
        };
        assert_eq!(red_attr & 0x07, 4); // ANSI red is EGA 4
        console.write(b"\x1b[7mv");
        let rev_attr = {
            let inner = console.inner.lock();
            framebuffer::cell_attr(inner.cells[1])
        };
        // Foreground moved into the background nibble.
        assert_eq!((rev_attr >> 4) & 0x07, 4);
        console.write(b"\x1b[0mn");
        let norm_attr = {
            let inner = console.inner.lock();
            framebuffer::cell_attr(inner.cells[2])
        };
        assert_eq!(norm_attr, 0x07);
    }

    #[test]
    fn scroll_region_is_honored() {
        let console = Console::new(4, 10);
        console.write(b"top\x1b[2;3r");
        // Cursor is now at the region top; fill the region past its
        // bottom and the top line must stay put.
        console.write(b"l1\r\nl2\r\nl3");
        assert_eq!(text_of(&console, 0), "top");
        assert_eq!(text_of(&console, 1), "l2");
        assert_eq!(text_of(&console, 2), "l3");
    }

    #[test]
    fn rendered_to_text_framebuffer() {
        let console = Console::new(4, 10);
        let fb = Arc::new(framebuffer::TextFb::new(4, 10));
        console.attach_fb(fb.clone());
        console.write(b"hi");
        let vram = fb.vram_snapshot();
        assert_eq!(framebuffer::cell_char(vram[0]), b'h');
        assert_eq!(framebuffer::cell_char(vram[1]), b'i');
        assert_eq!(fb.cursor(), (0, 2, true));
        console.write(b"\x1b[?25l");
        assert_eq!(fb.cursor().2, false);
    }

    #[test]
    fn rgb_backend_plots_glyph_pixels() {
        // A synthetic 4x4 font whose glyph for 'A' is a solid block.
        static GLYPHS: [u8; 8] = [0xf0, 0xf0, 0xf0, 0xf0, 0x00, 0x00, 0x00, 0x00];
        let font = framebuffer::BitmapFont {
            width: 4,
            height: 4,
            first_char: b'A',
            glyphs: &GLYPHS,
        };
        let console = Console::new(2, 4);
        let fb = Arc::new(framebuffer::RgbFb::new(2, 4, font));
        console.attach_fb(fb.clone());
        console.write(b"AB");
        // 'A' lights its foreground pixels, 'B' (all-zero glyph) not.
        assert_ne!(fb.pixel(0, 0), 0x000000);
        assert_eq!(fb.pixel(4, 0), 0x000000);
    }
}
