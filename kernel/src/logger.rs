//! The kernel logger: a `log` facade backend writing through a sink
//! the boot glue registers (serial port or early console).

use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

use crate::sync::SpinLock;

type SinkFn = fn(&str);

static SINK: Once<SinkFn> = Once::new();
static LOGGER: KernelLogger = KernelLogger;
static BUFFER: SpinLock<heapless_line::Line> = SpinLock::new(heapless_line::Line::new());

/// A fixed-size line formatter so logging never allocates.
mod heapless_line {
    pub struct Line {
        buf: [u8; 256],
        len: usize,
    }

    impl Line {
        pub const fn new() -> Self {
            Self {
                buf: [0; 256],
                len: 0,
            }
        }

        pub fn clear(&mut self) {
            self.len = 0;
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
        }
    }

    impl core::fmt::Write for Line {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let room = self.buf.len() - self.len;
            let take = s.len().min(room);
            self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
            self.len += take;
            Ok(())
        }
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        SINK.get().is_some()
    }

    fn log(&self, record: &Record) {
        use core::fmt::Write;

        let Some(sink) = SINK.get() else { return };
        let mut line = BUFFER.lock_irq_disabled();
        line.clear();
        let _ = write!(
            line,
            "[{:>8}] {}: {}\n",
            crate::time::jiffies(),
            record.level(),
            record.args()
        );
        sink(line.as_str());
    }

    fn flush(&self) {}
}

/// Point the logger at an output (the boot glue's serial write).
pub fn set_sink(sink: SinkFn) {
    SINK.call_once(|| sink);
}

/// Install the facade at the level the command line asked for.
pub fn init(level: LevelFilter) {
    // The host test harness owns the global logger there.
    #[cfg(not(test))]
    {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(level);
    }
    #[cfg(test)]
    {
        let _ = &LOGGER;
        let _ = level;
    }
}
