//! Console output and the `log` backend for vmap_stack
//!
//! Log lines are formatted into a fixed buffer and handed to a console sink.
//! The sink is a plain function installed by the platform (UART writer,
//! early printk, test capture). Without a sink the line is dropped.

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Function receiving finished console text
pub type ConsoleSink = fn(&str);

/// Longest single log line; longer lines are truncated
pub const LINE_CAPACITY: usize = 256;

/// Console writer interface
pub struct Console {
    sink: Option<ConsoleSink>,
    #[cfg(test)]
    buffer: heapless::String<1024>,
}

impl Console {
    /// Create a new console instance
    pub const fn new() -> Self {
        Console {
            sink: None,
            #[cfg(test)]
            buffer: heapless::String::new(),
        }
    }

    /// Route output to `sink`
    pub fn set_sink(&mut self, sink: ConsoleSink) {
        self.sink = Some(sink);
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        #[cfg(test)]
        {
            let _ = self.buffer.push_str(s);
        }

        if let Some(sink) = self.sink {
            sink(s);
        }
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Install the console sink
pub fn set_sink(sink: ConsoleSink) {
    CONSOLE.lock().set_sink(sink);
}

/// Print formatted text to console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

// ============================================================================
// Logger
// ============================================================================

/// `log` backend writing `[LEVEL file:line] message` lines to the console
pub struct ConsoleLogger;

impl ConsoleLogger {
    /// Format one record as a console line
    pub fn write_record(record: &Record, out: &mut dyn Write) -> fmt::Result {
        writeln!(
            out,
            "[{:<5} {}:{}] {}",
            record.level(),
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or(0),
            record.args(),
        )
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format outside the console lock; a truncated line still goes out.
        let mut line = heapless::String::<LINE_CAPACITY>::new();
        let _ = Self::write_record(record, &mut line);
        CONSOLE.lock().write_str(&line);
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Install the console logger with the given maximum level
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
