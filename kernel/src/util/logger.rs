// =============================================================================
// Relay — Kernel Logger
// =============================================================================
//
// Everything the core prints goes through one console: whatever the
// embedder hands to `init` (the COM1 port on bare metal, a capture buffer
// in tests). Two ways in:
//
//   log::info!(..) and friends — `[LEVEL] message` lines, filtered by the
//                                level given to `init`
//   kprint!/kprintln!          — raw text, no level, no filter
//
// LOCKING:
//   The console sits behind a `spin::Mutex` taken with interrupts masked,
//   so a record is written as one piece even when every core logs at once
//   and an interrupt handler logs on top. Before `init` nothing is printed.
// =============================================================================

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::error::KernelError;
use crate::sync::interrupts::Interrupts;

/// Where kernel output goes.
pub type Console = &'static mut (dyn Write + Send);

static CONSOLE: Mutex<Option<Console>> = Mutex::new(None);
static LOGGER: KernelLogger = KernelLogger;

struct KernelLogger;

fn tag(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => " INFO",
        Level::Warn => " WARN",
        Level::Error => "ERROR",
    }
}

fn color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90m",
        Level::Debug => "\x1b[36m",
        Level::Info => "\x1b[32m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level();
        with_console(|console| {
            let _ = writeln!(console, "{}[{}]\x1b[0m {}", color(level), tag(level), record.args());
        });
    }

    fn flush(&self) {}
}

fn with_console(f: impl FnOnce(&mut dyn Write)) {
    Interrupts::protect(|| {
        if let Some(console) = CONSOLE.lock().as_mut() {
            f(&mut **console);
        }
    });
}

/// Install `console` as the kernel console and the kernel logger as the
/// `log` backend. Once per boot.
pub fn init(console: Console, level: LevelFilter) -> Result<(), KernelError> {
    log::set_logger(&LOGGER).map_err(|_| KernelError::LoggerAlreadySet)?;
    Interrupts::protect(|| *CONSOLE.lock() = Some(console));
    log::set_max_level(level);
    Ok(())
}

#[doc(hidden)]
pub fn _kprint(args: fmt::Arguments<'_>) {
    with_console(|console| {
        let _ = console.write_fmt(args);
    });
}

/// Print to the kernel console.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::util::logger::_kprint(format_args!($($arg)*))
    };
}

/// Print to the kernel console, with a newline.
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {
        $crate::kprint!("{}\n", format_args!($($arg)*))
    };
}
