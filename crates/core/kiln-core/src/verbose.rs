//! Verbosity-gated console output.
//!
//! The CLI picks a level once at startup from its `-q` / `-v` flags:
//! - **Quiet**: only warnings, errors and the final summary
//! - **Normal**: rebuild announcements and executed commands as well
//! - **Verbose**: also stale reasons, cache diagnostics and timings
//!
//! Library code never prints directly; it goes through [`dprintln!`],
//! [`vprintln!`] and [`wprintln!`] so that one flag controls everything.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Verbosity {
    /// Warnings and errors.
    Quiet = 0,
    /// Announcements and commands.
    Normal = 1,
    /// Diagnostics as well.
    Verbose = 2,
}

impl Verbosity {
    /// The level selected by the CLI flags. `quiet` wins over `verbose`.
    pub const fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, true) => Self::Verbose,
            (false, false) => Self::Normal,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Quiet,
            2 => Self::Verbose,
            _ => Self::Normal,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Verbosity::Normal as u8);

/// Set the process-wide level from the CLI flags.
pub fn init(quiet: bool, verbose: bool) {
    set(Verbosity::from_flags(quiet, verbose));
}

/// Set the process-wide level.
pub fn set(level: Verbosity) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// The current level.
pub fn level() -> Verbosity {
    Verbosity::from_raw(LEVEL.load(Ordering::Relaxed))
}

/// Whether output meant for `at` is shown.
pub fn enabled(at: Verbosity) -> bool {
    level() >= at
}

/// Print a diagnostic, shown only with `-v`.
///
/// ```ignore
/// vprintln!("  {} stale: dependency {} changed", output, dep);
/// ```
#[macro_export]
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::enabled($crate::verbose::Verbosity::Verbose) {
            println!($($arg)*);
        }
    };
}

/// Print an announcement, suppressed by `-q`.
///
/// ```ignore
/// dprintln!("Creating {}", output);
/// ```
#[macro_export]
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::enabled($crate::verbose::Verbosity::Normal) {
            println!($($arg)*);
        }
    };
}

/// Print a `warning:` line to stderr at every level.
#[macro_export]
macro_rules! wprintln {
    ($($arg:tt)*) => {
        eprintln!("warning: {}", format_args!($($arg)*))
    };
}

/// Reports how long a scope took, in verbose mode, when dropped.
///
/// ```ignore
/// let _t = Timer::start("state load");
/// // prints "  state load: 4.2ms"
/// ```
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Start timing `label`.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    /// Time since [`Timer::start`].
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        vprintln!("  {}: {:.1?}", self.label, self.elapsed());
    }
}
