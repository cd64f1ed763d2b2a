//! Levelled log lines with timestamps, source locations, and ANSI colour.
//!
//! The [`slog!`] macro produces lines in the form:
//!
//! ```text
//! 20261017T09:14:03.215 - INFO  - src/pager.rs:88 - pager: u-17 <-> u-42 page 3/3 (5 message(s))
//! ```
//!
//! On a terminal, timestamps and locations are dimmed and user/message ids are
//! colour-coded by content so the same id always renders in the same colour.
//!
//! Output goes to stderr unless [`set_writer`] installs another destination.
//! The minimum level comes from `SOCIALNET_LOG` (`error`, `warn`, `info`,
//! `debug`), read once by [`init`]; the default is `info`.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::SystemTime;

pub const LOG_ENV: &str = "SOCIALNET_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    pub fn parse(s: &str) -> Option<Level> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" | "trace" => Some(Level::Debug),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
        }
    }

    fn from_u8(v: u8) -> Level {
        match v {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            _ => Level::Debug,
        }
    }
}

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Call once at startup. Detects colour support on stderr and reads the
/// level filter from the environment.
pub fn init() {
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
    if let Some(level) = std::env::var(LOG_ENV).ok().as_deref().and_then(Level::parse) {
        set_max_level(level);
    }
}

pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: Level) -> bool {
    level <= max_level()
}

/// Redirect all subsequent output to `w`. Disables colour codes.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    let mut guard = LOG_WRITER.lock().unwrap_or_else(|e| e.into_inner());
    *guard = w;
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const MSG_ID_COLOUR: &str = "\x1b[93m";

const ID_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[94m", "\x1b[95m", "\x1b[96m", "\x1b[31m", "\x1b[32m",
    "\x1b[34m", "\x1b[35m", "\x1b[36m",
];

fn colour_for(id: i64) -> &'static str {
    // Knuth multiplicative hash keeps neighbouring ids apart.
    let h = (id as u64).wrapping_mul(2_654_435_761) >> 16;
    ID_COLOURS[(h as usize) % ID_COLOURS.len()]
}

/// Format a user id, e.g. `u-42`.
pub fn user_id(id: i64) -> String {
    if colour_enabled() {
        format!("{}u-{id}{RESET}", colour_for(id))
    } else {
        format!("u-{id}")
    }
}

/// Format a message id, e.g. `m-1087`.
pub fn msg_id(id: i64) -> String {
    if colour_enabled() {
        format!("{MSG_ID_COLOUR}m-{id}{RESET}")
    } else {
        format!("m-{id}")
    }
}

/// Civil (year, month, day) from days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Render a millisecond Unix timestamp as `YYYYMMDDTHH:MM:SS.mmm` (UTC).
pub fn format_millis(millis: u64) -> String {
    let secs = millis / 1000;
    let (y, m, d) = civil_from_days((secs / 86_400) as i64);
    let tod = secs % 86_400;
    format!(
        "{:04}{:02}{:02}T{:02}:{:02}:{:02}.{:03}",
        y,
        m,
        d,
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60,
        millis % 1000
    )
}

pub fn format_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_millis(now.as_millis() as u64)
}

/// Write one line. Called by [`slog!`].
pub fn emit(level: Level, file: &str, line: u32, msg: &str) {
    if !enabled(level) {
        return;
    }
    let ts = format_timestamp();
    let label = level.label();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {label} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {label} - {file}:{line} - {msg}")
    };
    let mut writer = LOG_WRITER.lock().unwrap_or_else(|e| e.into_inner());
    let _ = writeln!(*writer, "{formatted}");
}

/// Emit a log line at the given level.
///
/// ```ignore
/// slog!(info, "friends: {} accepted request {}", logging::user_id(to), id);
/// slog!(debug, "pager: offset {offset}");
/// ```
#[macro_export]
macro_rules! slog {
    (error, $($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Error, file!(), line!(), &format!($($arg)*))
    };
    (warn, $($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Warn, file!(), line!(), &format!($($arg)*))
    };
    (info, $($arg:tt)*) => {
        $crate::logging::emit($crate::logging::Level::Info, file!(), line!(), &format!($($arg)*))
    };
    (debug, $($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::Level::Debug) {
            $crate::logging::emit($crate::logging::Level::Debug, file!(), line!(), &format!($($arg)*))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_as_1970() {
        assert_eq!(format_millis(0), "19700101T00:00:00.000");
    }

    #[test]
    fn known_instant_formats() {
        // 2024-02-29T12:34:56.789Z
        assert_eq!(format_millis(1_709_210_096_789), "20240229T12:34:56.789");
    }

    #[test]
    fn level_parsing() {
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse(" debug "), Some(Level::Debug));
        assert_eq!(Level::parse("loud"), None);
        assert!(Level::Error < Level::Debug);
    }

    #[test]
    fn plain_ids_without_colour() {
        if !colour_enabled() {
            assert_eq!(user_id(7), "u-7");
            assert_eq!(msg_id(12), "m-12");
        }
    }
}
