// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! `log` backend printing colored, timestamped lines to stderr.
//!
//! Each line carries the wall-clock time, the name of the emitting thread and
//! the source location, so interleaved output of a waiter and its notifiers
//! can be told apart.

use std::{
    fmt::{self, Write},
    io::Write as _,
    str::FromStr,
    thread,
};

use log::{Level, LevelFilter, Log, Metadata, Record};
pub use log::{debug, error, info, trace, warn};

macro_rules! color_fmt {
    ($color_code:expr, $($arg:tt)*) => {
        format_args!("\u{1B}[{}m{}\u{1B}[m", $color_code as u8, format_args!($($arg)*))
    };
}

#[repr(u8)]
enum AnsiColor {
    Red = 31,
    Green = 32,
    Yellow = 33,
    Cyan = 36,
    White = 37,
    BrightBlack = 90,
}

struct KernelLogger;

/// Adapter from `fmt::Write` to the locked stderr handle.
struct Stderr<'a>(std::io::StderrLock<'a>);

impl Write for Stderr<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl Log for KernelLogger {
    #[inline]
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let line = record.line().unwrap_or(0);
        let path = record.target();
        let color = match level {
            Level::Error => AnsiColor::Red,
            Level::Warn => AnsiColor::Yellow,
            Level::Info => AnsiColor::Green,
            Level::Debug => AnsiColor::Cyan,
            Level::Trace => AnsiColor::BrightBlack,
        };
        let current = thread::current();
        let name = current.name().unwrap_or("<unnamed>");

        let _ = print_fmt(color_fmt!(
            AnsiColor::White,
            "[{time} {name} {path}:{line}] {args}\n",
            time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            name = name,
            path = path,
            line = line,
            args = color_fmt!(color, "{}", record.args()),
        ));
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Writes preformatted output without interleaving with other log lines.
pub fn print_fmt(args: fmt::Arguments) -> fmt::Result {
    static LOCK: spin::Mutex<()> = spin::Mutex::new(());

    let _guard = LOCK.lock();
    Stderr(std::io::stderr().lock()).write_fmt(args)
}

/// Installs the logger at `warn` level. Later calls keep the first logger.
pub fn init_klogger() {
    if log::set_logger(&KernelLogger).is_ok() {
        log::set_max_level(LevelFilter::Warn);
    }
}

/// Installs the logger and takes the level from environment variable `var`.
pub fn init_from_env(var: &str) {
    init_klogger();
    if let Ok(level) = std::env::var(var) {
        set_log_level(&level);
    }
}

/// Sets the maximum level by name; unknown names turn logging off.
pub fn set_log_level(level: &str) {
    let lf = LevelFilter::from_str(level)
        .ok()
        .unwrap_or(LevelFilter::Off);
    log::set_max_level(lf);
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::{init_klogger, set_log_level};

    #[test]
    fn test_level_names() {
        init_klogger();
        set_log_level("trace");
        assert_eq!(log::max_level(), LevelFilter::Trace);
        set_log_level("bogus");
        assert_eq!(log::max_level(), LevelFilter::Off);
        set_log_level("warn");
        assert_eq!(log::max_level(), LevelFilter::Warn);
    }
}
