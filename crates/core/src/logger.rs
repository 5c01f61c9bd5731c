use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use colored::{Color, Colorize};

static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

struct Logger {
    file: Option<File>,
    echo: bool,
    prefixes: HashMap<String, Color>, // prefix -> stderr color
}

/// Initialize the global logger. Appends to `system_YYYYMMDD.log` under `log_dir`.
///
/// A log directory that cannot be created or opened degrades to stderr-only
/// output; the failure is reported on stderr once.
pub fn init(log_dir: &Path, echo: bool) {
    let file = fs::create_dir_all(log_dir)
        .and_then(|_| {
            let name = format!("system_{}.log", Local::now().format("%Y%m%d"));
            OpenOptions::new().create(true).append(true).open(log_dir.join(name))
        });
    let file = match file {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("log file unavailable in {}: {}", log_dir.display(), e);
            None
        }
    };

    LOGGER
        .set(Mutex::new(Logger { file, echo, prefixes: HashMap::new() }))
        .ok();
}

/// Register a prefix with a color used when the record is echoed to stderr.
pub fn register_prefix(prefix: &str, color: Color) {
    if let Some(logger) = LOGGER.get() {
        let mut l = logger.lock().unwrap_or_else(|p| p.into_inner());
        l.prefixes.insert(prefix.to_string(), color);
    }
}

fn write_log(level: &str, prefix: &str, msg: &str) {
    let Some(logger) = LOGGER.get() else { return };
    let ts = Local::now().format("%H:%M:%S").to_string();

    let line = if prefix.is_empty() {
        format!("[{}] [{}] {}", ts, level, msg)
    } else {
        format!("[{}] [{}] [{}] {}", ts, level, prefix, msg)
    };

    let mut l = logger.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(file) = l.file.as_mut() {
        writeln!(file, "{}", line).ok();
    }
    if l.echo {
        let level_col = match level {
            "ERROR" => level.red().bold(),
            "WARN" => level.yellow(),
            _ => level.normal(),
        };
        if prefix.is_empty() {
            eprintln!("[{}] [{}] {}", ts, level_col, msg);
        } else {
            let color = l.prefixes.get(prefix).copied().unwrap_or(Color::White);
            eprintln!("[{}] [{}] [{}] {}", ts, level_col, prefix.color(color), msg);
        }
    }
}

pub fn info(msg: &str) {
    write_log("INFO", "", msg);
}

pub fn warn(msg: &str) {
    write_log("WARN", "", msg);
}

pub fn error(msg: &str) {
    write_log("ERROR", "", msg);
}

/// Log under a component prefix.
pub fn info_p(prefix: &str, msg: &str) {
    write_log("INFO", prefix, msg);
}

pub fn warn_p(prefix: &str, msg: &str) {
    write_log("WARN", prefix, msg);
}

pub fn error_p(prefix: &str, msg: &str) {
    write_log("ERROR", prefix, msg);
}
