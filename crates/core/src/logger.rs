use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex, OnceLock, PoisonError};

use chrono::Local;

static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

struct Logger {
    file: File,
    tui_tx: Option<mpsc::Sender<String>>,
    prefixes: HashMap<String, u8>, // prefix -> color index
}

// Color indices for TUI rendering (mapped in ui.rs)
pub const COLOR_GRAY: u8 = 1;
pub const COLOR_BLUE: u8 = 2;
pub const COLOR_GREEN: u8 = 3;
pub const COLOR_MAGENTA: u8 = 4;

pub const STAGE: &str = "stage";
pub const REMOTE: &str = "remote";
pub const WATCHDOG: &str = "watchdog";
pub const PLATFORM: &str = "platform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Initialize the global logger. Truncates `app.log` in `log_dir`.
pub fn init(log_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_dir.join("app.log"))?;

    let prefixes = HashMap::from([
        (STAGE.to_string(), COLOR_BLUE),
        (REMOTE.to_string(), COLOR_GREEN),
        (WATCHDOG.to_string(), COLOR_MAGENTA),
        (PLATFORM.to_string(), COLOR_GRAY),
    ]);
    LOGGER
        .set(Mutex::new(Logger { file, tui_tx: None, prefixes }))
        .ok();
    Ok(())
}

/// Wire the TUI log channel.
pub fn set_tui_sender(tx: mpsc::Sender<String>) {
    if let Some(logger) = LOGGER.get() {
        logger.lock().unwrap_or_else(PoisonError::into_inner).tui_tx = Some(tx);
    }
}

pub fn file_line(ts: &str, level: Level, prefix: &str, msg: &str) -> String {
    if prefix.is_empty() {
        format!("[{}] [{}] {}", ts, level.tag(), msg)
    } else {
        format!("[{}] [{}] [{}] {}", ts, level.tag(), prefix, msg)
    }
}

/// TUI record, `\x1f`-separated: level, prefix, color, timestamp, message.
pub fn tui_line(ts: &str, level: Level, prefix: &str, color: u8, msg: &str) -> String {
    format!("{}\x1f{}\x1f{}\x1f{}\x1f{}", level.tag(), prefix, color, ts, msg)
}

fn write_log(level: Level, prefix: &str, msg: &str) {
    let Some(logger) = LOGGER.get() else { return };
    let ts = Local::now().format("%H:%M:%S").to_string();

    let mut l = logger.lock().unwrap_or_else(PoisonError::into_inner);
    let color = l.prefixes.get(prefix).copied().unwrap_or(0);
    writeln!(l.file, "{}", file_line(&ts, level, prefix, msg)).ok();
    if let Some(tx) = &l.tui_tx {
        tx.send(tui_line(&ts, level, prefix, color, msg)).ok();
    }
}

pub fn info(msg: &str) {
    write_log(Level::Info, "", msg);
}

pub fn warn(msg: &str) {
    write_log(Level::Warn, "", msg);
}

pub fn error(msg: &str) {
    write_log(Level::Error, "", msg);
}

pub fn info_p(prefix: &str, msg: &str) {
    write_log(Level::Info, prefix, msg);
}

pub fn warn_p(prefix: &str, msg: &str) {
    write_log(Level::Warn, prefix, msg);
}

pub fn error_p(prefix: &str, msg: &str) {
    write_log(Level::Error, prefix, msg);
}
