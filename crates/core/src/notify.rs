use std::time::Duration;

use anyhow::Result;
use chrono::Local;

use crate::logger;

/// Outbound operator notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str) -> Result<()>;
}

/// Used when no chat is configured: notifications only reach the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str) -> Result<()> {
        logger::info(&format!("notification: {}", text.replace('\n', " | ")));
        Ok(())
    }
}

/// Local wall-clock time as `YYYY-MM-DD HH:MM:SS`.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `42s`, `3m 5s`, `3m`, `2h 10m`, `2h`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{}s", secs);
    }
    if secs < 3600 {
        let (m, s) = (secs / 60, secs % 60);
        return if s > 0 { format!("{}m {}s", m, s) } else { format!("{}m", m) };
    }
    let (h, m) = (secs / 3600, (secs % 3600) / 60);
    if m > 0 {
        format!("{}h {}m", h, m)
    } else {
        format!("{}h", h)
    }
}

pub fn event_message() -> String {
    format!("Target event detected!\nTime: {}", timestamp())
}
