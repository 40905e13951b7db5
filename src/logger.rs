use anyhow::Result;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Per-session log file with retention-based cleanup of older sessions.
pub struct SessionLogger {
    file: Mutex<File>,
    log_path: PathBuf,
}

impl SessionLogger {
    pub fn new(log_dir: PathBuf, app_name: &str, retention_count: usize) -> Result<Self> {
        fs::create_dir_all(&log_dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("{}_{}.log", app_name, timestamp));

        clean_old_logs(&log_dir, app_name, retention_count);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let logger = Self {
            file: Mutex::new(file),
            log_path,
        };
        logger.write("INFO", &format!("=== {} session started ===", app_name));
        Ok(logger)
    }

    fn write(&self, level: &str, message: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("[{}] {:5} {}", timestamp, level, message);
        eprintln!("{}", line);

        let mut file = self.file.lock();
        let _ = writeln!(file, "{}", line);
        let _ = file.flush();
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write("INFO", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write("WARN", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write("ERROR", message.as_ref());
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Remove the oldest session logs beyond the retention count. The new
/// session's log is about to be created, so one extra slot is reserved.
fn clean_old_logs(log_dir: &Path, app_name: &str, retention_count: usize) {
    let prefix = format!("{}_", app_name);
    let mut logs: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_log = path.extension().and_then(|s| s.to_str()) == Some("log")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix));
            if is_log {
                if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                    logs.push((path, modified));
                }
            }
        }
    }

    logs.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in logs.iter().skip(retention_count.saturating_sub(1)) {
        let _ = fs::remove_file(path);
    }
}

static LOGGER: once_cell::sync::OnceCell<SessionLogger> = once_cell::sync::OnceCell::new();

pub fn init_logger(log_dir: PathBuf, app_name: &str, retention_count: usize) -> Result<()> {
    let logger = SessionLogger::new(log_dir, app_name, retention_count)?;
    LOGGER
        .set(logger)
        .map_err(|_| anyhow::anyhow!("logger already initialized"))?;
    Ok(())
}

pub fn log_info(message: impl AsRef<str>) {
    if let Some(logger) = LOGGER.get() {
        logger.info(message);
    }
}

pub fn log_warn(message: impl AsRef<str>) {
    if let Some(logger) = LOGGER.get() {
        logger.warn(message);
    }
}

pub fn log_error(message: impl AsRef<str>) {
    if let Some(logger) = LOGGER.get() {
        logger.error(message);
    }
}

pub fn finalize_logs() {
    if let Some(logger) = LOGGER.get() {
        logger.info("=== session ended ===");
    }
}

pub fn get_log_path() -> Option<PathBuf> {
    LOGGER.get().map(|logger| logger.log_path.clone())
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::log_info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::log_warn(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::log_error(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_keeps_newest_sessions() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            let path = dir.path().join(format!("deskbridge_2025010{}.log", i));
            fs::write(&path, "x").unwrap();
            // Distinct mtimes so the age sort is deterministic.
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let logger = SessionLogger::new(dir.path().to_path_buf(), "deskbridge", 3).unwrap();
        logger.info("hello");

        // Two survivors from cleanup plus the fresh session log.
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn log_file_receives_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new(dir.path().to_path_buf(), "deskbridge", 10).unwrap();
        logger.warn("canvas busy");

        let contents = fs::read_to_string(logger.path()).unwrap();
        assert!(contents.contains("session started"));
        assert!(contents.contains("WARN  canvas busy"));
    }
}
