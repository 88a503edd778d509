use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RUN_LOG_SUFFIX: &str = "_run.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Pause,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Pause => "PAUSE",
        }
    }
}

pub fn run_log_path(working_path: &Path) -> PathBuf {
    let stem = working_path
        .file_stem()
        .and_then(|v| v.to_str())
        .unwrap_or("run");
    working_path.with_file_name(format!("{stem}{RUN_LOG_SUFFIX}"))
}

/// Append-only run log: one timestamped line per event, created per process
/// invocation and never rewritten. Callers flush before any operation that
/// might block on the operator or crash.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Opens (appending) the run log that sits next to `working_path` and
    /// writes the new-run banner.
    pub fn create(working_path: &Path) -> std::io::Result<Self> {
        Self::open_at(run_log_path(working_path))
    }

    pub fn open_at(path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut log = Self { path, file };
        log.event(
            LogLevel::Info,
            &format!(
                "================ New run started: {} ================",
                Local::now().to_rfc3339()
            ),
        );
        log.flush();
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort append; a failing log write must never take down a run
    /// that is otherwise making progress.
    pub fn event(&mut self, level: LogLevel, message: &str) {
        let line = format!(
            "{} - {} - {message}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            level.as_str()
        );
        let _ = writeln!(self.file, "{line}");
    }

    pub fn info(&mut self, message: &str) {
        self.event(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.event(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: &str) {
        self.event(LogLevel::Error, message);
    }

    pub fn pause(&mut self, message: &str) {
        self.event(LogLevel::Pause, message);
    }

    pub fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn run_log_path_uses_working_stem() {
        let path = run_log_path(Path::new("/data/users_working.json"));
        assert_eq!(path, PathBuf::from("/data/users_working_run.log"));
    }

    #[test]
    fn events_append_without_rewriting_earlier_lines() {
        let dir = tempdir().expect("tempdir");
        let working = dir.path().join("batch_working.json");

        {
            let mut log = RunLog::create(&working).expect("create log");
            log.info("first run event");
            log.flush();
        }
        {
            let mut log = RunLog::create(&working).expect("reopen log");
            log.warn("second run event");
            log.flush();
        }

        let content =
            fs::read_to_string(dir.path().join("batch_working_run.log")).expect("read log");
        assert!(content.contains("first run event"));
        assert!(content.contains("second run event"));
        assert_eq!(content.matches("New run started").count(), 2);
        let first = content.find("first run event").expect("first offset");
        let second = content.find("second run event").expect("second offset");
        assert!(first < second);
    }
}
