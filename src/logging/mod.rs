//! logging
//!
//! The Logger & Event Sink (C1): two independently-leveled sinks (screen,
//! file) plus an optional NDJSON event stream, per §4.1.
//!
//! The file sink always carries the final summary regardless of its level.
//! Every subprocess invocation the engine makes is recorded here via
//! [`Logger::run_logged`], which delegates the actual spawn to
//! [`crate::process::run`].
//!
//! This sits alongside, not instead of, the crate's `tracing` wiring
//! ([`init_tracing`]): `tracing` carries process-level diagnostics for
//! whoever is operating the binary, while `Logger` is the domain artefact
//! the spec's determinism guarantees apply to.

pub mod event;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::process::{self, RunOutput};

pub use event::EventSink;

/// Screen/file verbosity level, per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Quiet,
    Normal,
    Warning,
    Verbose,
    Debug,
}

impl Level {
    pub fn parse(s: &str) -> Level {
        match s.trim().to_lowercase().as_str() {
            "quiet" => Level::Quiet,
            "normal" => Level::Normal,
            "warning" => Level::Warning,
            "debug" => Level::Debug,
            _ => Level::Verbose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Core,
    Detail,
}

/// Is a message at `severity`/`channel` allowed through at `level`? Summary
/// lines always pass, per the §4.1 filter matrix.
fn allowed(level: Level, severity: Severity, channel: Channel, summary: bool) -> bool {
    if summary {
        return true;
    }
    use Channel::*;
    use Severity::*;
    match level {
        Level::Quiet => channel == Core && severity == Error,
        Level::Normal => channel == Core && matches!(severity, Info | Error),
        Level::Warning => channel == Core && matches!(severity, Info | Warning | Error),
        Level::Verbose => matches!(severity, Info | Warning | Error),
        Level::Debug => true,
    }
}

/// Errors constructing or writing to a [`Logger`].
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("failed to create log file {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The two-sink Logger described in §4.1.
pub struct Logger {
    file: File,
    symlink_path: PathBuf,
    screen_level: Level,
    log_level: Level,
}

impl Logger {
    pub fn new(
        log_path: &Path,
        symlink_path: &Path,
        screen_level: Level,
        log_level: Level,
    ) -> Result<Self, LoggerError> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LoggerError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = File::create(log_path).map_err(|e| LoggerError::Create {
            path: log_path.to_path_buf(),
            source: e,
        })?;

        if let Some(parent) = symlink_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::remove_file(symlink_path);
        #[cfg(unix)]
        {
            if let Some(name) = log_path.file_name() {
                let target = Path::new("logs").join(name);
                let _ = std::os::unix::fs::symlink(target, symlink_path);
            }
        }

        Ok(Logger {
            file,
            symlink_path: symlink_path.to_path_buf(),
            screen_level,
            log_level,
        })
    }

    pub fn symlink_path(&self) -> &Path {
        &self.symlink_path
    }

    fn write_file(&mut self, s: &str) {
        let _ = self.file.write_all(s.as_bytes());
        let _ = self.file.flush();
    }

    fn write_screen(&self, s: &str) {
        print!("{s}");
        let _ = std::io::stdout().flush();
    }

    /// Emit one line. Callers control newlines, matching the original's
    /// one-line discipline so replayed logs are byte-identical.
    pub fn emit(&mut self, severity: Severity, channel: Channel, message: &str, summary: bool) {
        if allowed(self.log_level, severity, channel, summary) {
            self.write_file(message);
        }
        if allowed(self.screen_level, severity, channel, summary) {
            self.write_screen(message);
        }
    }

    pub fn debug_detail(&mut self, s: &str) {
        self.emit(Severity::Debug, Channel::Detail, &format!("{s}\n"), false);
    }

    pub fn info_core(&mut self, s: &str) {
        self.emit(Severity::Info, Channel::Core, &format!("{s}\n"), false);
    }

    pub fn warning_core(&mut self, s: &str) {
        self.emit(Severity::Warning, Channel::Core, &format!("{s}\n"), false);
    }

    pub fn error_core(&mut self, s: &str) {
        self.emit(Severity::Error, Channel::Core, &format!("{s}\n"), false);
    }

    /// Summary lines always reach both sinks at every level (§7).
    pub fn summary(&mut self, s: &str) {
        self.emit(Severity::Info, Channel::Core, &format!("{s}\n"), true);
    }

    pub fn line(&mut self, s: &str) {
        self.emit(Severity::Info, Channel::Detail, &format!("{s}\n"), false);
    }

    pub fn section(&mut self, title: &str) {
        self.line("");
        self.line(&"=".repeat(80));
        self.line(title);
        self.line(&"=".repeat(80));
    }

    /// Run a subprocess, recording argv/cwd/exit-code as CORE metadata and
    /// stdout+stderr as DETAIL, per §4.1.
    pub fn run_logged(
        &mut self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> RunOutput {
        self.info_core("RUN");
        self.info_core(&format!("cmd={argv:?}"));
        if let Some(dir) = cwd {
            self.info_core(&format!("cwd={}", dir.display()));
        }

        self.section("RUN (captured stdout+stderr)");
        let output = process::run(argv, cwd, env);
        if !output.stdout.is_empty() {
            self.line(output.stdout.trim_end_matches('\n'));
        }
        if !output.stderr.is_empty() {
            self.line(output.stderr.trim_end_matches('\n'));
        }
        self.info_core(&format!("returncode={}", output.returncode));
        output
    }
}

/// Build a log file name from a template, per §4.6.
pub fn new_log_name(template: &str, issue: Option<&str>, ts: &str) -> String {
    let mut name = template.replace("{ts}", ts);
    if let Some(issue) = issue {
        name = name.replace("{issue}", issue);
    }
    name
}

/// Ambient process-level logging, independent of the domain [`Logger`]:
/// wires `tracing` to an env-filtered, JSON-formatted subscriber. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_blocks_core_info_but_not_errors() {
        assert!(!allowed(Level::Quiet, Severity::Info, Channel::Core, false));
        assert!(allowed(Level::Quiet, Severity::Error, Channel::Core, false));
    }

    #[test]
    fn summary_always_allowed() {
        assert!(allowed(Level::Quiet, Severity::Debug, Channel::Detail, true));
    }

    #[test]
    fn verbose_allows_detail_info_but_not_debug() {
        assert!(allowed(Level::Verbose, Severity::Info, Channel::Detail, false));
        assert!(!allowed(Level::Verbose, Severity::Debug, Channel::Detail, false));
    }

    #[test]
    fn debug_allows_everything() {
        assert!(allowed(Level::Debug, Severity::Debug, Channel::Detail, false));
    }

    #[test]
    fn logger_writes_summary_to_file_at_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("logs").join("run.log");
        let symlink_path = dir.path().join("current_log");
        let mut logger =
            Logger::new(&log_path, &symlink_path, Level::Quiet, Level::Quiet).unwrap();
        logger.summary("RESULT: SUCCESS");
        logger.info_core("should not appear");
        drop(logger);
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("RESULT: SUCCESS"));
        assert!(!contents.contains("should not appear"));
    }
}
