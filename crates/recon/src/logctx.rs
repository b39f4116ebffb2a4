//! Per-command logging scope.
//!
//! Every engine entry point takes a `&mut CommandLog`. Lines are forwarded to
//! the `log` facade tagged with the command name and a correlation id, and a
//! copy is kept so callers (and tests) can inspect what a command reported
//! without installing a global logger.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::model::ReportMeta;

const TARGET: &str = "xingsync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_log(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug)]
pub struct CommandLog {
    command: String,
    correlation_id: String,
    started: Instant,
    entries: Vec<LogEntry>,
    finished: Option<Duration>,
}

impl CommandLog {
    /// Open a scope for one command invocation.
    pub fn start(command: &str) -> Self {
        Self::with_correlation_id(command, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_correlation_id(command: &str, correlation_id: impl Into<String>) -> Self {
        let mut scope = Self {
            command: command.to_string(),
            correlation_id: correlation_id.into(),
            started: Instant::now(),
            entries: Vec::new(),
            finished: None,
        };
        scope.emit(LogLevel::Info, "start".to_string());
        scope
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message.into());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.started.elapsed())
    }

    /// Close the scope. Idempotent; the first call fixes the elapsed time.
    pub fn finish(&mut self) -> Duration {
        if let Some(elapsed) = self.finished {
            return elapsed;
        }
        let elapsed = self.started.elapsed();
        self.emit(LogLevel::Info, format!("end ({} ms)", elapsed.as_millis()));
        self.finished = Some(elapsed);
        elapsed
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.level, LogLevel::Warn | LogLevel::Error))
    }

    pub fn meta(&self) -> ReportMeta {
        ReportMeta {
            command: self.command.clone(),
            correlation_id: self.correlation_id.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn emit(&mut self, level: LogLevel, message: String) {
        log::log!(
            target: TARGET,
            level.as_log(),
            "[{} {}] {}",
            self.command,
            self.correlation_id,
            message
        );
        self.entries.push(LogEntry { level, message });
    }
}
