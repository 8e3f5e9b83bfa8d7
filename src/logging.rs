//! Structured logging for the analysis pipeline.
//!
//! Records carry a level, an optional category and an optional JSON payload.
//! They go to an external callback when one is configured, otherwise they are
//! forwarded to the `log` facade under the `vision_key::<category>` target so
//! the binary's `env_logger` setup decides what reaches the console.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&VisionLogRecord) + Send + Sync + 'static>;

/// Logging configuration shared by the orchestrator and page driver.
#[derive(Clone, Default)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }
}

/// Log severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn facade_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisionLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl VisionLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Default sink: forward to the `log` facade.
pub fn default_log_handler(record: &VisionLogRecord) {
    let target = match &record.category {
        Some(category) => format!("vision_key::{category}"),
        None => "vision_key".to_string(),
    };
    match &record.auxiliary {
        Some(aux) if !aux.is_null() => log::log!(
            target: target.as_str(),
            record.level.facade_level(),
            "{} {}",
            record.message,
            aux
        ),
        _ => log::log!(
            target: target.as_str(),
            record.level.facade_level(),
            "{}",
            record.message
        ),
    }
}

/// Pipeline logger gated by [`Verbosity`].
#[derive(Clone)]
pub struct VisionLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for VisionLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for VisionLogger {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}

impl VisionLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_verbose(&mut self, verbose: Verbosity) {
        self.config.verbose = verbose;
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            VisionLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn info(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing_logger(verbose: Verbosity) -> (VisionLogger, Arc<Mutex<Vec<VisionLogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&records);
        let callback: LogCallback = Arc::new(move |record| {
            capture.lock().unwrap().push(record.clone());
        });
        let mut logger = VisionLogger::new(verbose);
        logger.set_external_logger(Some(callback));
        (logger, records)
    }

    #[test]
    fn respects_verbosity() {
        let logger = VisionLogger::new(Verbosity::Minimal);
        assert!(logger.config().should_log(LogLevel::Error));
        assert!(!logger.config().should_log(LogLevel::Info));
        assert!(!logger.config().should_log(LogLevel::Debug));
    }

    #[test]
    fn external_logger_receives_structured_records() {
        let (logger, records) = capturing_logger(Verbosity::Detailed);

        logger.info(
            "auto-answer clicked",
            Some("driver"),
            Some(serde_json::json!({ "clicked": "A, B" })),
        );
        logger.debug("matched", Some("matcher"), None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].message, "auto-answer clicked");
        assert_eq!(values[0].category.as_deref(), Some("driver"));
        assert_eq!(values[0].level, LogLevel::Info);
        assert_eq!(
            values[0].auxiliary.as_ref().unwrap(),
            &serde_json::json!({ "clicked": "A, B" })
        );
        assert_eq!(values[1].level, LogLevel::Debug);
    }

    #[test]
    fn errors_pass_minimal_verbosity() {
        let (logger, records) = capturing_logger(Verbosity::Minimal);
        logger.info("dropped", None, None);
        logger.error("kept", Some("analysis"), None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].message, "kept");
    }
}
