//! Strongly-typed configuration for the capture-to-answer pipeline.
//!
//! Values come from defaults, from environment variables (with optional
//! `.env` support), from the synchronized settings store, or from explicit
//! overrides. Field names serialize in the camelCase shape used by the
//! settings store so a stored settings object round-trips unchanged.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::types::AnswerMode;

pub type JsonObject = JsonMap<String, JsonValue>;

/// Default proxy hosting the analyze and quota endpoints.
pub const DEFAULT_PROXY_URL: &str = "https://admin.hailamdev.space";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_LANGUAGE: &str = "vi";
pub const DEFAULT_AUTO_CLICK_DELAY_MS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Shared logger callback signature used by the configuration.
pub type LoggerCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Verbosity level for pipeline logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    pub fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// User settings and runtime knobs.
#[derive(DeriveSerialize, DeriveDeserialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct VisionKeyConfig {
    /// Credential for the analyze and quota endpoints.
    #[serde(alias = "licenseKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub answer_mode: AnswerMode,
    pub expert_context: String,
    pub language: String,
    pub model: String,
    pub proxy_url: String,
    /// Overrides `{proxy_url}/api/analyze` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyze_url: Option<String>,
    pub auto_click_enabled: bool,
    #[serde(rename = "autoClickDelay", alias = "autoClickDelayMs")]
    pub auto_click_delay_ms: u64,
    pub show_click_notification: bool,
    pub continue_in_background: bool,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub verbose: Verbosity,
    #[serde(skip_serializing, skip_deserializing)]
    pub logger: Option<LoggerCallback>,
}

impl Default for VisionKeyConfig {
    fn default() -> Self {
        VisionKeyConfig {
            api_key: None,
            answer_mode: AnswerMode::default(),
            expert_context: String::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            analyze_url: None,
            auto_click_enabled: false,
            auto_click_delay_ms: DEFAULT_AUTO_CLICK_DELAY_MS,
            show_click_notification: true,
            continue_in_background: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            verbose: Verbosity::default(),
            logger: None,
        }
    }
}

impl VisionKeyConfig {
    /// Construct a configuration by reading `VISION_KEY_*` environment
    /// variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, VisionKeyConfigError> {
        let _ = dotenv();
        let mut config = VisionKeyConfig::default();

        if let Some(value) = env_var("VISION_KEY_API_KEY") {
            config.api_key = Some(value);
        }

        if let Some(value) = env_var("VISION_KEY_ANSWER_MODE") {
            config.answer_mode = AnswerMode::parse(&value).ok_or_else(|| {
                VisionKeyConfigError::invalid_enum("VISION_KEY_ANSWER_MODE", value.clone())
            })?;
        }

        if let Some(value) = env_var("VISION_KEY_EXPERT_CONTEXT") {
            config.expert_context = value;
        }

        if let Some(value) = env_var("VISION_KEY_LANGUAGE") {
            config.language = value;
        }

        if let Some(value) = env_var("VISION_KEY_MODEL") {
            config.model = value;
        }

        if let Some(value) = env_var("VISION_KEY_PROXY_URL") {
            config.proxy_url = value;
        }

        if let Some(value) = env_var("VISION_KEY_ANALYZE_URL") {
            config.analyze_url = Some(value);
        }

        if let Some(value) = env_var("VISION_KEY_AUTO_CLICK") {
            config.auto_click_enabled = parse_bool("VISION_KEY_AUTO_CLICK", &value)?;
        }

        if let Some(value) = env_var("VISION_KEY_AUTO_CLICK_DELAY_MS") {
            config.auto_click_delay_ms = parse_u64("VISION_KEY_AUTO_CLICK_DELAY_MS", &value)?;
        }

        if let Some(value) = env_var("VISION_KEY_SHOW_NOTIFICATION") {
            config.show_click_notification = parse_bool("VISION_KEY_SHOW_NOTIFICATION", &value)?;
        }

        if let Some(value) = env_var("VISION_KEY_CONTINUE_IN_BACKGROUND") {
            config.continue_in_background =
                parse_bool("VISION_KEY_CONTINUE_IN_BACKGROUND", &value)?;
        }

        if let Some(value) = env_var("VISION_KEY_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_u64("VISION_KEY_REQUEST_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("VISION_KEY_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse_u64("VISION_KEY_CONNECT_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("VISION_KEY_VERBOSE") {
            let parsed = parse_u8("VISION_KEY_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                VisionKeyConfigError::invalid_enum("VISION_KEY_VERBOSE", parsed.to_string())
            })?;
        }

        Ok(config)
    }

    /// Build a configuration from a settings object read out of the
    /// synchronized store. Missing keys keep their defaults.
    pub fn from_settings(settings: JsonObject) -> Result<Self, VisionKeyConfigError> {
        serde_json::from_value(JsonValue::Object(settings))
            .map_err(|source| VisionKeyConfigError::InvalidSettings { source })
    }

    /// Settings object suitable for the synchronized store.
    pub fn to_settings(&self) -> JsonObject {
        match serde_json::to_value(self) {
            Ok(JsonValue::Object(map)) => map,
            _ => JsonObject::new(),
        }
    }

    /// Endpoint receiving analyze requests.
    pub fn analyze_endpoint(&self) -> String {
        self.analyze_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/analyze", self.proxy_url.trim_end_matches('/')))
    }

    /// Endpoint answering credential/quota checks.
    pub fn quota_endpoint(&self) -> String {
        format!("{}/api/quota", self.proxy_url.trim_end_matches('/'))
    }

    /// Credential, if one is configured and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether an analysis should be handed to the background context when
    /// the initiating surface is torn down.
    pub fn hands_off_on_teardown(&self) -> bool {
        self.continue_in_background && self.auto_click_enabled
    }

    /// Reset every user-facing setting to its default, keeping the logger.
    pub fn reset(&mut self) {
        let logger = self.logger.take();
        *self = VisionKeyConfig {
            logger,
            ..VisionKeyConfig::default()
        };
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: VisionKeyConfigOverrides) -> VisionKeyConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.api_key {
            next.api_key = value;
        }
        if let Some(value) = overrides.answer_mode {
            next.answer_mode = value;
        }
        if let Some(value) = overrides.expert_context {
            next.expert_context = value;
        }
        if let Some(value) = overrides.language {
            next.language = value;
        }
        if let Some(value) = overrides.model {
            next.model = value;
        }
        if let Some(value) = overrides.proxy_url {
            next.proxy_url = value;
        }
        if let Some(value) = overrides.analyze_url {
            next.analyze_url = value;
        }
        if let Some(value) = overrides.auto_click_enabled {
            next.auto_click_enabled = value;
        }
        if let Some(value) = overrides.auto_click_delay_ms {
            next.auto_click_delay_ms = value;
        }
        if let Some(value) = overrides.show_click_notification {
            next.show_click_notification = value;
        }
        if let Some(value) = overrides.continue_in_background {
            next.continue_in_background = value;
        }
        if let Some(value) = overrides.request_timeout_ms {
            next.request_timeout_ms = value;
        }
        if let Some(value) = overrides.connect_timeout_ms {
            next.connect_timeout_ms = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }

        next
    }
}

/// Field-level overrides for [`VisionKeyConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct VisionKeyConfigOverrides {
    pub api_key: Option<Option<String>>,
    pub answer_mode: Option<AnswerMode>,
    pub expert_context: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub proxy_url: Option<String>,
    pub analyze_url: Option<Option<String>>,
    pub auto_click_enabled: Option<bool>,
    pub auto_click_delay_ms: Option<u64>,
    pub show_click_notification: Option<bool>,
    pub continue_in_background: Option<bool>,
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub verbose: Option<Verbosity>,
    pub logger: Option<Option<LoggerCallback>>,
}

impl VisionKeyConfigOverrides {
    pub fn api_key<T: Into<Option<String>>>(mut self, api_key: T) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn answer_mode(mut self, mode: AnswerMode) -> Self {
        self.answer_mode = Some(mode);
        self
    }

    pub fn auto_click_enabled(mut self, enabled: bool) -> Self {
        self.auto_click_enabled = Some(enabled);
        self
    }
}

fn redact(key: &Option<String>) -> Option<&'static str> {
    key.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for VisionKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionKeyConfig")
            .field("api_key", &redact(&self.api_key))
            .field("answer_mode", &self.answer_mode)
            .field("expert_context", &self.expert_context)
            .field("language", &self.language)
            .field("model", &self.model)
            .field("proxy_url", &self.proxy_url)
            .field("analyze_url", &self.analyze_url)
            .field("auto_click_enabled", &self.auto_click_enabled)
            .field("auto_click_delay_ms", &self.auto_click_delay_ms)
            .field("show_click_notification", &self.show_click_notification)
            .field("continue_in_background", &self.continue_in_background)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("verbose", &self.verbose)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for VisionKeyConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionKeyConfigOverrides")
            .field("api_key", &self.api_key.as_ref().map(redact))
            .field("answer_mode", &self.answer_mode)
            .field("expert_context", &self.expert_context)
            .field("language", &self.language)
            .field("model", &self.model)
            .field("proxy_url", &self.proxy_url)
            .field("analyze_url", &self.analyze_url)
            .field("auto_click_enabled", &self.auto_click_enabled)
            .field("auto_click_delay_ms", &self.auto_click_delay_ms)
            .field("show_click_notification", &self.show_click_notification)
            .field("continue_in_background", &self.continue_in_background)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("verbose", &self.verbose)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .finish()
    }
}

/// Errors that can arise while constructing a [`VisionKeyConfig`].
#[derive(Debug, Error)]
pub enum VisionKeyConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid stored settings: {source}")]
    InvalidSettings {
        #[source]
        source: serde_json::Error,
    },
}

impl VisionKeyConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        VisionKeyConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, VisionKeyConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(VisionKeyConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, VisionKeyConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| VisionKeyConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, VisionKeyConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| VisionKeyConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}
