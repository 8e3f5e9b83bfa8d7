use std::fmt;
use std::sync::Arc;

use crate::config::{LoggerCallback, VisionKeyConfig};
use crate::metrics::{get_inference_time_ms, start_inference_timer};
use crate::types::AnswerMode;

use super::error::VisionModelError;
use super::http::ProxyVisionProvider;
use super::prompts::{GenerationConfig, build_prompt};
use super::provider::{AnalyzeRequest, QuotaStatus, VisionModelProvider};

/// Callback invoked after a successful analysis with the inference time in
/// milliseconds.
pub type MetricsCallback = Arc<dyn Fn(AnswerMode, u64) + Send + Sync + 'static>;

/// Provider-neutral vision model client.
pub struct VisionModelClient<P: VisionModelProvider> {
    provider: P,
    model: String,
    logger: Option<LoggerCallback>,
    metrics_callback: Option<MetricsCallback>,
}

impl<P> fmt::Debug for VisionModelClient<P>
where
    P: VisionModelProvider + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionModelClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("logger_attached", &self.logger.is_some())
            .field("metrics_callback", &self.metrics_callback.is_some())
            .finish()
    }
}

impl<P: VisionModelProvider> VisionModelClient<P> {
    pub fn new(model: impl Into<String>, provider: P) -> Self {
        Self {
            provider,
            model: model.into(),
            logger: None,
            metrics_callback: None,
        }
    }

    pub fn with_logger(mut self, logger: Option<LoggerCallback>) -> Self {
        self.logger = logger;
        self
    }

    /// Attach a metrics callback invoked after successful analyses.
    pub fn with_metrics_callback(mut self, callback: Option<MetricsCallback>) -> Self {
        self.metrics_callback = callback;
        self
    }

    pub fn set_metrics_callback(&mut self, callback: Option<MetricsCallback>) {
        self.metrics_callback = callback;
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Access the underlying provider (primarily for testing).
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Build the analyze body for a `data:` URI capture.
    pub fn build_request(
        &self,
        image_data_url: &str,
        mode: AnswerMode,
        expert_context: &str,
    ) -> Result<AnalyzeRequest, VisionModelError> {
        if image_data_url.trim().is_empty() {
            return Err(VisionModelError::MissingImage);
        }
        let image = strip_data_uri(image_data_url).ok_or(VisionModelError::InvalidImage)?;

        Ok(AnalyzeRequest {
            image: image.to_string(),
            prompt_text: build_prompt(mode, expert_context),
            mode,
            expert_context: expert_context.to_string(),
            model: self.model.clone(),
            generation_config: GenerationConfig::for_mode(mode),
        })
    }

    /// Send the capture to the model and return the full response text.
    pub async fn analyze(
        &self,
        api_key: &str,
        image_data_url: &str,
        mode: AnswerMode,
        expert_context: &str,
    ) -> Result<String, VisionModelError> {
        if api_key.trim().is_empty() {
            return Err(VisionModelError::MissingApiKey);
        }
        let request = self.build_request(image_data_url, mode, expert_context)?;

        self.log_debug(&format!(
            "Sending analyze request: model={} mode={} expert={} image_len={}",
            self.model,
            mode,
            if expert_context.is_empty() { "none" } else { expert_context },
            request.image.len()
        ));

        let start = start_inference_timer();
        match self.provider.analyze(api_key, &request).await {
            Ok(text) => {
                let inference_time_ms = get_inference_time_ms(start);
                if let Some(callback) = &self.metrics_callback {
                    callback(mode, inference_time_ms);
                }
                self.log_debug(&format!(
                    "Analyze succeeded: model={} duration={}ms chars={}",
                    self.model,
                    inference_time_ms,
                    text.chars().count()
                ));
                Ok(text)
            }
            Err(err) => {
                self.log_error(&format!("Analyze failed for model={}: {}", self.model, err));
                Err(err)
            }
        }
    }

    pub async fn check_quota(&self, api_key: &str) -> Result<QuotaStatus, VisionModelError> {
        if api_key.trim().is_empty() {
            return Err(VisionModelError::MissingApiKey);
        }
        self.provider.check_quota(api_key).await
    }

    fn log_debug(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger(&format!("[model][debug] {message}"));
        }
    }

    fn log_error(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger(&format!("[model][error] {message}"));
        }
    }
}

impl VisionModelClient<ProxyVisionProvider> {
    /// Convenience constructor that wires the HTTP provider from configuration.
    pub fn from_config(
        config: &VisionKeyConfig,
        metrics_callback: Option<MetricsCallback>,
    ) -> Result<Self, VisionModelError> {
        let provider = ProxyVisionProvider::from_config(config)?;
        Ok(VisionModelClient::new(config.model.as_str(), provider)
            .with_logger(config.logger.clone())
            .with_metrics_callback(metrics_callback))
    }
}

/// Base64 payload of a `data:<mime>;base64,<payload>` URI.
pub fn strip_data_uri(data_url: &str) -> Option<&str> {
    data_url
        .split(',')
        .nth(1)
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
}
