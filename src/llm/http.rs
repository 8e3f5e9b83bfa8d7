//! HTTP-backed [`VisionModelProvider`] talking to the analyze/quota proxy.
//!
//! The analyze endpoint answers either with one JSON document or with a
//! server-sent-event stream of JSON fragments; both are reduced to the full
//! response text here.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::config::VisionKeyConfig;

use super::error::VisionModelError;
use super::provider::{AnalyzeRequest, QuotaLevel, QuotaStatus, VisionModelProvider};

/// Implementation of [`VisionModelProvider`] over `reqwest`.
#[derive(Clone, Debug)]
pub struct ProxyVisionProvider {
    client: Client,
    analyze_url: String,
    quota_url: String,
}

impl ProxyVisionProvider {
    /// Wrap an existing client.
    pub fn new(client: Client, analyze_url: impl Into<String>, quota_url: impl Into<String>) -> Self {
        Self {
            client,
            analyze_url: analyze_url.into(),
            quota_url: quota_url.into(),
        }
    }

    /// Build a client with the configured connect and request timeouts.
    pub fn from_config(config: &VisionKeyConfig) -> Result<Self, VisionModelError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(VisionModelError::ClientBuild)?;
        Ok(Self::new(
            client,
            config.analyze_endpoint(),
            config.quota_endpoint(),
        ))
    }

    pub fn analyze_url(&self) -> &str {
        &self.analyze_url
    }
}

#[async_trait]
impl VisionModelProvider for ProxyVisionProvider {
    async fn analyze(
        &self,
        api_key: &str,
        request: &AnalyzeRequest,
    ) -> Result<String, VisionModelError> {
        let response = self
            .client
            .post(&self.analyze_url)
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status.as_u16(), &body));
        }

        if is_event_stream(&response) {
            read_event_stream(response).await
        } else {
            let body = response.text().await?;
            let value: Value = serde_json::from_str(&body)
                .map_err(|err| VisionModelError::MalformedResponse(err.to_string()))?;
            extract_text(&value)
                .filter(|text| !text.is_empty())
                .ok_or(VisionModelError::EmptyResponse)
        }
    }

    async fn check_quota(&self, api_key: &str) -> Result<QuotaStatus, VisionModelError> {
        let response = self
            .client
            .get(&self.quota_url)
            .query(&[("key", api_key)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: QuotaBody = serde_json::from_str(&body).unwrap_or_default();

        match parsed.quota {
            Some(quota) if status.is_success() => {
                if parsed.is_active.unwrap_or(false) {
                    Ok(QuotaStatus::Active {
                        quota,
                        level: QuotaLevel::from_quota(quota),
                    })
                } else {
                    Ok(QuotaStatus::Deactivated { quota })
                }
            }
            _ => Ok(QuotaStatus::Rejected {
                message: parsed.error.unwrap_or_else(|| "Invalid key".to_string()),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaBody {
    quota: Option<i64>,
    is_active: Option<bool>,
    error: Option<String>,
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

async fn read_event_stream(response: Response) -> Result<String, VisionModelError> {
    let mut stream = response.bytes_stream();
    let mut accumulator = SseAccumulator::default();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|err| VisionModelError::MalformedStream(err.to_string()))?;
        accumulator.push(&bytes)?;
    }
    accumulator.finish()
}

/// Reassembles text fragments from a server-sent-event body.
///
/// Events are separated by a blank line; each `data:` payload is a JSON
/// fragment whose text is appended in arrival order. Bytes are buffered until
/// an event is complete, so a character split across network chunks is only
/// decoded once both halves have arrived.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    buffer: Vec<u8>,
    text: String,
}

impl SseAccumulator {
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), VisionModelError> {
        // `\r` never occurs inside a multi-byte UTF-8 sequence or a JSON
        // string, so dropping it normalises CRLF even across chunk edges.
        self.buffer
            .extend(chunk.as_ref().iter().copied().filter(|byte| *byte != b'\r'));
        while let Some(pos) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.consume_bytes(&event)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<String, VisionModelError> {
        let rest = std::mem::take(&mut self.buffer);
        self.consume_bytes(&rest)?;
        if self.text.is_empty() {
            Err(VisionModelError::EmptyResponse)
        } else {
            Ok(self.text)
        }
    }

    fn consume_bytes(&mut self, event: &[u8]) -> Result<(), VisionModelError> {
        let event = std::str::from_utf8(event)
            .map_err(|err| VisionModelError::MalformedStream(err.to_string()))?;
        self.consume_event(event)
    }

    fn consume_event(&mut self, event: &str) -> Result<(), VisionModelError> {
        let data = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(());
        }

        let value: Value = serde_json::from_str(data)
            .map_err(|err| VisionModelError::MalformedStream(err.to_string()))?;
        if let Some(text) = extract_text(&value) {
            self.text.push_str(&text);
        } else if let Some(message) = error_message(&value) {
            return Err(VisionModelError::MalformedStream(message));
        }
        Ok(())
    }
}

/// Pull the text out of a response document or stream fragment.
pub fn extract_text(value: &Value) -> Option<String> {
    if let Some(parts) = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    {
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        return Some(text);
    }

    ["/text", "/result/text", "/data/text"]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(Value::as_str))
        .map(str::to_string)
}

fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn http_error(status: u16, body: &str) -> VisionModelError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| format!("HTTP {status}"));
    VisionModelError::Http { status, message }
}
