use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::AnswerMode;

use super::error::VisionModelError;
use super::prompts::GenerationConfig;

/// Body of an analyze call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Base64 PNG payload without the `data:` prefix.
    pub image: String,
    pub prompt_text: String,
    pub mode: AnswerMode,
    pub expert_context: String,
    pub model: String,
    pub generation_config: GenerationConfig,
}

/// Remaining-quota bucket shown next to the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaLevel {
    Low,
    Medium,
    High,
}

impl QuotaLevel {
    pub fn from_quota(quota: i64) -> Self {
        if quota <= 10 {
            QuotaLevel::Low
        } else if quota <= 50 {
            QuotaLevel::Medium
        } else {
            QuotaLevel::High
        }
    }
}

/// Outcome of a credential/quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuotaStatus {
    Active { quota: i64, level: QuotaLevel },
    Deactivated { quota: i64 },
    Rejected { message: String },
}

impl QuotaStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, QuotaStatus::Active { quota, .. } if *quota > 0)
    }
}

/// Abstraction over the remote vision model so the pipeline can be tested
/// without performing real HTTP requests.
#[async_trait]
pub trait VisionModelProvider: Send + Sync {
    /// Run one analysis and return the full response text.
    async fn analyze(
        &self,
        api_key: &str,
        request: &AnalyzeRequest,
    ) -> Result<String, VisionModelError>;

    async fn check_quota(&self, api_key: &str) -> Result<QuotaStatus, VisionModelError>;
}
