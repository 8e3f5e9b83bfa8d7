//! Vision model client abstractions.
//!
//! This module houses the provider-agnostic client interface, the prompt
//! templates, and an HTTP provider for the analyze/quota proxy powered by
//! `reqwest`.

pub mod client;
pub mod error;
pub mod http;
pub mod prompts;
pub mod provider;

pub use client::{MetricsCallback, VisionModelClient, strip_data_uri};
pub use error::VisionModelError;
pub use http::{ProxyVisionProvider, SseAccumulator};
pub use prompts::{GenerationConfig, build_prompt};
pub use provider::{AnalyzeRequest, QuotaLevel, QuotaStatus, VisionModelProvider};
