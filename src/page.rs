//! Page capability interface used by the option matcher and interaction
//! driver.
//!
//! Everything the driver needs from a live quiz page goes through
//! [`QuizSurface`], so the matching and activation logic runs the same way
//! against a CDP-driven Chrome tab or an in-memory fake.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::QuizOption;

pub mod driver;
pub mod matcher;

pub use driver::{InteractionDriver, humanized_delay};
pub use matcher::{match_option, normalize_token, position_for_letter};

/// Hostname fragments identifying the supported quiz platform.
const SUPPORTED_HOST_MARKERS: &[&str] = &["quizizz.com", "wayground.com", "quizizz"];

/// URL schemes the browser never lets an extension capture or script.
const RESTRICTED_URL_PREFIXES: &[&str] = &["chrome://", "edge://", "about:", "chrome-extension://"];

/// Errors surfaced by page capability implementations.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("page script failed: {0}")]
    Script(String),
    #[error("element is no longer attached: {0}")]
    StaleElement(String),
    #[error("browser connection failed: {0}")]
    Connection(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Capabilities of a live quiz page.
///
/// Implementations must enumerate elements fresh on every call; element
/// handles are only meaningful within the attempt that produced them.
#[async_trait]
pub trait QuizSurface: Send + Sync {
    type Element: Clone + Send + Sync;

    /// Hostname of the document currently loaded.
    async fn hostname(&self) -> Result<String, SurfaceError>;

    /// Full URL of the document, when the implementation can tell.
    async fn url(&self) -> Result<Option<String>, SurfaceError> {
        Ok(None)
    }

    async fn enumerate_options(&self) -> Result<Vec<QuizOption<Self::Element>>, SurfaceError>;

    /// Free-text inputs in priority order.
    async fn enumerate_text_surfaces(&self) -> Result<Vec<Self::Element>, SurfaceError>;

    /// Whether the current question accepts several options.
    async fn is_multi_select(&self) -> Result<bool, SurfaceError>;

    async fn find_submit(&self) -> Result<Option<Self::Element>, SurfaceError>;

    async fn is_disabled(&self, element: &Self::Element) -> Result<bool, SurfaceError>;

    /// Primary activation (click).
    async fn activate(&self, element: &Self::Element) -> Result<(), SurfaceError>;

    async fn set_value(&self, element: &Self::Element, text: &str) -> Result<(), SurfaceError>;

    /// Fire the input/change events the page's reactive layer listens for.
    async fn emit_change_signals(&self, element: &Self::Element) -> Result<(), SurfaceError>;

    /// Show a transient notification on the page.
    async fn notify(&self, _message: &str) -> Result<(), SurfaceError> {
        Ok(())
    }
}

pub fn is_supported_host(hostname: &str) -> bool {
    let hostname = hostname.to_ascii_lowercase();
    SUPPORTED_HOST_MARKERS
        .iter()
        .any(|marker| hostname.contains(marker))
}

/// Pages where capture and auto-answer are informational no-ops.
pub fn is_restricted_url(url: &str) -> bool {
    RESTRICTED_URL_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_quiz_hosts() {
        assert!(is_supported_host("quizizz.com"));
        assert!(is_supported_host("www.Wayground.com"));
        assert!(is_supported_host("quizizz.staging.local"));
        assert!(!is_supported_host("example.com"));
        assert!(!is_supported_host(""));
    }

    #[test]
    fn restricted_schemes() {
        assert!(is_restricted_url("chrome://extensions"));
        assert!(is_restricted_url("edge://settings"));
        assert!(is_restricted_url("about:blank"));
        assert!(is_restricted_url("chrome-extension://abc/popup.html"));
        assert!(!is_restricted_url("https://quizizz.com/join"));
    }
}
