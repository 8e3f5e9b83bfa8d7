use thiserror::Error;

/// Errors surfaced by the vision model layer.
#[derive(Debug, Error)]
pub enum VisionModelError {
    #[error("API key not configured. Please set it in Settings.")]
    MissingApiKey,
    #[error("No image provided")]
    MissingImage,
    #[error("Invalid image format")]
    InvalidImage,
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-2xx response; `message` is the server's `error.message` or
    /// `HTTP <status>`.
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("malformed event stream: {0}")]
    MalformedStream(String),
    #[error("No text found in response")]
    EmptyResponse,
}

impl VisionModelError {
    pub fn status(&self) -> Option<u16> {
        match self {
            VisionModelError::Http { status, .. } => Some(*status),
            VisionModelError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}
