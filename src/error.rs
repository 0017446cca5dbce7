use thiserror::Error;

/// Errors that abort a report run.
#[derive(Error, Debug)]
pub enum ReportError {
    /// The GitHub credential is missing or was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The repository does not exist or is not visible to the credential (HTTP 404).
    #[error("repository not found: {0}")]
    NotFound(String),

    /// GitHub is throttling requests.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Transport failure or an unexpected HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// The fetched issues are inconsistent (e.g. closed before created).
    #[error("data error: {0}")]
    Data(String),

    /// Pagination stopped at the configured page cap with pages still pending.
    #[error("stopped after {0} pages with more issues pending; raise MAX_GITHUB_API_PAGES")]
    PageLimit(u32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to render report")]
    Render(#[from] std::fmt::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// Returns true for failures worth a bounded retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReportError::RateLimit(_) | ReportError::Network(_))
    }
}
