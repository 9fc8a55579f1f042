use thiserror::Error;

/// Errors surfaced by the translation pipeline.
///
/// Only `Cancelled` is guaranteed to propagate unchanged through every stage.
/// Analysis and verification failures are mapped to their degraded outcomes
/// before they reach a caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("backend error {status} ({}): {message}", status_cause(*status))]
    Backend {
        status: u16,
        message: String,
        details: Option<String>,
    },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("structural analysis unavailable: {0}")]
    StructuralAnalysisUnavailable(String),

    #[error("verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short user-facing explanation of the failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend { status, .. } => status_cause(*status).to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Transport(_) => "could not reach the translation service".to_string(),
            Self::MalformedResponse(_) => "the translation service returned an unreadable answer".to_string(),
            other => other.to_string(),
        }
    }
}

#[must_use]
pub fn status_cause(status: u16) -> &'static str {
    match status {
        401 | 403 => "authentication failed; check the API key",
        429 => "rate limit reached; try again shortly",
        500..=599 => "translation service error",
        400..=499 => "request rejected by the translation service",
        _ => "unexpected response from the translation service",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_names_status_class() {
        let err = PipelineError::Backend {
            status: 429,
            message: "slow down".to_string(),
            details: None,
        };
        let text = err.to_string();
        assert!(text.contains("429"));
        assert!(text.contains("rate limit"));
        assert_eq!(err.user_message(), "rate limit reached; try again shortly");
    }

    #[test]
    fn server_and_auth_causes() {
        assert!(status_cause(503).contains("service error"));
        assert!(status_cause(401).contains("authentication"));
        assert!(status_cause(404).contains("rejected"));
    }
}
