//! Error types for the reward pipeline.

use thiserror::Error;

/// Failures surfaced by the pipeline and the points ledger.
///
/// Every variant raised before the credit step leaves the ledger untouched.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid media: {0}")]
    InvalidMedia(String),

    #[error("detector failed on frame {frame_index}: {reason}")]
    DetectorFailure { frame_index: u64, reason: String },

    #[error("detector queue full ({waiting} requests already waiting)")]
    DetectorBusy { waiting: usize },

    #[error("video exceeds the limit of {limit} sampled frames")]
    FrameLimitExceeded { limit: u64 },

    #[error("ledger busy: credit for '{user_id}' not applied after {attempts} attempts")]
    LedgerContention { user_id: String, attempts: u32 },

    #[error("balance overflow for '{user_id}'")]
    BalanceOverflow { user_id: String },
}

/// Caller-facing classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The submitted media is at fault; retrying the same upload will not help.
    Client,
    /// A shared resource is saturated; the caller may retry later.
    Busy,
    /// Internal failure.
    Server,
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::InvalidMedia(_) | PipelineError::FrameLimitExceeded { .. } => {
                ErrorClass::Client
            }
            PipelineError::DetectorBusy { .. } | PipelineError::LedgerContention { .. } => {
                ErrorClass::Busy
            }
            PipelineError::DetectorFailure { .. } | PipelineError::BalanceOverflow { .. } => {
                ErrorClass::Server
            }
        }
    }

    pub(crate) fn invalid_media(err: impl std::fmt::Display) -> Self {
        PipelineError::InvalidMedia(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = PipelineError::DetectorFailure {
            frame_index: 30,
            reason: "expected 3 channels, got 4".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("frame 30"));
        assert!(msg.contains("3 channels"));
    }

    #[test]
    fn classes_follow_caller_responsibility() {
        assert_eq!(
            PipelineError::InvalidMedia("truncated".into()).class(),
            ErrorClass::Client
        );
        assert_eq!(
            PipelineError::FrameLimitExceeded { limit: 10 }.class(),
            ErrorClass::Client
        );
        assert_eq!(
            PipelineError::DetectorBusy { waiting: 4 }.class(),
            ErrorClass::Busy
        );
        assert_eq!(
            PipelineError::LedgerContention {
                user_id: "u".into(),
                attempts: 3
            }
            .class(),
            ErrorClass::Busy
        );
        assert_eq!(
            PipelineError::BalanceOverflow { user_id: "u".into() }.class(),
            ErrorClass::Server
        );
    }
}
