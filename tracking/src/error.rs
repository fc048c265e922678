//! Session error taxonomy.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::logic::state::SessionState;
use friendfinder_client_lib::service::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Device permission or hardware failure while opening the camera.
    #[error("camera access failed: {0}")]
    CameraAccess(String),
    #[error("camera not ready after {attempts} attempts")]
    CameraNotReady { attempts: u32 },
    #[error("image too dark or featureless (mean {mean:.1}, variance {variance:.1})")]
    Quality { mean: f64, variance: f64 },
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },
    #[error("session has been torn down")]
    Closed,
}

impl SessionError {
    /// Failures worth another initialization attempt. Anything else that is
    /// not fatal sends the session straight to the demo fallback.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::CameraNotReady { .. } | SessionError::Quality { .. } => true,
            SessionError::Service(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Input errors that land the session in `Failed` instead of `Fallback`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::MissingInput(_)
                | SessionError::PayloadTooLarge { .. }
                | SessionError::UnsupportedFormat(_)
                | SessionError::Image(_)
                | SessionError::Resize(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn service_failures_are_retryable_and_not_fatal() {
        let err = SessionError::from(ServiceError::Timeout(Duration::from_secs(15)));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn input_errors_are_fatal() {
        let err = SessionError::PayloadTooLarge {
            size: 2_000_000,
            limit: 1_500_000,
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(SessionError::MissingInput("friend image".into()).is_fatal());
    }

    #[test]
    fn unreadable_service_reply_is_neither_retryable_nor_fatal() {
        let err = SessionError::from(ServiceError::InvalidResponse("not json".into()));
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert!(!SessionError::CameraAccess("denied".into()).is_retryable());
        assert!(SessionError::CameraNotReady { attempts: 3 }.is_retryable());
    }
}
