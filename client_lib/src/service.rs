//! The analysis service seam used by tracking sessions.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::guidance::{GuidanceResult, Mode};
use crate::payload::EncodedImage;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the remote analysis service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend error {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("service rejected the request: {0}")]
    Rejected(String),
    #[error("invalid response from service: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// All service failures are worth another attempt except a body we could
    /// not understand.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::InvalidResponse(_))
    }
}

/// Remote image analysis: one initialization call per session followed by any
/// number of per-frame track calls.
#[allow(async_fn_in_trait)]
pub trait AnalysisService {
    async fn initialize(
        &self,
        friend_photo: &EncodedImage,
        user_photo: &EncodedImage,
        mode: Mode,
    ) -> Result<GuidanceResult, ServiceError>;

    async fn track(&self, current_frame: &EncodedImage) -> Result<GuidanceResult, ServiceError>;
}
