//! SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Hash, Eq, PartialEq, Clone, Debug, Copy, Default, Serialize, Deserialize)]
/// Lifecycle of a guidance session
pub enum SessionState {
    #[default]
    Idle,
    Initializing,
    Tracking,
    Fallback,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Initializing => "Initializing",
            SessionState::Tracking => "Tracking",
            SessionState::Fallback => "Fallback",
            SessionState::Failed => "Failed",
        }
    }

    /// States that produce guidance and can be completed.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Tracking | SessionState::Fallback)
    }
}

/// How the final guidance of a session was obtained.
#[derive(Hash, Eq, PartialEq, Clone, Debug, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMethod {
    StandardAnalysis,
    AdvancedArTracking,
    FallbackArTracking,
}

impl TrackingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMethod::StandardAnalysis => "standard_analysis",
            TrackingMethod::AdvancedArTracking => "advanced_ar_tracking",
            TrackingMethod::FallbackArTracking => "fallback_ar_tracking",
        }
    }
}

impl fmt::Display for TrackingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
