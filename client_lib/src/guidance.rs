//! Guidance model and the JSON shapes of the analysis service.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::service::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way the user should turn to face the friend's landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Forward,
    #[default]
    #[serde(other)]
    None,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::None => "none",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse confidence tier reported by the service or synthesized locally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingQuality {
    Good,
    Fair,
    Poor,
    Standard,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TrackingQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingQuality::Good => "good",
            TrackingQuality::Fair => "fair",
            TrackingQuality::Poor => "poor",
            TrackingQuality::Standard => "standard",
            TrackingQuality::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TrackingQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Analysis mode requested at initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Ar,
    Standard,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Ar => "ar",
            Mode::Standard => "standard",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One tick's worth of guidance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuidanceResult {
    pub success: bool,
    /// Meters, never negative.
    pub distance: f64,
    /// Degrees in `[0, 180]`; the sign lives in `direction`.
    pub angle: f64,
    pub direction: Direction,
    pub instruction: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(rename = "matches_count")]
    pub match_count: u32,
    pub tracking_quality: TrackingQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GuidanceResult {
    /// Builds a result and clamps every field into its documented range.
    pub fn new(
        distance: f64,
        angle: f64,
        direction: Direction,
        instruction: impl Into<String>,
        confidence: f64,
        match_count: u32,
        tracking_quality: TrackingQuality,
    ) -> Self {
        Self {
            success: true,
            distance,
            angle,
            direction,
            instruction: instruction.into(),
            confidence,
            match_count,
            tracking_quality,
            error: None,
        }
        .sanitized()
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            distance: 0.0,
            angle: 0.0,
            direction: Direction::None,
            instruction: String::new(),
            confidence: 0.0,
            match_count: 0,
            tracking_quality: TrackingQuality::Poor,
            error: Some(error.into()),
        }
    }

    fn sanitized(mut self) -> Self {
        self.distance = finite_or(self.distance, 0.0).max(0.0);
        self.angle = finite_or(self.angle, 0.0).abs().min(180.0);
        self.confidence = finite_or(self.confidence, 0.0).clamp(0.0, 1.0);
        self
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Raw response body of `/api/ar/initialize` and `/api/ar/track`.
///
/// Every field is optional on the wire; baseline fields are missing from
/// track responses and `direction` may be `null`.
#[derive(Debug, Default, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub tracking_quality: Option<TrackingQuality>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub angle: Option<f64>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub matches_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResponse {
    /// Maps a `success: false` body to `ServiceError::Rejected`.
    pub fn into_result(self) -> Result<GuidanceResult, ServiceError> {
        if !self.success {
            return Err(ServiceError::Rejected(
                self.error.unwrap_or_else(|| "analysis failed".to_string()),
            ));
        }

        Ok(GuidanceResult::new(
            self.distance.unwrap_or_default(),
            self.angle.unwrap_or_default(),
            self.direction.unwrap_or_default(),
            self.instruction.unwrap_or_default(),
            self.confidence.unwrap_or_default(),
            self.matches_count.unwrap_or_default(),
            self.tracking_quality.unwrap_or(TrackingQuality::Good),
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct InitializeRequest<'a> {
    pub friend_photo: &'a str,
    pub user_photo: &'a str,
    pub mode: Mode,
}

#[derive(Debug, Serialize)]
pub struct TrackRequest<'a> {
    pub current_frame: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CalibrateRequest {
    pub landmark_width: f64,
    pub landmark_height: f64,
}

/// Physical size of the reference landmark, in meters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LandmarkDimensions {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Deserialize)]
pub struct CalibrateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub landmark_dimensions: Option<LandmarkDimensions>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Service-side view of the reference landmark.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub reference_features: Option<u32>,
    #[serde(default)]
    pub features_available: Vec<String>,
    #[serde(default)]
    pub tracking_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: Option<ServiceStatus>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub opencv_available: bool,
    #[serde(default)]
    pub opencv_version: Option<String>,
}
