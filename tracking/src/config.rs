//! Session tunables and their defaults.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Tracking loop
pub const PROCESSING_INTERVAL_MS: u64 = 1000;
pub const FRAME_PERIOD_MS: u64 = 16;
pub const FALLBACK_AFTER_FAILURES: u32 = 3;

// Initialization
pub const MAX_RETRIES: u32 = 2;
pub const RETRY_BACKOFF_MS: u64 = 2000;
pub const RECALIBRATE_DELAY_MS: u64 = 500;
pub const INITIALIZE_TIMEOUT_MS: u64 = 15_000;
pub const TRACK_TIMEOUT_MS: u64 = 12_000;

// Camera readiness and initial capture
pub const CAMERA_READY_ATTEMPTS: u32 = 10;
pub const CAMERA_READY_INTERVAL_MS: u64 = 300;
pub const CAPTURE_ATTEMPTS: u32 = 5;
pub const CAPTURE_INTERVAL_MS: u64 = 300;

// Payloads
pub const SIZE_LIMIT_BYTES: usize = 1_500_000;
pub const UPLOAD_LIMIT_BYTES: usize = 500_000;
pub const CAPTURE_MAX_WIDTH: u32 = 320;
pub const CAPTURE_MAX_HEIGHT: u32 = 240;
pub const CAPTURE_JPEG_QUALITY: u8 = 20;
pub const FRIEND_MAX_WIDTH: u32 = 800;
pub const FRIEND_MAX_HEIGHT: u32 = 600;
pub const FRIEND_JPEG_QUALITY: u8 = 60;

// Frame quality floors on a 0-255 channel scale
pub const DARKNESS_FLOOR: f64 = 10.0;
pub const TEXTURE_FLOOR: f64 = 100.0;

// Smoothing and overlay
pub const SMOOTHING_WINDOW_SIZE: usize = 5;
pub const RING_COUNT: usize = 3;
pub const CANVAS_WIDTH: f64 = 390.0;
pub const CANVAS_HEIGHT: f64 = 844.0;

/// Minimum brightness and texture a frame needs before it is worth sending.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub darkness_floor: f64,
    pub texture_floor: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            darkness_floor: DARKNESS_FLOOR,
            texture_floor: TEXTURE_FLOOR,
        }
    }
}

/// Bounding box and JPEG quality used when normalizing an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub max_width: u32,
    pub max_height: u32,
    /// 1-100
    pub jpeg_quality: u8,
}

impl EncodeSettings {
    pub const fn capture() -> Self {
        Self {
            max_width: CAPTURE_MAX_WIDTH,
            max_height: CAPTURE_MAX_HEIGHT,
            jpeg_quality: CAPTURE_JPEG_QUALITY,
        }
    }

    pub const fn friend() -> Self {
        Self {
            max_width: FRIEND_MAX_WIDTH,
            max_height: FRIEND_MAX_HEIGHT,
            jpeg_quality: FRIEND_JPEG_QUALITY,
        }
    }
}

/// Drawing surface the overlay is laid out on, in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self {
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
        }
    }
}

/// Everything a tracking session can be tuned with. Durations are written in
/// milliseconds in option files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    #[serde(rename = "processing_interval_ms", with = "millis")]
    pub processing_interval: Duration,
    #[serde(rename = "frame_period_ms", with = "millis")]
    pub frame_period: Duration,
    pub max_retries: u32,
    #[serde(rename = "retry_backoff_ms", with = "millis")]
    pub retry_backoff: Duration,
    #[serde(rename = "recalibrate_delay_ms", with = "millis")]
    pub recalibrate_delay: Duration,
    pub smoothing_window_size: usize,
    pub size_limit_bytes: usize,
    pub fallback_after_failures: u32,
    #[serde(rename = "initialize_timeout_ms", with = "millis")]
    pub initialize_timeout: Duration,
    #[serde(rename = "track_timeout_ms", with = "millis")]
    pub track_timeout: Duration,
    pub camera_ready_attempts: u32,
    #[serde(rename = "camera_ready_interval_ms", with = "millis")]
    pub camera_ready_interval: Duration,
    pub capture_attempts: u32,
    #[serde(rename = "capture_interval_ms", with = "millis")]
    pub capture_interval: Duration,
    pub quality: QualityThresholds,
    pub capture: EncodeSettings,
    pub friend: EncodeSettings,
    pub canvas: CanvasSize,
    pub ring_count: usize,
    /// When set, JSON-lines telemetry is written under this directory.
    pub telemetry_dir: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            processing_interval: Duration::from_millis(PROCESSING_INTERVAL_MS),
            frame_period: Duration::from_millis(FRAME_PERIOD_MS),
            max_retries: MAX_RETRIES,
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
            recalibrate_delay: Duration::from_millis(RECALIBRATE_DELAY_MS),
            smoothing_window_size: SMOOTHING_WINDOW_SIZE,
            size_limit_bytes: SIZE_LIMIT_BYTES,
            fallback_after_failures: FALLBACK_AFTER_FAILURES,
            initialize_timeout: Duration::from_millis(INITIALIZE_TIMEOUT_MS),
            track_timeout: Duration::from_millis(TRACK_TIMEOUT_MS),
            camera_ready_attempts: CAMERA_READY_ATTEMPTS,
            camera_ready_interval: Duration::from_millis(CAMERA_READY_INTERVAL_MS),
            capture_attempts: CAPTURE_ATTEMPTS,
            capture_interval: Duration::from_millis(CAPTURE_INTERVAL_MS),
            quality: QualityThresholds::default(),
            capture: EncodeSettings::capture(),
            friend: EncodeSettings::friend(),
            canvas: CanvasSize::default(),
            ring_count: RING_COUNT,
            telemetry_dir: None,
        }
    }
}

impl SessionOptions {
    /// Loads options from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Failed to parse options file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yml::from_str(text)?)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let options = SessionOptions::from_yaml_str(
            "processing_interval_ms: 300\nmax_retries: 4\nquality:\n  darkness_floor: 20\n",
        )
        .unwrap();

        assert_eq!(options.processing_interval, Duration::from_millis(300));
        assert_eq!(options.max_retries, 4);
        assert_eq!(options.quality.darkness_floor, 20.0);
        assert_eq!(options.quality.texture_floor, TEXTURE_FLOOR);
        assert_eq!(options.smoothing_window_size, SMOOTHING_WINDOW_SIZE);
        assert_eq!(options.capture, EncodeSettings::capture());
    }

    #[test]
    fn empty_document_is_default() {
        let options = SessionOptions::from_yaml_str("{}").unwrap();
        assert_eq!(options, SessionOptions::default());
    }
}
