//! Analysis service connection settings.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use std::env;
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";
pub const BACKEND_URL_ENV: &str = "FRIENDFINDER_BACKEND_URL";

pub const INITIALIZE_PATH: &str = "/api/ar/initialize";
pub const TRACK_PATH: &str = "/api/ar/track";
pub const CALIBRATE_PATH: &str = "/api/ar/calibrate";
pub const STATUS_PATH: &str = "/api/ar/status";
pub const HEALTH_PATH: &str = "/health";

pub const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_TRACK_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
// calibrate/status/health
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the analysis service lives and how long each call may take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub initialize_timeout: Duration,
    pub track_timeout: Duration,
    pub connect_timeout: Duration,
    pub control_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            track_timeout: DEFAULT_TRACK_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    /// Reads the backend URL from `FRIENDFINDER_BACKEND_URL`, falling back to
    /// a local development server.
    pub fn from_env() -> Self {
        match env::var(BACKEND_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::new(DEFAULT_BACKEND_URL),
        }
    }

    pub fn with_timeouts(mut self, initialize: Duration, track: Duration) -> Self {
        self.initialize_timeout = initialize;
        self.track_timeout = track;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}
