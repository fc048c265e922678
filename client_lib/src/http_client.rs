//! Friend finder HTTP client for the remote analysis service.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{
    ServiceConfig, CALIBRATE_PATH, HEALTH_PATH, INITIALIZE_PATH, STATUS_PATH, TRACK_PATH,
};
use crate::guidance::{
    AnalysisResponse, CalibrateRequest, CalibrateResponse, GuidanceResult, HealthReport,
    InitializeRequest, LandmarkDimensions, Mode, ServiceStatus, StatusResponse, TrackRequest,
};
use crate::payload::EncodedImage;
use crate::service::{AnalysisService, ServiceError};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct HttpClient {
    config: ServiceConfig,
    client: Client,
}

impl HttpClient {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Tells the service the physical size of the landmark, in meters.
    pub async fn calibrate(
        &self,
        landmark_width: f64,
        landmark_height: f64,
    ) -> Result<LandmarkDimensions, ServiceError> {
        let body = CalibrateRequest {
            landmark_width,
            landmark_height,
        };
        let request = self.client.post(self.config.endpoint(CALIBRATE_PATH)).json(&body);
        let response: CalibrateResponse =
            with_deadline(self.config.control_timeout, send_json(request)).await?;

        if !response.success {
            return Err(ServiceError::Rejected(
                response.error.unwrap_or_else(|| "calibration failed".to_string()),
            ));
        }
        if let Some(message) = response.message {
            debug!("calibrate: {message}");
        }

        response
            .landmark_dimensions
            .ok_or_else(|| ServiceError::InvalidResponse("missing landmark_dimensions".into()))
    }

    pub async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        let request = self.client.get(self.config.endpoint(STATUS_PATH));
        let response: StatusResponse =
            with_deadline(self.config.control_timeout, send_json(request)).await?;

        if !response.success {
            return Err(ServiceError::Rejected(
                response.error.unwrap_or_else(|| "status check failed".to_string()),
            ));
        }

        response
            .status
            .ok_or_else(|| ServiceError::InvalidResponse("missing status".into()))
    }

    pub async fn health(&self) -> Result<HealthReport, ServiceError> {
        let request = self.client.get(self.config.endpoint(HEALTH_PATH));
        with_deadline(self.config.control_timeout, send_json(request)).await
    }

    async fn analyze<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<GuidanceResult, ServiceError> {
        let start = Instant::now();
        let request = self.client.post(self.config.endpoint(path)).json(body);
        let response: Result<AnalysisResponse, ServiceError> =
            with_deadline(timeout, send_json(request)).await;

        debug!(
            "{} answered in {}ms (ok: {})",
            path,
            start.elapsed().as_millis(),
            response.is_ok()
        );

        response?.into_result()
    }
}

impl AnalysisService for HttpClient {
    async fn initialize(
        &self,
        friend_photo: &EncodedImage,
        user_photo: &EncodedImage,
        mode: Mode,
    ) -> Result<GuidanceResult, ServiceError> {
        let friend_uri = friend_photo.to_data_uri();
        let user_uri = user_photo.to_data_uri();
        debug!(
            "initialize: mode {}, friend_photo {} bytes, user_photo {} bytes",
            mode,
            friend_uri.len(),
            user_uri.len()
        );

        let body = InitializeRequest {
            friend_photo: &friend_uri,
            user_photo: &user_uri,
            mode,
        };
        self.analyze(INITIALIZE_PATH, &body, self.config.initialize_timeout)
            .await
    }

    async fn track(&self, current_frame: &EncodedImage) -> Result<GuidanceResult, ServiceError> {
        let frame_uri = current_frame.to_data_uri();
        let body = TrackRequest {
            current_frame: &frame_uri,
        };
        self.analyze(TRACK_PATH, &body, self.config.track_timeout)
            .await
    }
}

/// Bounds a request by `timeout`. Dropping the inner future aborts the
/// in-flight request.
async fn with_deadline<T, F>(timeout: Duration, request: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ServiceError::Timeout(timeout))?
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::Network(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ServiceError::Network(e.to_string()))?;

    if !status.is_success() {
        // The service reports failures as `{success: false, error}` even on 5xx.
        let detail = serde_json::from_str::<AnalysisResponse>(&text)
            .ok()
            .and_then(|body| body.error)
            .unwrap_or(text);
        warn!("Backend error: {} - {}", status, detail);
        return Err(ServiceError::Http {
            status: status.as_u16(),
            detail,
        });
    }

    serde_json::from_str(&text).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
}
