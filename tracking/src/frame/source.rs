//! Frame sources: a live camera device or a single uploaded photo.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::EncodeSettings;
use crate::error::SessionError;
use crate::frame::normalize::normalize_rgb;
use friendfinder_client_lib::payload::{EncodedImage, ImageEncoding};
use image::ImageFormat;
use log::{debug, info, warn};
use std::time::Duration;

/// A video device that has been granted to us.
pub trait CameraDevice {
    /// Zero until the device has produced its first frame.
    fn video_dimensions(&self) -> (u32, u32);
    fn grab_frame(&mut self) -> Option<image::RgbImage>;
    /// Stops every hardware track. Must be safe to call more than once.
    fn stop_tracks(&mut self);
}

/// Grants access to a camera, e.g. after a platform permission prompt.
pub trait CameraProvider {
    fn open(&self) -> Result<Box<dyn CameraDevice>, SessionError>;
}

pub struct LiveCamera {
    device: Option<Box<dyn CameraDevice>>,
    capture: EncodeSettings,
}

impl LiveCamera {
    pub fn acquire(
        provider: &dyn CameraProvider,
        capture: EncodeSettings,
    ) -> Result<Self, SessionError> {
        let device = provider.open()?;
        info!("Camera acquired");
        Ok(Self {
            device: Some(device),
            capture,
        })
    }

    pub fn ready(&self) -> bool {
        match &self.device {
            Some(device) => {
                let (width, height) = device.video_dimensions();
                width > 0 && height > 0
            }
            None => false,
        }
    }

    /// Grabs the current frame and normalizes it to the capture box.
    pub fn capture_frame(&mut self) -> Result<Option<EncodedImage>, SessionError> {
        if !self.ready() {
            return Ok(None);
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(None);
        };
        let Some(rgb) = device.grab_frame() else {
            return Ok(None);
        };

        normalize_rgb(
            &rgb,
            self.capture.max_width,
            self.capture.max_height,
            self.capture.jpeg_quality,
        )
        .map(Some)
    }

    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop_tracks();
            info!("Camera released");
        }
    }
}

impl Drop for LiveCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// A single photo supplied by the user instead of a live feed.
#[derive(Clone, Debug, Default)]
pub struct StaticPhoto {
    image: Option<EncodedImage>,
}

impl StaticPhoto {
    pub fn new(image: EncodedImage) -> Self {
        Self { image: Some(image) }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&mut self, image: EncodedImage) {
        self.image = Some(image);
    }

    /// Validates an uploaded file and normalizes it into the capture box.
    ///
    /// Only JPEG and PNG are accepted, both by declared type (when given) and
    /// by content. Files over `limit` bytes are refused before decoding.
    pub fn from_upload(
        bytes: &[u8],
        declared_mime: Option<&str>,
        limit: usize,
        capture: &EncodeSettings,
    ) -> Result<Self, SessionError> {
        if let Some(mime) = declared_mime {
            if ImageEncoding::from_mime(mime).is_none() {
                return Err(SessionError::UnsupportedFormat(mime.to_string()));
            }
        }

        if bytes.len() > limit {
            return Err(SessionError::PayloadTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let format = image::guess_format(bytes)
            .map_err(|_| SessionError::UnsupportedFormat("unrecognized image data".into()))?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(SessionError::UnsupportedFormat(format!("{:?}", format)));
        }

        let rgb = image::load_from_memory_with_format(bytes, format)?.to_rgb8();
        let normalized = normalize_rgb(
            &rgb,
            capture.max_width,
            capture.max_height,
            capture.jpeg_quality,
        )?;
        debug!(
            "Accepted {:?} upload of {} bytes, normalized to {} bytes",
            format,
            bytes.len(),
            normalized.byte_len()
        );
        Ok(Self::new(normalized))
    }

    pub fn ready(&self) -> bool {
        self.image.is_some()
    }

    pub fn capture_frame(&self) -> Option<EncodedImage> {
        self.image.clone()
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        self.image.as_ref()
    }
}

pub enum FrameSource {
    Live(LiveCamera),
    Static(StaticPhoto),
}

impl FrameSource {
    pub fn ready(&self) -> bool {
        match self {
            FrameSource::Live(camera) => camera.ready(),
            FrameSource::Static(photo) => photo.ready(),
        }
    }

    /// `Ok(None)` while the source is not ready.
    pub fn capture_frame(&mut self) -> Result<Option<EncodedImage>, SessionError> {
        match self {
            FrameSource::Live(camera) => camera.capture_frame(),
            FrameSource::Static(photo) => Ok(photo.capture_frame()),
        }
    }

    pub async fn wait_until_ready(
        &self,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<(), SessionError> {
        for attempt in 1..=max_attempts {
            if self.ready() {
                debug!("{} ready after {} attempt(s)", self.kind(), attempt);
                return Ok(());
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!("{} not ready after {} attempts", self.kind(), max_attempts);
        Err(SessionError::CameraNotReady {
            attempts: max_attempts,
        })
    }

    pub fn release(&mut self) {
        if let FrameSource::Live(camera) = self {
            camera.release();
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, FrameSource::Live(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FrameSource::Live(_) => "live_camera",
            FrameSource::Static(_) => "static_photo",
        }
    }
}

impl From<LiveCamera> for FrameSource {
    fn from(camera: LiveCamera) -> Self {
        FrameSource::Live(camera)
    }
}

impl From<StaticPhoto> for FrameSource {
    fn from(photo: StaticPhoto) -> Self {
        FrameSource::Static(photo)
    }
}
