//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::QualityThresholds;
use crate::error::SessionError;
use crate::frame::normalize::decode_rgb;
use friendfinder_client_lib::payload::EncodedImage;
use image::RgbImage;
use rayon::prelude::*;
use serde::Serialize;

/// Brightness statistics of a frame on a 0-255 scale. Both figures are
/// computed per channel and then averaged over R, G and B, so a flat frame of
/// any single colour scores a near-zero variance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct QualityScore {
    pub mean: f64,
    /// Mean of the per-channel population variances.
    pub variance: f64,
}

type ChannelSums = [(u64, u64); 3];

impl QualityScore {
    pub fn of(rgb: &RgbImage) -> Self {
        let samples = rgb.as_raw();
        if samples.is_empty() {
            return Self {
                mean: 0.0,
                variance: 0.0,
            };
        }

        let sums: ChannelSums = samples
            .par_chunks_exact(3)
            .fold(
                || [(0u64, 0u64); 3],
                |mut acc, pixel| {
                    for (channel, &v) in acc.iter_mut().zip(pixel) {
                        let v = v as u64;
                        channel.0 += v;
                        channel.1 += v * v;
                    }
                    acc
                },
            )
            .reduce(
                || [(0, 0); 3],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        x.0 += y.0;
                        x.1 += y.1;
                    }
                    a
                },
            );

        let n = (samples.len() / 3) as f64;
        let (mean, variance) = sums.iter().fold((0.0f64, 0.0f64), |(mean, variance), &(sum, sum_sq)| {
            let m = sum as f64 / n;
            let v = (sum_sq as f64 / n - m * m).max(0.0);
            (mean + m / 3.0, variance + v / 3.0)
        });
        Self { mean, variance }
    }

    pub fn passes(&self, thresholds: &QualityThresholds) -> bool {
        self.mean >= thresholds.darkness_floor && self.variance >= thresholds.texture_floor
    }

    pub fn check(self, thresholds: &QualityThresholds) -> Result<Self, SessionError> {
        if self.passes(thresholds) {
            Ok(self)
        } else {
            Err(SessionError::Quality {
                mean: self.mean,
                variance: self.variance,
            })
        }
    }
}

/// Decodes `image` and rejects it when it is too dark or too flat to match on.
pub fn assess_quality(
    image: &EncodedImage,
    thresholds: &QualityThresholds,
) -> Result<QualityScore, SessionError> {
    let rgb = decode_rgb(image)?;
    QualityScore::of(&rgb).check(thresholds)
}

/// A frame that passed the quality floors.
#[derive(Clone, Debug)]
pub struct FrameCapture {
    pub image: EncodedImage,
    pub quality: QualityScore,
}

impl FrameCapture {
    pub fn assess(image: EncodedImage, thresholds: &QualityThresholds) -> Result<Self, SessionError> {
        let quality = assess_quality(&image, thresholds)?;
        Ok(Self { image, quality })
    }
}
