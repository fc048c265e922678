//! Maps guidance onto renderable overlay parameters.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::CanvasSize;
use friendfinder_client_lib::guidance::{Direction, GuidanceResult};
use rand::Rng;
use serde::Serialize;
use std::f64::consts::TAU;

pub const MAX_MARKERS: usize = 20;
pub const LOST_TRACKING_OPACITY: f64 = 0.3;
const MIN_OPACITY: f64 = 0.5;
const MAX_ROTATION_DEG: f64 = 90.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.7 {
            ConfidenceTier::High
        } else if confidence > 0.4 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn meter_color(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "green",
            ConfidenceTier::Medium => "orange",
            ConfidenceTier::Low => "red",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DistanceRing {
    pub radius: f64,
    pub label_m: u64,
}

/// A feature-match marker in canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MatchMarker {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayParams {
    pub rotation_deg: f64,
    pub scale: f64,
    pub opacity: f64,
    pub rings: Vec<DistanceRing>,
    pub markers: Vec<MatchMarker>,
    pub confidence_tier: ConfidenceTier,
}

impl OverlayParams {
    /// Dims the overlay while tracking is lost.
    pub fn with_lost_tracking(mut self) -> Self {
        self.opacity = LOST_TRACKING_OPACITY;
        self
    }
}

pub struct OverlayMapper {
    canvas: CanvasSize,
    ring_count: usize,
}

impl OverlayMapper {
    pub fn new(canvas: CanvasSize, ring_count: usize) -> Self {
        Self {
            canvas,
            ring_count: ring_count.max(1),
        }
    }

    /// Everything except the marker scatter is a pure function of `result`.
    pub fn map<R: Rng>(&self, result: &GuidanceResult, rng: &mut R) -> OverlayParams {
        OverlayParams {
            rotation_deg: rotation_for(result),
            scale: scale_for(result.distance),
            opacity: result.confidence.max(MIN_OPACITY).min(1.0),
            rings: self.rings(result.distance),
            markers: self.markers(result.match_count as usize, rng),
            confidence_tier: ConfidenceTier::from_confidence(result.confidence),
        }
    }

    fn outer_radius(&self) -> f64 {
        self.canvas.width.min(self.canvas.height) / 2.0 * 0.8
    }

    fn center(&self) -> (f64, f64) {
        (self.canvas.width / 2.0, self.canvas.height / 2.0)
    }

    fn rings(&self, distance: f64) -> Vec<DistanceRing> {
        let outer = self.outer_radius();
        let n = self.ring_count as f64;
        (1..=self.ring_count)
            .map(|i| {
                let fraction = i as f64 / n;
                DistanceRing {
                    radius: outer * fraction,
                    label_m: (distance * fraction).round() as u64,
                }
            })
            .collect()
    }

    fn markers<R: Rng>(&self, match_count: usize, rng: &mut R) -> Vec<MatchMarker> {
        let count = match_count.min(MAX_MARKERS);
        let outer = self.outer_radius();
        let (cx, cy) = self.center();

        (0..count)
            .map(|i| {
                let theta = TAU * i as f64 / count as f64;
                let r = rng.gen_range(0.0..outer.max(f64::EPSILON));
                MatchMarker {
                    x: cx + r * theta.cos(),
                    y: cy + r * theta.sin(),
                }
            })
            .collect()
    }
}

impl Default for OverlayMapper {
    fn default() -> Self {
        Self::new(CanvasSize::default(), crate::config::RING_COUNT)
    }
}

fn rotation_for(result: &GuidanceResult) -> f64 {
    let magnitude = if result.distance > 15.0 {
        result.angle * 0.8
    } else {
        result.angle
    };
    let sign = match result.direction {
        Direction::Left => -1.0,
        Direction::Right => 1.0,
        Direction::Forward | Direction::None => 0.0,
    };
    (sign * magnitude).clamp(-MAX_ROTATION_DEG, MAX_ROTATION_DEG)
}

fn scale_for(distance: f64) -> f64 {
    if distance < 10.0 {
        1.5
    } else if distance > 100.0 {
        0.8
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use friendfinder_client_lib::guidance::TrackingQuality;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn result(distance: f64, angle: f64, direction: Direction, confidence: f64) -> GuidanceResult {
        GuidanceResult::new(
            distance,
            angle,
            direction,
            "",
            confidence,
            12,
            TrackingQuality::Good,
        )
    }

    #[test]
    fn close_left_turn() {
        let mapper = OverlayMapper::default();
        let params = mapper.map(
            &result(5.0, 40.0, Direction::Left, 0.9),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(params.scale, 1.5);
        assert_eq!(params.rotation_deg, -40.0);
        assert_eq!(params.confidence_tier, ConfidenceTier::High);
        assert_eq!(params.opacity, 0.9);
    }

    #[test]
    fn far_turns_are_damped_and_clamped() {
        let mapper = OverlayMapper::default();
        let mut rng = StdRng::seed_from_u64(2);

        let far = mapper.map(&result(50.0, 50.0, Direction::Right, 0.5), &mut rng);
        assert!((far.rotation_deg - 40.0).abs() < 1e-9);
        assert_eq!(far.scale, 1.0);

        let wide = mapper.map(&result(12.0, 170.0, Direction::Left, 0.5), &mut rng);
        assert_eq!(wide.rotation_deg, -90.0);

        let ahead = mapper.map(&result(150.0, 30.0, Direction::Forward, 0.1), &mut rng);
        assert_eq!(ahead.rotation_deg, 0.0);
        assert_eq!(ahead.scale, 0.8);
        assert_eq!(ahead.opacity, 0.5);
        assert_eq!(ahead.confidence_tier, ConfidenceTier::Low);
    }

    #[test]
    fn rings_divide_the_outer_radius() {
        let mapper = OverlayMapper::new(
            CanvasSize {
                width: 400.0,
                height: 800.0,
            },
            3,
        );
        let params = mapper.map(
            &result(30.0, 0.0, Direction::None, 0.5),
            &mut StdRng::seed_from_u64(3),
        );
        let radii: Vec<f64> = params.rings.iter().map(|r| r.radius).collect();
        let labels: Vec<u64> = params.rings.iter().map(|r| r.label_m).collect();

        assert!((radii[2] - 160.0).abs() < 1e-9);
        assert!((radii[0] - 160.0 / 3.0).abs() < 1e-9);
        assert_eq!(labels, vec![10, 20, 30]);
        assert_eq!(params.confidence_tier, ConfidenceTier::Medium);
    }

    #[test]
    fn markers_are_capped_and_inside_the_outer_ring() {
        let mapper = OverlayMapper::default();
        let mut many = result(30.0, 0.0, Direction::None, 0.5);
        many.match_count = 300;
        let params = mapper.map(&many, &mut StdRng::seed_from_u64(4));

        assert_eq!(params.markers.len(), MAX_MARKERS);
        let (cx, cy) = (CanvasSize::default().width / 2.0, CanvasSize::default().height / 2.0);
        let outer = CanvasSize::default().width.min(CanvasSize::default().height) / 2.0 * 0.8;
        for m in &params.markers {
            assert!(((m.x - cx).powi(2) + (m.y - cy).powi(2)).sqrt() <= outer);
        }
    }

    #[test]
    fn lost_tracking_dims_the_overlay() {
        let params = OverlayMapper::default()
            .map(
                &result(30.0, 10.0, Direction::Left, 0.9),
                &mut StdRng::seed_from_u64(5),
            )
            .with_lost_tracking();
        assert_eq!(params.opacity, LOST_TRACKING_OPACITY);
    }

    #[test]
    fn tiers_match_meter_colours() {
        assert_eq!(ConfidenceTier::from_confidence(0.71).meter_color(), "green");
        assert_eq!(ConfidenceTier::from_confidence(0.7).meter_color(), "orange");
        assert_eq!(ConfidenceTier::from_confidence(0.4).meter_color(), "red");
    }
}
