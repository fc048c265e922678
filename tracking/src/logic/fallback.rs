//! Locally synthesized guidance used when the service cannot help.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use friendfinder_client_lib::guidance::{Direction, GuidanceResult, TrackingQuality};

pub const DEMO_INSTRUCTION: &str = "Walk forward (Demo Mode)";
pub const TRACKING_LOST_INSTRUCTION: &str = "Walk forward (Fallback Mode)";
pub const OSCILLATING_INSTRUCTION: &str = "Walk forward and follow the arrow (Fallback Mode)";

/// Emitted once initialization has used up its retry budget.
pub fn demo_result() -> GuidanceResult {
    GuidanceResult::new(
        25.0,
        0.0,
        Direction::Forward,
        DEMO_INSTRUCTION,
        0.8,
        15,
        TrackingQuality::Poor,
    )
}

/// Emitted when live tracking degrades into fallback.
pub fn tracking_lost_result() -> GuidanceResult {
    GuidanceResult::new(
        25.0,
        0.0,
        Direction::Forward,
        TRACKING_LOST_INSTRUCTION,
        0.8,
        15,
        TrackingQuality::Fair,
    )
}

/// Deterministic guidance that drifts with the frame counter so the overlay
/// keeps moving while no real data is available.
pub fn oscillating_result(frame: u64) -> GuidanceResult {
    let n = frame as f64;
    let distance = 25.0 + (n * 0.1).sin() * 10.0;
    let angle = (15.0 + (n * 0.05).cos() * 20.0).abs();
    let direction = if (n * 0.03).sin() > 0.0 {
        Direction::Right
    } else {
        Direction::Left
    };
    let confidence = 0.9 + (n * 0.07).sin() * 0.1;
    let match_count = 15 + (frame % 10) as u32;

    GuidanceResult::new(
        distance,
        angle,
        direction,
        OSCILLATING_INSTRUCTION,
        confidence,
        match_count,
        TrackingQuality::Fair,
    )
}
