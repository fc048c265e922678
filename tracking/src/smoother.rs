//! Sliding-window smoothing of guidance results.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use friendfinder_client_lib::guidance::{Direction, GuidanceResult};
use std::collections::VecDeque;

pub struct ResultSmoother {
    window: VecDeque<GuidanceResult>,
    capacity: usize,
}

impl ResultSmoother {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds a successful result and returns the smoothed guidance.
    ///
    /// Distance, angle and confidence are averaged over the window; direction,
    /// match count and tracking quality are taken from the newest sample and
    /// the instruction is rebuilt from the averages. Unsuccessful results are
    /// returned unchanged and never enter the window.
    pub fn push(&mut self, result: GuidanceResult) -> GuidanceResult {
        if !result.success {
            return result;
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(result);

        self.current().unwrap_or_else(|| GuidanceResult::failure("empty smoothing window"))
    }

    /// Smoothed view of the window, if it holds anything.
    pub fn current(&self) -> Option<GuidanceResult> {
        let newest = self.window.back()?;
        let n = self.window.len() as f64;

        let distance = self.window.iter().map(|r| r.distance).sum::<f64>() / n;
        let angle = self.window.iter().map(|r| r.angle).sum::<f64>() / n;
        let confidence = self.window.iter().map(|r| r.confidence).sum::<f64>() / n;

        Some(GuidanceResult::new(
            distance,
            angle,
            newest.direction,
            instruction_for(distance, angle, newest.direction),
            confidence,
            newest.match_count,
            newest.tracking_quality,
        ))
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

pub fn instruction_for(distance: f64, angle: f64, direction: Direction) -> String {
    if distance < 5.0 {
        "You're very close! Look around for your friend.".to_string()
    } else if distance < 20.0 {
        format!(
            "Walk {}m {}, your friend should be nearby",
            distance as u64, direction
        )
    } else {
        format!(
            "Walk {}m forward, then turn {}° {}",
            distance as u64, angle as u64, direction
        )
    }
}
