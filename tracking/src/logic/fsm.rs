//! Session transition table
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::logic::state::SessionState;
use serde::Serialize;

/// Inputs that may move a session between states.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Start,
    Initialized,
    InitFailed { fatal: bool, budget_exhausted: bool },
    TrackFailed { consecutive: u32, limit: u32 },
    Retry,
    SourceSwitched,
}

/// Decision returned by the transition table.
/// Stay keeps the current state
/// Transition switches to `to`
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionDecision {
    Stay,
    Transition { to: SessionState, reason: String },
}

/// The only place session states are computed. The session applies the
/// decision and records it.
pub fn decide(state: SessionState, event: &SessionEvent) -> TransitionDecision {
    use SessionState::*;

    match (state, event) {
        (Idle, SessionEvent::Start) => TransitionDecision::Transition {
            to: Initializing,
            reason: "Start".into(),
        },
        (Initializing, SessionEvent::Initialized) => TransitionDecision::Transition {
            to: Tracking,
            reason: "Service initialized".into(),
        },
        (Idle | Initializing, SessionEvent::InitFailed { fatal: true, .. }) => {
            TransitionDecision::Transition {
                to: Failed,
                reason: "Fatal input error".into(),
            }
        }
        (
            Initializing,
            SessionEvent::InitFailed {
                budget_exhausted: true,
                ..
            },
        ) => TransitionDecision::Transition {
            to: Fallback,
            reason: "Retry budget exhausted".into(),
        },
        (Tracking, SessionEvent::TrackFailed { consecutive, limit }) if consecutive >= limit => {
            TransitionDecision::Transition {
                to: Fallback,
                reason: format!("{} consecutive tracking failures", consecutive),
            }
        }
        // A session that never started has nothing to restart.
        (Idle, SessionEvent::Retry) => TransitionDecision::Stay,
        (_, SessionEvent::Retry) => TransitionDecision::Transition {
            to: Idle,
            reason: "Retry".into(),
        },
        (Idle, SessionEvent::SourceSwitched) => TransitionDecision::Stay,
        (_, SessionEvent::SourceSwitched) => TransitionDecision::Transition {
            to: Idle,
            reason: "Frame source switched".into(),
        },
        _ => TransitionDecision::Stay,
    }
}
