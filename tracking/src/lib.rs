//! Client side of an AR friend-finding session: frame capture and
//! normalization, the session state machine driving the remote analysis
//! service, result smoothing and overlay mapping.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod error;
pub mod frame;
pub mod logic;
pub mod overlay;
pub mod smoother;

pub use config::SessionOptions;
pub use error::SessionError;
pub use frame::source::{CameraDevice, CameraProvider, FrameSource, LiveCamera, StaticPhoto};
pub use logic::scheduler::{create_camera_session, create_session, spawn_session, SessionHandle};
pub use logic::session::{CompletedGuidance, GuidanceUpdate, TickOutcome, TrackingSession};
pub use logic::state::{SessionState, TrackingMethod};
pub use overlay::{ConfidenceTier, OverlayParams};
