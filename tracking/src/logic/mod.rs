//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod fallback;
pub mod fsm;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod timer;
