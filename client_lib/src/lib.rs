//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod guidance;
pub mod payload;
pub mod service;

#[cfg(feature = "http_client")]
pub mod http_client;
