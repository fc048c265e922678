//! SPDX-License-Identifier: GPL-3.0-or-later

use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// Structured record of what a session did, one JSON object per line.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryPacket<'a> {
    Transition {
        run_id: &'a str,
        ts: i64,
        from: &'a str,
        to: &'a str,
        reason: &'a str,
    },
    // One initialize or track call
    Request {
        run_id: &'a str,
        ts: i64,
        endpoint: &'a str,
        latency_ms: u128,
        payload_bytes: usize,
        outcome: &'a str,
    },
    Tick {
        run_id: &'a str,
        ts: i64,
        state: &'static str,
        frame: u64,
        consecutive_failures: u32,
        skipped: Option<&'a str>,
    },
    Completed {
        run_id: &'a str,
        ts: i64,
        method: &'static str,
        frame_count: u64,
    },
}

/// Telemetry sink for one session run. Disabled runs accept packets and drop
/// them.
pub struct SessionTelemetry {
    run_id: String,
    log: Option<File>,
}

impl SessionTelemetry {
    /// Opens `<dir>/<run-id>/telemetry.log` when `dir` is set.
    pub fn new(dir: Option<&Path>) -> Result<Self, anyhow::Error> {
        let run_id = chrono::Utc::now()
            .format("%Y-%m-%dT%H-%M-%S%.3fZ")
            .to_string();

        let log = match dir {
            Some(dir) => {
                let base = dir.join(&run_id);
                std::fs::create_dir_all(&base)?;
                Some(
                    OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open(base.join("telemetry.log"))?,
                )
            }
            None => None,
        };

        Ok(Self { run_id, log })
    }

    pub fn disabled() -> Self {
        Self {
            run_id: String::new(),
            log: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn log_path(dir: &Path, run_id: &str) -> PathBuf {
        dir.join(run_id).join("telemetry.log")
    }

    pub fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn write(&mut self, pkt: &TelemetryPacket) -> Result<(), anyhow::Error> {
        if let Some(log) = &mut self.log {
            let line = serde_json::to_string(pkt)?;
            writeln!(log, "{line}")?;
        }
        Ok(())
    }
}
