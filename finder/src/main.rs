//! Friend finder command line driver.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

#[macro_use]
extern crate serde_derive;

use anyhow::{bail, Context};
use docopt::Docopt;
use friendfinder_client_lib::config::ServiceConfig;
use friendfinder_client_lib::guidance::Mode;
use friendfinder_client_lib::http_client::HttpClient;
use friendfinder_tracking::config::UPLOAD_LIMIT_BYTES;
use friendfinder_tracking::frame::normalize::encoded_from_bytes;
use friendfinder_tracking::{create_session, FrameSource, GuidanceUpdate, SessionOptions, StaticPhoto};
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::task::LocalSet;

const USAGE: &str = "
Finds a friend by comparing their photo against your view, using a remote analysis service.

Usage:
  friendfinder --friend FILE --photo FILE [--mode MODE] [--server URL] [--options FILE] [--duration SECS]
  friendfinder --status [--server URL]
  friendfinder --health [--server URL]
  friendfinder --calibrate --width METERS --height METERS [--server URL]
  friendfinder (--version | -v)
  friendfinder (--help | -h)

Options:
    --friend FILE           Photo your friend sent (JPEG or PNG).
    --photo FILE            Counter-photo taken from where you stand (JPEG or PNG).
    --mode MODE             Analysis mode, ar or standard [default: ar].
    --server URL            Analysis service base URL. Defaults to $FRIENDFINDER_BACKEND_URL or http://127.0.0.1:5000.
    --options FILE          YAML file with session options.
    --duration SECS         How long to keep tracking before completing [default: 10].
    --status                Show the service's tracking status.
    --health                Check that the service is up.
    --calibrate             Tell the service the physical size of the landmark.
    --width METERS          Landmark width in meters.
    --height METERS         Landmark height in meters.
    --version, -v           Show tool version.
    --help, -h              Show this screen.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_friend: Option<String>,
    flag_photo: Option<String>,
    flag_mode: String,
    flag_server: Option<String>,
    flag_options: Option<String>,
    flag_duration: u64,
    flag_status: bool,
    flag_health: bool,
    flag_calibrate: bool,
    flag_width: Option<f64>,
    flag_height: Option<f64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let options = match &args.flag_options {
        Some(path) => SessionOptions::from_yaml_file(Path::new(path))?,
        None => SessionOptions::default(),
    };

    let config = match &args.flag_server {
        Some(url) => ServiceConfig::new(url.as_str()),
        None => ServiceConfig::from_env(),
    }
    .with_timeouts(options.initialize_timeout, options.track_timeout);
    info!("Using analysis service at {}", config.base_url);
    let client = HttpClient::new(config).context("Failed to build the HTTP client")?;

    if args.flag_status {
        show_status(&client).await
    } else if args.flag_health {
        show_health(&client).await
    } else if args.flag_calibrate {
        let (Some(width), Some(height)) = (args.flag_width, args.flag_height) else {
            bail!("--calibrate needs both --width and --height");
        };
        calibrate(&client, width, height).await
    } else {
        let (Some(friend), Some(photo)) = (&args.flag_friend, &args.flag_photo) else {
            bail!("Unsupported command!");
        };
        let mode = parse_mode(&args.flag_mode)?;
        let duration = Duration::from_secs(args.flag_duration);

        LocalSet::new()
            .run_until(run_session(client, friend, photo, mode, options, duration))
            .await
    }
}

fn parse_mode(mode: &str) -> anyhow::Result<Mode> {
    match mode {
        "ar" => Ok(Mode::Ar),
        "standard" => Ok(Mode::Standard),
        other => bail!("Unknown mode {other:?}, expected ar or standard"),
    }
}

async fn run_session(
    client: HttpClient,
    friend: &str,
    photo: &str,
    mode: Mode,
    options: SessionOptions,
    duration: Duration,
) -> anyhow::Result<()> {
    let friend_bytes = fs::read(friend).with_context(|| format!("Failed to read {friend}"))?;
    let friend_image = encoded_from_bytes(friend_bytes)
        .with_context(|| format!("{friend} is not a usable photo"))?;

    let photo_bytes = fs::read(photo).with_context(|| format!("Failed to read {photo}"))?;
    let counter_photo =
        StaticPhoto::from_upload(&photo_bytes, None, UPLOAD_LIMIT_BYTES, &options.capture)
            .with_context(|| format!("{photo} was rejected"))?;

    let handle = create_session(
        client,
        friend_image,
        FrameSource::Static(counter_photo),
        mode,
        options,
    );
    handle.on_result(print_update);
    handle.on_error(|e| warn!("{e}"));

    tokio::time::sleep(duration).await;

    let outcome = handle.complete().await;
    handle.teardown().await?;

    let completed = outcome.context("Session ended without guidance")?;
    println!("{}", serde_json::to_string_pretty(&completed)?);
    Ok(())
}

fn print_update(update: &GuidanceUpdate) {
    let result = &update.result;
    println!(
        "[{}] {} ({:.1}m, {:.0}° {}, confidence {:.2} {}, arrow {:+.0}° x{:.1})",
        update.state,
        result.instruction,
        result.distance,
        result.angle,
        result.direction,
        result.confidence,
        update.overlay.confidence_tier.meter_color(),
        update.overlay.rotation_deg,
        update.overlay.scale,
    );
}

async fn show_status(client: &HttpClient) -> anyhow::Result<()> {
    let status = client.status().await?;
    println!("initialized: {}", status.initialized);
    if let Some(features) = status.reference_features {
        println!("reference features: {features}");
    }
    if !status.features_available.is_empty() {
        println!("features: {}", status.features_available.join(", "));
    }
    println!("tracking methods: {}", status.tracking_methods.join(", "));
    Ok(())
}

async fn show_health(client: &HttpClient) -> anyhow::Result<()> {
    let health = client.health().await?;
    println!("status: {}", health.status);
    match health.opencv_version {
        Some(version) if health.opencv_available => println!("opencv: {version}"),
        _ => println!("opencv available: {}", health.opencv_available),
    }
    Ok(())
}

async fn calibrate(client: &HttpClient, width: f64, height: f64) -> anyhow::Result<()> {
    let dimensions = client.calibrate(width, height).await?;
    println!(
        "Landmark calibrated to {:.2}m x {:.2}m",
        dimensions.width, dimensions.height
    );
    Ok(())
}
