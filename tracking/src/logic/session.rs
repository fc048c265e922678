//! Guidance session: initialization, the tracking loop and its fallbacks.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::SessionOptions;
use crate::error::SessionError;
use crate::frame::normalize::normalize_with;
use crate::frame::quality::FrameCapture;
use crate::frame::source::{CameraProvider, FrameSource, LiveCamera, StaticPhoto};
use crate::logic::fallback::{demo_result, oscillating_result, tracking_lost_result};
use crate::logic::fsm::{self, SessionEvent, TransitionDecision};
use crate::logic::state::{SessionState, TrackingMethod};
use crate::logic::telemetry::{SessionTelemetry, TelemetryPacket};
use crate::logic::timer::RateLimiter;
use crate::overlay::{OverlayMapper, OverlayParams};
use crate::smoother::ResultSmoother;
use friendfinder_client_lib::guidance::{GuidanceResult, Mode, TrackingQuality};
use friendfinder_client_lib::payload::EncodedImage;
use friendfinder_client_lib::service::{AnalysisService, ServiceError};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::time::Instant;

/// One emitted piece of guidance together with what to draw for it.
#[derive(Clone, Debug, Serialize)]
pub struct GuidanceUpdate {
    pub result: GuidanceResult,
    pub overlay: OverlayParams,
    pub state: SessionState,
}

/// Final answer of a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletedGuidance {
    /// Carries the session's final tracking quality.
    #[serde(flatten)]
    pub result: GuidanceResult,
    pub method: TrackingMethod,
    pub frame_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not tracking, or a single-shot session.
    Inactive,
    RateLimited,
    /// No usable frame this time.
    Skipped(&'static str),
    Updated,
    /// The service failed; the last guidance was re-emitted dimmed.
    Degraded,
    /// Fallback guidance, no network call.
    Synthetic,
}

pub type ResultCallback = Box<dyn FnMut(&GuidanceUpdate)>;
pub type ErrorCallback = Box<dyn FnMut(&SessionError)>;

#[derive(Default)]
pub struct Listeners {
    pub on_result: Option<ResultCallback>,
    pub on_error: Option<ErrorCallback>,
}

pub struct TrackingSession<S> {
    service: S,
    options: SessionOptions,
    mode: Mode,
    friend_image: EncodedImage,
    friend_payload: Option<EncodedImage>,
    source: Option<FrameSource>,
    state: SessionState,
    started: bool,
    periodic: bool,
    method: TrackingMethod,
    retry_count: u32,
    consecutive_failures: u32,
    frame_count: u64,
    tracking_quality: TrackingQuality,
    last_result: Option<GuidanceResult>,
    smoother: ResultSmoother,
    overlay: OverlayMapper,
    limiter: RateLimiter,
    rng: StdRng,
    listeners: Rc<RefCell<Listeners>>,
    telemetry: SessionTelemetry,
}

impl<S: AnalysisService> TrackingSession<S> {
    pub fn new(
        service: S,
        friend_image: EncodedImage,
        source: FrameSource,
        mode: Mode,
        options: SessionOptions,
    ) -> Self {
        let telemetry = match SessionTelemetry::new(options.telemetry_dir.as_deref()) {
            Ok(telemetry) => telemetry,
            Err(e) => {
                warn!("Telemetry disabled: {e}");
                SessionTelemetry::disabled()
            }
        };

        Self {
            service,
            mode,
            friend_image,
            friend_payload: None,
            source: Some(source),
            state: SessionState::Idle,
            started: false,
            periodic: false,
            method: TrackingMethod::AdvancedArTracking,
            retry_count: 0,
            consecutive_failures: 0,
            frame_count: 0,
            tracking_quality: TrackingQuality::Unknown,
            last_result: None,
            smoother: ResultSmoother::new(options.smoothing_window_size),
            overlay: OverlayMapper::new(options.canvas, options.ring_count),
            limiter: RateLimiter::new(options.processing_interval),
            rng: StdRng::from_entropy(),
            listeners: Rc::new(RefCell::new(Listeners::default())),
            telemetry,
            options,
        }
    }

    /// Makes the marker scatter reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn on_result(&mut self, callback: impl FnMut(&GuidanceUpdate) + 'static) {
        self.listeners.borrow_mut().on_result = Some(Box::new(callback));
    }

    pub fn on_error(&mut self, callback: impl FnMut(&SessionError) + 'static) {
        self.listeners.borrow_mut().on_error = Some(Box::new(callback));
    }

    pub(crate) fn listeners(&self) -> Rc<RefCell<Listeners>> {
        Rc::clone(&self.listeners)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn tracking_quality(&self) -> TrackingQuality {
        self.tracking_quality
    }

    pub fn last_result(&self) -> Option<&GuidanceResult> {
        self.last_result.as_ref()
    }

    /// True when the session is expected to be ticked.
    pub fn is_periodic(&self) -> bool {
        self.periodic && self.state.is_active()
    }

    pub fn is_torn_down(&self) -> bool {
        self.source.is_none()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Status text for the renderer's badge.
    pub fn mode_label(&self) -> &'static str {
        match self.state {
            SessionState::Initializing => "Initializing...",
            SessionState::Tracking if !self.periodic => "Standard Analysis",
            SessionState::Tracking => "AR Tracking",
            SessionState::Fallback => "AR Demo",
            SessionState::Idle | SessionState::Failed => "Starting...",
        }
    }

    /// Runs the initialization protocol. Returns once the session is
    /// tracking, in fallback or failed.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "start",
            });
        }
        if self.source.is_none() {
            return Err(SessionError::Closed);
        }

        self.started = true;
        info!(
            "Starting {} session on {}",
            self.mode,
            self.source.as_ref().map_or("no source", |s| s.kind())
        );

        if let Err(err) = self.check_inputs() {
            return self.fail(err);
        }

        self.apply(SessionEvent::Start);
        self.initialize_loop().await
    }

    /// Acquires the camera and starts on it. When access is refused the error
    /// is reported and the session restarts in standard mode on
    /// `fallback_photo`, if one was supplied.
    pub async fn start_with_camera(
        &mut self,
        provider: &dyn CameraProvider,
        fallback_photo: Option<StaticPhoto>,
    ) -> Result<(), SessionError> {
        if self.source.is_none() {
            return Err(SessionError::Closed);
        }
        self.release_current_source();
        match LiveCamera::acquire(provider, self.options.capture) {
            Ok(camera) => {
                self.install_source(FrameSource::Live(camera));
                self.start().await
            }
            Err(err) => {
                warn!("Camera unavailable: {err}");
                self.report_error(&err);
                match fallback_photo {
                    Some(photo) if photo.ready() => {
                        info!("Falling back to standard analysis on the uploaded photo");
                        self.install_source(FrameSource::Static(photo));
                        self.mode = Mode::Standard;
                        self.start().await
                    }
                    _ => self.fail(SessionError::MissingInput(
                        "camera unavailable and no counter-photo supplied".into(),
                    )),
                }
            }
        }
    }

    /// Advances the tracking loop by at most one step.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if !self.is_periodic() {
            return TickOutcome::Inactive;
        }
        if !self.limiter.try_acquire(now) {
            return TickOutcome::RateLimited;
        }

        let outcome = match self.state {
            SessionState::Fallback => {
                self.frame_count += 1;
                let result = oscillating_result(self.frame_count);
                self.tracking_quality = result.tracking_quality;
                self.emit_guidance(result);
                TickOutcome::Synthetic
            }
            _ => self.track_once().await,
        };

        let run_id = self.telemetry.run_id().to_string();
        let skipped = match outcome {
            TickOutcome::Skipped(reason) => Some(reason),
            _ => None,
        };
        self.record(&TelemetryPacket::Tick {
            run_id: &run_id,
            ts: SessionTelemetry::now(),
            state: self.state.as_str(),
            frame: self.frame_count,
            consecutive_failures: self.consecutive_failures,
            skipped,
        });
        outcome
    }

    /// Clears all transient state and initializes again after a short delay.
    /// A session that was never started stays idle.
    pub async fn retry(&mut self) -> Result<(), SessionError> {
        if !self.started {
            debug!("Retry on a session that never started; staying idle");
            return Ok(());
        }
        if self.source.is_none() {
            return Err(SessionError::Closed);
        }

        self.reset_transient();
        self.apply(SessionEvent::Retry);
        tokio::time::sleep(self.options.recalibrate_delay).await;
        self.start().await
    }

    pub fn complete(&mut self) -> Result<CompletedGuidance, SessionError> {
        let invalid = SessionError::InvalidState {
            state: self.state,
            operation: "complete",
        };
        if !self.state.is_active() {
            return Err(invalid);
        }
        let Some(mut result) = self.last_result.clone() else {
            return Err(invalid);
        };
        result.tracking_quality = self.tracking_quality;

        let run_id = self.telemetry.run_id().to_string();
        self.record(&TelemetryPacket::Completed {
            run_id: &run_id,
            ts: SessionTelemetry::now(),
            method: self.method.as_str(),
            frame_count: self.frame_count,
        });
        info!(
            "Session completed via {} after {} frame(s)",
            self.method, self.frame_count
        );

        Ok(CompletedGuidance {
            result,
            method: self.method,
            frame_count: self.frame_count,
        })
    }

    /// Releases the current source, installs `source` and returns to idle.
    /// Call `retry` to initialize on the new source. Use `switch_to_camera`
    /// for a live camera so the old device is stopped before the new one
    /// opens.
    pub fn switch_source(&mut self, source: FrameSource, mode: Mode) -> Result<(), SessionError> {
        if self.source.is_none() {
            return Err(SessionError::Closed);
        }
        info!("Switching to {} in {} mode", source.kind(), mode);
        self.install_source(source);
        self.mode = mode;
        self.reset_transient();
        self.apply(SessionEvent::SourceSwitched);
        Ok(())
    }

    /// Stops the current source, then opens the camera from `provider` and
    /// returns to idle on it. The old device is always stopped before the new
    /// one is opened. On failure the session is left idle on a released
    /// source.
    pub fn switch_to_camera(
        &mut self,
        provider: &dyn CameraProvider,
        mode: Mode,
    ) -> Result<(), SessionError> {
        if self.source.is_none() {
            return Err(SessionError::Closed);
        }
        info!("Switching to the live camera in {} mode", mode);
        self.release_current_source();
        self.mode = mode;
        self.reset_transient();
        self.apply(SessionEvent::SourceSwitched);

        let camera = LiveCamera::acquire(provider, self.options.capture)?;
        self.install_source(FrameSource::Live(camera));
        Ok(())
    }

    /// Releases the frame source. Safe to call any number of times.
    pub fn teardown(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            self.periodic = false;
            info!("Session torn down in state {}", self.state);
        }
    }

    fn check_inputs(&self) -> Result<(), SessionError> {
        if self.friend_image.byte_len() == 0 {
            return Err(SessionError::MissingInput("friend image".into()));
        }
        if self.mode == Mode::Standard {
            match &self.source {
                Some(FrameSource::Static(photo)) if photo.ready() => {}
                _ => {
                    return Err(SessionError::MissingInput(
                        "standard mode needs an uploaded counter-photo".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    async fn initialize_loop(&mut self) -> Result<(), SessionError> {
        let budget = self.options.max_retries.max(1);

        loop {
            match self.initialize_once().await {
                Ok(result) => {
                    self.on_initialized(result);
                    return Ok(());
                }
                Err(err) if err.is_fatal() => return self.fail(err),
                Err(err) => {
                    self.retry_count += 1;
                    warn!(
                        "Initialization attempt {}/{} failed: {}",
                        self.retry_count, budget, err
                    );
                    self.report_error(&err);

                    let retryable = err.is_retryable();
                    if !retryable {
                        info!("Not retrying initialization after: {err}");
                    }
                    let exhausted = !retryable || self.retry_count >= budget;
                    self.apply(SessionEvent::InitFailed {
                        fatal: false,
                        budget_exhausted: exhausted,
                    });
                    if exhausted {
                        self.enter_fallback(demo_result());
                        return Ok(());
                    }
                    tokio::time::sleep(self.options.retry_backoff).await;
                }
            }
        }
    }

    async fn initialize_once(&mut self) -> Result<GuidanceResult, SessionError> {
        let friend = self.friend_payload()?;
        let frame = self.capture_initial_frame().await?;
        self.check_size(&friend)?;
        self.check_size(&frame)?;

        let timeout = self.options.initialize_timeout;
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            self.service.initialize(&friend, &frame, self.mode),
        )
        .await
        .unwrap_or(Err(ServiceError::Timeout(timeout)));

        self.record_request(
            "initialize",
            started,
            friend.byte_len() + frame.byte_len(),
            &outcome,
        );
        Ok(outcome?)
    }

    fn friend_payload(&mut self) -> Result<EncodedImage, SessionError> {
        if let Some(payload) = &self.friend_payload {
            return Ok(payload.clone());
        }
        let payload = normalize_with(&self.friend_image, &self.options.friend)?;
        self.friend_payload = Some(payload.clone());
        Ok(payload)
    }

    async fn capture_initial_frame(&mut self) -> Result<EncodedImage, SessionError> {
        let attempts = self.options.capture_attempts.max(1);
        let source = self.source.as_mut().ok_or(SessionError::Closed)?;
        source
            .wait_until_ready(
                self.options.camera_ready_attempts.max(1),
                self.options.camera_ready_interval,
            )
            .await?;

        let mut last_err = SessionError::CameraNotReady { attempts };
        for attempt in 1..=attempts {
            match source.capture_frame() {
                Ok(Some(image)) => match FrameCapture::assess(image, &self.options.quality) {
                    Ok(capture) => {
                        debug!(
                            "Initial frame accepted on attempt {} (mean {:.1}, variance {:.1})",
                            attempt, capture.quality.mean, capture.quality.variance
                        );
                        return Ok(capture.image);
                    }
                    Err(e) => last_err = e,
                },
                Ok(None) => last_err = SessionError::CameraNotReady { attempts },
                Err(e) if !source.is_live() => return Err(e),
                Err(e) => {
                    warn!("Frame capture failed: {e}");
                    last_err = SessionError::CameraNotReady { attempts };
                }
            }
            // An uploaded photo will not change between attempts.
            if !source.is_live() {
                break;
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.capture_interval).await;
            }
        }
        Err(last_err)
    }

    fn check_size(&self, image: &EncodedImage) -> Result<(), SessionError> {
        let limit = self.options.size_limit_bytes;
        if image.byte_len() > limit {
            return Err(SessionError::PayloadTooLarge {
                size: image.byte_len(),
                limit,
            });
        }
        Ok(())
    }

    fn on_initialized(&mut self, result: GuidanceResult) {
        self.periodic =
            self.mode != Mode::Standard && result.tracking_quality != TrackingQuality::Standard;
        self.method = if self.periodic {
            TrackingMethod::AdvancedArTracking
        } else {
            TrackingMethod::StandardAnalysis
        };
        self.retry_count = 0;
        self.consecutive_failures = 0;
        self.frame_count += 1;
        self.tracking_quality = result.tracking_quality;
        self.limiter.reset();
        self.limiter.try_acquire(Instant::now());

        self.apply(SessionEvent::Initialized);
        let smoothed = self.smoother.push(result);
        self.emit_guidance(smoothed);
    }

    async fn track_once(&mut self) -> TickOutcome {
        let Some(source) = self.source.as_mut() else {
            return TickOutcome::Skipped("no_source");
        };
        let frame = match source.capture_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::Skipped("not_ready"),
            Err(e) => {
                warn!("Frame capture failed: {e}");
                return TickOutcome::Skipped("capture_failed");
            }
        };
        let frame = match FrameCapture::assess(frame, &self.options.quality) {
            Ok(capture) => capture.image,
            Err(e) => {
                debug!("Skipping tick: {e}");
                return TickOutcome::Skipped("quality");
            }
        };
        if let Err(e) = self.check_size(&frame) {
            warn!("Skipping tick: {e}");
            return TickOutcome::Skipped("too_large");
        }

        self.frame_count += 1;
        let timeout = self.options.track_timeout;
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.service.track(&frame))
            .await
            .unwrap_or(Err(ServiceError::Timeout(timeout)));
        self.record_request("track", started, frame.byte_len(), &outcome);

        match outcome {
            Ok(result) if result.success => {
                self.consecutive_failures = 0;
                self.tracking_quality = result.tracking_quality;
                let smoothed = self.smoother.push(result);
                self.emit_guidance(smoothed);
                TickOutcome::Updated
            }
            Ok(result) => {
                let reason = result.error.unwrap_or_else(|| "tracking lost".into());
                self.on_track_failure(SessionError::Service(ServiceError::Rejected(reason)))
            }
            Err(e) => self.on_track_failure(e.into()),
        }
    }

    fn on_track_failure(&mut self, err: SessionError) -> TickOutcome {
        self.consecutive_failures += 1;
        self.tracking_quality = TrackingQuality::Poor;
        warn!(
            "Tracking failure {}/{}: {}",
            self.consecutive_failures, self.options.fallback_after_failures, err
        );

        if let Some(mut last) = self.last_result.clone() {
            last.tracking_quality = TrackingQuality::Poor;
            let overlay = self.overlay.map(&last, &mut self.rng).with_lost_tracking();
            self.emit(last, overlay);
        }

        let escalated = self.apply(SessionEvent::TrackFailed {
            consecutive: self.consecutive_failures,
            limit: self.options.fallback_after_failures.max(1),
        });
        if escalated {
            self.enter_fallback(tracking_lost_result());
        }
        TickOutcome::Degraded
    }

    fn enter_fallback(&mut self, result: GuidanceResult) {
        info!("Fallback guidance: {}", result.instruction);
        self.method = TrackingMethod::FallbackArTracking;
        self.periodic = self.mode != Mode::Standard;
        self.consecutive_failures = 0;
        self.tracking_quality = result.tracking_quality;
        self.limiter.reset();
        self.limiter.try_acquire(Instant::now());
        self.emit_guidance(result);
    }

    fn fail(&mut self, err: SessionError) -> Result<(), SessionError> {
        error!("Session failed: {err}");
        self.periodic = false;
        self.apply(SessionEvent::InitFailed {
            fatal: true,
            budget_exhausted: false,
        });
        self.report_error(&err);
        Err(err)
    }

    fn reset_transient(&mut self) {
        self.smoother.reset();
        self.limiter.reset();
        self.frame_count = 0;
        self.retry_count = 0;
        self.consecutive_failures = 0;
        self.periodic = false;
        self.method = TrackingMethod::AdvancedArTracking;
        self.tracking_quality = TrackingQuality::Unknown;
        self.last_result = None;
    }

    /// Stops the current device but keeps the session alive.
    fn release_current_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.release();
        }
    }

    fn install_source(&mut self, source: FrameSource) {
        if let Some(mut previous) = self.source.replace(source) {
            previous.release();
        }
    }

    /// Applies `event` through the transition table. Returns true if the
    /// state changed.
    fn apply(&mut self, event: SessionEvent) -> bool {
        match fsm::decide(self.state, &event) {
            TransitionDecision::Stay => false,
            TransitionDecision::Transition { to, reason } => {
                info!("Session {} -> {} ({})", self.state, to, reason);
                let run_id = self.telemetry.run_id().to_string();
                self.record(&TelemetryPacket::Transition {
                    run_id: &run_id,
                    ts: SessionTelemetry::now(),
                    from: self.state.as_str(),
                    to: to.as_str(),
                    reason: &reason,
                });
                self.state = to;
                true
            }
        }
    }

    fn emit_guidance(&mut self, result: GuidanceResult) {
        let overlay = self.overlay.map(&result, &mut self.rng);
        self.emit(result, overlay);
    }

    fn emit(&mut self, result: GuidanceResult, overlay: OverlayParams) {
        self.last_result = Some(result.clone());
        let update = GuidanceUpdate {
            result,
            overlay,
            state: self.state,
        };
        if let Some(callback) = self.listeners.borrow_mut().on_result.as_mut() {
            callback(&update);
        }
    }

    fn report_error(&self, err: &SessionError) {
        if let Some(callback) = self.listeners.borrow_mut().on_error.as_mut() {
            callback(err);
        }
    }

    fn record_request(
        &mut self,
        endpoint: &str,
        started: Instant,
        payload_bytes: usize,
        outcome: &Result<GuidanceResult, ServiceError>,
    ) {
        let latency = started.elapsed();
        debug!("{} answered in {:?}", endpoint, latency);
        let outcome = match outcome {
            Ok(_) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        let run_id = self.telemetry.run_id().to_string();
        self.record(&TelemetryPacket::Request {
            run_id: &run_id,
            ts: SessionTelemetry::now(),
            endpoint,
            latency_ms: latency.as_millis(),
            payload_bytes,
            outcome: &outcome,
        });
    }

    fn record(&mut self, packet: &TelemetryPacket) {
        if let Err(e) = self.telemetry.write(packet) {
            warn!("Failed to write telemetry: {e}");
        }
    }
}

impl<S> Drop for TrackingSession<S> {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::source::fake::FakeProvider;
    use crate::frame::test_images::{solid_jpeg, textured_jpeg};
    use crate::tests::mock::{guidance, MockService};
    use std::cell::Cell;
    use std::time::Duration;

    fn ar_session(service: MockService) -> (TrackingSession<MockService>, FakeProvider) {
        let provider = FakeProvider::new();
        let camera = LiveCamera::acquire(&provider, SessionOptions::default().capture).unwrap();
        let session = TrackingSession::new(
            service,
            textured_jpeg(400, 300, 1),
            FrameSource::Live(camera),
            Mode::Ar,
            SessionOptions::default(),
        )
        .with_rng_seed(7);
        (session, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_initialization_starts_periodic_tracking() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        let (mut session, _provider) = ar_session(service.clone());

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Tracking);
        assert!(session.is_periodic());
        assert_eq!(session.mode_label(), "AR Tracking");
        assert_eq!(service.init_calls(), 1);
        assert_eq!(service.last_mode(), Some(Mode::Ar));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_is_rate_limited() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        service.set_default_track(|| Ok(guidance(30.0, TrackingQuality::Good)));
        let (mut session, _provider) = ar_session(service.clone());
        session.start().await.unwrap();

        let now = Instant::now();
        assert_eq!(session.tick(now).await, TickOutcome::RateLimited);
        let later = now + Duration::from_millis(1000);
        assert_eq!(session.tick(later).await, TickOutcome::Updated);
        assert_eq!(
            session.tick(later + Duration::from_millis(16)).await,
            TickOutcome::RateLimited
        );
        assert_eq!(service.track_calls(), 1);
        assert_eq!(session.last_result().unwrap().distance, 35.0);
    }

    #[tokio::test(start_paused = true)]
    async fn dark_camera_frames_exhaust_the_budget_into_fallback() {
        let service = MockService::new();
        let provider = FakeProvider::new();
        provider.probe.never_ready.set(true);
        let camera = LiveCamera::acquire(&provider, SessionOptions::default().capture).unwrap();
        let mut session = TrackingSession::new(
            service.clone(),
            textured_jpeg(400, 300, 1),
            FrameSource::Live(camera),
            Mode::Ar,
            SessionOptions::default(),
        );
        let errors = Rc::new(Cell::new(0));
        let seen = Rc::clone(&errors);
        session.on_error(move |e| {
            assert!(matches!(e, SessionError::CameraNotReady { .. }));
            seen.set(seen.get() + 1);
        });

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Fallback);
        assert_eq!(errors.get(), 2);
        assert_eq!(service.init_calls(), 0);
        assert_eq!(session.last_result().unwrap().tracking_quality, TrackingQuality::Poor);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_payload_fails_without_a_network_call() {
        let service = MockService::new();
        let options = SessionOptions {
            size_limit_bytes: 100,
            ..SessionOptions::default()
        };
        let mut session = TrackingSession::new(
            service.clone(),
            textured_jpeg(400, 300, 1),
            FrameSource::Static(StaticPhoto::new(textured_jpeg(320, 240, 2))),
            Mode::Standard,
            options,
        );

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::PayloadTooLarge { limit: 100, .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(service.init_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn standard_mode_without_a_photo_fails_fast() {
        let mut session = TrackingSession::new(
            MockService::new(),
            textured_jpeg(400, 300, 1),
            FrameSource::Static(StaticPhoto::empty()),
            Mode::Standard,
            SessionOptions::default(),
        );

        assert!(matches!(
            session.start().await,
            Err(SessionError::MissingInput(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_counter_photo_is_fatal() {
        let broken = EncodedImage::new(
            vec![0xFF, 0xD8, 0x00],
            friendfinder_client_lib::payload::ImageEncoding::Jpeg,
            10,
            10,
        );
        let mut session = TrackingSession::new(
            MockService::new(),
            textured_jpeg(400, 300, 1),
            FrameSource::Static(StaticPhoto::new(broken)),
            Mode::Standard,
            SessionOptions::default(),
        );

        assert!(matches!(session.start().await, Err(SessionError::Image(_))));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn dark_static_photo_is_retried_then_demo() {
        let service = MockService::new();
        let mut session = TrackingSession::new(
            service.clone(),
            textured_jpeg(400, 300, 1),
            FrameSource::Static(StaticPhoto::new(solid_jpeg(320, 240, [0, 0, 0]))),
            Mode::Standard,
            SessionOptions::default(),
        );

        let started = Instant::now();
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Fallback);
        assert!(!session.is_periodic());
        assert_eq!(session.mode_label(), "AR Demo");
        assert_eq!(service.init_calls(), 0);
        // One capture per attempt, only the backoff in between.
        assert_eq!(started.elapsed(), SessionOptions::default().retry_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_denied_falls_back_to_the_uploaded_photo() {
        let service = MockService::new();
        service.push_init(Ok(guidance(60.0, TrackingQuality::Standard)));
        let mut session = TrackingSession::new(
            service.clone(),
            textured_jpeg(400, 300, 1),
            FrameSource::Static(StaticPhoto::empty()),
            Mode::Ar,
            SessionOptions::default(),
        );
        let errors = Rc::new(Cell::new(0));
        let seen = Rc::clone(&errors);
        session.on_error(move |e| {
            assert!(matches!(e, SessionError::CameraAccess(_)));
            seen.set(seen.get() + 1);
        });

        session
            .start_with_camera(
                &FakeProvider::denied(),
                Some(StaticPhoto::new(textured_jpeg(320, 240, 3))),
            )
            .await
            .unwrap();

        assert_eq!(errors.get(), 1);
        assert_eq!(session.mode(), Mode::Standard);
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(service.last_mode(), Some(Mode::Standard));
        assert_eq!(session.mode_label(), "Standard Analysis");
    }

    #[tokio::test(start_paused = true)]
    async fn camera_denied_without_photo_is_missing_input() {
        let mut session = TrackingSession::new(
            MockService::new(),
            textured_jpeg(400, 300, 1),
            FrameSource::Static(StaticPhoto::empty()),
            Mode::Ar,
            SessionOptions::default(),
        );

        let err = session
            .start_with_camera(&FakeProvider::denied(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingInput(_)));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_is_only_valid_while_active() {
        let (mut session, _provider) = ar_session(MockService::new());
        assert!(matches!(
            session.complete(),
            Err(SessionError::InvalidState {
                state: SessionState::Idle,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_on_a_fresh_session_stays_idle() {
        let service = MockService::new();
        let (mut session, _provider) = ar_session(service.clone());
        session.retry().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(service.init_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_resets_transient_state_and_reinitializes() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        service.push_init(Ok(guidance(80.0, TrackingQuality::Good)));
        service.set_default_track(|| Ok(guidance(20.0, TrackingQuality::Good)));
        let (mut session, _provider) = ar_session(service.clone());
        session.start().await.unwrap();
        session.tick(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(session.frame_count(), 2);

        let started = Instant::now();
        session.retry().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(session.frame_count(), 1);
        // The window was cleared, so only the new initialization counts.
        assert_eq!(session.last_result().unwrap().distance, 80.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_initialize_reply_goes_straight_to_demo() {
        let service = MockService::new();
        service.set_default_init(|| Err(ServiceError::InvalidResponse("<html>".into())));
        let (mut session, _provider) = ar_session(service.clone());
        let errors = Rc::new(Cell::new(0));
        let seen = Rc::clone(&errors);
        session.on_error(move |_| seen.set(seen.get() + 1));

        let started = Instant::now();
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Fallback);
        assert_eq!(service.init_calls(), 1);
        assert_eq!(errors.get(), 1);
        assert!(started.elapsed() < SessionOptions::default().retry_backoff);
        assert_eq!(session.last_result().unwrap().tracking_quality, TrackingQuality::Poor);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_camera_frames_skip_ticks_quietly() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        let (mut session, provider) = ar_session(service.clone());
        let errors = Rc::new(Cell::new(0));
        let seen = Rc::clone(&errors);
        session.on_error(move |_| seen.set(seen.get() + 1));
        session.start().await.unwrap();

        provider.probe.never_ready.set(true);
        let start = Instant::now();
        for second in 1..=5 {
            let now = start + Duration::from_secs(second);
            assert_eq!(session.tick(now).await, TickOutcome::Skipped("not_ready"));
        }
        assert_eq!(service.track_calls(), 0);
        assert_eq!(session.consecutive_failures, 0);
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(errors.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dark_camera_frames_skip_ticks_quietly() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        let (mut session, provider) = ar_session(service.clone());
        let errors = Rc::new(Cell::new(0));
        let seen = Rc::clone(&errors);
        session.on_error(move |_| seen.set(seen.get() + 1));
        session.start().await.unwrap();

        provider.probe.dark.set(true);
        let start = Instant::now();
        for second in 1..=5 {
            let now = start + Duration::from_secs(second);
            assert_eq!(session.tick(now).await, TickOutcome::Skipped("quality"));
        }
        assert_eq!(service.track_calls(), 0);
        assert_eq!(session.consecutive_failures, 0);
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(session.frame_count(), 1);
        assert_eq!(errors.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_to_camera_stops_the_old_device_first() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        service.push_init(Ok(guidance(30.0, TrackingQuality::Good)));
        let (mut session, provider) = ar_session(service.clone());
        session.start().await.unwrap();

        session.switch_to_camera(&provider, Mode::Ar).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(provider.probe.open_devices.get(), 1);
        assert_eq!(provider.probe.peak_open_devices.get(), 1);
        assert_eq!(provider.probe.stop_calls.get(), 1);

        session.retry().await.unwrap();
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(service.init_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_camera_switch_leaves_a_released_idle_session() {
        let (mut session, provider) = ar_session(MockService::new());

        let err = session
            .switch_to_camera(&FakeProvider::denied(), Mode::Ar)
            .unwrap_err();
        assert!(matches!(err, SessionError::CameraAccess(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(provider.probe.stopped());
        assert_eq!(provider.probe.open_devices.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_with_camera_releases_the_current_device_first() {
        let service = MockService::new();
        service.push_init(Ok(guidance(40.0, TrackingQuality::Good)));
        let (mut session, provider) = ar_session(service.clone());

        session.start_with_camera(&provider, None).await.unwrap();
        assert_eq!(session.state(), SessionState::Tracking);
        assert_eq!(provider.probe.peak_open_devices.get(), 1);
        assert_eq!(provider.probe.open_devices.get(), 1);
    }
}
