//! Drives a session on the local task set and exposes it through a handle.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::SessionOptions;
use crate::error::SessionError;
use crate::frame::source::{CameraProvider, FrameSource, StaticPhoto};
use crate::logic::session::{
    CompletedGuidance, GuidanceUpdate, Listeners, TrackingSession,
};
use crate::logic::state::SessionState;
use friendfinder_client_lib::guidance::Mode;
use friendfinder_client_lib::payload::EncodedImage;
use friendfinder_client_lib::service::AnalysisService;
use log::{debug, info};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

enum Command {
    OnResult(Box<dyn FnMut(&GuidanceUpdate)>),
    OnError(Box<dyn FnMut(&SessionError)>),
    Retry(oneshot::Sender<Result<(), SessionError>>),
    Complete(oneshot::Sender<Result<CompletedGuidance, SessionError>>),
    SwitchSource {
        source: FrameSource,
        mode: Mode,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SwitchToCamera {
        provider: Box<dyn CameraProvider>,
        mode: Mode,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    State(oneshot::Sender<SessionState>),
    ModeLabel(oneshot::Sender<&'static str>),
    Teardown(oneshot::Sender<()>),
}

enum Launch {
    Start,
    Camera {
        provider: Box<dyn CameraProvider>,
        fallback_photo: Option<StaticPhoto>,
    },
}

enum Flow<T> {
    Done(T),
    TornDown,
}

enum Control {
    Continue,
    Stop,
}

/// Caller side of a running session. Dropping every handle tears the
/// session down.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

/// Creates a session and starts it on the current `LocalSet`.
///
/// Must be called from inside a `LocalSet`. Callbacks registered right after
/// creation see every result, including the one from initialization.
pub fn create_session<S: AnalysisService + 'static>(
    service: S,
    friend_image: EncodedImage,
    frame_source: FrameSource,
    mode: Mode,
    options: SessionOptions,
) -> SessionHandle {
    let session = TrackingSession::new(service, friend_image, frame_source, mode, options);
    spawn(session, Launch::Start)
}

/// Like `create_session`, but acquires the camera first and falls back to
/// `fallback_photo` in standard mode when access is refused.
pub fn create_camera_session<S: AnalysisService + 'static>(
    service: S,
    friend_image: EncodedImage,
    provider: Box<dyn CameraProvider>,
    fallback_photo: Option<StaticPhoto>,
    mode: Mode,
    options: SessionOptions,
) -> SessionHandle {
    let session = TrackingSession::new(
        service,
        friend_image,
        FrameSource::Static(StaticPhoto::empty()),
        mode,
        options,
    );
    spawn(
        session,
        Launch::Camera {
            provider,
            fallback_photo,
        },
    )
}

/// Starts an already configured session.
pub fn spawn_session<S: AnalysisService + 'static>(session: TrackingSession<S>) -> SessionHandle {
    spawn(session, Launch::Start)
}

fn spawn<S: AnalysisService + 'static>(session: TrackingSession<S>, launch: Launch) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let driver = Driver {
        listeners: session.listeners(),
        session,
        commands: rx,
        pending: VecDeque::new(),
        teardown_acks: Vec::new(),
    };
    tokio::task::spawn_local(driver.run(launch));
    SessionHandle { commands: tx }
}

impl SessionHandle {
    pub fn on_result(&self, callback: impl FnMut(&GuidanceUpdate) + 'static) {
        let _ = self.commands.send(Command::OnResult(Box::new(callback)));
    }

    pub fn on_error(&self, callback: impl FnMut(&SessionError) + 'static) {
        let _ = self.commands.send(Command::OnError(Box::new(callback)));
    }

    pub async fn retry(&self) -> Result<(), SessionError> {
        self.request(Command::Retry).await?
    }

    pub async fn complete(&self) -> Result<CompletedGuidance, SessionError> {
        self.request(Command::Complete).await?
    }

    pub async fn switch_source(&self, source: FrameSource, mode: Mode) -> Result<(), SessionError> {
        self.request(|reply| Command::SwitchSource {
            source,
            mode,
            reply,
        })
        .await?
    }

    /// Switches to a live camera. The session stops the current device before
    /// `provider` opens the new one.
    pub async fn switch_to_camera(
        &self,
        provider: Box<dyn CameraProvider>,
        mode: Mode,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::SwitchToCamera {
            provider,
            mode,
            reply,
        })
        .await?
    }

    /// Answered between operations, so it waits for an in-flight call.
    pub async fn state(&self) -> Result<SessionState, SessionError> {
        self.request(Command::State).await
    }

    pub async fn mode_label(&self) -> Result<&'static str, SessionError> {
        self.request(Command::ModeLabel).await
    }

    /// Cancels pending work and releases the frame source before returning.
    /// Calling it on a session that is already gone is a no-op.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Teardown(ack)).is_err() {
            return Ok(());
        }
        // A dropped ack means the driver stopped on its own.
        let _ = done.await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SessionError::Closed)?;
        answer.await.map_err(|_| SessionError::Closed)
    }
}

struct Driver<S> {
    session: TrackingSession<S>,
    listeners: Rc<RefCell<Listeners>>,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: VecDeque<Command>,
    teardown_acks: Vec<oneshot::Sender<()>>,
}

impl<S: AnalysisService> Driver<S> {
    async fn run(mut self, launch: Launch) {
        // Registrations made right after creation are applied before starting.
        while let Ok(cmd) = self.commands.try_recv() {
            self.pending.push_back(cmd);
        }
        if let Control::Stop = self.drain_pending().await {
            return self.shutdown();
        }

        let launched = match launch {
            Launch::Start => {
                run_cancellable(
                    self.session.start(),
                    &mut self.commands,
                    &self.listeners,
                    &mut self.pending,
                    &mut self.teardown_acks,
                )
                .await
            }
            Launch::Camera {
                provider,
                fallback_photo,
            } => {
                run_cancellable(
                    self.session
                        .start_with_camera(provider.as_ref(), fallback_photo),
                    &mut self.commands,
                    &self.listeners,
                    &mut self.pending,
                    &mut self.teardown_acks,
                )
                .await
            }
        };
        match launched {
            Flow::TornDown => return self.shutdown(),
            Flow::Done(Err(e)) => debug!("Session start ended with: {e}"),
            Flow::Done(Ok(())) => {}
        }

        let period = self.session.options().frame_period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Control::Stop = self.drain_pending().await {
                break;
            }

            let ticking = self.session.is_periodic();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if let Control::Stop = self.handle(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick(), if ticking => {
                    let flow = run_cancellable(
                        self.session.tick(Instant::now()),
                        &mut self.commands,
                        &self.listeners,
                        &mut self.pending,
                        &mut self.teardown_acks,
                    )
                    .await;
                    if let Flow::TornDown = flow {
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    async fn drain_pending(&mut self) -> Control {
        while let Some(cmd) = self.pending.pop_front() {
            if let Control::Stop = self.handle(cmd).await {
                return Control::Stop;
            }
        }
        Control::Continue
    }

    async fn handle(&mut self, cmd: Command) -> Control {
        match cmd {
            Command::OnResult(callback) => {
                self.listeners.borrow_mut().on_result = Some(callback);
            }
            Command::OnError(callback) => {
                self.listeners.borrow_mut().on_error = Some(callback);
            }
            Command::Retry(reply) => {
                let flow = run_cancellable(
                    self.session.retry(),
                    &mut self.commands,
                    &self.listeners,
                    &mut self.pending,
                    &mut self.teardown_acks,
                )
                .await;
                match flow {
                    Flow::Done(result) => {
                        let _ = reply.send(result);
                    }
                    Flow::TornDown => {
                        let _ = reply.send(Err(SessionError::Closed));
                        return Control::Stop;
                    }
                }
            }
            Command::Complete(reply) => {
                let _ = reply.send(self.session.complete());
            }
            Command::SwitchSource {
                source,
                mode,
                reply,
            } => {
                let _ = reply.send(self.session.switch_source(source, mode));
            }
            Command::SwitchToCamera {
                provider,
                mode,
                reply,
            } => {
                let _ = reply.send(self.session.switch_to_camera(provider.as_ref(), mode));
            }
            Command::State(reply) => {
                let _ = reply.send(self.session.state());
            }
            Command::ModeLabel(reply) => {
                let _ = reply.send(self.session.mode_label());
            }
            Command::Teardown(ack) => {
                self.teardown_acks.push(ack);
                return Control::Stop;
            }
        }
        Control::Continue
    }

    fn shutdown(mut self) {
        self.session.teardown();
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            if let Command::Teardown(ack) = cmd {
                self.teardown_acks.push(ack);
            }
        }
        for cmd in self.pending.drain(..) {
            if let Command::Teardown(ack) = cmd {
                self.teardown_acks.push(ack);
            }
        }
        info!("Session driver stopped");
        for ack in self.teardown_acks.drain(..) {
            let _ = ack.send(());
        }
    }
}

/// Polls `fut` while still listening for commands. Callback registrations are
/// applied immediately, teardown (or every handle going away) drops `fut`,
/// and anything else waits in `pending` until `fut` is done.
async fn run_cancellable<F: Future>(
    fut: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    listeners: &Rc<RefCell<Listeners>>,
    pending: &mut VecDeque<Command>,
    teardown_acks: &mut Vec<oneshot::Sender<()>>,
) -> Flow<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Flow::Done(out),
            cmd = commands.recv() => match cmd {
                None => return Flow::TornDown,
                Some(Command::Teardown(ack)) => {
                    teardown_acks.push(ack);
                    return Flow::TornDown;
                }
                Some(Command::OnResult(callback)) => {
                    listeners.borrow_mut().on_result = Some(callback);
                }
                Some(Command::OnError(callback)) => {
                    listeners.borrow_mut().on_error = Some(callback);
                }
                Some(other) => pending.push_back(other),
            },
        }
    }
}
