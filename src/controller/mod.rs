//! Lifecycle manager.
//!
//! [`Controller`] pairs one front end with one back end, negotiates their
//! capabilities once, runs the two relay directions and tears everything
//! down in a fixed order.
//!
//! ## Session State Machine
//!
//! ```text
//!              connect()            start()
//!     [Idle] ───────────> [Idle] ───────────> [Running]
//!       │     (verdict)     │                    │
//!       │                   │ close()            │ EOF / critical error /
//!       │ close()           │                    │ task panic / close()
//!       v                   v                    v
//!    [Closed] <────────── [Closing] <────────────┘
//! ```
//!
//! ## Teardown order
//!
//! 1. Trigger the shared shutdown signal.
//! 2. Join relay tasks within `lifecycle.shutdown_timeout_ms`; abandon the rest.
//! 3. Drop any endpoints that never started relaying.
//! 4. `BackEnd::close`, then `FrontEnd::close`.
//! 5. Release both modules.

mod session;

pub use session::SessionState;

pub use crate::relay::CloseReason;

use std::sync::Arc;

use tracing::{info, warn};

use session::Session;

use crate::config::Config;
use crate::error::{ModlinkError, Result};
use crate::modules::{BackEnd, FrontEnd};
use crate::protocol::{negotiate, CompatibilityVerdict, CONTROLLER_VERSION};
use crate::relay::{
    Direction, EnvelopeProcessor, MessageProcessor, RelayOutcome, RelayPump, ShutdownSignal,
};
use crate::transport::{stream_pairs, Endpoint};

/// Controller-side endpoints of a connected but not yet started session
struct PendingStreams {
    front: Endpoint,
    back: Endpoint,
}

/// Mediator between one front end and one back end.
///
/// # Example
/// ```no_run
/// use modlink::config::Config;
/// use modlink::controller::Controller;
/// use modlink::modules::{EchoModel, StdioInterface};
///
/// # async fn example() -> modlink::Result<()> {
/// let mut controller = Controller::new(Config::default());
/// controller
///     .connect(Box::new(StdioInterface::new()), Box::new(EchoModel::new()))
///     .await?;
/// controller.start()?;
/// let reason = controller.wait().await;
/// println!("session ended: {reason:?}");
/// # Ok(())
/// # }
/// ```
pub struct Controller {
    config: Config,
    processor: Arc<dyn MessageProcessor>,
    state: SessionState,
    front: Option<Box<dyn FrontEnd>>,
    back: Option<Box<dyn BackEnd>>,
    verdict: Option<CompatibilityVerdict>,
    pending: Option<PendingStreams>,
    session: Option<Session>,
    outcomes: Vec<RelayOutcome>,
    close_reason: Option<CloseReason>,
}

impl Controller {
    /// Controller with the standard envelope processing
    pub fn new(config: Config) -> Self {
        Self::with_processor(config, Arc::new(EnvelopeProcessor::new(CONTROLLER_VERSION)))
    }

    /// Controller with a custom per-line processing strategy
    pub fn with_processor(config: Config, processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            config,
            processor,
            state: SessionState::Idle,
            front: None,
            back: None,
            verdict: None,
            pending: None,
            session: None,
            outcomes: Vec::new(),
            close_reason: None,
        }
    }

    /// Pair a front end with a back end and negotiate.
    ///
    /// The back end first vets the controller version. An `Incompatible`
    /// verdict is returned as `Ok` and left for [`Controller::start`] to
    /// refuse; otherwise the back end checks the requirements and both
    /// modules receive their streams.
    pub async fn connect(
        &mut self,
        mut front: Box<dyn FrontEnd>,
        mut back: Box<dyn BackEnd>,
    ) -> Result<CompatibilityVerdict> {
        if matches!(self.state, SessionState::Running | SessionState::Closing)
            || self.front.is_some()
            || self.back.is_some()
        {
            return Err(ModlinkError::Session(
                "a session is already connected".to_string(),
            ));
        }
        self.reset();

        let (accepted, message) = back
            .verify_controller_compatibility(CONTROLLER_VERSION)
            .await;
        if !accepted {
            warn!(back_end = back.id(), %message, "Back end refused controller version");
            back.close().await;
            front.close().await;
            return Err(ModlinkError::Rejected(message));
        }

        let requirements = front.capabilities().await;
        let support = back.capabilities();
        let verdict = negotiate(requirements.as_ref(), &support);

        match &verdict {
            CompatibilityVerdict::Compatible => {
                info!(front_end = front.id(), back_end = back.id(), "Modules are compatible");
            },
            CompatibilityVerdict::PartiallyCompatible(missing) => {
                warn!(
                    front_end = front.id(),
                    back_end = back.id(),
                    missing = %missing.join(", "),
                    "Modules are partially compatible"
                );
            },
            CompatibilityVerdict::Incompatible(missing) => {
                warn!(
                    front_end = front.id(),
                    back_end = back.id(),
                    missing = %missing.join(", "),
                    "Modules are incompatible"
                );
            },
        }

        if verdict.allows_mediation() {
            if let Some(requirements) = &requirements {
                let (accepted, message) = back.check_compatibility(requirements).await;
                if !accepted {
                    warn!(back_end = back.id(), %message, "Back end refused the requirements");
                    back.close().await;
                    front.close().await;
                    return Err(ModlinkError::Rejected(message));
                }
            }

            let pairs = stream_pairs(self.config.relay.channel_capacity);
            let (reader, writer) = pairs.front.module.into_parts();
            front.set_streams(reader, writer);
            let (reader, writer) = pairs.back.module.into_parts();
            back.set_streams(reader, writer);
            self.pending = Some(PendingStreams {
                front: pairs.front.controller,
                back: pairs.back.controller,
            });
        }

        self.front = Some(front);
        self.back = Some(back);
        self.verdict = Some(verdict.clone());
        Ok(verdict)
    }

    /// Start both relay directions.
    ///
    /// Fails with [`ModlinkError::Incompatible`] when negotiation found
    /// missing required capabilities, and with [`ModlinkError::Session`]
    /// when nothing is connected or the session already ran.
    pub fn start(&mut self) -> Result<CompatibilityVerdict> {
        if self.state != SessionState::Idle {
            return Err(ModlinkError::Session(format!(
                "cannot start a session that is {}",
                self.state
            )));
        }
        let verdict = self.verdict.clone().ok_or_else(|| {
            ModlinkError::Session("connect() must succeed before start()".to_string())
        })?;
        if let CompatibilityVerdict::Incompatible(missing) = &verdict {
            return Err(ModlinkError::Incompatible {
                missing: missing.clone(),
            });
        }
        let streams = self.pending.take().ok_or_else(|| {
            ModlinkError::Session("session streams are not established".to_string())
        })?;

        let signal = ShutdownSignal::new();
        let mut session = Session::new(signal.clone());
        let (front_reader, front_writer) = streams.front.into_parts();
        let (back_reader, back_writer) = streams.back.into_parts();

        session.spawn(RelayPump::new(
            Direction::FrontToBack,
            front_reader,
            back_writer,
            Arc::clone(&self.processor),
            &self.config.relay,
            signal.clone(),
        ));
        session.spawn(RelayPump::new(
            Direction::BackToFront,
            back_reader,
            front_writer,
            Arc::clone(&self.processor),
            &self.config.relay,
            signal,
        ));

        self.session = Some(session);
        self.state = SessionState::Running;
        info!(verdict = %verdict, "Mediation started");
        Ok(verdict)
    }

    /// Wait until the session ends on its own, then close it.
    ///
    /// Returns the reason the session ended. Returns immediately when no
    /// session is running.
    pub async fn wait(&mut self) -> Option<CloseReason> {
        if let Some(session) = self.session.as_mut() {
            session.settle().await;
            self.close().await;
        }
        self.close_reason.clone()
    }

    /// Tear the session down. Safe to call any number of times, before or
    /// after `start()`.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;

        if let Some(mut session) = self.session.take() {
            session.signal().trigger(CloseReason::Requested);
            session
                .drain(self.config.lifecycle.shutdown_timeout())
                .await;
            self.close_reason = session.signal().reason();
            self.outcomes = session.into_outcomes();
        }

        // Endpoints of a session that never started
        self.pending = None;

        if let Some(mut back) = self.back.take() {
            back.close().await;
        }
        if let Some(mut front) = self.front.take() {
            front.close().await;
        }

        self.state = SessionState::Closed;
        info!(
            reason = ?self.close_reason,
            "Session closed"
        );
    }

    /// Whether relay tasks are active and no shutdown was requested
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
            && self
                .session
                .as_ref()
                .is_some_and(|session| !session.signal().is_triggered())
    }

    /// Lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Verdict of the last `connect()`
    pub fn verdict(&self) -> Option<&CompatibilityVerdict> {
        self.verdict.as_ref()
    }

    /// Relay tasks still running
    pub fn active_tasks(&self) -> usize {
        self.session.as_ref().map_or(0, Session::active)
    }

    /// Why the session ended, once it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        match &self.session {
            Some(session) => session.signal().reason(),
            None => self.close_reason.clone(),
        }
    }

    /// Reports of finished relay directions
    pub fn outcomes(&self) -> &[RelayOutcome] {
        match &self.session {
            Some(session) => session.outcomes(),
            None => &self.outcomes,
        }
    }

    /// Shared shutdown signal of the running session
    pub fn shutdown_signal(&self) -> Option<ShutdownSignal> {
        self.session.as_ref().map(|session| session.signal().clone())
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.verdict = None;
        self.pending = None;
        self.outcomes.clear();
        self.close_reason = None;
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("verdict", &self.verdict)
            .field("front", &self.front.as_ref().map(|m| m.id().to_string()))
            .field("back", &self.back.as_ref().map(|m| m.id().to_string()))
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.signal().trigger(CloseReason::Requested);
        }
    }
}
