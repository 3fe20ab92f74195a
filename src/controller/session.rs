//! Live session bookkeeping: relay tasks, their outcomes and the shared
//! shutdown signal.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, warn};

use crate::relay::{CloseReason, RelayEnd, RelayOutcome, RelayPump, RelayStats, ShutdownSignal};

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No relay running (fresh, or connected but not started)
    Idle,
    /// Relay tasks active
    Running,
    /// `close()` in progress
    Closing,
    /// Torn down
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Decrements the active-task counter when a relay task finishes or is
/// dropped by an abort.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The live pairing of one front end and one back end
pub(crate) struct Session {
    signal: ShutdownSignal,
    tasks: JoinSet<RelayOutcome>,
    active: Arc<AtomicUsize>,
    outcomes: Vec<RelayOutcome>,
}

impl Session {
    pub(crate) fn new(signal: ShutdownSignal) -> Self {
        Self {
            signal,
            tasks: JoinSet::new(),
            active: Arc::new(AtomicUsize::new(0)),
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn outcomes(&self) -> &[RelayOutcome] {
        &self.outcomes
    }

    pub(crate) fn into_outcomes(self) -> Vec<RelayOutcome> {
        self.outcomes
    }

    /// Spawn a pump. A panic inside it is caught and turned into a
    /// session-wide shutdown.
    pub(crate) fn spawn(&mut self, pump: RelayPump) {
        let direction = pump.direction();
        let signal = self.signal.clone();
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));

        self.tasks.spawn(async move {
            let _guard = guard;
            match AssertUnwindSafe(pump.run()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(direction = %direction, "Relay task panicked, closing session");
                    signal.trigger(CloseReason::TaskFailed(direction));
                    RelayOutcome {
                        direction,
                        end: RelayEnd::Panicked,
                        stats: RelayStats::default(),
                    }
                },
            }
        });
    }

    /// Resolve when the shutdown signal fires or every task has finished,
    /// collecting outcomes along the way.
    pub(crate) async fn settle(&mut self) {
        let signal = self.signal.clone();
        loop {
            tokio::select! {
                biased;
                () = signal.triggered() => return,
                joined = self.tasks.join_next() => match joined {
                    Some(joined) => record(&mut self.outcomes, joined),
                    None => return,
                },
            }
        }
    }

    /// Join remaining tasks within `timeout`, aborting stragglers.
    ///
    /// Returns `false` if some task had to be abandoned.
    pub(crate) async fn drain(&mut self, timeout: Duration) -> bool {
        let joined = tokio::time::timeout(timeout, async {
            while let Some(joined) = self.tasks.join_next().await {
                record(&mut self.outcomes, joined);
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                remaining = self.tasks.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Relay tasks did not stop in time, abandoning them"
            );
            self.tasks.abort_all();
            return false;
        }
        true
    }
}

fn record(outcomes: &mut Vec<RelayOutcome>, joined: Result<RelayOutcome, JoinError>) {
    match joined {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) if e.is_cancelled() => {},
        Err(e) => warn!(error = %e, "Relay task failed to join"),
    }
}
