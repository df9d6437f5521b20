//! Store connection health: a small state machine with a bounded
//! reconnect wait.
//!
//! ```text
//!   Available ──(disconnect)──→ Pending ──(timeout)──→ Unavailable
//!       ↑                          │                        │
//!       └────────(connect)─────────┴────────(connect)───────┘
//! ```
//!
//! While `Pending`, callers that need the store park on one shared
//! "reconnected" signal and give up when the reconnect window closes.
//! While `Unavailable`, they fail immediately. No caller ever waits
//! longer than `reconnect_timeout` for a store that isn't coming back.
//!
//! The monitor is owned per store instance (injected into the
//! [`Store`](crate::Store) adapter), so independent stores never share
//! availability by accident.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::{ConnectionEvent, StoreError};

/// Publicly visible availability of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// The backing client is connected.
    Available,
    /// The client disconnected and the reconnect window is still open.
    Pending,
    /// The reconnect window closed without a reconnect.
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Available,
    Pending { deadline: Instant },
    Unavailable,
}

/// Tracks whether a store's backing client is reachable.
///
/// State changes only in response to [`ConnectionEvent`]s fed through
/// [`observe`](Self::observe), plus the one deadline transition from
/// `Pending` to `Unavailable`. Requests only read the state or wait on
/// it via [`ready`](Self::ready).
#[derive(Debug)]
pub struct HealthMonitor {
    reconnect_timeout: Duration,
    state: Mutex<State>,
    /// Bumped on every `connect`. Waiters subscribe while `Pending` and
    /// wake on the next bump.
    reconnected: watch::Sender<u64>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RECONNECT_TIMEOUT)
    }
}

impl HealthMonitor {
    /// How long callers wait for a reconnect before the store is
    /// declared unavailable, unless configured otherwise.
    pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a monitor in the `Available` state.
    pub fn new(reconnect_timeout: Duration) -> Self {
        let (reconnected, _) = watch::channel(0);
        Self {
            reconnect_timeout,
            state: Mutex::new(State::Available),
            reconnected,
        }
    }

    /// The configured reconnect window.
    pub fn reconnect_timeout(&self) -> Duration {
        self.reconnect_timeout
    }

    /// Feeds a connection event into the state machine.
    pub fn observe(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Disconnect => self.on_disconnect(),
            ConnectionEvent::Connect => self.on_connect(),
        }
    }

    /// Current availability.
    pub fn availability(&self) -> Availability {
        let mut state = self.lock();
        self.expire(&mut state);
        match *state {
            State::Available => Availability::Available,
            State::Pending { .. } => Availability::Pending,
            State::Unavailable => Availability::Unavailable,
        }
    }

    /// Waits until the store may be used.
    ///
    /// - `Available` → returns immediately.
    /// - `Pending` → waits for the next `connect`, or fails with
    ///   [`StoreError::Unavailable`] once the reconnect window closes.
    /// - `Unavailable` → fails immediately.
    pub async fn ready(&self) -> Result<(), StoreError> {
        loop {
            // Subscribe while holding the lock so a `connect` can't slip
            // in between reading `Pending` and starting to wait.
            let (deadline, mut reconnected) = {
                let mut state = self.lock();
                self.expire(&mut state);
                match *state {
                    State::Available => return Ok(()),
                    State::Unavailable => return Err(StoreError::Unavailable),
                    State::Pending { deadline } => {
                        (deadline, self.reconnected.subscribe())
                    }
                }
            };

            debug!("session store pending, waiting for reconnect");
            // A reconnect releases every waiter of this window, even if a
            // new disconnect has already opened the next one. A timeout
            // re-evaluates the state, which is then `Unavailable`.
            if let Ok(Ok(())) = time::timeout_at(deadline, reconnected.changed()).await {
                return Ok(());
            }
        }
    }

    fn on_disconnect(&self) {
        let mut state = self.lock();
        if !matches!(*state, State::Available) {
            debug!("disconnect while not available, ignoring");
            return;
        }
        *state = State::Pending {
            deadline: Instant::now() + self.reconnect_timeout,
        };
        warn!(
            timeout_ms = self.reconnect_timeout.as_millis() as u64,
            "session store disconnected, waiting for reconnect"
        );
    }

    fn on_connect(&self) {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut *state, State::Available);
        self.reconnected.send_modify(|n| *n = n.wrapping_add(1));
        if !matches!(previous, State::Available) {
            info!("session store reconnected");
        }
    }

    /// Closes an elapsed reconnect window.
    fn expire(&self, state: &mut State) {
        if let State::Pending { deadline } = *state {
            if Instant::now() >= deadline {
                *state = State::Unavailable;
                warn!("session store did not reconnect in time, marking unavailable");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
