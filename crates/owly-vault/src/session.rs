//! Session lifecycle and inactivity auto-lock.
//!
//! The session is the only holder of the active [`Capability`]. It is
//! `Locked`, `Unlocking` (a proof exchange is in flight) or `Unlocked`.
//! Locking drops the capability, which zeroizes any key it owns.
//!
//! Inactivity is measured from the last recorded interaction:
//! `remaining = timeout - (now - last_activity_at)`, floored at zero. The
//! session is considered locked the moment `remaining` reaches zero, even
//! before the background ticker notices. Identity-bound capabilities carry
//! their own expiry, independent of the inactivity timeout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::engine::Capability;
use crate::error::VaultError;

/// Auto-lock check interval.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Decryption failures this close to capability expiry are reported as
/// [`VaultError::SessionExpired`].
pub const EXPIRY_GRACE_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Coarse session state, published to subscribers on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Locked,
    Unlocking,
    Unlocked,
}

/// What a lock indicator should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Locked,
    Unlocked { remaining_secs: u64 },
    /// Remaining time is at or below the warning threshold.
    Warning { remaining_secs: u64 },
}

/// Timing snapshot of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub last_activity_at: u64,
}

struct Session {
    capability: Arc<Capability>,
    created_at: u64,
    expires_at: Option<u64>,
    last_activity_at: u64,
}

impl Session {
    fn remaining(&self, now: u64, timeout_secs: u64) -> u64 {
        timeout_secs.saturating_sub(now.saturating_sub(self.last_activity_at))
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    unlocking: bool,
    /// Bumped on every lock; an unlock that straddles a lock is discarded.
    generation: u64,
}

impl State {
    const fn phase(&self) -> SessionPhase {
        if self.session.is_some() {
            SessionPhase::Unlocked
        } else if self.unlocking {
            SessionPhase::Unlocking
        } else {
            SessionPhase::Locked
        }
    }
}

/// Clears the `unlocking` flag even if the unlock future is dropped.
struct UnlockingGuard<'a> {
    manager: &'a SessionManager,
}

impl Drop for UnlockingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.state();
        state.unlocking = false;
        self.manager.publish(&state);
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Owns the live session and enforces the inactivity timeout.
pub struct SessionManager {
    clock: Arc<dyn Clock>,
    timeout_secs: AtomicU64,
    warning_threshold_secs: u64,
    state: Mutex<State>,
    /// Cancel flag of the running auto-lock task, if any.
    ticker: Mutex<Option<Arc<AtomicBool>>>,
    phase_tx: watch::Sender<SessionPhase>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &self.phase())
            .field("timeout_secs", &self.timeout_secs.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, timeout_minutes: u32, warning_threshold_secs: u64) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Locked);
        Self {
            clock,
            timeout_secs: AtomicU64::new(minutes_to_secs(timeout_minutes)),
            warning_threshold_secs,
            state: Mutex::new(State::default()),
            ticker: Mutex::new(None),
            phase_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.phase_tx.send_replace(state.phase());
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs.load(Ordering::SeqCst)
    }

    /// Drop the session if its inactivity budget is spent. Returns whether
    /// a session is still live.
    fn expire_if_idle(&self, state: &mut State, now: u64) -> bool {
        let idle = state
            .session
            .as_ref()
            .is_some_and(|s| s.remaining(now, self.timeout_secs()) == 0);
        if idle {
            self.clear(state);
            tracing::info!("vault auto-locked after inactivity");
        }
        state.session.is_some()
    }

    fn clear(&self, state: &mut State) {
        state.session = None;
        state.generation = state.generation.wrapping_add(1);
        self.publish(state);
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Run a proof exchange and, on success, install its capability.
    ///
    /// The `Unlocking` phase is visible while `establish` runs. On failure
    /// any prior session is left untouched. If [`lock`](Self::lock) is
    /// called meanwhile, the new capability is discarded.
    ///
    /// # Errors
    ///
    /// Returns the proof exchange error, [`VaultError::InvalidRequest`] if
    /// another unlock is in flight, or [`VaultError::NotUnlocked`] if the
    /// vault was locked during the exchange.
    pub async fn create<F>(&self, establish: F) -> Result<SessionInfo, VaultError>
    where
        F: Future<Output = Result<Capability, VaultError>> + Send,
    {
        let generation = {
            let mut state = self.state();
            if state.unlocking {
                return Err(VaultError::InvalidRequest(
                    "an unlock is already in progress".into(),
                ));
            }
            state.unlocking = true;
            self.publish(&state);
            state.generation
        };
        let _guard = UnlockingGuard { manager: self };

        let capability = establish.await.map_err(|e| {
            tracing::warn!("unlock rejected: {e}");
            e
        })?;

        let now = self.clock.now_secs();
        let mut state = self.state();
        if state.generation != generation {
            tracing::info!("vault locked during unlock; discarding new session");
            return Err(VaultError::NotUnlocked);
        }
        let session = Session {
            expires_at: capability.expires_at(),
            capability: Arc::new(capability),
            created_at: now,
            last_activity_at: now,
        };
        let info = session.info();
        state.session = Some(session);
        state.unlocking = false;
        self.publish(&state);
        drop(state);

        tracing::info!(
            timeout_secs = self.timeout_secs(),
            expires_at = ?info.expires_at,
            "vault unlocked"
        );
        Ok(info)
    }

    /// Lock now. Idempotent.
    pub fn lock(&self) {
        self.stop_auto_lock();
        let mut state = self.state();
        let was_unlocked = state.session.is_some();
        self.clear(&mut state);
        drop(state);
        if was_unlocked {
            tracing::info!("vault locked");
        }
    }

    /// Record a user interaction. A session that already ran out is
    /// locked instead of revived.
    pub fn touch(&self) {
        let now = self.clock.now_secs();
        let mut state = self.state();
        if self.expire_if_idle(&mut state, now) {
            if let Some(session) = state.session.as_mut() {
                session.last_activity_at = now;
            }
        }
    }

    /// Evaluate the inactivity timeout at the current time.
    pub fn tick(&self) -> LockStatus {
        let now = self.clock.now_secs();
        let mut state = self.state();
        self.expire_if_idle(&mut state, now);
        self.status_of(&state, now)
    }

    fn status_of(&self, state: &State, now: u64) -> LockStatus {
        match &state.session {
            None => LockStatus::Locked,
            Some(session) => {
                let remaining_secs = session.remaining(now, self.timeout_secs());
                if remaining_secs <= self.warning_threshold_secs {
                    LockStatus::Warning { remaining_secs }
                } else {
                    LockStatus::Unlocked { remaining_secs }
                }
            }
        }
    }

    /// The live capability, re-checked against the clock.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotUnlocked`] when locked or idle past the timeout;
    /// [`VaultError::SessionExpired`] when the capability's own expiry has
    /// passed (the session is locked as a side effect).
    pub fn capability(&self) -> Result<Arc<Capability>, VaultError> {
        let now = self.clock.now_secs();
        let mut state = self.state();
        if !self.expire_if_idle(&mut state, now) {
            return Err(VaultError::NotUnlocked);
        }
        let Some(session) = state.session.as_ref() else {
            return Err(VaultError::NotUnlocked);
        };
        if session.expires_at.is_some_and(|at| now >= at) {
            self.clear(&mut state);
            tracing::info!("session capability expired");
            return Err(VaultError::SessionExpired);
        }
        Ok(Arc::clone(&session.capability))
    }

    /// Fail unless a live session exists.
    ///
    /// # Errors
    ///
    /// Same as [`capability`](Self::capability).
    pub fn ensure_unlocked(&self) -> Result<(), VaultError> {
        self.capability().map(|_| ())
    }

    /// Swap the capability of the live session, keeping its timings.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotUnlocked`] if no session is live.
    pub fn replace_capability(&self, capability: Capability) -> Result<(), VaultError> {
        let now = self.clock.now_secs();
        let mut state = self.state();
        if !self.expire_if_idle(&mut state, now) {
            return Err(VaultError::NotUnlocked);
        }
        let session = state.session.as_mut().ok_or(VaultError::NotUnlocked)?;
        session.expires_at = capability.expires_at();
        session.capability = Arc::new(capability);
        tracing::info!("session capability replaced");
        Ok(())
    }

    /// Change the inactivity timeout. Remaining time is recomputed from the
    /// existing `last_activity_at`; if that is already spent, the session
    /// locks immediately.
    pub fn set_timeout(&self, minutes: u32) -> u64 {
        self.timeout_secs
            .store(minutes_to_secs(minutes), Ordering::SeqCst);
        tracing::info!(minutes, "inactivity timeout updated");
        self.time_remaining()
    }

    // ── Queries ────────────────────────────────────────────────────

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state().phase()
    }

    /// Whether a live session exists right now.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        !matches!(self.tick(), LockStatus::Locked)
    }

    /// Seconds until auto-lock; zero when locked.
    #[must_use]
    pub fn time_remaining(&self) -> u64 {
        match self.tick() {
            LockStatus::Locked => 0,
            LockStatus::Unlocked { remaining_secs } | LockStatus::Warning { remaining_secs } => {
                remaining_secs
            }
        }
    }

    /// Same as [`tick`](Self::tick); named for status indicators.
    #[must_use]
    pub fn lock_status(&self) -> LockStatus {
        self.tick()
    }

    /// Timing snapshot of the live session.
    #[must_use]
    pub fn info(&self) -> Option<SessionInfo> {
        self.state().session.as_ref().map(Session::info)
    }

    /// Whether the capability expires within `grace_secs`.
    #[must_use]
    pub fn near_expiry(&self, grace_secs: u64) -> bool {
        let now = self.clock.now_secs();
        self.state()
            .session
            .as_ref()
            .and_then(|s| s.expires_at)
            .is_some_and(|at| at.saturating_sub(now) <= grace_secs)
    }

    /// Watch phase changes (unlocks, locks, auto-locks).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    // ── Auto-lock task ─────────────────────────────────────────────

    /// Start the background ticker that locks the session once the
    /// inactivity timeout elapses. Replaces any running ticker.
    ///
    /// Requires a Tokio runtime; without one the ticker is skipped and the
    /// timeout is still enforced lazily on every call.
    pub fn start_auto_lock(self: &Arc<Self>) {
        self.stop_auto_lock();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; auto-lock ticker not started");
            return;
        };

        let cancel = Arc::new(AtomicBool::new(false));
        if let Ok(mut ticker) = self.ticker.lock() {
            *ticker = Some(Arc::clone(&cancel));
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if manager.tick() == LockStatus::Locked {
                    break;
                }
            }
        });
    }

    fn stop_auto_lock(&self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(cancel) = ticker.take() {
                cancel.store(true, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_auto_lock();
    }
}

fn minutes_to_secs(minutes: u32) -> u64 {
    u64::from(minutes).saturating_mul(60)
}
