//! Session lifecycle state machine.
//!
//! Pure and deterministic: every input is a method taking the current time
//! as a parameter and returning the [`Effect`]s the runtime must carry out.
//! Phase changes go through [`SessionMachine::transition`], which emits the
//! exit effects of the phase being left, so every timer a phase starts on
//! entry is stopped on exit.
//!
//! ```text
//! Idle ──launch──▶ Launching ──pending/provisioning──▶ Provisioning ──ready──▶ Ready
//!                      │  └──────────────ready/active──────────────────────────▲ │
//!                      └──fail──▶ Error ◀──error/terminated/timeout──┘          │
//!                                                    Terminated ◀──heartbeat/expiry
//!                                                    Idle ◀──user terminate ok
//! ```
//!
//! Responses are tagged with the session id (or launch generation) they
//! belong to; a response whose tag no longer matches is dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ErrorKind, LabError};
use crate::idle::{HeartbeatVerdict, IdleMonitor, IdleSignal};
use crate::types::{
    ActivityKind, IdleLevel, PersistedViewState, PollAttempt, Session, SessionStatus,
    TerminationReason, TimeEstimate,
};
use crate::wire::{HeartbeatRequest, HeartbeatResponse, SessionSnapshot};

// ─── Phases, timers, effects ──────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Launching,
    Provisioning,
    Ready,
    Error,
    Terminated,
}

impl Phase {
    /// Phases in which a new launch is refused.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Launching | Self::Provisioning | Self::Ready)
    }
}

/// Periodic timers owned by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Poll,
    Heartbeat,
    IdleCheck,
    Countdown,
}

impl TimerKind {
    pub const ALL: [Self; 4] = [Self::Poll, Self::Heartbeat, Self::IdleCheck, Self::Countdown];
}

/// Notification for the embedding UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Launching,
    Progress {
        percent: u8,
        message: String,
        estimate: Option<TimeEstimate>,
    },
    Ready {
        url: String,
    },
    IdleWarning {
        level: IdleLevel,
        seconds_left: u64,
    },
    IdleCleared,
    FocusModeEnabled,
    Countdown {
        seconds_left: u64,
    },
    QuotaLow {
        minutes_remaining: u64,
    },
    SplitViewRestored {
        url: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Terminated {
        reason: TerminationReason,
    },
}

/// Work the runtime must perform after an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Issue the create call; tag the result with `generation`.
    CreateSession { generation: u64 },
    /// Start the poll loop for `session_id` (attempt counter starts at zero).
    StartPolling { session_id: String },
    /// Start the heartbeat timer; its first tick is immediate.
    StartHeartbeat { session_id: String },
    StartIdleCheck,
    StartCountdown,
    StopTimer(TimerKind),
    SendHeartbeat {
        session_id: String,
        request: HeartbeatRequest,
    },
    DeleteSession { session_id: String },
    SaveView(PersistedViewState),
    ClearView,
    Emit(LifecycleEvent),
}

/// Outcome of the one-shot remote lookup done on load.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteLookup {
    Found(SessionSnapshot),
    NotFound,
    /// The lookup itself failed; nothing is known about the remote side.
    Unavailable,
}

// ─── Machine ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionMachine {
    phase: Phase,
    session: Session,
    idle: IdleMonitor,
    generation: u64,
    terminating: bool,
    split_view: bool,
    strict_expiry: bool,
    last_error: Option<LabError>,
}

impl SessionMachine {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_idle(IdleMonitor::new(now))
    }

    pub fn with_idle(idle: IdleMonitor) -> Self {
        let session = Session {
            idle_thresholds: idle.thresholds(),
            ..Session::placeholder()
        };
        Self {
            phase: Phase::Idle,
            session,
            idle,
            generation: 0,
            terminating: false,
            split_view: false,
            strict_expiry: false,
            last_error: None,
        }
    }

    /// Treat local expiry as display-only and wait for the server to confirm.
    pub fn with_strict_expiry(mut self, strict: bool) -> Self {
        self.strict_expiry = strict;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn idle(&self) -> &IdleMonitor {
        &self.idle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub fn split_view(&self) -> bool {
        self.split_view
    }

    pub fn last_error(&self) -> Option<&LabError> {
        self.last_error.as_ref()
    }

    pub fn can_launch(&self) -> bool {
        !self.phase.is_busy()
    }

    // ── Transition plumbing ──────────────────────────────────────

    /// Move to `next`, returning the exit effects of the current phase.
    fn transition(&mut self, next: Phase) -> Vec<Effect> {
        let exit = match self.phase {
            Phase::Provisioning => vec![Effect::StopTimer(TimerKind::Poll)],
            Phase::Ready => vec![
                Effect::StopTimer(TimerKind::Heartbeat),
                Effect::StopTimer(TimerKind::IdleCheck),
                Effect::StopTimer(TimerKind::Countdown),
            ],
            Phase::Idle | Phase::Launching | Phase::Error | Phase::Terminated => Vec::new(),
        };
        self.phase = next;
        exit
    }

    /// Drop everything session-specific, keeping cached idle thresholds.
    fn reset_session(&mut self, now: DateTime<Utc>) {
        self.session = Session {
            idle_thresholds: self.idle.thresholds(),
            ..Session::placeholder()
        };
        self.terminating = false;
        self.idle.reset(now);
    }

    fn fail(&mut self, err: LabError, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = self.transition(Phase::Error);
        self.reset_session(now);
        effects.push(Effect::Emit(LifecycleEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }));
        self.last_error = Some(err);
        effects
    }

    fn end_session(
        &mut self,
        reason: TerminationReason,
        next: Phase,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let mut effects = self.transition(next);
        self.reset_session(now);
        self.split_view = false;
        effects.push(Effect::ClearView);
        effects.push(Effect::Emit(LifecycleEvent::Terminated { reason }));
        effects
    }

    fn enter_provisioning(&mut self, session_id: String, status: SessionStatus) -> Vec<Effect> {
        let mut effects = self.transition(Phase::Provisioning);
        self.session.session_id = Some(session_id.clone());
        self.session.status = status;
        effects.push(Effect::StartPolling { session_id });
        effects
    }

    /// Adopt a usable snapshot. Fails when no connection URL can be resolved.
    fn enter_ready(&mut self, snap: &SessionSnapshot, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(url) = snap.connection_url() else {
            return self.fail(
                LabError::SessionFailed(
                    "session is ready but no connection URL is available".to_owned(),
                ),
                now,
            );
        };
        let Some(session_id) = snap.session_id.clone().or_else(|| self.session.session_id.clone())
        else {
            return self.fail(LabError::malformed("ready session without an id"), now);
        };

        let mut effects = self.transition(Phase::Ready);
        self.session.session_id = Some(session_id.clone());
        self.session.status = snap.status;
        self.session.connection_url = Some(url.clone());
        self.session.expires_at = snap.expires_at;
        self.idle.reset(now);
        self.last_error = None;

        effects.push(Effect::StartHeartbeat { session_id });
        effects.push(Effect::StartIdleCheck);
        if self.session.expires_at.is_some() {
            effects.push(Effect::StartCountdown);
        }
        effects.push(Effect::Emit(LifecycleEvent::Ready { url }));
        effects
    }

    fn idle_effects(signal: Option<IdleSignal>) -> Vec<Effect> {
        match signal {
            Some(IdleSignal::Show(w)) => vec![Effect::Emit(LifecycleEvent::IdleWarning {
                level: w.level,
                seconds_left: w.seconds_left,
            })],
            Some(IdleSignal::Cleared) => vec![Effect::Emit(LifecycleEvent::IdleCleared)],
            None => Vec::new(),
        }
    }

    fn is_current(&self, session_id: &str) -> bool {
        self.session.matches(session_id)
    }

    // ── Launch ───────────────────────────────────────────────────

    /// Launch refused before any network call (quota exhausted).
    pub fn launch_blocked(&mut self, err: LabError) -> Vec<Effect> {
        if self.phase.is_busy() {
            return Vec::new();
        }
        let effects = vec![Effect::Emit(LifecycleEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        })];
        self.last_error = Some(err);
        effects
    }

    /// Enter `Launching`. A no-op while a session is launching or live.
    pub fn begin_launch(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase.is_busy() {
            return Vec::new();
        }
        let mut effects = self.transition(Phase::Launching);
        self.reset_session(now);
        self.last_error = None;
        self.generation = self.generation.wrapping_add(1);
        effects.push(Effect::Emit(LifecycleEvent::Launching));
        effects.push(Effect::CreateSession {
            generation: self.generation,
        });
        effects
    }

    /// Result of the create call issued for `generation`.
    pub fn on_created(
        &mut self,
        generation: u64,
        result: Result<SessionSnapshot, LabError>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.phase != Phase::Launching || generation != self.generation {
            return Vec::new();
        }
        let snap = match result {
            Ok(snap) => snap,
            Err(err) => return self.fail(err, now),
        };
        let Some(session_id) = snap.session_id.clone() else {
            return self.fail(
                LabError::CreateFailed("invalid response from API: missing session_id".to_owned()),
                now,
            );
        };

        if snap.status.is_usable() {
            self.session.session_id = Some(session_id);
            self.enter_ready(&snap, now)
        } else if snap.status.is_failed() {
            let msg = snap
                .error
                .unwrap_or_else(|| "session failed to start".to_owned());
            self.fail(LabError::SessionFailed(msg), now)
        } else {
            self.enter_provisioning(session_id, snap.status)
        }
    }

    // ── Polling ──────────────────────────────────────────────────

    pub fn on_poll_progress(&mut self, session_id: &str, attempt: &PollAttempt) -> Vec<Effect> {
        if self.phase != Phase::Provisioning || !self.is_current(session_id) {
            return Vec::new();
        }
        vec![Effect::Emit(LifecycleEvent::Progress {
            percent: attempt.progress_percent,
            message: attempt.stage_message.clone(),
            estimate: attempt.time_estimate,
        })]
    }

    /// Status left `{pending, provisioning}`.
    pub fn on_poll_terminal(
        &mut self,
        session_id: &str,
        snap: &SessionSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.phase != Phase::Provisioning || !self.is_current(session_id) {
            return Vec::new();
        }
        if snap.status.is_usable() {
            self.enter_ready(snap, now)
        } else {
            let msg = snap
                .error
                .clone()
                .unwrap_or_else(|| "session failed to start".to_owned());
            self.fail(LabError::SessionFailed(msg), now)
        }
    }

    pub fn on_poll_timeout(&mut self, session_id: &str, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase != Phase::Provisioning || !self.is_current(session_id) {
            return Vec::new();
        }
        self.fail(LabError::PollTimeout, now)
    }

    // ── Heartbeat & idle ─────────────────────────────────────────

    /// Heartbeat timer fired (or an immediate heartbeat is wanted).
    pub fn heartbeat_due(&self) -> Vec<Effect> {
        match (&self.session.session_id, self.phase) {
            (Some(id), Phase::Ready) => vec![Effect::SendHeartbeat {
                session_id: id.clone(),
                request: HeartbeatRequest::new(self.idle.tab_visible(), self.idle.focus_mode()),
            }],
            _ => Vec::new(),
        }
    }

    /// Heartbeat response. Failures are not fatal and change nothing.
    pub fn on_heartbeat(
        &mut self,
        session_id: &str,
        result: Result<HeartbeatResponse, LabError>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.phase != Phase::Ready || !self.is_current(session_id) {
            return Vec::new();
        }
        let Ok(resp) = result else {
            return Vec::new();
        };
        match self.idle.apply_heartbeat(&resp, now) {
            HeartbeatVerdict::Terminated => {
                self.end_session(TerminationReason::IdleTimeout, Phase::Terminated, now)
            }
            HeartbeatVerdict::Alive(signal) => {
                if resp.status.is_usable() {
                    self.session.status = resp.status;
                }
                self.session.focus_mode = self.idle.focus_mode();
                self.session.idle_thresholds = self.idle.thresholds();
                Self::idle_effects(signal)
            }
        }
    }

    pub fn on_idle_check(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase != Phase::Ready {
            return Vec::new();
        }
        Self::idle_effects(self.idle.check(now))
    }

    /// Activity is recorded in every phase but never produces effects.
    pub fn record_activity(&mut self, kind: ActivityKind, now: DateTime<Utc>) {
        self.idle.record_activity(kind, now);
    }

    /// "I'm active": dismiss the warning and heartbeat immediately.
    pub fn keep_active(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase != Phase::Ready {
            return Vec::new();
        }
        let mut effects = Self::idle_effects(self.idle.keep_active(now));
        effects.extend(self.heartbeat_due());
        effects
    }

    /// Opt out of idle termination; the next heartbeat tells the server.
    pub fn enable_focus_mode(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Ready {
            return Vec::new();
        }
        let mut effects = Self::idle_effects(self.idle.enable_focus_mode());
        self.session.focus_mode = true;
        effects.push(Effect::Emit(LifecycleEvent::FocusModeEnabled));
        effects.extend(self.heartbeat_due());
        effects
    }

    // ── Expiry countdown ─────────────────────────────────────────

    pub fn on_countdown_tick(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.phase != Phase::Ready {
            return Vec::new();
        }
        let Some(expires_at) = self.session.expires_at else {
            return vec![Effect::StopTimer(TimerKind::Countdown)];
        };
        let remaining = expires_at.signed_duration_since(now).num_seconds();
        if remaining > 0 {
            return vec![Effect::Emit(LifecycleEvent::Countdown {
                seconds_left: remaining.unsigned_abs(),
            })];
        }
        if self.strict_expiry {
            let mut effects = vec![
                Effect::StopTimer(TimerKind::Countdown),
                Effect::Emit(LifecycleEvent::Countdown { seconds_left: 0 }),
            ];
            effects.extend(self.heartbeat_due());
            return effects;
        }
        self.end_session(TerminationReason::Expired, Phase::Terminated, now)
    }

    // ── Termination ──────────────────────────────────────────────

    /// User confirmed "end session". Issues the delete call once.
    pub fn request_terminate(&mut self) -> Vec<Effect> {
        if self.terminating || !matches!(self.phase, Phase::Ready | Phase::Provisioning) {
            return Vec::new();
        }
        let Some(session_id) = self.session.session_id.clone() else {
            return Vec::new();
        };
        self.terminating = true;
        vec![Effect::DeleteSession { session_id }]
    }

    /// Delete call finished. On failure the session is left untouched.
    pub fn on_terminate_result(
        &mut self,
        session_id: &str,
        result: Result<(), LabError>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if !self.terminating || !self.is_current(session_id) {
            return Vec::new();
        }
        self.terminating = false;
        match result {
            Ok(()) => self.end_session(TerminationReason::UserRequested, Phase::Idle, now),
            Err(err) => {
                let err = match err {
                    LabError::TerminateFailed(_) => err,
                    other => LabError::TerminateFailed(other.to_string()),
                };
                let effects = vec![Effect::Emit(LifecycleEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                })];
                self.last_error = Some(err);
                effects
            }
        }
    }

    // ── Split view ───────────────────────────────────────────────

    pub fn open_split_view(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Ready {
            return Vec::new();
        }
        match PersistedViewState::from_session(&self.session) {
            Some(view) => {
                self.split_view = true;
                vec![Effect::SaveView(view)]
            }
            None => Vec::new(),
        }
    }

    pub fn close_split_view(&mut self) -> Vec<Effect> {
        self.split_view = false;
        vec![Effect::ClearView]
    }

    // ── Restore on load ──────────────────────────────────────────

    /// Reconcile with the remote session (queried once) and any persisted view.
    ///
    /// The remote answer is authoritative. A persisted view is only reopened
    /// when the remote session it names is confirmed usable.
    pub fn restore(
        &mut self,
        remote: RemoteLookup,
        persisted: Option<PersistedViewState>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        let mut effects = Vec::new();
        let persisted = match persisted {
            Some(view) if view.is_expired(now) => {
                effects.push(Effect::ClearView);
                None
            }
            other => other,
        };

        let snap = match remote {
            RemoteLookup::Found(snap) => snap,
            RemoteLookup::NotFound => {
                if persisted.is_some() {
                    effects.push(Effect::ClearView);
                }
                return effects;
            }
            // Unconfirmed: keep the entry for the next load, adopt nothing.
            RemoteLookup::Unavailable => return effects,
        };
        let Some(session_id) = snap.session_id.clone() else {
            return effects;
        };
        let view_matches = persisted
            .as_ref()
            .is_some_and(|view| view.session_id == session_id);
        if persisted.is_some() && !view_matches {
            effects.push(Effect::ClearView);
        }

        if snap.status.is_usable() && snap.connection_url().is_some() {
            effects.extend(self.enter_ready(&snap, now));
            if view_matches {
                if let Some(view) = PersistedViewState::from_session(&self.session) {
                    self.split_view = true;
                    effects.push(Effect::Emit(LifecycleEvent::SplitViewRestored {
                        url: view.connection_url.clone(),
                    }));
                    effects.push(Effect::SaveView(view));
                }
            }
        } else if snap.status.is_provisioning() {
            if view_matches {
                effects.push(Effect::ClearView);
            }
            effects.push(Effect::Emit(LifecycleEvent::Launching));
            effects.extend(self.enter_provisioning(session_id, snap.status));
        } else if view_matches {
            effects.push(Effect::ClearView);
        }
        effects
    }

    /// Low remaining quota; launch still proceeds.
    pub fn quota_low(&self, minutes_remaining: u64) -> Vec<Effect> {
        vec![Effect::Emit(LifecycleEvent::QuotaLow { minutes_remaining })]
    }
}

// ─── Tests ────────────────────────────────────────────────────────
