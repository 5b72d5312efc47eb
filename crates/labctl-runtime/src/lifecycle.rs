//! Session lifecycle driver.
//!
//! A single tokio task owns the [`SessionMachine`] and processes one message
//! at a time: user commands from [`LifecycleHandle`], and internal results
//! (create/heartbeat/terminate responses, poll events, timer ticks) posted
//! by the tasks it spawned. Every machine input returns effects, which this
//! module carries out. Events go out on a broadcast channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use labctl_core::error::LabError;
use labctl_core::idle::IdleMonitor;
use labctl_core::machine::{Effect, LifecycleEvent, Phase, RemoteLookup, SessionMachine, TimerKind};
use labctl_core::polling::PollPolicy;
use labctl_core::types::{ActivityKind, IdleLevel, Session};
use labctl_core::wire::{
    CreateSessionRequest, HeartbeatResponse, SessionSnapshot, TerminateRequest,
};

use crate::api::SessionApi;
use crate::clock::LabClock;
use crate::config::LabConfig;
use crate::polling::{PollEvent, PollingController};
use crate::quota::{QuotaDecision, QuotaGate};
use crate::store::ViewStore;
use crate::timers::{Timers, spawn_ticker};

const COMMAND_BUFFER: usize = 32;
const INTERNAL_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

// ─── Messages ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Command {
    Launch,
    /// Reconcile with the remote session once (page load); replies with the
    /// resulting phase.
    Restore(Option<oneshot::Sender<Phase>>),
    Activity(ActivityKind),
    KeepActive,
    EnableFocusMode,
    Terminate,
    OpenSplitView,
    CloseSplitView,
    Status(oneshot::Sender<StatusReport>),
    Shutdown,
}

#[derive(Debug)]
enum Internal {
    QuotaChecked(QuotaDecision),
    Created {
        generation: u64,
        result: Result<SessionSnapshot, LabError>,
    },
    Poll(PollEvent),
    HeartbeatDue,
    IdleCheckDue,
    CountdownDue,
    Heartbeat {
        session_id: String,
        result: Result<HeartbeatResponse, LabError>,
    },
    Terminated {
        session_id: String,
        result: Result<(), LabError>,
    },
    Restored(RemoteLookup),
}

/// Point-in-time view of the lifecycle, for status output and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub phase: Phase,
    pub session: Session,
    pub split_view: bool,
    pub terminating: bool,
    pub idle_warning: Option<(IdleLevel, u64)>,
    pub timers: Vec<TimerKind>,
}

// ─── Handle ───────────────────────────────────────────────────────

/// Cloneable front door to a running lifecycle task.
#[derive(Clone)]
pub struct LifecycleHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Send a command; `false` once the lifecycle task has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn launch(&self) -> bool {
        self.send(Command::Launch).await
    }

    /// Reconcile with the remote session; `None` once the task has stopped.
    pub async fn restore(&self) -> Option<Phase> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Restore(Some(tx))).await {
            return None;
        }
        rx.await.ok()
    }

    pub async fn activity(&self, kind: ActivityKind) -> bool {
        self.send(Command::Activity(kind)).await
    }

    pub async fn keep_active(&self) -> bool {
        self.send(Command::KeepActive).await
    }

    pub async fn enable_focus_mode(&self) -> bool {
        self.send(Command::EnableFocusMode).await
    }

    pub async fn terminate(&self) -> bool {
        self.send(Command::Terminate).await
    }

    pub async fn open_split_view(&self) -> bool {
        self.send(Command::OpenSplitView).await
    }

    pub async fn close_split_view(&self) -> bool {
        self.send(Command::CloseSplitView).await
    }

    pub async fn status(&self) -> Option<StatusReport> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Status(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

// ─── Driver ───────────────────────────────────────────────────────

/// Collaborators and settings for one lifecycle.
pub struct LifecycleDeps {
    pub api: Arc<dyn SessionApi>,
    pub quota: Arc<dyn QuotaGate>,
    pub store: Arc<ViewStore>,
    pub clock: LabClock,
}

pub struct SessionLifecycle {
    machine: SessionMachine,
    config: LabConfig,
    api: Arc<dyn SessionApi>,
    quota: Arc<dyn QuotaGate>,
    store: Arc<ViewStore>,
    clock: LabClock,
    timers: Timers,
    poller: PollingController<Internal>,
    internal: mpsc::Sender<Internal>,
    events: broadcast::Sender<LifecycleEvent>,
    quota_pending: bool,
    restore_reply: Option<oneshot::Sender<Phase>>,
}

impl SessionLifecycle {
    /// Spawn the lifecycle task.
    pub fn spawn(config: LabConfig, deps: LifecycleDeps) -> (LifecycleHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let now = deps.clock.now();
        let machine =
            SessionMachine::with_idle(IdleMonitor::with_thresholds(now, config.idle_thresholds()))
                .with_strict_expiry(config.strict_expiry);
        let policy: PollPolicy = config.poll_policy();
        let poller = PollingController::new(
            Arc::clone(&deps.api),
            policy,
            internal_tx.clone(),
            Internal::Poll,
        );

        let lifecycle = Self {
            machine,
            config,
            api: deps.api,
            quota: deps.quota,
            store: deps.store,
            clock: deps.clock,
            timers: Timers::new(),
            poller,
            internal: internal_tx,
            events: events.clone(),
            quota_pending: false,
            restore_reply: None,
        };
        let handle = LifecycleHandle {
            commands: command_tx,
            events,
        };
        let task = tokio::spawn(lifecycle.run(command_rx, internal_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                Some(msg) = internal.recv() => self.on_internal(msg),
            }
        }
        self.poller.stop();
        self.timers.stop_all();
        tracing::debug!("session lifecycle stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        let now = self.clock.now();
        let effects = match cmd {
            Command::Launch => {
                self.request_launch();
                Vec::new()
            }
            Command::Restore(reply) => {
                self.request_restore(reply);
                Vec::new()
            }
            Command::Activity(kind) => {
                self.machine.record_activity(kind, now);
                Vec::new()
            }
            Command::KeepActive => self.machine.keep_active(now),
            Command::EnableFocusMode => self.machine.enable_focus_mode(),
            Command::Terminate => {
                let effects = self.machine.request_terminate();
                if effects.is_empty() {
                    tracing::info!("nothing to terminate in phase {:?}", self.machine.phase());
                }
                effects
            }
            Command::OpenSplitView => self.machine.open_split_view(),
            Command::CloseSplitView => self.machine.close_split_view(),
            Command::Status(reply) => {
                let _ = reply.send(self.report());
                Vec::new()
            }
            Command::Shutdown => Vec::new(),
        };
        self.apply(effects);
    }

    fn on_internal(&mut self, msg: Internal) {
        let now = self.clock.now();
        let effects = match msg {
            Internal::QuotaChecked(decision) => {
                self.quota_pending = false;
                match decision {
                    QuotaDecision::Exhausted(info) => {
                        tracing::warn!(
                            "launch blocked: {} of {} minutes used",
                            info.consumed_minutes,
                            info.quota_minutes
                        );
                        self.machine.launch_blocked(LabError::QuotaExceeded(info))
                    }
                    QuotaDecision::Low { minutes_remaining } => {
                        let mut effects = self.machine.quota_low(minutes_remaining);
                        effects.extend(self.machine.begin_launch(now));
                        effects
                    }
                    QuotaDecision::Allow => self.machine.begin_launch(now),
                }
            }
            Internal::Created { generation, result } => {
                if let Ok(snap) = &result {
                    if snap.reused {
                        tracing::info!(
                            session_id = snap.session_id.as_deref().unwrap_or_default(),
                            "reusing existing session"
                        );
                    }
                }
                self.machine.on_created(generation, result, now)
            }
            Internal::Poll(PollEvent::Progress {
                session_id,
                attempt,
            }) => self.machine.on_poll_progress(&session_id, &attempt),
            Internal::Poll(PollEvent::Terminal {
                session_id,
                snapshot,
            }) => self.machine.on_poll_terminal(&session_id, &snapshot, now),
            Internal::Poll(PollEvent::TimedOut { session_id }) => {
                self.machine.on_poll_timeout(&session_id, now)
            }
            Internal::HeartbeatDue => self.machine.heartbeat_due(),
            Internal::IdleCheckDue => self.machine.on_idle_check(now),
            Internal::CountdownDue => self.machine.on_countdown_tick(now),
            Internal::Heartbeat { session_id, result } => {
                if let Err(e) = &result {
                    tracing::warn!(%session_id, "{e}");
                }
                self.machine.on_heartbeat(&session_id, result, now)
            }
            Internal::Terminated { session_id, result } => {
                if let Err(e) = &result {
                    tracing::warn!(%session_id, "terminate failed: {e}");
                }
                self.machine.on_terminate_result(&session_id, result, now)
            }
            Internal::Restored(remote) => {
                let persisted = self.store.load(now);
                let effects = self.machine.restore(remote, persisted, now);
                self.apply(effects);
                if let Some(reply) = self.restore_reply.take() {
                    let _ = reply.send(self.machine.phase());
                }
                return;
            }
        };
        self.apply(effects);
    }

    fn request_launch(&mut self) {
        if !self.machine.can_launch() || self.quota_pending {
            tracing::info!(
                "launch rejected: session already {:?}",
                self.machine.phase()
            );
            return;
        }
        self.quota_pending = true;
        let quota = Arc::clone(&self.quota);
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let decision = quota.check().await;
            let _ = tx.send(Internal::QuotaChecked(decision)).await;
        });
    }

    fn request_restore(&mut self, reply: Option<oneshot::Sender<Phase>>) {
        if self.machine.phase() != Phase::Idle || self.restore_reply.is_some() {
            tracing::debug!("restore skipped in phase {:?}", self.machine.phase());
            if let Some(reply) = reply {
                let _ = reply.send(self.machine.phase());
            }
            return;
        }
        self.restore_reply = reply;
        let api = Arc::clone(&self.api);
        let student_id = self.config.student_id.clone();
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let remote = match api.active_session(&student_id).await {
                Ok(Some(snap)) => RemoteLookup::Found(snap),
                Ok(None) => RemoteLookup::NotFound,
                Err(e) => {
                    tracing::warn!("could not look up existing session: {e}");
                    RemoteLookup::Unavailable
                }
            };
            let _ = tx.send(Internal::Restored(remote)).await;
        });
    }

    // ── Effects ──────────────────────────────────────────────────

    fn apply(&mut self, effects: Vec<Effect>) {
        let before = self.machine.phase();
        for effect in effects {
            self.apply_one(effect);
        }
        let after = self.machine.phase();
        if before != after {
            tracing::info!("session phase {before:?} -> {after:?}");
        }
    }

    fn apply_one(&mut self, effect: Effect) {
        match effect {
            Effect::CreateSession { generation } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal.clone();
                let req = self.create_request();
                tokio::spawn(async move {
                    let result = api.create_session(&req).await;
                    let _ = tx.send(Internal::Created { generation, result }).await;
                });
            }
            Effect::StartPolling { session_id } => {
                tracing::info!(%session_id, "polling provisioning status");
                self.poller.start(session_id);
            }
            Effect::StartHeartbeat { .. } => {
                let handle = spawn_ticker(
                    self.config.heartbeat_interval(),
                    true,
                    self.internal.clone(),
                    || Internal::HeartbeatDue,
                );
                self.timers.start(TimerKind::Heartbeat, handle);
            }
            Effect::StartIdleCheck => {
                let handle = spawn_ticker(
                    self.config.idle_check_interval(),
                    false,
                    self.internal.clone(),
                    || Internal::IdleCheckDue,
                );
                self.timers.start(TimerKind::IdleCheck, handle);
            }
            Effect::StartCountdown => {
                let handle = spawn_ticker(
                    self.config.countdown_interval(),
                    true,
                    self.internal.clone(),
                    || Internal::CountdownDue,
                );
                self.timers.start(TimerKind::Countdown, handle);
            }
            Effect::StopTimer(TimerKind::Poll) => self.poller.stop(),
            Effect::StopTimer(kind) => self.timers.stop(kind),
            Effect::SendHeartbeat {
                session_id,
                request,
            } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal.clone();
                tokio::spawn(async move {
                    let result = api.heartbeat(&session_id, &request).await;
                    let _ = tx.send(Internal::Heartbeat { session_id, result }).await;
                });
            }
            Effect::DeleteSession { session_id } => {
                tracing::info!(%session_id, "ending session");
                let api = Arc::clone(&self.api);
                let tx = self.internal.clone();
                tokio::spawn(async move {
                    let result = api
                        .terminate(&session_id, &TerminateRequest::user_requested())
                        .await;
                    let _ = tx.send(Internal::Terminated { session_id, result }).await;
                });
            }
            Effect::SaveView(view) => {
                if let Err(e) = self.store.save(&view) {
                    tracing::warn!("failed to persist view state: {e}");
                }
            }
            Effect::ClearView => self.store.clear(),
            Effect::Emit(event) => {
                tracing::debug!(?event, "lifecycle event");
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }
    }

    fn create_request(&self) -> CreateSessionRequest {
        let metadata = self
            .config
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        CreateSessionRequest {
            student_id: self.config.student_id.clone(),
            student_name: self.config.student_name.clone(),
            metadata: serde_json::Value::Object(metadata),
        }
    }

    fn report(&self) -> StatusReport {
        let mut timers = self.timers.running();
        if self.poller.is_running() {
            timers.insert(0, TimerKind::Poll);
        }
        StatusReport {
            phase: self.machine.phase(),
            session: self.machine.session().clone(),
            split_view: self.machine.split_view(),
            terminating: self.machine.is_terminating(),
            idle_warning: self
                .machine
                .idle()
                .warning()
                .map(|w| (w.level, w.seconds_left)),
            timers,
        }
    }
}
