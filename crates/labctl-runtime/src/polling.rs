//! Provisioning poll loop.
//!
//! One tokio task per `start()`: a fixed-interval ticker, one status fetch
//! per tick, results posted back to the lifecycle. Fetch failures are logged
//! and retried on the next tick; only the attempt budget ends the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use labctl_core::polling::{PollBudget, PollOutcome, PollPolicy, PollStep, classify};
use labctl_core::types::PollAttempt;
use labctl_core::wire::SessionSnapshot;

use crate::api::SessionApi;

/// Messages the poll task posts back.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress {
        session_id: String,
        attempt: PollAttempt,
    },
    /// Status left provisioning; the task has stopped.
    Terminal {
        session_id: String,
        snapshot: SessionSnapshot,
    },
    /// Budget spent without a terminal status; the task has stopped.
    TimedOut { session_id: String },
}

pub struct PollingController<M> {
    api: Arc<dyn SessionApi>,
    policy: PollPolicy,
    tx: mpsc::Sender<M>,
    wrap: fn(PollEvent) -> M,
    handle: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> PollingController<M> {
    pub fn new(
        api: Arc<dyn SessionApi>,
        policy: PollPolicy,
        tx: mpsc::Sender<M>,
        wrap: fn(PollEvent) -> M,
    ) -> Self {
        Self {
            api,
            policy,
            tx,
            wrap,
            handle: None,
        }
    }

    /// Start polling `session_id` with a fresh attempt budget.
    pub fn start(&mut self, session_id: String) {
        self.stop();
        let api = Arc::clone(&self.api);
        let policy = self.policy;
        let tx = self.tx.clone();
        let wrap = self.wrap;
        self.handle = Some(tokio::spawn(async move {
            run_poll_loop(api, session_id, policy, tx, wrap).await;
        }));
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<M> Drop for PollingController<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_poll_loop<M>(
    api: Arc<dyn SessionApi>,
    session_id: String,
    policy: PollPolicy,
    tx: mpsc::Sender<M>,
    wrap: fn(PollEvent) -> M,
) {
    let mut budget = PollBudget::new(policy.max_attempts);
    let mut ticker = interval(Duration::from_millis(policy.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let attempt = match budget.next_attempt() {
            PollStep::Attempt(n) => n,
            PollStep::Exhausted => {
                tracing::warn!(
                    %session_id,
                    "no terminal status after {} attempts",
                    policy.max_attempts
                );
                let _ = tx.send(wrap(PollEvent::TimedOut { session_id })).await;
                return;
            }
        };

        let snapshot = match api.get_session(&session_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!(%session_id, "status poll {attempt} failed: {e}");
                continue;
            }
        };

        let event = match classify(snapshot, attempt) {
            PollOutcome::Continue(progress) => {
                tracing::debug!(
                    %session_id,
                    "poll {attempt}: {}% {}",
                    progress.progress_percent,
                    progress.stage_message
                );
                PollEvent::Progress {
                    session_id: session_id.clone(),
                    attempt: progress,
                }
            }
            PollOutcome::Terminal(_, snapshot) => {
                tracing::info!(%session_id, "provisioning finished with status {}", snapshot.status);
                let _ = tx
                    .send(wrap(PollEvent::Terminal {
                        session_id,
                        snapshot,
                    }))
                    .await;
                return;
            }
        };
        if tx.send(wrap(event)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use labctl_core::error::LabError;
    use labctl_core::types::SessionStatus;
    use labctl_core::wire::{
        CreateSessionRequest, HeartbeatRequest, HeartbeatResponse, TerminateRequest,
    };
    use tokio::time::Instant;

    /// Status endpoint replaying a script; errors once the script runs out.
    struct Scripted {
        script: Mutex<VecDeque<Result<SessionSnapshot, LabError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<SessionSnapshot, LabError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl SessionApi for Scripted {
        async fn create_session(&self, _: &CreateSessionRequest) -> Result<SessionSnapshot, LabError> {
            unreachable!()
        }

        async fn get_session(&self, _: &str) -> Result<SessionSnapshot, LabError> {
            *self.calls.lock().expect("lock") += 1;
            self.script
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(LabError::TransientPoll("503".into())))
        }

        async fn active_session(&self, _: &str) -> Result<Option<SessionSnapshot>, LabError> {
            unreachable!()
        }

        async fn heartbeat(
            &self,
            _: &str,
            _: &HeartbeatRequest,
        ) -> Result<HeartbeatResponse, LabError> {
            unreachable!()
        }

        async fn terminate(&self, _: &str, _: &TerminateRequest) -> Result<(), LabError> {
            unreachable!()
        }
    }

    fn snap(status: SessionStatus, progress: Option<f64>) -> SessionSnapshot {
        SessionSnapshot {
            progress,
            ..SessionSnapshot::with_status(status)
        }
    }

    fn controller(api: Arc<Scripted>, tx: mpsc::Sender<PollEvent>) -> PollingController<PollEvent> {
        PollingController::new(api, PollPolicy::default(), tx, |e| e)
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_is_immediate_and_terminal_stops() {
        let api = Scripted::new(vec![
            Ok(snap(SessionStatus::Provisioning, Some(40.0))),
            Ok(snap(SessionStatus::Ready, None)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut poller = controller(Arc::clone(&api), tx);
        let start = Instant::now();
        poller.start("s-1".into());

        match rx.recv().await {
            Some(PollEvent::Progress { attempt, .. }) => {
                assert_eq!(attempt.progress_percent, 40);
                assert_eq!(start.elapsed(), Duration::ZERO);
            }
            other => panic!("expected progress, got {other:?}"),
        }
        match rx.recv().await {
            Some(PollEvent::Terminal { snapshot, .. }) => {
                assert_eq!(snapshot.status, SessionStatus::Ready);
                assert_eq!(start.elapsed(), Duration::from_secs(3));
            }
            other => panic!("expected terminal, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.calls(), 2, "no fetch after terminal");
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn two_hundred_failures_then_timeout() {
        let api = Scripted::new(Vec::new());
        let (tx, mut rx) = mpsc::channel(16);
        let mut poller = controller(Arc::clone(&api), tx);
        let start = Instant::now();
        poller.start("s-1".into());

        match rx.recv().await {
            Some(PollEvent::TimedOut { session_id }) => assert_eq!(session_id, "s-1"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(api.calls(), 200);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resets_budget() {
        let api = Scripted::new(Vec::new());
        let (tx, mut rx) = mpsc::channel(16);
        let mut poller = PollingController::new(
            Arc::clone(&api) as Arc<dyn SessionApi>,
            PollPolicy {
                interval_ms: 1000,
                max_attempts: 3,
            },
            tx,
            |e| e,
        );
        poller.start("a".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        poller.start("b".into());
        match rx.recv().await {
            Some(PollEvent::TimedOut { session_id }) => assert_eq!(session_id, "b"),
            other => panic!("expected timeout for b, got {other:?}"),
        }
        assert_eq!(api.calls(), 2 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let api = Scripted::new(Vec::new());
        let (tx, _rx) = mpsc::channel(16);
        let mut poller = controller(api, tx);
        poller.stop();
        poller.start("s-1".into());
        assert!(poller.is_running());
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());
    }
}
