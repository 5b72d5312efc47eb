//! Periodic tickers owned by the lifecycle.
//!
//! Each ticker is a tokio task posting a message per tick. [`Timers`] keeps
//! at most one handle per [`TimerKind`]; starting a kind replaces (and
//! aborts) the previous ticker, and dropping the registry aborts them all.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use labctl_core::machine::TimerKind;

/// Spawn a ticker that sends `make()` every `period`.
///
/// With `immediate` the first tick fires at once; otherwise after one period.
/// The task ends when the receiver is gone.
pub fn spawn_ticker<M, F>(
    period: Duration,
    immediate: bool,
    tx: mpsc::Sender<M>,
    make: F,
) -> JoinHandle<()>
where
    M: Send + 'static,
    F: Fn() -> M + Send + 'static,
{
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    })
}

#[derive(Debug, Default)]
pub struct Timers {
    handles: BTreeMap<TimerKind, JoinHandle<()>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(previous) = self.handles.insert(kind, handle) {
            previous.abort();
        }
    }

    /// Idempotent.
    pub fn stop(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    pub fn stop_all(&mut self) {
        for (_, handle) in std::mem::take(&mut self.handles) {
            handle.abort();
        }
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.handles.get(&kind).is_some_and(|h| !h.is_finished())
    }

    pub fn running(&self) -> Vec<TimerKind> {
        self.handles
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(k, _)| *k)
            .collect()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn immediate_ticker_fires_at_once_then_periodically() {
        let (tx, mut rx) = mpsc::channel(8);
        let start = Instant::now();
        let _h = spawn_ticker(Duration::from_secs(30), true, tx, || ());
        rx.recv().await.expect("first tick");
        assert_eq!(start.elapsed(), Duration::ZERO);
        rx.recv().await.expect("second tick");
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_ticker_waits_one_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let start = Instant::now();
        let _h = spawn_ticker(Duration::from_secs(10), false, tx, || ());
        rx.recv().await.expect("tick");
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_and_is_idempotent() {
        let (tx, mut rx) = mpsc::channel::<()>(8);
        let mut timers = Timers::new();
        timers.start(TimerKind::Heartbeat, spawn_ticker(Duration::from_secs(1), false, tx, || ()));
        assert!(timers.is_running(TimerKind::Heartbeat));
        timers.stop(TimerKind::Heartbeat);
        timers.stop(TimerKind::Heartbeat);
        assert!(timers.running().is_empty());
        // The aborted task dropped its sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_ticker() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = Timers::new();
        timers.start(TimerKind::Countdown, spawn_ticker(Duration::from_secs(1), false, tx.clone(), || 1));
        timers.start(TimerKind::Countdown, spawn_ticker(Duration::from_secs(1), false, tx, || 2));
        assert_eq!(timers.running(), vec![TimerKind::Countdown]);
        assert_eq!(rx.recv().await, Some(2));
    }
}
