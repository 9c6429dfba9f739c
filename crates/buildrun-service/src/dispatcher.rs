//! Rate-limited, ordered command delivery to one worker.
//!
//! Commands are queued by [`Dispatcher::submit`], which never blocks and may
//! be called from synchronous code (the script interpreter runs on a
//! blocking thread). At most one drain task per dispatcher sends them, in
//! submission order, with at least the configured delay between two sends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use buildrun_rcon::{CommandSink, RconError};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::DispatcherConfig;

/// Failures kept for reporting; later ones are only counted.
const MAX_RECORDED_FAILURES: usize = 100;

/// The dispatcher stopped accepting commands after repeated transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Control channel lost after {0} consecutive failures")]
pub struct Faulted(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn pending(&self) -> u64 {
        self.submitted - self.dispatched - self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub command: String,
    pub error: String,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    draining: bool,
    consecutive_failures: u32,
    faulted: bool,
    stats: DispatchStats,
    failures: Vec<DispatchFailure>,
    last_dispatch: Option<Instant>,
}

impl QueueState {
    fn record_failure(&mut self, command: String, error: String) {
        self.stats.failed += 1;
        if self.failures.len() < MAX_RECORDED_FAILURES {
            self.failures.push(DispatchFailure { command, error });
        }
    }
}

struct Inner {
    sink: Arc<dyn CommandSink>,
    config: DispatcherConfig,
    runtime: Handle,
    state: Mutex<QueueState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn drain(self: Arc<Self>) {
        debug!("Dispatcher drain started");
        loop {
            let (command, wait) = {
                let mut state = self.lock();
                if state.faulted && !state.pending.is_empty() {
                    let dropped: Vec<String> = state.pending.drain(..).collect();
                    warn!(dropped = dropped.len(), "Dropping commands for lost worker");
                    for command in dropped {
                        state.record_failure(command, "worker control channel lost".to_string());
                    }
                }
                let Some(command) = state.pending.pop_front() else {
                    state.draining = false;
                    debug!(stats = ?state.stats, "Dispatcher drained");
                    return;
                };
                let wait = state
                    .last_dispatch
                    .map(|last| (last + self.config.delay).saturating_duration_since(Instant::now()))
                    .unwrap_or_default();
                (command, wait)
            };

            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let sent_at = Instant::now();
            let result = self.sink.send_command(&command).await;

            let mut state = self.lock();
            state.last_dispatch = Some(sent_at);
            match result {
                Ok(_) => {
                    state.stats.dispatched += 1;
                    state.consecutive_failures = 0;
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "Command failed");
                    if counts_against_channel(&e) {
                        state.consecutive_failures += 1;
                        if state.consecutive_failures >= self.config.max_consecutive_failures
                            && !state.faulted
                        {
                            error!(
                                failures = state.consecutive_failures,
                                "Worker control channel lost"
                            );
                            state.faulted = true;
                        }
                    }
                    state.record_failure(command, e.to_string());
                }
            }
        }
    }
}

/// A rejected oversized command says nothing about the channel's health.
fn counts_against_channel(e: &RconError) -> bool {
    !matches!(e, RconError::CommandTooLong { .. })
}

/// Ordered, throttled command queue in front of a [`CommandSink`].
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher whose drain task runs on the current Tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn new(sink: Arc<dyn CommandSink>, config: DispatcherConfig) -> Self {
        Self::with_runtime(sink, config, Handle::current())
    }

    pub fn with_runtime(sink: Arc<dyn CommandSink>, config: DispatcherConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                config,
                runtime,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Queue `command`, starting the drain task if none is running.
    pub fn submit(&self, command: impl Into<String>) -> Result<(), Faulted> {
        let mut state = self.inner.lock();
        if state.faulted {
            return Err(Faulted(state.consecutive_failures));
        }
        state.pending.push_back(command.into());
        state.stats.submitted += 1;
        if !state.draining {
            state.draining = true;
            let inner = self.inner.clone();
            self.inner.runtime.spawn(inner.drain());
        }
        Ok(())
    }

    /// Whether a drain task is currently running.
    pub fn is_draining(&self) -> bool {
        self.inner.lock().draining
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_faulted(&self) -> bool {
        self.inner.lock().faulted
    }

    /// The fault, if the channel has been declared lost.
    pub fn fault(&self) -> Option<Faulted> {
        let state = self.inner.lock();
        state.faulted.then_some(Faulted(state.consecutive_failures))
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.lock().stats
    }

    pub fn failures(&self) -> Vec<DispatchFailure> {
        self.inner.lock().failures.clone()
    }

    pub fn delay(&self) -> Duration {
        self.inner.config.delay
    }

    /// Poll until every submitted command has been sent or dropped.
    ///
    /// Returns `false` if the backlog is still draining after `timeout`.
    pub async fn wait_drained(&self, poll: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.inner.lock();
                if !state.draining && state.pending.is_empty() {
                    return true;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSink;

    fn config(delay_ms: u64) -> DispatcherConfig {
        DispatcherConfig {
            delay: Duration::from_millis(delay_ms),
            max_consecutive_failures: 3,
        }
    }

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn test_commands_sent_in_order_with_spacing() {
        let sink = Arc::new(FakeSink::new());
        let dispatcher = Dispatcher::new(sink.clone(), config(1000));

        let started = Instant::now();
        for i in 0..4 {
            dispatcher.submit(format!("setblock {} 0 0 stone", i)).unwrap();
        }
        assert!(dispatcher.is_draining());
        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(60)).await);

        assert_eq!(
            sink.commands(),
            vec![
                "setblock 0 0 0 stone",
                "setblock 1 0 0 stone",
                "setblock 2 0 0 stone",
                "setblock 3 0 0 stone",
            ]
        );
        // First command goes out immediately, the rest one delay apart.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3100), "elapsed {:?}", elapsed);
        assert!(!dispatcher.is_draining());
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                submitted: 4,
                dispatched: 4,
                failed: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drain_task() {
        let sink = Arc::new(FakeSink::with_latency(Duration::from_millis(50)));
        let dispatcher = Dispatcher::new(sink.clone(), config(0));

        for i in 0..10 {
            dispatcher.submit(format!("say {}", i)).unwrap();
            if i % 3 == 0 {
                tokio::task::yield_now().await;
            }
        }
        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(60)).await);
        assert_eq!(sink.max_in_flight(), 1);
        assert_eq!(sink.commands().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_drain_restarts_task() {
        let sink = Arc::new(FakeSink::new());
        let dispatcher = Dispatcher::new(sink.clone(), config(200));

        dispatcher.submit("say first").unwrap();
        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(5)).await);
        dispatcher.submit("say second").unwrap();
        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(5)).await);
        assert_eq!(sink.commands(), vec!["say first", "say second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_from_blocking_thread() {
        let sink = Arc::new(FakeSink::new());
        let dispatcher = Dispatcher::new(sink.clone(), config(0));

        let producer = dispatcher.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..3 {
                producer.submit(format!("say {}", i)).unwrap();
            }
        })
        .await
        .unwrap();

        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(5)).await);
        assert_eq!(sink.commands(), vec!["say 0", "say 1", "say 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_does_not_stop_drain() {
        let sink = Arc::new(FakeSink::new());
        sink.fail_when(|cmd| {
            cmd.contains("bogus")
                .then(|| RconError::Protocol("Unknown block type".to_string()))
        });
        let dispatcher = Dispatcher::new(sink.clone(), config(0));

        dispatcher.submit("setblock 0 0 0 stone").unwrap();
        dispatcher.submit("setblock 1 0 0 bogus").unwrap();
        dispatcher.submit("setblock 2 0 0 stone").unwrap();
        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(5)).await);

        assert_eq!(sink.commands(), vec!["setblock 0 0 0 stone", "setblock 2 0 0 stone"]);
        assert_eq!(dispatcher.stats().failed, 1);
        assert_eq!(dispatcher.failures()[0].command, "setblock 1 0 0 bogus");
        assert!(!dispatcher.is_faulted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_transport_failures_fault_the_dispatcher() {
        let sink = Arc::new(FakeSink::new());
        sink.fail_when(|_| Some(RconError::ConnectionRefused("127.0.0.1:25566".to_string())));
        let dispatcher = Dispatcher::new(sink.clone(), config(100));

        for i in 0..8 {
            dispatcher.submit(format!("say {}", i)).unwrap();
        }
        assert!(dispatcher.wait_drained(POLL, Duration::from_secs(5)).await);

        assert!(dispatcher.is_faulted());
        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 8);
        assert_eq!(stats.dispatched, 0);
        assert_eq!(stats.pending(), 0);
        assert_eq!(dispatcher.submit("say late"), Err(Faulted(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_drained_times_out() {
        let sink = Arc::new(FakeSink::with_latency(Duration::from_secs(10)));
        let dispatcher = Dispatcher::new(sink, config(0));
        dispatcher.submit("say slow").unwrap();

        let started = Instant::now();
        assert!(!dispatcher.wait_drained(POLL, Duration::from_secs(2)).await);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(dispatcher.is_draining());
    }
}
