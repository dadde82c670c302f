//! The monitoring loop.
//!
//! One [`Monitor`] owns a full cycle: probe every target, classify the
//! results, rate-limit alerts through the throttle, and hand admitted
//! alerts to the notifier. The loop runs on its own task so callers
//! stay responsive, and a stop request wakes the interval sleep
//! instead of waiting it out. The cycle in flight when a stop arrives
//! always runs to completion, so counters never reflect half a cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::classify::{classify, Status};
use crate::config::Config;
use crate::notify::{Notifier, NotifyOutcome};
use crate::probe::{self, ProbeResult};
use crate::throttle::{AlertKey, NotificationThrottle};

/// Lifecycle of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
}

/// What happened to a potential notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    /// Rejected by the cooldown window.
    Suppressed,
    /// Admitted but notifications are disabled or unconfigured.
    Skipped,
    /// Admitted and accepted by the webhook.
    Delivered,
    /// Admitted but delivery failed. Never retried.
    Failed(String),
}

/// Events emitted by the monitor for logging/UI shells.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Probe {
        target: String,
        status: Status,
        latency_ms: Option<f64>,
        at: DateTime<Utc>,
    },
    /// Every target in the cycle was high-latency or unreachable.
    AllDegraded { at: DateTime<Utc> },
    Notification {
        target: String,
        outcome: NotificationOutcome,
    },
}

/// Session counters, accumulated across cycles and reset when
/// monitoring (re)starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    pub total_checks: u64,
    pub high_latency_count: u64,
    pub unreachable_count: u64,
    pub latency_sum_ms: f64,
    pub latency_sample_count: u64,
}

impl CycleStats {
    /// Mean latency over all reachable probes this session.
    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.latency_sample_count == 0 {
            return None;
        }
        Some(self.latency_sum_ms / self.latency_sample_count as f64)
    }
}

/// The loop controller.
pub struct Monitor {
    inner: Arc<MonitorInner>,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct MonitorInner {
    config: Config,
    notifier: Notifier,
    throttle: NotificationThrottle,
    stats: Mutex<CycleStats>,
    state: Mutex<MonitorState>,
    event_tx: Mutex<Option<mpsc::Sender<MonitorEvent>>>,
}

impl Monitor {
    pub fn new(config: Config) -> Self {
        let notifier = Notifier::from_config(&config);
        Self {
            inner: Arc::new(MonitorInner {
                config,
                notifier,
                throttle: NotificationThrottle::new(),
                stats: Mutex::new(CycleStats::default()),
                state: Mutex::new(MonitorState::Idle),
                event_tx: Mutex::new(None),
            }),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Open the event stream. Events are delivered best-effort: a
    /// consumer that falls behind loses events, the cycle never blocks
    /// on it.
    pub fn subscribe(&self) -> mpsc::Receiver<MonitorEvent> {
        let (tx, rx) = mpsc::channel(256);
        *self.inner.event_tx.lock() = Some(tx);
        rx
    }

    pub fn state(&self) -> MonitorState {
        *self.inner.state.lock()
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> CycleStats {
        self.inner.stats.lock().clone()
    }

    /// Start the monitoring loop on its own task. No-op unless idle.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != MonitorState::Idle {
                tracing::warn!("monitor already running");
                return;
            }
            *state = MonitorState::Running;
        }

        // A fresh monitoring session starts from zero.
        *self.inner.stats.lock() = CycleStats::default();

        let (stop_tx, stop_rx) = broadcast::channel(1);
        *self.stop_tx.lock() = Some(stop_tx);

        tracing::info!(
            targets = ?self.inner.config.targets,
            threshold_ms = self.inner.config.latency_threshold_ms,
            poll_interval_s = self.inner.config.poll_interval_s,
            "starting monitoring"
        );

        let inner = self.inner.clone();
        let handle = tokio::spawn(run_loop(inner, stop_rx));
        *self.handle.lock() = Some(handle);
    }

    /// Stop the loop and wait for it to wind down. The cycle in flight
    /// finishes first.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != MonitorState::Running {
                return;
            }
            *state = MonitorState::Stopping;
        }

        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "monitor task failed");
            }
        }

        *self.inner.state.lock() = MonitorState::Idle;

        let stats = self.stats();
        tracing::info!(
            total_checks = stats.total_checks,
            high_latency = stats.high_latency_count,
            unreachable = stats.unreachable_count,
            avg_latency_ms = stats.average_latency_ms(),
            "monitoring stopped"
        );
    }
}

async fn run_loop(inner: Arc<MonitorInner>, mut stop_rx: broadcast::Receiver<()>) {
    let poll_interval = Duration::from_secs(inner.config.poll_interval_s);

    loop {
        inner.run_cycle().await;

        // The sleep is cancellable; a stop request that arrived during
        // the cycle is picked up here without waiting out the interval.
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

impl MonitorInner {
    async fn run_cycle(&self) {
        let timeout = Duration::from_secs(self.config.probe_timeout_s);
        let results = probe::sample(&self.config.targets, timeout).await;
        self.process_results(results).await;
    }

    /// Classify a batch of results, update counters, and send admitted
    /// alerts. Split from sampling so the alerting path is testable
    /// with synthetic results.
    async fn process_results(&self, results: Vec<ProbeResult>) {
        let threshold = self.config.latency_threshold_ms;
        let cooldown = Duration::from_secs(self.config.notification_interval_s);

        let classified: Vec<(ProbeResult, Status)> = results
            .into_iter()
            .map(|r| {
                let status = classify(&r, threshold);
                (r, status)
            })
            .collect();

        {
            let mut stats = self.stats.lock();
            for (result, status) in &classified {
                stats.total_checks += 1;
                match status {
                    Status::Ok => {}
                    Status::HighLatency => stats.high_latency_count += 1,
                    Status::Unreachable => stats.unreachable_count += 1,
                }
                if let Some(ms) = result.latency_ms {
                    stats.latency_sum_ms += ms;
                    stats.latency_sample_count += 1;
                }
            }
        }

        let degraded = classified
            .iter()
            .filter(|(_, status)| !status.is_ok())
            .count();

        let admission_time = Instant::now();
        let mut admitted = Vec::new();

        for (result, status) in &classified {
            self.emit(MonitorEvent::Probe {
                target: result.target.clone(),
                status: *status,
                latency_ms: result.latency_ms,
                at: Utc::now(),
            });

            match status {
                Status::Ok => {
                    if let Some(ms) = result.latency_ms {
                        tracing::info!(
                            target = %result.target,
                            latency_ms = ms,
                            threshold_ms = threshold,
                            "latency ok"
                        );
                    }
                }
                Status::HighLatency => {
                    let latency = result.latency_ms.unwrap_or(f64::NAN);
                    tracing::warn!(
                        target = %result.target,
                        latency_ms = latency,
                        threshold_ms = threshold,
                        "high latency"
                    );

                    let key = AlertKey::high_latency(&result.target);
                    if self.throttle.admit(key, admission_time, cooldown) {
                        admitted.push((result.target.clone(), latency));
                    } else {
                        tracing::debug!(target = %result.target, "notification suppressed by cooldown");
                        self.emit(MonitorEvent::Notification {
                            target: result.target.clone(),
                            outcome: NotificationOutcome::Suppressed,
                        });
                    }
                }
                Status::Unreachable => {
                    // Local log only. When a target is unreachable the
                    // webhook may be unreachable as well, so this never
                    // produces a notification.
                    tracing::error!(target = %result.target, "target unreachable");
                }
            }
        }

        if !classified.is_empty() && degraded == classified.len() {
            tracing::error!("network degraded: every monitored target is failing");
            self.emit(MonitorEvent::AllDegraded { at: Utc::now() });
        }

        // Admitted alerts for different targets go out concurrently.
        join_all(
            admitted
                .into_iter()
                .map(|(target, latency)| self.deliver_alert(target, latency)),
        )
        .await;
    }

    async fn deliver_alert(&self, target: String, latency_ms: f64) {
        let message = self.format_alert(&target, latency_ms);

        let outcome = match self.notifier.notify(&message).await {
            Ok(NotifyOutcome::Delivered) => {
                tracing::info!(target = %target, "alert notification delivered");
                NotificationOutcome::Delivered
            }
            Ok(NotifyOutcome::Skipped) => NotificationOutcome::Skipped,
            Err(e) => {
                // Logged and dropped: a down alert channel must not
                // interrupt monitoring.
                tracing::error!(target = %target, error = %e, "alert notification failed");
                NotificationOutcome::Failed(e.to_string())
            }
        };

        self.emit(MonitorEvent::Notification { target, outcome });
    }

    fn format_alert(&self, target: &str, latency_ms: f64) -> String {
        format!(
            "⚠️ Network latency alert\n\n\
             Client: {}\n\
             Target: {}\n\
             Status: high latency\n\
             Current: {:.2}ms\n\
             Threshold: {}ms\n\
             Time: {}",
            self.config.client_label,
            target,
            latency_ms,
            self.config.latency_threshold_ms,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        )
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(tx) = self.event_tx.lock().as_ref() {
            let _ = tx.try_send(event);
        }
    }
}
