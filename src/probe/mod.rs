//! Probing of monitored targets.
//!
//! One probe is one ICMP echo round trip. Failures never escape this
//! module: anything that prevents a measurement folds into an
//! unreachable result, so a bad target cannot fail the cycle it is
//! part of.

mod ping;

use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;

/// Probe error types. Internal to the probing layer; callers of
/// [`probe`] see an unreachable [`ProbeResult`] instead.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Outcome of one measurement against one target.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub target: String,
    /// Round-trip time in milliseconds. `None` means unreachable.
    pub latency_ms: Option<f64>,
}

impl ProbeResult {
    pub fn reachable(target: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            target: target.into(),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn unreachable(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            latency_ms: None,
        }
    }
}

/// Measure one target once. No retries; one echo per call.
pub async fn probe(target: &str, timeout: Duration) -> ProbeResult {
    // Jitter so a batch of targets does not fire as one burst.
    let jitter = rand::random::<u64>() % 100;
    tokio::time::sleep(Duration::from_millis(jitter)).await;

    match ping::run_ping(target, timeout).await {
        Ok(ms) if ms < timeout.as_secs_f64() * 1000.0 => ProbeResult::reachable(target, ms),
        Ok(ms) => {
            tracing::debug!(target, latency_ms = ms, "echo reply arrived past the timeout");
            ProbeResult::unreachable(target)
        }
        Err(ProbeError::Timeout(_)) => {
            tracing::debug!(target, "probe timed out");
            ProbeResult::unreachable(target)
        }
        Err(e) => {
            tracing::debug!(target, error = %e, "probe failed");
            ProbeResult::unreachable(target)
        }
    }
}

/// Probe every target concurrently.
///
/// Returns exactly one result per target, in input order. Targets are
/// probed in parallel so a slow or dead target does not delay the
/// others; the batch completes in roughly one timeout regardless of
/// target count.
pub async fn sample(targets: &[String], timeout: Duration) -> Vec<ProbeResult> {
    join_all(targets.iter().map(|t| probe(t, timeout))).await
}
