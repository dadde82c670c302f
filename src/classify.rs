//! Status classification of probe results.

use serde::Serialize;

use crate::probe::ProbeResult;

/// Health status of a target after one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    HighLatency,
    Unreachable,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Classify a probe result against the latency threshold.
///
/// The threshold is inclusive: latency exactly at the threshold is
/// still healthy.
pub fn classify(result: &ProbeResult, threshold_ms: f64) -> Status {
    match result.latency_ms {
        Some(latency) if latency <= threshold_ms => Status::Ok,
        Some(_) => Status::HighLatency,
        None => Status::Unreachable,
    }
}
