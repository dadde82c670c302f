//! lagwatch core: latency probing, status classification, alert
//! throttling, webhook notification, and the monitoring loop that ties
//! them together. The binary in `main.rs` is a thin CLI shell over
//! this library.

pub mod classify;
pub mod config;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod throttle;
