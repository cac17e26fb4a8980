//! Time utilities for match simulation

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Seconds from `from` to `to`, negative if `to` is earlier
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        // Beyond ~292 years; millisecond precision is plenty
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn elapsed_is_signed_and_sub_second() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::nanoseconds(1_500_000_001);
        assert!((elapsed_secs(t0, t1) - 1.500_000_001).abs() < 1e-12);
        assert!((elapsed_secs(t1, t0) + 1.500_000_001).abs() < 1e-12);
    }
}
