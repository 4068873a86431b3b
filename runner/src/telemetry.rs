use std::time::Duration;

use tracing::info;

/// How a run ended, as reported in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// A pitch hook supplied the result and the resource was never read.
    ShortCircuit,
    Failure,
}

/// Emit a telemetry log for a completed run.
pub fn record_run(
    resource: Option<&str>,
    loader_count: usize,
    duration: Duration,
    outcome: RunOutcome,
    cacheable: bool,
) {
    let duration_ms = duration.as_millis().min(u128::from(u64::MAX)) as u64;
    let success = !matches!(outcome, RunOutcome::Failure);
    info!(
        target: "loader_runner::telemetry",
        event = "loader_run",
        resource = resource.unwrap_or("<none>"),
        loader_count,
        success,
        outcome = ?outcome,
        cacheable,
        duration_ms,
    );
}
