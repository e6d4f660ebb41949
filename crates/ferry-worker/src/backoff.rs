//! Sleep helpers for the polling loops.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay before the next attempt after `consecutive_failures` failures in a
/// row: `base * 2^(n-1)`, capped at `max`. A zero base still backs off from
/// one second so a broken connection is never hammered.
pub fn compute_backoff(base: Duration, consecutive_failures: u32, max: Duration) -> Duration {
    let base = if base.is_zero() {
        Duration::from_secs(1)
    } else {
        base
    };
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    base.saturating_mul(2_u32.pow(exponent)).min(max)
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
