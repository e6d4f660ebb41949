pub mod app;

use ferry_core::LedgerStats;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for the `ferry` binary. `LOG_FORMAT=json` switches to
/// one JSON object per event.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ferry=info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }
}

/// Token cancelled by the first shutdown signal. Loops finish the record in
/// flight before stopping.
pub fn cancel_on_shutdown() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Stopping after in-flight transfers complete...");
        token.cancel();
    });
    cancel
}

/// Two-column table for `ferry status`.
pub fn format_stats_table(stats: &LedgerStats) -> String {
    let rows = [
        ("Total records", stats.total),
        ("Awaiting destination", stats.awaiting_destination),
        ("Eligible for transfer", stats.eligible),
        ("Claimed by a worker", stats.claimed),
        ("Transferred", stats.transferred),
        ("Finalized", stats.finalized),
    ];
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);

    let mut out = String::new();
    for (label, value) in rows {
        out.push_str(&format!("{label:<width$}  {value:>10}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_table_aligns_columns() {
        let stats = LedgerStats {
            total: 12,
            awaiting_destination: 3,
            eligible: 4,
            claimed: 1,
            transferred: 5,
            finalized: 0,
        };
        let table = format_stats_table(&stats);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("Total records"));
        assert!(lines[0].ends_with("12"));
        assert!(lines[4].ends_with(" 5"));
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }
}
