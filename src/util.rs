use std::str::FromStr;

use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber
///
/// `level` applies to this crate, the calling binary (`bin_target`) and
/// tower-http's request spans. Everything else stays at `warn`.
pub fn init_tracing(level: &str, bin_target: &str) {
    let parsed = LevelFilter::from_str(level).ok();
    let level = parsed.unwrap_or(LevelFilter::INFO);

    let filter = filter::Targets::new()
        .with_default(LevelFilter::WARN)
        .with_targets(vec![
            ("metrics_relay", level),
            (bin_target, level),
            ("tower_http", level),
        ]);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();

    if parsed.is_none() {
        warn!("unknown log level, falling back to info");
    }
}

/// Resolves on SIGINT, SIGTERM or SIGQUIT
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut sigterm), Ok(mut sigquit)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        ) else {
            warn!("cannot register SIGTERM/SIGQUIT handlers");
            ctrl_c.await;
            info!("received SIGINT, shutting down");
            return;
        };

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigquit.recv() => info!("received SIGQUIT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received ctrl-c, shutting down");
    }
}
