//! overlink-bridge
//!
//! Loads `overlink.yaml` (or the path in the first argument / `OVERLINK_CONFIG`),
//! starts the host stream shell and the control registry shell, and relays
//! between them until Ctrl-C.

use tracing_subscriber::{fmt, EnvFilter};

use overlink_bus::{bridge::Bridge, config};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OVERLINK_CONFIG").ok())
        .unwrap_or_else(|| "overlink.yaml".to_string());

    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%path, error = %e, code = e.code().as_str(), "config load failed");
            std::process::exit(2);
        }
    };

    let bridge = match Bridge::start(cfg).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, code = e.code().as_str(), "bridge startup failed");
            std::process::exit(1);
        }
    };

    tracing::info!(%path, "overlink-bridge running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed, shutting down");
    }

    tracing::info!(status = %bridge.status(), "overlink-bridge stopping");
    bridge.shutdown();
    tracing::info!("metrics\n{}", bridge.metrics().render());
}
