//! Entry point for the portreaper agent. Parses args/env and serves the API.

use std::net::SocketAddr;
use std::sync::Arc;

use portreaper_agent::api::router;
use portreaper_agent::config::{parse_args, usage, AgentConfig};
use portreaper_agent::state::AppState;
use portreaper_agent::sys_host::SystemHost;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args(std::env::args()) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{}", usage("portreaper_agent"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("portreaper_agent=info")),
        )
        .init();

    let mut cfg = AgentConfig::from_env()?;
    cfg.apply_args(&args);

    let state = AppState::from_config(&cfg, Arc::new(SystemHost::new()));
    if let Some(path) = &cfg.log_file {
        info!("audit trail: {}", path.display());
    }
    if state.auth_token.is_some() {
        info!("API token required on /api and /ws");
    }

    let listener = tokio::net::TcpListener::bind((cfg.host.as_str(), cfg.port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    info!(
        family = ?state.classifier.family(),
        "portreaper agent listening on http://{addr}"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
