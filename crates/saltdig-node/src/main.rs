mod api;
mod api_sse;
mod auth;
mod cli;
mod config;
mod logging;
mod node;

use clap::Parser;
use cli::{Cli, Command};
use config::{NodeConfig, Secrets};
use node::SaltdigNode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match NodeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            return 1;
        }
    };
    logging::init(&config.logging.level);

    let node = match SaltdigNode::build(config, Secrets::from_env()) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Startup failed");
            return 1;
        }
    };

    match cli.command {
        Command::Reconcile => reconcile_once(node).await,
        Command::Serve => serve(node).await,
    }
}

async fn reconcile_once(node: Arc<SaltdigNode>) -> i32 {
    match node.reconciler.run_once().await {
        Ok(report) => {
            info!(
                scanned = report.scanned,
                released = report.released,
                corrected = report.corrected,
                failures = report.failures.len(),
                "Reconcile run complete"
            );
            // Per-bounty failures are reported but do not fail the run.
            0
        }
        Err(e) => {
            error!(error = %e, "Reconcile run could not start");
            1
        }
    }
}

async fn serve(node: Arc<SaltdigNode>) -> i32 {
    let address: SocketAddr = match format!("{}:{}", node.config.api.host, node.config.api.port)
        .parse()
    {
        Ok(address) => address,
        Err(e) => {
            error!(error = %e, "Invalid listen address");
            return 1;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(node.clone().run_reconcile_loop(shutdown_rx));
    api::spawn_rate_limit_sweeper(node.clone());

    let app = api::router(node);
    let listener = match tokio::net::TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, address = %address, "Could not bind");
            return 1;
        }
    };

    info!(address = %address, "Saltdig node listening");
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await;

    let _ = shutdown_tx.send(true);
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Server error");
            1
        }
    }
}
