//! poolwardend: pgpool supervisor and Patroni-driven backend reconciler.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poolwarden_cluster::{ClusterStateReader, HttpRoleProbe};
use poolwarden_pcp::{write_passfile, PcpClient};
use poolwarden_reconcile::Reconciler;
use poolwarden_supervisor::ProcessSupervisor;
use poolwardend::{Cli, Exit, LogFormat, WatchLoop, WatcherConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<Exit> {
    let config = WatcherConfig::from_cli(cli).context("invalid configuration")?;

    write_passfile(
        &config.pcppass_file,
        &config.pcp_host,
        config.pcp_port,
        &config.admin_user,
        config.admin_password.expose(),
    )
    .with_context(|| {
        format!(
            "failed to write PCP password file {}",
            config.pcppass_file.display()
        )
    })?;

    let names: Vec<&str> = config.nodes.iter().map(|n| n.name.as_str()).collect();
    info!(backends = ?names, pcp_port = config.pcp_port, "poolwarden starting");

    let probe = HttpRoleProbe::new(config.coordinator_port, config.coordinator_timeout);
    let reader = ClusterStateReader::new(config.nodes.clone(), probe);
    let reconciler = Reconciler::new(config.nodes.clone(), PcpClient::new(config.pcp_config()));
    let mut watcher = WatchLoop::new(reader, reconciler, config.loop_settings.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let command = config.proxy_command();
    let exit = watcher
        .run(
            || ProcessSupervisor::spawn(&command, config.pcp_host.clone(), config.pcp_port),
            shutdown_rx,
        )
        .await;

    info!(?exit, code = exit.code(), "poolwarden exiting");
    Ok(exit)
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "shutdown signal received"),
        _ = terminate => info!(signal = "SIGTERM", "shutdown signal received"),
    }
}
