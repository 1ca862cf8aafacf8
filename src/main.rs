//! `wireproxy` binary: forwards every frontend connection to one backend.
//!
//! Parses the command line into an immutable configuration, builds a
//! multi-thread runtime with one worker thread per accept loop and runs the
//! proxy until Ctrl+C.

mod cli;

use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;
use wireproxy::{
    config::ProxyConfig,
    error::{Error, Result},
    proxy::ProxyServer,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(&Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "wireproxy failed");
            ExitCode::FAILURE
        }
    }
}

fn config_from(cli: &Cli) -> Result<ProxyConfig> {
    let config = ProxyConfig::new(cli.listen, cli.backend_host.clone(), cli.backend_port)
        .with_workers(cli.workers)?
        .with_connect_timeout(cli.connect_timeout_ms.map(Duration::from_millis))?
        .validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = config_from(cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers())
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;
    runtime.block_on(async {
        install_metrics(cli.metrics_listen)?;
        ProxyServer::from_config(&config)
            .bind(config.listen())?
            .run()
            .await?;
        Ok(())
    })
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: Option<SocketAddr>) -> Result<()> {
    if let Some(addr) = addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "metrics exporter listening");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: Option<SocketAddr>) -> Result<()> {
    if let Some(addr) = addr {
        tracing::warn!(%addr, "built without metrics support, ignoring --metrics-listen");
    }
    Ok(())
}
