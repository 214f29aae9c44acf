use std::net::{Ipv4Addr, SocketAddr};

use az_vm_exporter::{
    collector::VmCollector,
    config::{self, Config},
    server::{self, Server},
};
use azure_compute::{ClientSecretCredential, ComputeClient};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::{runtime::Builder, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Applied when `RUST_LOG` is unset. The HTTP stacks are chatty at info.
const DEFAULT_LOG_FILTER: &str = "info,reqwest=warn,hyper=warn,hyper_util=warn";

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to install telemetry recorder: {0}")]
    Recorder(#[from] BuildError),
    #[error("Scrape server error: {0}")]
    Server(#[from] server::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Serve scrapes until interrupted, the default
    Run,
    /// Validate the environment configuration and exit
    ConfigCheck,
}

fn load_config() -> Result<Config, Error> {
    let config = Config::from_env().map_err(|err| {
        error!("{err}");
        err
    })?;
    info!(
        "Using subscription {sub} and resource group {rg}",
        sub = config.subscription_id,
        rg = config.resource_group
    );
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    let mut credential = ClientSecretCredential::new(
        &config.tenant_id,
        &config.client_id,
        &config.client_secret,
    )
    .with_http_client(http.clone());
    if let Some(host) = &config.authority_host {
        credential = credential.with_authority_host(host);
    }

    let mut client = ComputeClient::new(credential, &config.subscription_id).with_http_client(http);
    if let Some(endpoint) = &config.resource_manager_endpoint {
        client = client.with_endpoint(endpoint);
    }

    let collector = VmCollector::new(client, &config.resource_group);
    let telemetry = PrometheusBuilder::new().install_recorder()?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    info!("Starting HTTP server on port {port}", port = config.port);
    let server = Server::bind(addr, collector, Some(telemetry))
        .await
        .map_err(|err| {
            error!("Failed to start the HTTP server: {err}");
            err
        })?;
    info!("HTTP server started on {addr}", addr = server.local_addr());

    server
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c"),
                Err(err) => error!("could not listen for ctrl-c: {err}"),
            }
        })
        .await;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting az-vm-exporter {version}.");

    let cli = Cli::parse();
    let config = load_config();

    if cli.command == Some(Commands::ConfigCheck) {
        match config {
            Ok(_) => {
                info!("Configuration is valid");
                std::process::exit(0)
            }
            Err(_) => std::process::exit(1),
        }
    }

    let config = config?;
    let runtime = Builder::new_multi_thread().enable_io().enable_time().build()?;
    let res = runtime.block_on(inner_main(config));
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["az-vm-exporter"]).expect("valid arguments");
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_check_subcommand_parses() {
        let cli =
            Cli::try_parse_from(["az-vm-exporter", "config-check"]).expect("valid arguments");
        assert_eq!(cli.command, Some(Commands::ConfigCheck));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["az-vm-exporter", "serve-forever"]).is_err());
    }
}
