mod config;
mod coordination;
mod discovery;
mod health;
mod leader;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use config::ServiceConfig;
use coordination::ConsulClient;
use service::Service;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Self-registering, leader-electing service agent")]
#[command(version)]
struct Cli {
    /// Unique instance identifier (defaults to the hostname)
    #[arg(long)]
    id: Option<String>,

    /// TCP port the health endpoint listens on
    #[arg(long, default_value_t = 6000)]
    port: u16,

    /// Logical service name shared by all peer instances
    #[arg(long, default_value = "beacon")]
    service_name: String,

    /// Base address of the coordination agent
    #[arg(long, default_value = "http://consul-agent:8500")]
    consul_addr: String,

    /// Hostname peers and the coordination store reach this instance on
    /// (defaults to the registered service id)
    #[arg(long)]
    advertise_host: Option<String>,

    /// Seconds between renew/acquire and discovery ticks
    #[arg(long, default_value_t = 30)]
    tick_interval_secs: u64,

    /// Session TTL in seconds; must be at least twice the tick interval
    #[arg(long, default_value_t = 60)]
    session_ttl_secs: u64,

    /// Catalog tag attached to the registration (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Force the health endpoint to report failure
    #[arg(long)]
    unhealthy: bool,
}

impl Cli {
    fn into_config(self) -> ServiceConfig {
        let instance_id = self
            .id
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());
        let advertise_host = self
            .advertise_host
            .unwrap_or_else(|| format!("{}-{}", self.service_name, instance_id));
        let tags = if self.tags.is_empty() {
            vec!["api".to_string()]
        } else {
            self.tags
        };

        ServiceConfig {
            instance_id,
            port: self.port,
            service_name: self.service_name,
            consul_addr: self.consul_addr,
            advertise_host,
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            tags,
            unhealthy: self.unhealthy,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn sigint() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?error, "failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(error) => {
            tracing::error!(error = ?error, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() -> &'static str {
    tokio::select! {
        _ = sigint() => "SIGINT",
        _ = sigterm() => "SIGTERM",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse().into_config();
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("BEACON_GIT_SHA"),
        service_id = %config.service_id(),
        "starting beacon"
    );

    let client = ConsulClient::new(&config.consul_addr)
        .context("failed to create coordination store client")?;
    let mut service = Service::new(config, Arc::new(client));
    service.start().await.context("failed to start service")?;

    if let Some(mut leadership) = service.leadership() {
        tokio::spawn(async move {
            let mut current = *leadership.borrow();
            while leadership.changed().await.is_ok() {
                let next = *leadership.borrow();
                if next != current {
                    tracing::info!(from = ?current, to = ?next, "leadership changed");
                    current = next;
                }
            }
        });
    }

    // Run until a background task dies or the process is asked to stop;
    // either way the service is shut down gracefully before exiting.
    let fatal = tokio::select! {
        error = service.wait_fatal() => error,
        signal = shutdown_signal() => {
            tracing::info!(signal, "received stop signal");
            None
        }
    };

    let shutdown_result = service
        .shutdown()
        .await
        .context("graceful shutdown failed");

    if let Some(error) = fatal {
        return Err(anyhow::Error::new(error).context("background task failed"));
    }
    shutdown_result?;

    tracing::info!("stopped http server and background tasks");
    Ok(())
}
