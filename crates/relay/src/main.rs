//! relay: Publishes the latest state of research platforms to the broker
//!
//! `run` polls every configured source and publishes normalized records as
//! retained messages; `log` archives everything published under the platform
//! subjects to a file.

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_connector_lib::{
    build_source, run_logger, run_server, EnvResolver, KeyResolver, Publisher, Runner,
    ServerState, Source,
};
use relay_metadata::{Environment, SourcesConfig};
use relay_middleware::{MiddlewareFactory, SubjectBuilder, Transport};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Platform telemetry relay")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll sources and publish their latest state
    Run {
        /// Path to environment configuration file
        #[arg(short, long)]
        env: PathBuf,

        /// Path to sources configuration file
        #[arg(short, long)]
        sources: PathBuf,

        /// Health server bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        health_addr: String,
    },
    /// Append every platform message to a file
    Log {
        /// Path to environment configuration file
        #[arg(short, long)]
        env: PathBuf,

        /// File to append to
        #[arg(short, long)]
        output: PathBuf,

        /// Subject to subscribe to (defaults to all platform subjects)
        #[arg(long)]
        subject: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    match args.command {
        Command::Run {
            env,
            sources,
            health_addr,
        } => run(&env, &sources, health_addr.parse()?, shutdown_rx).await,
        Command::Log {
            env,
            output,
            subject,
        } => log(&env, &output, subject, shutdown_rx).await,
    }
}

/// Connect the transport described by the environment, resolving broker credentials
async fn connect(
    env_config: &Environment,
    resolver: &dyn KeyResolver,
) -> Result<Arc<dyn Transport>, Box<dyn std::error::Error>> {
    let credentials = match &env_config.transport.credentials {
        Some(creds) => Some((
            resolver.resolve_one(&creds.user)?,
            resolver.resolve_one(&creds.password)?,
        )),
        None => None,
    };
    let transport = MiddlewareFactory::create_transport(env_config, credentials).await?;
    Ok(transport)
}

async fn run(
    env_path: &Path,
    sources_path: &Path,
    health_addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_config = Environment::load(env_path)?;
    info!(env = %env_config.name, "Loaded environment configuration");

    let sources_config = SourcesConfig::load(sources_path)?;
    info!(sources = sources_config.sources.len(), "Loaded sources configuration");

    // Build every source before connecting so configuration errors never leave
    // a half-started process holding a broker connection.
    let resolver = EnvResolver::new();
    let mut sources = Vec::with_capacity(sources_config.sources.len());
    for config in &sources_config.sources {
        let source = build_source(config, &resolver).map_err(|e| {
            error!(source = %config.name, error = %e, "Failed to build source");
            e
        })?;
        sources.push((source, Duration::from_secs(config.interval_secs)));
    }

    let transport = connect(&env_config, &resolver).await?;

    let state = ServerState::new(
        sources_config.sources.iter().map(|s| s.name.clone()).collect(),
        transport.clone(),
    );
    let server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = run_server(health_addr, state, server_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    let tasks = sources.into_iter().map(|(source, interval)| {
        let publisher = Publisher::from_environment(transport.clone(), &env_config)
            .with_source(source.name());
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut runner = Runner::new(source, publisher, interval);
            let result = runner.run(shutdown).await;
            (runner.source().name().to_string(), result)
        })
    });

    let mut failed = false;
    for joined in join_all(tasks).await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((name, Err(e))) => {
                error!(source = %name, error = %e, "Source stopped");
                failed = true;
            }
            Err(e) => {
                error!(error = %e, "Source task panicked");
                failed = true;
            }
        }
    }

    server.abort();
    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to flush transport on shutdown");
    }
    info!("Relay stopped");

    if failed {
        return Err("one or more sources stopped with an error".into());
    }
    Ok(())
}

async fn log(
    env_path: &Path,
    output: &Path,
    subject: Option<String>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_config = Environment::load(env_path)?;
    info!(env = %env_config.name, "Loaded environment configuration");

    let subject = subject.unwrap_or_else(|| {
        SubjectBuilder::new(env_config.transport.subject_prefix.as_deref())
            .all()
            .to_string()
    });

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await?;

    let transport = connect(&env_config, &EnvResolver::new()).await?;
    let result = run_logger(transport.as_ref(), &subject, &mut file, shutdown_rx).await;

    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to flush transport on shutdown");
    }

    let lines = result?;
    info!(lines, output = %output.display(), "Logger finished");
    Ok(())
}
