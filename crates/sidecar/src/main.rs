//! svidcar - Main entry point
//!
//! Keeps a SPIFFE JWT-SVID on disk for a co-located workload.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info};

use svidcar::{
    run_daemon, run_once, CredentialFile, EscalationStrategy, Escalator, HealthServer,
    KubernetesClient, LogFormat, ReadinessFlag, RenewalLoop, RenewalScheduler, SidecarArgs,
    SidecarConfig, WorkloadApiSource,
};

fn main() -> ExitCode {
    let args = SidecarArgs::parse();
    init_logging(args.log_format, args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "svidcar failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(format: LogFormat, verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
    }
}

fn run(args: SidecarArgs) -> Result<ExitCode> {
    let config = SidecarConfig::try_from(args).context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        daemon_mode = config.daemon_mode,
        audience = %config.audience,
        file = %config.credential_path.display(),
        agent = %config.agent_address,
        escalation = ?config.escalation,
        "Starting svidcar"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async move {
        if config.daemon_mode {
            daemon(config).await
        } else {
            Ok(run_once(renewal_loop(&config, ReadinessFlag::new())).await.exit_code())
        }
    })
}

async fn daemon(config: SidecarConfig) -> Result<ExitCode> {
    // Fail on escalation misconfiguration before the first fetch, not after
    // the first failure
    let escalator = build_escalator(&config.escalation)?;
    let mut signals = ShutdownSignals::register().context("Failed to register signal handlers")?;

    let readiness = ReadinessFlag::new();
    let health = HealthServer::bind(config.health_addr(), readiness.clone())
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", config.health_addr()))?;

    let outcome = run_daemon(
        renewal_loop(&config, readiness),
        health,
        &escalator,
        async move { signals.recv().await },
    )
    .await;
    Ok(outcome.exit_code())
}

fn renewal_loop(config: &SidecarConfig, readiness: ReadinessFlag) -> RenewalLoop<WorkloadApiSource> {
    RenewalLoop::new(
        WorkloadApiSource::new(config.agent_address.clone(), config.audience.clone()),
        CredentialFile::new(&config.credential_path).with_mode(config.file_mode),
        RenewalScheduler::new(config.refresh_interval_override),
        readiness,
    )
}

fn build_escalator(strategy: &EscalationStrategy) -> Result<Escalator> {
    match strategy {
        EscalationStrategy::Direct => Ok(Escalator::direct()),
        EscalationStrategy::DeletePod(unit) => {
            let client = KubernetesClient::in_cluster()
                .context("Failed to load in-cluster Kubernetes configuration")?;
            info!(pod = %unit, api_server = %client.base_url(), "Pod self-deletion enabled");
            Ok(Escalator::delete_pod(unit.clone(), Arc::new(client)))
        }
    }
}

/// SIGTERM and SIGINT, registered once at startup.
struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}
