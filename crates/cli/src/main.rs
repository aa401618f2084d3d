//! spark-operator: runs the Spark application controllers until SIGINT/SIGTERM.

#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sparkop_controllers::{ApplicationController, ScheduledApplicationController, WebhookSubsystem};
use sparkop_kubehub::{build_client, check_cluster_dns, WatchFactory};
use sparkop_lifecycle::Lifecycle;
use sparkop_schema::{descriptors, descriptors_yaml, KubeSchemaRegistry, ScheduledSparkApplication, SparkApplication};
use tracing::{error, info, warn};

mod config;

use config::{Cli, OperatorConfig};

fn init_tracing() {
    let env = std::env::var("SPARKOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SPARKOP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(()) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SPARKOP_METRICS_ADDR; expected host:port");
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = term.recv() => info!("received SIGTERM"),
            },
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM; waiting for SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt");
    }
}

async fn run(cfg: OperatorConfig) -> Result<()> {
    info!(
        namespace = %cfg.namespace,
        install_crds = cfg.install_crds,
        webhook = cfg.webhook.is_some(),
        resync_secs = cfg.resync.as_secs(),
        "starting spark operator"
    );
    let client = build_client(cfg.master.as_deref(), cfg.kubeconfig.as_deref()).await?;
    if cfg.check_dns {
        check_cluster_dns(&client).await?;
    }

    let mut factory = WatchFactory::new(client.clone(), cfg.namespace.clone(), cfg.resync);
    let (apps, app_feed) = factory.informer_with_feed::<SparkApplication>();
    let (scheduled, scheduled_feed) = factory.informer_with_feed::<ScheduledSparkApplication>();
    let app_controller = ApplicationController::new(cfg.namespace.clone(), apps.clone(), app_feed, factory.resync_ticks());
    let scheduled_controller =
        ScheduledApplicationController::new(cfg.namespace.clone(), scheduled, scheduled_feed, apps, factory.resync_ticks());

    let mut lifecycle = Lifecycle::new();
    if cfg.install_crds {
        lifecycle = lifecycle.install_schemas(Arc::new(KubeSchemaRegistry::new(client.clone())), descriptors());
    }
    lifecycle = lifecycle
        .detached("watch-factory", move |shutdown| {
            let _driver = factory.start(shutdown);
        })
        .enlist(Box::new(app_controller), cfg.controller_threads)
        .enlist(Box::new(scheduled_controller), cfg.scheduled_controller_threads);
    if let Some(opts) = cfg.webhook {
        lifecycle = lifecycle.enlist(Box::new(WebhookSubsystem::new(client, opts, cfg.namespace)), 1);
    }

    lifecycle.run(shutdown_requested()).await.context("spark operator lifecycle")?;
    info!("spark operator stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if cli.print_crds {
        return match descriptors_yaml() {
            Ok(yaml) => {
                print!("{yaml}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "failed to render custom resource definitions");
                ExitCode::FAILURE
            }
        };
    }

    let cfg = match cli.into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    init_metrics();

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "spark operator failed");
            ExitCode::FAILURE
        }
    }
}
