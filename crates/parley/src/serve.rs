// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve` command implementation.
//!
//! Opens storage, builds the channel adapters and engine, starts the
//! background workers (outbox, campaign scheduler, webhook dispatcher), and
//! serves the HTTP gateway until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use parley_bus::EventBus;
use parley_campaign::{CampaignExecutor, CampaignScheduler};
use parley_config::model::ParleyConfig;
use parley_core::ParleyError;
use parley_engine::Engine;
use parley_gateway::{AuthConfig, GatewayState, HealthState, ServerConfig};
use parley_storage::Database;
use parley_webhook::{Subscriptions, WebhookDispatcher};
use tracing::{error, info, warn};

use crate::shutdown;

/// How long background workers get to wind down after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

type RenderFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Install the Prometheus recorder and describe every metric.
fn install_metrics() -> Result<RenderFn, ParleyError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ParleyError::Internal(format!("failed to install Prometheus recorder: {e}")))?;
    parley_engine::metrics::register_metrics();
    parley_campaign::register_metrics();
    info!("prometheus metrics recorder installed");
    Ok(Arc::new(move || handle.render()))
}

/// Open the configured database, creating and migrating it as needed.
pub async fn open_database(config: &ParleyConfig) -> Result<Database, ParleyError> {
    Database::open_with(&config.storage.database_path, config.storage.wal_mode).await
}

/// Runs the `parley serve` command.
pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    info!("starting parley serve");

    let prometheus_render = if config.metrics.enabled {
        Some(install_metrics()?)
    } else {
        None
    };

    let db = open_database(&config).await?;
    let bus = Arc::new(EventBus::default());
    let engine = Engine::from_config(db.clone(), bus.clone(), &config)?;
    info!(channels = engine.registry().len(), "channel adapters ready");
    if engine.registry().is_empty() {
        warn!("no channels configured; only management endpoints will be useful");
    }

    let campaigns = CampaignExecutor::new(engine.clone(), config.campaign.clone());
    let dispatcher = WebhookDispatcher::new(db.clone(), &config.webhook)?;

    let cancel = shutdown::install_signal_handler();
    let mut workers = Vec::new();

    workers.push(tokio::spawn(engine.outbox_worker().run(cancel.clone())));
    workers.push(tokio::spawn(
        CampaignScheduler::new(
            campaigns.clone(),
            Duration::from_secs(config.campaign.scheduler_interval_secs),
        )
        .run(cancel.clone()),
    ));
    workers.push(dispatcher.clone().spawn(&bus, cancel.clone()).await);
    info!("background workers started");

    if config.server.bearer_token.is_none() {
        warn!("server.bearer_token is not set; the management API will reject every request");
    }
    let state = GatewayState {
        engine: engine.clone(),
        campaigns: campaigns.clone(),
        subscriptions: Subscriptions::new(db.clone()),
        webhooks: dispatcher,
        auth: AuthConfig {
            bearer_token: config.server.bearer_token.clone(),
        },
        health: HealthState::new(prometheus_render),
    };

    let server_result =
        parley_gateway::start_server(&ServerConfig::from(&config.server), state, cancel.clone())
            .await;
    if let Err(e) = &server_result {
        error!(error = %e, "gateway failed");
    }
    cancel.cancel();

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, join_workers(workers)).await;
    if drained.is_err() {
        warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "background workers did not stop in time");
    }
    // Interrupted campaigns stay SENDING and are resumed on the next start.
    campaigns.shutdown(DRAIN_TIMEOUT).await;

    engine.shutdown().await;
    if let Err(e) = db.close().await {
        warn!(error = %e, "database close failed");
    }
    info!("parley stopped");
    server_result
}

async fn join_workers(workers: Vec<tokio::task::JoinHandle<()>>) {
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "background worker panicked");
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
