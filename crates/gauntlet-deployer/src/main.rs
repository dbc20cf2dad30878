mod args;
mod handlers;
mod state;
mod terminal;
mod tracker;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::args::Args;
use crate::state::AppState;
use crate::terminal::TerminalBroker;
use crate::tracker::Tracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = gauntlet_common::telemetry::init_tracing(
        "gauntlet-deployer",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let store: Arc<dyn gauntlet_store::Store> =
        Arc::new(gauntlet_store::MongoStore::connect(&args.mongo_url, &args.db_name).await?);
    let gateway = gauntlet_kube::ClusterGateway::connect(Duration::from_secs(
        args.deployment_timeout_secs,
    ))
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let shutdown = CancellationToken::new();

    let tracker = Arc::new(Tracker::new(
        store.clone(),
        gateway.clone(),
        args.job_max_failures,
    ));
    tokio::spawn(tracker.clone().run(
        Duration::from_secs(args.reconcile_interval_secs),
        shutdown.clone(),
    ));

    let broker = Arc::new(TerminalBroker::new(gateway.clone(), shutdown.clone()));
    tokio::spawn(broker.clone().run_reaper());

    let st = AppState {
        store,
        gateway,
        tracker,
        broker,
        default_namespace: args.default_namespace.clone(),
        log_tail_lines: args.log_tail_lines,
        started_at_ms: gauntlet_common::now_ms(),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/deploy", post(handlers::deploy))
        .route("/delete", post(handlers::delete))
        .route("/deployments", get(handlers::list_deployments))
        .route(
            "/deployments/:id",
            get(handlers::get_deployment).delete(handlers::delete_deployment),
        )
        .route("/deployments/:id/logs", get(handlers::deployment_logs))
        .route("/jobs/:name/status", get(handlers::job_status))
        .route("/jobs/:name/logs", get(handlers::job_logs))
        .route("/jobs/:name/terminal", post(handlers::create_terminal))
        .route("/terminal/:session_id", get(handlers::terminal_ws))
        .route(
            "/terminal-sessions",
            get(handlers::list_terminal_sessions),
        )
        .route(
            "/terminal-sessions/:id",
            axum::routing::delete(handlers::close_terminal_session),
        )
        .with_state(st);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gauntlet-deployer listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Give in-flight reconciliation a moment to settle, then stop.
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("gauntlet-deployer stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
