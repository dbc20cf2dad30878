mod args;
mod handlers;
mod placement;
mod reconcile;
mod state;
mod templates;

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
use crate::placement::PlacementEngine;
use crate::reconcile::VllmReconciler;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = gauntlet_common::telemetry::init_tracing(
        "gauntlet-vllm",
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

    let placement = Arc::new(PlacementEngine::new(
        store.clone(),
        gateway.clone(),
        args.namespace.clone(),
        args.image.clone(),
        Duration::from_secs(args.evict_timeout_secs),
    ));

    let reconciler = Arc::new(VllmReconciler::new(
        store.clone(),
        gateway.clone(),
        args.max_failures,
    ));
    tokio::spawn(reconciler.run(
        Duration::from_secs(args.reconcile_interval_secs),
        shutdown.clone(),
    ));

    let st = AppState {
        store,
        gateway,
        placement,
        started_at_ms: gauntlet_common::now_ms(),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/deploy", post(handlers::deploy))
        .route("/deployments", get(handlers::list_deployments))
        .route(
            "/deployments/:id",
            get(handlers::get_deployment).delete(handlers::delete_deployment),
        )
        .with_state(st);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gauntlet-vllm listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    info!("gauntlet-vllm stopped");
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
