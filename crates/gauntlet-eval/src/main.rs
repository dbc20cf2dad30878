mod args;
mod compose;
mod handlers;
mod scheduler;
mod state;

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
use crate::scheduler::EvalScheduler;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = gauntlet_common::telemetry::init_tracing(
        "gauntlet-eval",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let store: Arc<dyn gauntlet_store::Store> =
        Arc::new(gauntlet_store::MongoStore::connect(&args.mongo_url, &args.db_name).await?);

    let shutdown = CancellationToken::new();

    let scheduler = Arc::new(EvalScheduler::new(
        store.clone(),
        args.deployer_url.clone(),
        Duration::from_secs(args.evaluation_delay_minutes * 60),
        args.max_attempts,
        args.default_namespace.clone(),
    ));
    tokio::spawn(scheduler.clone().run(
        Duration::from_secs(args.sweep_interval_secs),
        shutdown.clone(),
    ));

    let st = AppState {
        store,
        scheduler,
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/evaluate", post(handlers::evaluate))
        .route("/run", post(handlers::run))
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/:id", get(handlers::get_task))
        .route("/tasks/:id/cancel", post(handlers::cancel_task))
        .with_state(st);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gauntlet-eval listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    info!("gauntlet-eval stopped");
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
