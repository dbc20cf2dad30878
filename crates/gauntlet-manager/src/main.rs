mod args;
mod handlers;
mod lint;
mod poller;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::args::Args;
use crate::poller::Poller;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = gauntlet_common::telemetry::init_tracing(
        "gauntlet-manager",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let store = Arc::new(gauntlet_store::MongoStore::connect(&args.mongo_url, &args.db_name).await?);
    let source = gauntlet_source::SourceClient::new(args.source_token.clone())
        .map_err(|e| anyhow::anyhow!("source client: {e}"))?;

    let shutdown = CancellationToken::new();
    let poller = Arc::new(Poller::new(store.clone(), source, shutdown.clone()));
    poller.start_all().await?;

    let st = AppState {
        store,
        poller: poller.clone(),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/:id",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route("/projects/:id/stats", get(handlers::project_stats))
        .route("/projects/:id/sync", post(handlers::sync_project))
        .route("/projects/:id/reset", post(handlers::reset_project))
        .route("/projects/:id/files", get(handlers::list_project_files))
        .route(
            "/projects/:id/modified-files",
            get(handlers::list_modified_files).post(handlers::create_modified_file),
        )
        .route(
            "/files/:id",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/files/:id/lint", post(handlers::lint_file))
        .route(
            "/modified-files/:id",
            get(handlers::get_modified_file)
                .put(handlers::update_modified_file)
                .delete(handlers::delete_modified_file),
        )
        .with_state(st);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gauntlet-manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    info!("gauntlet-manager stopped");
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
