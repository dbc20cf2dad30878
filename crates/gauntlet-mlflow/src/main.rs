mod args;
mod bridge;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gauntlet_common::{backoff_with_jitter, now_ms};

use crate::args::Args;
use crate::bridge::{Bridge, PollStats};
use crate::registry::RegistryClient;

#[derive(Clone)]
struct AppState {
    last_poll: Arc<Mutex<Option<(u64, PollStats)>>>,
    force: Arc<Notify>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = gauntlet_common::telemetry::init_tracing(
        "gauntlet-mlflow",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let registry = RegistryClient::new(&args.mlflow_tracking_uri)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let source = gauntlet_source::SourceClient::new(args.source_token.clone())
        .map_err(|e| anyhow::anyhow!("source client: {e}"))?;

    let bridge = Arc::new(Bridge::new(
        registry,
        source,
        args.source_owner.clone(),
        args.source_repo.clone(),
        args.source_branch.clone(),
        args.template_path.clone(),
        args.applications_dir.clone(),
    ));

    let shutdown = CancellationToken::new();
    let st = AppState {
        last_poll: Arc::new(Mutex::new(None)),
        force: Arc::new(Notify::new()),
    };

    {
        let bridge = bridge.clone();
        let st = st.clone();
        let cancel = shutdown.clone();
        let interval = Duration::from_secs(args.polling_interval_secs);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "registry bridge started");
            let mut failures: u32 = 0;
            loop {
                let delay = if failures == 0 {
                    interval
                } else {
                    backoff_with_jitter(interval, failures, interval * 10)
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("registry bridge stopped");
                        return;
                    }
                    _ = st.force.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                match bridge.poll_once().await {
                    Ok(stats) => {
                        failures = 0;
                        *st.last_poll.lock().await = Some((now_ms(), stats));
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        warn!(failures, error = %e, "registry poll failed");
                    }
                }
            }
        });
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/poll", post(force_poll))
        .with_state(st);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gauntlet-mlflow listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    info!("gauntlet-mlflow stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "gauntlet-mlflow"}))
}

async fn status(State(st): State<AppState>) -> impl IntoResponse {
    let last = st.last_poll.lock().await;
    match *last {
        Some((at_ms, stats)) => Json(json!({
            "service": "gauntlet-mlflow",
            "last_poll_ms": at_ms,
            "last_poll": stats,
        }))
        .into_response(),
        None => Json(json!({
            "service": "gauntlet-mlflow",
            "last_poll_ms": null,
        }))
        .into_response(),
    }
}

async fn force_poll(State(st): State<AppState>) -> impl IntoResponse {
    st.force.notify_one();
    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"})))
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
