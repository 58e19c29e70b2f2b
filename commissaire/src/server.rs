use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::get;
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::handlers::{self, AppState};
use commissaire_common::access_log;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/clusters", get(handlers::list_clusters))
        .route(
            "/cluster/{name}",
            get(handlers::get_cluster)
                .put(handlers::create_cluster)
                .delete(handlers::delete_cluster),
        )
        .route(
            "/cluster/{name}/hosts",
            get(handlers::list_cluster_hosts).put(handlers::replace_cluster_hosts),
        )
        .route(
            "/cluster/{name}/hosts/{address}",
            get(handlers::get_cluster_host)
                .put(handlers::add_cluster_host)
                .delete(handlers::remove_cluster_host),
        )
        .route(
            "/cluster/{name}/restart",
            get(handlers::get_cluster_restart).put(handlers::start_cluster_restart),
        )
        .route(
            "/cluster/{name}/upgrade",
            get(handlers::get_cluster_upgrade).put(handlers::start_cluster_upgrade),
        )
        .route("/hosts", get(handlers::list_hosts))
        .route(
            "/host/{address}",
            get(handlers::get_host)
                .put(handlers::create_host)
                .delete(handlers::delete_host),
        )
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(middleware::from_fn(access_log::request))
}

/// Serves the management API until `cancel` fires, then drains in-flight
/// requests before returning.
pub async fn run_server(cancel: CancellationToken, port: u16, state: AppState) -> Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| {
            eprintln!("{}", format!("❌ Failed to bind server to {addr}: {e}").red());
            e
        })
        .context("failed to bind server")?;
    println!(
        "{}{}",
        "🚀 Starting commissaire management API • port=".green(),
        port.to_string().green().dimmed()
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("failed to serve HTTP")?;
    println!("{}", "🛑 Management API stopped gracefully.".red());
    Ok(())
}
