mod error;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use state::{AppState, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use vault_core::Vault;

#[derive(Parser)]
#[command(name = "vault-service")]
#[command(about = "HTTP API for a local image vault")]
#[command(version)]
struct Args {
    #[arg(long, env = "VAULT_SERVICE_PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Vault to open at startup (initialized if needed)
    #[arg(long, env = "VAULT_ROOT")]
    root: Option<PathBuf>,
}

fn app(state: SharedState) -> Router {
    Router::new()
        .route("/scan", post(routes::scan))
        .route("/search", post(routes::search))
        .route("/entries/tags", post(routes::tag_entries))
        .route("/entries/delete", post(routes::delete_entries))
        .route("/entries/export", post(routes::export_entries))
        .route("/entries/purge", post(routes::purge_entries))
        .route("/entries/{id}", get(routes::get_entry))
        .route("/tags", get(routes::list_tags))
        .route("/tags/rename", post(routes::rename_tag))
        .route("/tags/delete", post(routes::delete_tag))
        .route("/status", get(routes::status))
        .route("/cancel", post(routes::cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let vault = match args.root {
        Some(root) => match tokio::task::spawn_blocking(move || Vault::open_or_init(&root)).await {
            Ok(Ok(vault)) => Some(vault),
            Ok(Err(e)) => {
                eprintln!("vault-service: {e}");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("vault-service: {e}");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let state: SharedState = Arc::new(AppState::new(vault));

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("vault-service: cannot bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "vault-service listening");

    if let Err(e) = axum::serve(listener, app(state)).await {
        eprintln!("vault-service: {e}");
        std::process::exit(1);
    }
}
