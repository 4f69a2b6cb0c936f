//! Webhook server that starts an agent run for each new GitHub issue.

mod routes;
mod state;
mod webhook;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use agent::io::config::{Credentials, load_config};
use agent::io::github::GithubClient;
use agent::io::openai::OpenAiCompatClient;
use agent::io::run_store::InMemoryRunStore;
use anyhow::Context;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "agent-server")]
#[command(about = "GitHub webhook ingress for the issue-fixing agent")]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "agent.toml")]
    config: PathBuf,

    /// Address to bind the server to (overrides `server.bind`)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides `server.port`)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agent_server=info".parse()?)
                .add_directive("agent=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let credentials = Credentials::from_env()?;
    if credentials.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; webhook signatures will not be verified");
    }

    let host = GithubClient::new(&config.github, &credentials.github_token)?;
    let model = OpenAiCompatClient::new(&config.model, &credentials.llm_token, config.model_timeout())
        .context("create model client")?;

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;

    let state = AppState::new(
        config,
        Arc::new(model),
        Arc::new(host),
        Arc::new(InMemoryRunStore::new()),
        credentials.webhook_secret,
    );
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
