use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use orchestrator::api;
use orchestrator::app_state::{AppState, Collaborators};
use orchestrator::config::OrchestratorConfig;
use orchestrator::directory::{HttpAgentDirectory, InMemoryAgentDirectory, SharedAgentDirectory};
use orchestrator::invoker::AdapterRegistry;
use orchestrator::payments::{HttpEscrowLedger, InMemoryLedger, SharedEscrowLedger};
use orchestrator::planning::SingleStepPlanner;
use orchestrator::verification::HttpQualityScorer;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => {
                    tracing::info!(path = %candidate.display(), "Loaded environment from .env");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Failed to load .env file"
                    );
                }
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::info!(
        cwd = %cwd.display(),
        "No .env file found in current directory or ancestors; using process environment only"
    );
}

fn build_directory(config: &OrchestratorConfig) -> anyhow::Result<SharedAgentDirectory> {
    if let Some(url) = &config.directory.registry_url {
        tracing::info!(registry_url = %url, "Using HTTP agent registry");
        return Ok(Arc::new(HttpAgentDirectory::new(
            url.clone(),
            config.directory.lookup_timeout(),
        )));
    }

    match &config.directory.seed_path {
        Some(path) if Path::new(path).exists() => {
            let directory = InMemoryAgentDirectory::from_json_file(Path::new(path))
                .with_context(|| format!("failed to load agent seed file {path}"))?;
            tracing::info!(seed_path = %path, "Using seeded in-memory agent directory");
            Ok(Arc::new(directory))
        }
        Some(path) => {
            tracing::warn!(seed_path = %path, "Agent seed file not found; directory starts empty");
            Ok(Arc::new(InMemoryAgentDirectory::new(Vec::new())))
        }
        None => Ok(Arc::new(InMemoryAgentDirectory::new(Vec::new()))),
    }
}

fn build_ledger(config: &OrchestratorConfig) -> SharedEscrowLedger {
    match &config.payments.ledger_url {
        Some(url) => {
            tracing::info!(ledger_url = %url, "Using HTTP settlement ledger");
            Arc::new(HttpEscrowLedger::new(url.clone()))
        }
        None => {
            tracing::warn!("No ledger_url configured; escrows settle in-process");
            Arc::new(InMemoryLedger::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env before reading config so overrides apply.
    load_env_file();
    let config = OrchestratorConfig::load().context("failed to load orchestrator config")?;

    tracing::info!("Starting task orchestrator");

    let scorer_url = config
        .verification
        .scorer_url
        .clone()
        .context("verification.scorer_url is required")?;
    let collaborators = Collaborators {
        directory: build_directory(&config)?,
        ledger: build_ledger(&config),
        adapters: AdapterRegistry::from_protocols(&config.invoker.protocols),
        scorer: Arc::new(HttpQualityScorer::new(
            scorer_url,
            config.verification.scorer_timeout(),
        )),
        planner: Arc::new(SingleStepPlanner::default()),
    };

    let app_state = AppState::start(&config, collaborators)
        .await
        .context("failed to start orchestrator services")?;

    let allowed_origins = config
        .server
        .allowed_origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid CORS origin")?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    let api_state = api::ApiState { app_state };
    let app = api::router().with_state(api_state).layer(cors);

    tracing::info!(bind_addr = %config.server.bind_addr, "Starting HTTP server");
    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
