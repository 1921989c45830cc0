//! Itinerary Server
//!
//! Axum server exposing the itinerary pipeline: public intake and polling,
//! the internal stage endpoints, and timeout checks. The same binary can run
//! a single request end to end in-process (`itinerary run`).

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use itinerary_core::config::PipelineConfig;
use itinerary_core::pipeline::{
    spawn_stage_dispatcher, ChannelTransport, Collaborators, HttpStageTransport, TimeoutCheck,
};
use itinerary_core::skills::{GooglePlacesVerifier, LlmContentGenerator};
use itinerary_core::state::{PipelineDb, SqliteItineraryArchive, TtlStore};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use api::{AppState, SharedState};

#[derive(Parser, Clone)]
#[command(author, version, about = "Itinerary generation pipeline")]
struct Args {
    /// Pipeline config file (defaults to .itinerary/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Run one request through the whole pipeline in-process
    Run {
        /// User the itinerary is for
        #[arg(short, long, default_value = "cli")]
        user: String,
        /// Requirements as inline JSON or a path to a JSON file
        requirements: String,
    },
    /// Check processing budgets (one request, or every pending one)
    CheckTimeouts {
        request_id: Option<String>,
    },
    /// Remove expired entries from the database
    Purge,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            let mut config = PipelineConfig::load_from(path)?;
            config.apply_env();
            Ok(config)
        }
        None => PipelineConfig::load(),
    }
}

fn build_collaborators(config: &PipelineConfig, db: &PipelineDb) -> anyhow::Result<Collaborators> {
    Ok(Collaborators {
        generator: Arc::new(LlmContentGenerator::from_config(config)),
        verifier: Arc::new(GooglePlacesVerifier::from_config(config)?),
        archive: Arc::new(SqliteItineraryArchive::new(db)),
    })
}

async fn run_server(config: PipelineConfig, host: &str, port: u16) -> anyhow::Result<()> {
    if config.internal_secret.is_empty() {
        tracing::warn!("ITINERARY_INTERNAL_SECRET is not set; every stage call will be rejected");
    }

    let db = PipelineDb::open_at(&config.db_path)?;
    let transport = HttpStageTransport::new(
        config.agent_base_url.clone(),
        config.internal_secret.clone(),
        config.handoff_timeout(),
    )?
    .with_retries(config.handoff_retries, config.handoff_backoff());
    let collaborators = build_collaborators(&config, &db)?;

    let state: SharedState = Arc::new(AppState::new(
        &db,
        config,
        Arc::new(transport),
        collaborators,
    ));
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    println!("🚀 Itinerary Server running at http://{}", addr);
    println!("   API v1 Routes:");
    println!("   Itineraries: /api/v1/itineraries, /:id, /:id/result");
    println!("   Agents:      /api/v1/agents/{{research,curation,validation,response}}");
    println!("   Monitor:     /api/v1/monitor/timeouts, /timeouts/:id");
    println!("   OpenAPI:     /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_requirements(raw: &str) -> anyhow::Result<Value> {
    let path = PathBuf::from(raw);
    let content = if path.is_file() {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        raw.to_string()
    };
    serde_json::from_str(&content).context("Requirements must be a JSON object")
}

async fn run_once(config: PipelineConfig, user: &str, requirements: &str) -> anyhow::Result<()> {
    let requirements = parse_requirements(requirements)?;
    let db = PipelineDb::open_at(&config.db_path)?;
    let collaborators = build_collaborators(&config, &db)?;
    let poll_limit = Duration::from_millis(config.timeout_budget_ms.saturating_mul(2));

    let (transport, rx) = ChannelTransport::new();
    let state = AppState::new(&db, config, Arc::new(transport), collaborators);
    let dispatcher = spawn_stage_dispatcher(Arc::clone(&state.agents), rx);

    let request = state.orchestrator.submit(user, requirements)?;
    println!("🚀 Running request {}", request.id);
    state.orchestrator.begin(&request.id).await?;

    let started = tokio::time::Instant::now();
    let request = loop {
        tokio::time::sleep(Duration::from_millis(200)).await;

        if let TimeoutCheck::TimedOut { stage, .. } = state.monitor.check(&request.id)? {
            println!("⏱️  Processing budget exceeded during {}", stage);
        }

        let current = state.ctx.requests.require(&request.id)?;
        if current.status.is_terminal() {
            break current;
        }
        if started.elapsed() > poll_limit {
            dispatcher.abort();
            anyhow::bail!("Request {} still {} after {:?}", current.id, current.status, poll_limit);
        }
    };
    dispatcher.abort();

    for entry in &request.processing_log {
        println!("   {:<10} {:?}", entry.agent.as_str(), entry.status);
    }

    match state.archive.fetch(&request.id).await? {
        Some(itinerary) => {
            println!("✅ Itinerary ready");
            println!("{}", serde_json::to_string_pretty(&itinerary)?);
            Ok(())
        }
        None => {
            let reason = request
                .error_details
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Request {} {}: {}", request.id, request.status, reason)
        }
    }
}

fn check_timeouts(config: PipelineConfig, request_id: Option<&str>) -> anyhow::Result<()> {
    let db = PipelineDb::open_at(&config.db_path)?;
    let collaborators = build_collaborators(&config, &db)?;
    let (transport, _rx) = ChannelTransport::new();
    let state = AppState::new(&db, config, Arc::new(transport), collaborators);

    match request_id {
        Some(id) => {
            let check = state.monitor.check(id)?;
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
        None => {
            let report = state.monitor.sweep()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn purge(config: &PipelineConfig) -> anyhow::Result<()> {
    let db = PipelineDb::open_at(&config.db_path)?;
    let removed = TtlStore::new(&db).purge_expired()?;
    println!("🧹 Removed {} expired entries", removed);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        None => run_server(config, "127.0.0.1", 8080).await,
        Some(CliCommand::Serve { port, host }) => run_server(config, &host, port).await,
        Some(CliCommand::Run { user, requirements }) => {
            run_once(config, &user, &requirements).await
        }
        Some(CliCommand::CheckTimeouts { request_id }) => {
            check_timeouts(config, request_id.as_deref())
        }
        Some(CliCommand::Purge) => purge(&config),
    }
}
