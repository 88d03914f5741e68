use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rig::providers::openai;
use tokio::sync::Mutex;
use tracing::{error, info};

use crucible::agents::{CrucibleActor, CrucibleAdversary};
use crucible::arbiter::SandboxArbiter;
use crucible::artifacts::DebugArtifacts;
use crucible::config::CrucibleConfig;
use crucible::cost::CostLedger;
use crucible::embeddings::HttpEmbedder;
use crucible::evolver::Evolver;
use crucible::gateway::{ChatModel, GatewayError, ModelGateway};
use crucible::ledger::PromptLedger;
use crucible::memory::VectorSkillMemory;
use crucible::orchestrator::CycleEngine;
use crucible::rerank::ReRanker;
use crucible::sandbox::HttpSandboxProvider;
use crucible::vector_store::VectorStore;

const DEFAULT_TASK: &str =
    "Write a Python function to calculate Fibonacci numbers recursively with memoization.";

/// Pause between cycles in loop mode.
const LOOP_SLEEP: Duration = Duration::from_secs(5);
/// Longer pause after a cycle-level error.
const ERROR_SLEEP: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    name = "crucible",
    about = "Adversarial self-improvement loop for coding agents"
)]
struct Cli {
    /// Task description to solve in a single cycle.
    #[arg(long)]
    task: Option<String>,

    /// Run cycles indefinitely, generating tasks via the adversary curriculum.
    #[arg(long = "loop")]
    run_loop: bool,

    /// Curriculum difficulty for autonomously generated tasks (1-10).
    #[arg(long, default_value_t = 5)]
    difficulty: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CrucibleConfig::from_env()?;
    info!(
        actor_model = %config.actor_model,
        adversary_model = %config.adversary_model,
        evolver_model = %config.evolver_model,
        data_dir = %config.data_dir.display(),
        max_attempts = config.max_attempts,
        debug = config.debug,
        "crucible starting"
    );

    let mut engine = build_engine(&config, cli.difficulty)?;

    if cli.run_loop {
        run_loop(&mut engine).await
    } else {
        let description = cli.task.as_deref().unwrap_or(DEFAULT_TASK);
        let outcome = engine.run_cycle(Some(description)).await?;
        info!(?outcome, "single cycle finished");
        Ok(())
    }
}

/// Run cycles until a shutdown signal or budget exhaustion.
///
/// Ctrl-C is graceful: the in-flight cycle runs to completion, then the
/// loop exits with code 0. Ordinary cycle errors are logged and followed
/// by a longer sleep; only budget exhaustion stops the loop with an error.
async fn run_loop(engine: &mut CycleEngine) -> Result<()> {
    info!("starting autonomous loop");
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received — finishing in-flight cycle");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    while !shutdown.load(Ordering::SeqCst) {
        let sleep_for = match engine.run_cycle(None).await {
            Ok(outcome) => {
                info!(?outcome, "cycle finished");
                LOOP_SLEEP
            }
            Err(e) if is_budget_exhaustion(&e) => {
                error!(error = %e, "budget exhausted — stopping loop");
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "cycle error");
                ERROR_SLEEP
            }
        };
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(sleep_for).await;
    }

    info!("autonomous loop stopped");
    Ok(())
}

fn is_budget_exhaustion(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<GatewayError>(),
        Some(GatewayError::BudgetExceeded { .. })
    )
}

/// Wire every component from configuration.
fn build_engine(config: &CrucibleConfig, difficulty: u8) -> Result<CycleEngine> {
    let cost = Arc::new(Mutex::new(CostLedger::open(
        config.cost_path(),
        config.budget_limit_usd,
    )));

    let actor_gateway: Arc<dyn ChatModel> = Arc::new(ModelGateway::new(
        build_client(config)?,
        config.actor_model.as_str(),
        config.gateway_max_retries,
        cost.clone(),
    ));
    let adversary_gateway: Arc<dyn ChatModel> = Arc::new(ModelGateway::new(
        build_client(config)?,
        config.adversary_model.as_str(),
        config.gateway_max_retries,
        cost.clone(),
    ));
    let evolver_gateway: Arc<dyn ChatModel> = Arc::new(ModelGateway::new(
        build_client(config)?,
        config.evolver_model.as_str(),
        config.gateway_max_retries,
        cost,
    ));

    let embedder = Arc::new(HttpEmbedder::new(
        config.model_base_url.as_str(),
        config.model_api_key.as_str(),
        config.embed_model.as_str(),
        config.gateway_max_retries,
    ));
    let memory = Arc::new(VectorSkillMemory::new(
        VectorStore::open(config.skills_path()),
        embedder,
        Some(ReRanker::new(actor_gateway.clone())),
        config.env_tag.as_str(),
    ));

    let ledger = Arc::new(Mutex::new(PromptLedger::open(config.ledger_path())));
    let actor = Arc::new(CrucibleActor::new(
        actor_gateway,
        memory.clone(),
        ledger.clone(),
    ));
    let adversary = Arc::new(CrucibleAdversary::new(adversary_gateway));

    let provider = Arc::new(HttpSandboxProvider::new(
        config.sandbox_base_url.as_str(),
        config.sandbox_api_key.as_str(),
    ));
    let arbiter = Arc::new(SandboxArbiter::new(provider, config.sandbox_timeout));

    Ok(CycleEngine::new(
        actor,
        adversary,
        arbiter,
        memory,
        ledger,
        Evolver::new(evolver_gateway),
        DebugArtifacts::new(config.debug_root(), config.debug),
        config.max_attempts,
        difficulty,
    ))
}

fn build_client(config: &CrucibleConfig) -> Result<openai::CompletionsClient> {
    openai::CompletionsClient::builder()
        .api_key(&config.model_api_key)
        .base_url(&config.model_base_url)
        .build()
        .context("failed to build model client")
}
