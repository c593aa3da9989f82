//! pal-agent: supervised pal agents on a simulated game world.
//!
//! Spawns N wild pals and one trainer into an in-process world, lets the
//! supervisor start an agent per pal, runs for a fixed time, then stops
//! everything and prints what was stored.
//!
//! Usage:
//!   cargo run -p demo -- simulate --agents 3 --duration-secs 10
//!   cargo run -p demo -- --config pal.toml run --agents 2 --duration-secs 30
//!   cargo run -p demo -- --debug simulate --flush-threshold 5

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pal_contracts::{
    agent::{AgentId, AgentType},
    config::RuntimeConfig,
    error::PalResult,
};
use pal_core::{traits::LanguageModel, InMemoryMessageStore};
use pal_identity::IdentityRegistry;
use pal_runtime::{
    sim::{ScriptedModel, SimIdentityService, SimWorld},
    AgentSupervisor, Collaborators, DeterministicCredentials, OpenAiCompatibleModel,
    SupervisorConfig,
};
use pal_storage::InMemoryContentStorage;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Autonomous pal agents with a durable decision log.
#[derive(Parser)]
#[command(
    name = "pal-agent",
    about = "Run supervised pal agents against a simulated game world"
)]
struct Cli {
    /// TOML configuration file. Without it, configuration comes from the
    /// environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (ignored when RUST_LOG is set).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone)]
struct RunArgs {
    /// Number of pals to spawn.
    #[arg(long, default_value_t = 3)]
    agents: u64,

    /// How long to run before stopping every agent.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Decision-log entries buffered before an automatic flush.
    #[arg(long)]
    flush_threshold: Option<usize>,

    /// Seed for per-agent credential derivation.
    #[arg(long)]
    seed: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the agents with the built-in scripted model.
    Simulate(RunArgs),
    /// Drive the agents with the configured OpenAI-compatible model.
    Run(RunArgs),
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    config.debug |= cli.debug;
    init_logging(config.debug);

    let result = match cli.command {
        Command::Simulate(args) => {
            apply_overrides(&mut config, &args);
            run(config, args, Arc::new(ScriptedModel::new())).await
        }
        Command::Run(args) => {
            apply_overrides(&mut config, &args);
            match OpenAiCompatibleModel::new(&config.model) {
                Ok(model) => run(config, args, Arc::new(model)).await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("pal-agent error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> PalResult<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path),
        None => RuntimeConfig::from_env(),
    }
}

fn apply_overrides(config: &mut RuntimeConfig, args: &RunArgs) {
    if let Some(threshold) = args.flush_threshold {
        config.flush_threshold = threshold.max(1);
    }
    if let Some(seed) = &args.seed {
        config.agent_seed = seed.clone();
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with the debug toggle.
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .compact()
        .init();
}

// ── Run ───────────────────────────────────────────────────────────────────────

async fn run(config: RuntimeConfig, args: RunArgs, model: Arc<dyn LanguageModel>) -> PalResult<()> {
    let game_contract = config.identity.game_contract_address.clone();
    let (world, events) = SimWorld::new(game_contract.clone());

    let identities = SimIdentityService::new();
    let storage = Arc::new(InMemoryContentStorage::new());
    let registry = IdentityRegistry::new(
        Arc::new(identities.clone()),
        Some(storage.clone()),
        config.identity.clone(),
    );

    let supervisor = AgentSupervisor::new(
        SupervisorConfig::from_runtime(&config),
        Collaborators {
            model,
            world: Arc::new(world.clone()),
            transactions: Arc::new(world.clone()),
            store: Arc::new(InMemoryMessageStore::new()),
            credentials: Arc::new(DeterministicCredentials::new(config.agent_seed.clone())),
            registry: registry.clone(),
        },
    );
    let runner = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(events).await }
    });

    print_banner(&config, &args);
    for token_id in 1..=args.agents {
        let (x, y) = spawn_point(token_id);
        world.spawn(token_id, AgentType::Pal, x, y, 100);
    }
    let (x, y) = spawn_point(args.agents + 1);
    world.spawn(args.agents + 1, AgentType::Trainer, x, y, 100);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!(duration_secs = args.duration_secs, "run finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, shutting down");
        }
    }

    shutdown(&supervisor, runner).await;

    print_summary(&world, &registry, args.agents, storage.len(), world.transaction_count());
    Ok(())
}

/// Stop listening for lifecycle events, then stop every agent.
///
/// The listener goes first so upserts still queued from the final steps
/// cannot restart agents after `stop_all`.
async fn shutdown(supervisor: &AgentSupervisor, runner: JoinHandle<()>) {
    runner.abort();
    let _ = runner.await;
    supervisor.stop_all().await;
}

/// Deterministic, spread-out starting position for `token_id`.
fn spawn_point(token_id: u64) -> (u64, u64) {
    ((token_id * 7_919) % 2_000, (token_id * 4_111) % 2_000)
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_banner(config: &RuntimeConfig, args: &RunArgs) {
    println!();
    println!("pal-agent");
    println!("=========");
    println!("  agents:          {}", args.agents);
    println!("  duration:        {}s", args.duration_secs);
    println!("  flush threshold: {}", config.flush_threshold);
    println!("  flush failure:   {:?}", config.flush_failure);
    println!("  game contract:   {}", config.identity.game_contract_address);
    println!();
}

fn print_summary(
    world: &SimWorld,
    registry: &IdentityRegistry,
    agents: u64,
    stored_objects: usize,
    transactions: u64,
) {
    println!();
    println!("Summary");
    println!("-------");
    println!("  transactions:   {}", transactions);
    println!("  stored objects: {}", stored_objects);
    println!();

    for token_id in 1..=agents {
        let refs = registry.storage_references(AgentId(token_id));
        let health = world.entity(token_id).map(|e| e.health).unwrap_or_default();
        let last_range = refs
            .last()
            .map(|r| format!("{}-{}", r.step_range.start, r.step_range.end))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  pal #{:<4} health {:>3}  batches {:>3}  last steps {:<9} last hash {}",
            token_id,
            health,
            refs.len(),
            last_range,
            refs.last().map(|r| r.content_hash.as_str()).unwrap_or("-"),
        );
    }

    println!();
    match serde_json::to_string_pretty(&registry.status()) {
        Ok(status) => println!("Registry status:\n{}", status),
        Err(e) => eprintln!("could not render registry status: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use pal_contracts::config::IdentityConfig;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn queued_upserts_do_not_outlive_shutdown() {
        let (world, events) = SimWorld::new("0xgame");
        let registry =
            IdentityRegistry::new(Arc::new(SimIdentityService::new()), None, IdentityConfig::default());
        let supervisor = AgentSupervisor::new(
            SupervisorConfig::default(),
            Collaborators {
                model: Arc::new(ScriptedModel::new()),
                world: Arc::new(world.clone()),
                transactions: Arc::new(world.clone()),
                store: Arc::new(InMemoryMessageStore::new()),
                credentials: Arc::new(DeterministicCredentials::new("s")),
                registry,
            },
        );
        let runner = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run(events).await }
        });

        world.spawn(1, AgentType::Pal, 0, 0, 100);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(supervisor.agent_ids(), vec![AgentId(1)]);

        // Queued but not yet consumed when shutdown begins.
        world.spawn(2, AgentType::Pal, 10, 10, 100);
        world.set_health(1, 90);
        shutdown(&supervisor, runner).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(supervisor.agent_ids().is_empty());
    }
}
