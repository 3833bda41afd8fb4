mod config;
mod jobs;
mod output;
mod simulate;
mod votes_file;

use std::collections::HashMap;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use duelrank_core::constants::TOP_K;
use duelrank_core::{
    Category, EngineConfig, EstimateOptions, ItemId, MemoryStore, Segment, ViewOrder, VoteLog,
    VotingEngine,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::jobs::{JobHandle, RankingJobs};
use crate::simulate::{make_voters, run_round, HiddenTastes, SessionStats};

#[derive(Parser)]
#[command(name = "duelrank", version, about = "Rank items from pairwise \"which is better?\" votes")]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a simulated voting session over a list of items
    Simulate(SimulateArgs),
    /// Rank items from a saved JSONL vote log
    Rank(RankArgs),
    /// Create a default config file at ~/.config/duelrank/config.toml
    Init,
}

#[derive(Parser)]
struct SimulateArgs {
    /// File with one item per line, or a JSON array of strings
    #[arg(long)]
    items: Option<PathBuf>,

    /// Inline item (repeatable)
    #[arg(long = "item")]
    inline_items: Vec<String>,

    /// Number of simulated voters
    #[arg(long, default_value_t = 20)]
    voters: usize,

    /// Votes each voter casts (fewer if they run out of unseen pairs)
    #[arg(long, default_value_t = 30)]
    votes_per_voter: usize,

    /// Voting rounds; a background ranking refresh starts after each
    #[arg(long, default_value_t = 3)]
    rounds: usize,

    /// Spread of the hidden item appeal shared by every voter
    #[arg(long, default_value_t = 1.5)]
    spread: f64,

    /// Spread of the per-segment taste offsets
    #[arg(long, default_value_t = 0.5)]
    segment_spread: f64,

    /// Retries for a vote that loses a concurrent-update race
    #[arg(long, default_value_t = 5)]
    conflict_retries: usize,

    /// Votes before adaptive pairing starts
    #[arg(long)]
    random_phase_limit: Option<u32>,

    /// Rating the scheduler compares: "glicko" or "elo"
    #[arg(long)]
    metric: Option<String>,

    /// Leaderboard bucket: overall, male or female
    #[arg(long, default_value = "overall")]
    category: String,

    /// Show the leaderboard worst first
    #[arg(long)]
    worst: bool,

    /// Leaderboard rows to show
    #[arg(long)]
    limit: Option<usize>,

    /// Monte Carlo trials for leaderboard probabilities
    #[arg(long)]
    trials: Option<usize>,

    /// Use the reduced trial count for slow machines
    #[arg(long)]
    low_power: bool,

    /// Bootstrap resamples for the Bradley-Terry table (0 = skip)
    #[arg(long)]
    bootstrap: Option<usize>,

    /// RNG seed for a reproducible session
    #[arg(long)]
    seed: Option<u64>,

    /// Append the session's votes to this JSONL file
    #[arg(long)]
    save_votes: Option<PathBuf>,

    /// Output JSON instead of tables
    #[arg(long)]
    json: bool,

    /// Path to config file (default: ~/.config/duelrank/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser)]
struct RankArgs {
    /// JSONL vote log
    #[arg(long)]
    votes: PathBuf,

    /// Item names; line N is item N. Items without votes are ranked too.
    #[arg(long)]
    items: Option<PathBuf>,

    /// Only count votes from this segment: male, female or unspecified
    #[arg(long)]
    segment: Option<String>,

    /// Bootstrap resamples (0 = skip rank probabilities)
    #[arg(long)]
    bootstrap: Option<usize>,

    /// Rank positions counted as "top" in bootstrap probabilities
    #[arg(long, default_value_t = TOP_K)]
    top_k: usize,

    /// RNG seed for a reproducible bootstrap
    #[arg(long)]
    seed: Option<u64>,

    /// Output JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Path to config file (default: ~/.config/duelrank/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Parse a string as either a JSON array of strings or plain text (one item per line).
fn parse_items_from_str(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim();
    if trimmed.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(trimmed)
            .context("Input looks like JSON but failed to parse")?;
        Ok(items.into_iter().filter(|s| !s.trim().is_empty()).collect())
    } else {
        Ok(trimmed
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}

fn read_items_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file {}", path.display()))?;
    parse_items_from_str(&content)
}

/// Load items from all sources: --items file, --item inline args, or stdin.
fn load_items(file: Option<&Path>, inline: &[String]) -> Result<Vec<String>> {
    let mut items = match file {
        Some(path) => read_items_file(path)?,
        None => Vec::new(),
    };
    items.extend(inline.iter().cloned());

    // From stdin (only if no file and no inline items)
    if items.is_empty() {
        let mut stdin = io::stdin();
        if stdin.is_terminal() {
            bail!("No items provided. Use --items <file>, --item <name>, or pipe items via stdin.");
        }
        let mut content = String::new();
        stdin
            .read_to_string(&mut content)
            .context("Failed to read from stdin")?;
        items = parse_items_from_str(&content)?;
    }

    if items.len() < 2 {
        bail!("Need at least 2 items to rank, got {}", items.len());
    }
    Ok(items)
}

/// Item IDs as assigned by `MemoryStore::with_urls`: line N is item N.
fn name_map(items: &[String]) -> HashMap<ItemId, String> {
    items.iter().cloned().zip(1..).map(|(name, id)| (id, name)).collect()
}

fn parse_category(value: &str) -> Result<Category> {
    match value.trim().to_ascii_lowercase().as_str() {
        "overall" | "all" => Ok(Category::Overall),
        "male" => Ok(Category::Male),
        "female" => Ok(Category::Female),
        other => bail!("Unknown category \"{other}\". Use overall, male or female."),
    }
}

fn parse_segment_filter(value: &str) -> Result<Segment> {
    let segment = Segment::parse(value);
    if segment == Segment::Unspecified && !value.trim().eq_ignore_ascii_case("unspecified") {
        bail!("Unknown segment \"{value}\". Use male, female or unspecified.");
    }
    Ok(segment)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        // Per-vote lines drown everything else in bulk runs.
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,duelrank_core::engine=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Simulate(args) => run_simulate(args).await,
        Commands::Rank(args) => run_rank(args).await,
        Commands::Init => {
            let path = config::config_path()?;
            config::create_default_config(&path)?;
            println!("Created config at {}", path.display());
            println!("Edit it to tune pairing, bootstrap and Monte Carlo defaults.");
            Ok(())
        }
    }
}

fn load_cli_config(path: Option<PathBuf>) -> Result<config::DuelrankConfig> {
    let path = match path {
        Some(p) => p,
        None => config::config_path()?,
    };
    config::load_config(&path)
}

async fn run_simulate(args: SimulateArgs) -> Result<()> {
    let cfg = load_cli_config(args.config.clone())?;
    let mut phase = cfg.phase_params()?;
    if let Some(limit) = args.random_phase_limit {
        phase.random_phase_limit = limit;
    }
    if let Some(metric) = args.metric.as_deref() {
        phase.metric = config::parse_metric(metric)?;
    }
    let engine_config = EngineConfig {
        phase,
        trial_budget: cfg.trial_budget(args.trials, args.low_power),
        ..EngineConfig::default()
    };
    let category = parse_category(&args.category)?;
    let view = if args.worst {
        ViewOrder::WorstFirst
    } else {
        ViewOrder::BestFirst
    };
    if args.rounds == 0 {
        bail!("--rounds must be at least 1");
    }

    let items = load_items(args.items.as_deref(), &args.inline_items)?;
    let names = name_map(&items);
    let store = Arc::new(MemoryStore::with_urls(items.iter().cloned()));
    let item_ids: Vec<ItemId> = (1..=items.len() as ItemId).collect();

    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    let mut rng = SmallRng::seed_from_u64(seed);
    let tastes = Arc::new(HiddenTastes::sample(
        &item_ids,
        args.spread,
        args.segment_spread,
        &mut rng,
    ));
    let voters = make_voters(args.voters, &mut rng);

    let estimate_options = EstimateOptions {
        bootstrap_samples: args
            .bootstrap
            .or(cfg.bootstrap_samples)
            .unwrap_or(EstimateOptions::default().bootstrap_samples),
        seed: Some(seed),
        ..EstimateOptions::default()
    };

    info!(
        items = items.len(),
        voters = voters.len(),
        votes_per_voter = args.votes_per_voter,
        rounds = args.rounds,
        seed,
        "Starting simulated session"
    );

    let jobs = RankingJobs::new();
    let mut pending: Option<JobHandle> = None;
    let mut totals = SessionStats::default();

    for round in 0..args.rounds {
        // Spread votes evenly; earlier rounds take the remainder.
        let votes_each = args.votes_per_voter / args.rounds
            + usize::from(round < args.votes_per_voter % args.rounds);
        let round_seed = seed.wrapping_add(round as u64 + 1);
        let stats = run_round(
            &store,
            &engine_config,
            &tastes,
            &voters,
            votes_each,
            args.conflict_retries,
            round_seed,
        )
        .await?;
        totals += stats;
        info!(
            round = round + 1,
            votes = stats.votes,
            conflicts = stats.conflicts_retried,
            dropped = stats.votes_dropped,
            exhausted = stats.exhausted_voters,
            "Round finished"
        );

        let snapshot = store.fetch_vote_log(None)?;
        let handle = jobs.start(item_ids.clone(), snapshot, estimate_options.clone());
        if let Some(previous) = pending.replace(handle) {
            tokio::spawn(async move {
                if let Err(e) = previous.outcome().await {
                    tracing::warn!("{e:#}");
                }
            });
        }
    }

    let mut engine = VotingEngine::with_seed(store.clone(), engine_config, seed);
    let leaderboard = engine.leaderboard(category, view, args.limit)?;
    let estimate = match pending {
        Some(handle) => handle.outcome().await?,
        None => None,
    };

    if let Some(path) = &args.save_votes {
        let votes = store.fetch_vote_log(None)?;
        votes_file::append_votes(path, &votes)?;
        info!(votes = votes.len(), path = %path.display(), "Saved vote log");
    }

    let true_ranks = tastes.true_ranks(category);
    if args.json {
        output::print_json(&output::JsonSimulationOutput {
            category,
            view,
            voters: voters.len(),
            votes: totals.votes,
            conflicts_retried: totals.conflicts_retried,
            votes_dropped: totals.votes_dropped,
            leaderboard,
            rankings: estimate.as_ref().map(|e| output::rank_output(e, &names)),
        })?;
    } else {
        output::print_leaderboard(&leaderboard, category, view, Some(&true_ranks));
        println!(
            "\n{} votes from {} voters ({} conflicts retried, {} votes dropped)\n",
            totals.votes,
            voters.len(),
            totals.conflicts_retried,
            totals.votes_dropped,
        );
        if let Some(estimate) = &estimate {
            output::print_rankings(estimate, &names, estimate_options.top_k);
        }
    }
    Ok(())
}

async fn run_rank(args: RankArgs) -> Result<()> {
    let cfg = load_cli_config(args.config.clone())?;

    let votes = votes_file::read_vote_log(&args.votes)?;
    let names = match &args.items {
        Some(path) => name_map(&read_items_file(path)?),
        None => HashMap::new(),
    };
    let mut item_ids: Vec<ItemId> = names.keys().copied().collect();
    item_ids.sort_unstable();

    let segment = args.segment.as_deref().map(parse_segment_filter).transpose()?;
    let options = EstimateOptions {
        segment,
        bootstrap_samples: args
            .bootstrap
            .or(cfg.bootstrap_samples)
            .unwrap_or(EstimateOptions::default().bootstrap_samples),
        top_k: args.top_k,
        seed: args.seed,
        ..EstimateOptions::default()
    };

    info!(votes = votes.len(), path = %args.votes.display(), "Loaded vote log");

    let jobs = RankingJobs::new();
    let top_k = options.top_k;
    let estimate = jobs
        .start(item_ids, votes, options)
        .outcome()
        .await?
        .context("Ranking job was superseded")?;

    if args.json {
        output::print_json(&output::rank_output(&estimate, &names))?;
    } else {
        output::print_rankings(&estimate, &names, top_k);
    }
    Ok(())
}
