use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use news_autopost::approval::{self, ApprovalEvent};
use news_autopost::card::CardRenderer;
use news_autopost::collect::{self, Collector, HeadlineWriter};
use news_autopost::config::{self, Credentials};
use news_autopost::context::AppContext;
use news_autopost::git;
use news_autopost::ledger::Ledger;
use news_autopost::metadata;
use news_autopost::model::{CandidateBatch, CandidateStatus};
use news_autopost::publish::Orchestrator;

#[derive(Debug, Parser)]
#[command(author, version, about = "Turn news feeds into reviewed social posts")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collect articles, render cards and open a proposal issue
    Collect(CollectArgs),
    /// Publish approved candidates of a batch
    Post(PostArgs),
    /// Print the candidates stored in an issue body or cache file
    Inspect {
        /// Issue body (markdown) or latest-metadata.json
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
struct CollectArgs {
    /// JSON list of feed sources
    #[arg(long, default_value = "feeds.json")]
    feeds: PathBuf,
}

#[derive(Debug, Args)]
struct PostArgs {
    /// Candidate numbers to publish; read from GITHUB_EVENT_PATH when empty
    numbers: Vec<u32>,

    /// Issue number holding the batch
    #[arg(long)]
    issue: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    if let Command::Inspect { file } = &cli.command {
        return inspect(file).await;
    }

    let cfg = config::load(Some(&cli.config))?;
    cfg.ensure_dirs()?;
    let ctx = AppContext::new(cfg, Credentials::from_env())?;

    match cli.command {
        Command::Collect(args) => run_collect(&ctx, &args).await,
        Command::Post(args) => run_post(&ctx, args).await,
        Command::Inspect { .. } => Ok(()),
    }
}

async fn run_collect(ctx: &AppContext, args: &CollectArgs) -> Result<()> {
    let cfg = &ctx.config;
    let sources = collect::feeds::load_sources(&args.feeds).await?;
    info!(sources = sources.len(), "starting collect");
    let ledger = Ledger::load(cfg.ledger_path()).await;

    let renderer = CardRenderer::new(cfg.image.clone());
    let writer = HeadlineWriter::new(cfg.comment.max_chars);
    let collector = Collector::new(cfg, &ctx.http, &writer, &renderer);
    let collected = collector.collect(&sources, ledger.hashes()).await;

    for failure in &collected.failures {
        warn!(
            url = %failure.url,
            stage = failure.stage,
            "failed candidate: {} ({})",
            failure.title,
            failure.reason
        );
    }
    let Some(mut batch) = collected.batch else {
        info!(failures = collected.failures.len(), "no new candidates");
        return Ok(());
    };

    let store = ctx.batch_store();
    collect::persist(
        &mut batch,
        Path::new(&cfg.app.out_dir),
        &store,
        &cfg.github.label,
        cfg.app.utc_offset_minutes,
    )
    .await?;
    info!(
        candidates = batch.candidates.len(),
        failures = collected.failures.len(),
        batch_id = ?batch.batch_id,
        "collect finished"
    );
    Ok(())
}

async fn run_post(ctx: &AppContext, args: PostArgs) -> Result<()> {
    ctx.credentials.require_oauth2()?;

    let (approved, batch_id) = if !args.numbers.is_empty() {
        (approval::normalize(args.numbers), args.issue)
    } else {
        let path = std::env::var("GITHUB_EVENT_PATH")
            .map_err(|_| anyhow!("no candidate numbers given and GITHUB_EVENT_PATH is unset"))?;
        let event = ApprovalEvent::read(Path::new(&path)).await?;
        let approved = event.approved();
        if approved.is_empty() {
            info!("comment carries no approval; nothing to do");
            return Ok(());
        }
        info!(
            ?approved,
            author = event.author.as_deref().unwrap_or("unknown"),
            "approval comment received"
        );
        (approved, args.issue.or(event.issue_number))
    };

    let store = ctx.batch_store();
    let mut batch = store.resolve(batch_id).await?;
    if batch.batch_id.is_none() {
        batch.batch_id = batch_id;
    }

    let present: Vec<u32> = approved
        .iter()
        .copied()
        .filter(|id| batch.candidate(*id).is_some())
        .collect();
    if present.is_empty() {
        warn!(?approved, candidates = batch.candidates.len(), "approved numbers are not in the batch");
        bail!("no approved candidates found");
    }

    let endpoints = ctx.publish_endpoints().await?;
    let mut ledger = Ledger::load(ctx.config.ledger_path()).await;
    let run = Orchestrator::new(&mut ledger, &endpoints, &ctx.config.app.out_dir)
        .run(&mut batch, &approved, &store)
        .await;

    // Posts already happened; the ledger must reach the repository even
    // when the batch could not be written back.
    if run.report.posted() > 0 {
        git::sync_ledger_if_ci(ledger.path()).await;
    }
    let report = run.into_result()?;

    if report.posted() > 0 {
        if let (Some(tracker), Some(number)) = (store.tracker(), batch.batch_id) {
            if let Err(err) = tracker.comment(number, &report.summary(&approved)).await {
                warn!(batch_id = number, "failed to comment results: {:#}", err);
            }
        }
    }
    for line in &report.lines {
        info!("{}", line);
    }
    info!(posted = report.posted(), skipped = report.skipped(), "post finished");
    Ok(())
}

async fn inspect(file: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let batch = match metadata::decode(&raw)? {
        Some(batch) => batch,
        None => metadata::parse_payload(&raw)?,
    };
    print_batch(&batch);
    Ok(())
}

fn print_batch(batch: &CandidateBatch) {
    println!(
        "batch {} generated {} ({}) run {}",
        batch.batch_id.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
        batch.generated_at.to_rfc3339(),
        batch.timezone,
        batch.run_id.as_deref().unwrap_or("-"),
    );
    println!(
        "proposed {} / posted {} / skipped {}",
        batch.count_by_status(CandidateStatus::Proposed),
        batch.count_by_status(CandidateStatus::Posted),
        batch.count_by_status(CandidateStatus::Skipped),
    );
    for c in &batch.candidates {
        let detail = c
            .published_id
            .as_deref()
            .or(c.rejection_reason.as_deref())
            .unwrap_or("");
        println!(
            "{:>3}  {:<8}  {:<20}  {}  {}",
            c.id,
            c.status.as_str(),
            detail,
            c.article_title,
            c.url
        );
    }
}
