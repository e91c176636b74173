use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;

use ragstar_core::{
    BuildEvent, BuildTally, CancellationToken, OllamaSummarizer, PipelineOutcome, Ragstar,
    RagstarConfig, RankOptions, RepositoryDescriptor, SearchOptions, SummaryRecord,
};

#[derive(Parser)]
#[command(name = "ragstar", version, about = "Find the repository that matches what you want to do")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, summarize and index repositories
    Build {
        /// Repository URLs; the configured repositories when omitted
        urls: Vec<String>,
        /// Explicit name for a single URL
        #[arg(long)]
        name: Option<String>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Rank indexed repositories against an intent
    Query {
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        bm25_weight: Option<f64>,
        #[arg(long)]
        dense_weight: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Show one summary, or list every indexed repository
    View {
        name: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Remove one repository from the index
    Delete { name: String },
    /// Remove every repository from the index
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Pull the summarization model into Ollama
    Pull { model: Option<String> },
    /// Print the effective configuration (secrets removed)
    Config,
}

#[derive(Serialize)]
struct RecordView<'a> {
    repo_name: &'a str,
    url: &'a str,
    summary_text: &'a str,
    summary_length: usize,
    created_at: String,
}

impl<'a> From<&'a SummaryRecord> for RecordView<'a> {
    fn from(record: &'a SummaryRecord) -> Self {
        Self {
            repo_name: &record.repo_name,
            url: &record.url,
            summary_text: &record.summary_text,
            summary_length: record.summary_length(),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = RagstarConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Build { urls, name, json } => build(config, urls, name, json).await,
        Command::Query {
            text,
            limit,
            bm25_weight,
            dense_weight,
            json,
        } => {
            let ragstar = Ragstar::open(config).await?;
            let defaults = ragstar.default_rank_options();
            let options = RankOptions {
                top_k: limit.unwrap_or(defaults.top_k),
                bm25_weight: bm25_weight.unwrap_or(defaults.bm25_weight),
                dense_weight: dense_weight.unwrap_or(defaults.dense_weight),
            };
            query(&ragstar, &text.join(" "), options, json).await
        }
        Command::View { name, json } => {
            let ragstar = Ragstar::open(config).await?;
            view(&ragstar, name.as_deref(), json).await
        }
        Command::Delete { name } => {
            let ragstar = Ragstar::open(config).await?;
            if !ragstar.delete(&name).await? {
                bail!("no indexed repository named '{name}'");
            }
            println!("Deleted {name}");
            Ok(())
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every record without --yes");
            }
            let ragstar = Ragstar::open(config).await?;
            ragstar.delete_all().await?;
            println!("Index cleared");
            Ok(())
        }
        Command::Pull { model } => {
            let summarizer = OllamaSummarizer::new(config.summarizer.clone())?;
            let model = model.unwrap_or_else(|| summarizer.model().to_string());
            println!("Pulling {model}...");
            summarizer.pull_model(Some(&model)).await?;
            println!("Model {model} is ready");
            Ok(())
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
    }
}

fn descriptors(
    config: &RagstarConfig,
    urls: &[String],
    name: Option<&str>,
) -> anyhow::Result<Vec<RepositoryDescriptor>> {
    if urls.is_empty() {
        if name.is_some() {
            bail!("--name needs exactly one URL");
        }
        let configured = config.descriptors()?;
        if configured.is_empty() {
            bail!("no URLs given and no [[repositories]] in the configuration");
        }
        return Ok(configured);
    }
    if name.is_some() && urls.len() != 1 {
        bail!("--name needs exactly one URL");
    }
    urls.iter()
        .map(|url| RepositoryDescriptor::new(name, url).map_err(anyhow::Error::from))
        .collect()
}

async fn build(
    config: RagstarConfig,
    urls: Vec<String>,
    name: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let requested = descriptors(&config, &urls, name.as_deref())?;
    let ragstar = Ragstar::open(config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("[Build] Interrupted, finishing running repositories");
                cancel.cancel();
            }
        }
    });

    let mut tally = BuildTally::default();
    let mut events = ragstar.stream_build(requested, cancel);
    while let Some(event) = events.next().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        if let BuildEvent::Progress { outcome, .. } = &event {
            tally.record(outcome);
        }
    }

    if tally.failed > 0 || tally.cancelled > 0 {
        bail!(
            "build incomplete: {} failed, {} cancelled",
            tally.failed,
            tally.cancelled
        );
    }
    Ok(())
}

fn print_event(event: &BuildEvent) {
    match event {
        BuildEvent::Start { total } => println!("Building {total} repositories"),
        BuildEvent::Progress {
            index,
            repo_name,
            outcome,
        } => match outcome {
            PipelineOutcome::Success { record } => println!(
                "[{}] {} ok ({} chars)",
                index + 1,
                repo_name,
                record.summary_length()
            ),
            PipelineOutcome::Failed { stage, message, .. } => {
                println!("[{}] {} failed at {}: {}", index + 1, repo_name, stage, message)
            }
            PipelineOutcome::Cancelled { .. } => {
                println!("[{}] {} cancelled", index + 1, repo_name)
            }
        },
        BuildEvent::Complete {
            succeeded,
            failed,
            cancelled,
        } => println!("Done: {succeeded} succeeded, {failed} failed, {cancelled} cancelled"),
    }
}

async fn query(
    ragstar: &Ragstar,
    text: &str,
    options: RankOptions,
    json: bool,
) -> anyhow::Result<()> {
    let results = ragstar
        .search(SearchOptions {
            query: text.to_string(),
            limit: Some(options.top_k),
            bm25_weight: Some(options.bm25_weight),
            dense_weight: Some(options.dense_weight),
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.results.is_empty() {
        println!("No matching repositories");
        return Ok(());
    }
    for (rank, hit) in results.results.iter().enumerate() {
        println!(
            "{}. {} ({:.3}; bm25 {:.3}, dense {:.3})",
            rank + 1,
            hit.repo_name,
            hit.score,
            hit.bm25_score,
            hit.dense_score
        );
        println!("   {}", hit.url);
        println!("   {}", hit.summary.replace('\n', " "));
    }
    Ok(())
}

async fn view(ragstar: &Ragstar, name: Option<&str>, json: bool) -> anyhow::Result<()> {
    match name {
        Some(name) => {
            let Some(record) = ragstar.get(name).await? else {
                bail!("no indexed repository named '{name}'");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&RecordView::from(&record))?);
            } else {
                println!("{} <{}>", record.repo_name, record.url);
                println!("indexed {}\n", record.created_at.to_rfc3339());
                println!("{}", record.summary_text);
            }
        }
        None => {
            let records = ragstar.list().await?;
            if json {
                let views: Vec<RecordView<'_>> = records.iter().map(RecordView::from).collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                let stats = ragstar.stats().await?;
                for record in &records {
                    println!("{}\t{}", record.repo_name, record.url);
                }
                println!(
                    "{} repositories, {} terms ({:?} store at {})",
                    stats.records,
                    stats.vocabulary_size,
                    stats.backend,
                    stats.store_path.display()
                );
            }
        }
    }
    Ok(())
}
