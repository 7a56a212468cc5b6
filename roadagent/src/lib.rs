pub mod notifier;
pub mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use incstorage::{IncidentFilter, IncidentStatus, IncidentStore, StorageConfig};
use tracing_subscriber::{fmt, EnvFilter};
use trafikfetcher::{ClientConfig, IncidentQuery, TrafikverketClient};

use crate::notifier::{Level, WebhookNotifier};
use crate::pipeline::{CycleOutcome, Pipeline};

/// Runs the command line interface for the road incident pipeline.
pub async fn run_cli() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::List(args) => run_list(args),
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs one fetch → transform → load cycle against the incident store
    Sync(SyncArgs),
    /// Lists stored incidents through the store's read contract
    List(ListArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// SQLite database file
    #[arg(long, default_value = "incidents.sqlite")]
    db_path: PathBuf,
    /// How many days back the fetch window reaches
    #[arg(long, env = "DAYS_BACK", default_value_t = 1)]
    days_back: i64,
    /// How many days ahead upcoming incidents may start
    #[arg(long, default_value_t = 14)]
    future_days: i64,
    /// Restrict the fetch to a county number (repeatable)
    #[arg(long = "county")]
    counties: Vec<u32>,
    /// Trafikverket authentication key
    #[arg(long, env = "TRAFIKVERKET_API_KEY", hide_env_values = true)]
    api_key: String,
    /// Trafikverket data endpoint
    #[arg(
        long,
        env = "TRAFIKVERKET_URL",
        default_value = "https://api.trafikinfo.trafikverket.se/v2/data.xml"
    )]
    base_url: String,
    /// Webhook URL for run notifications
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    webhook_url: Option<String>,
    /// Warn when a cycle yields fewer rows than this
    #[arg(long, env = "EXPECT_MIN_ROWS")]
    expect_min_rows: Option<u64>,
    /// Warn when a cycle yields more rows than this
    #[arg(long, env = "EXPECT_MAX_ROWS")]
    expect_max_rows: Option<u64>,
    /// Print the cycle report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct ListArgs {
    /// SQLite database file
    #[arg(long, default_value = "incidents.sqlite")]
    db_path: PathBuf,
    /// Filter on status: ongoing, upcoming or ended
    #[arg(long)]
    status: Option<String>,
    /// Filter on normalized county name
    #[arg(long)]
    county: Option<String>,
    /// Filter on road number, e.g. E6
    #[arg(long)]
    road: Option<String>,
    /// Substring match on the description text
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: u32,
    /// Print matching incidents as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn run_sync(args: SyncArgs) -> anyhow::Result<()> {
    let notifier = WebhookNotifier::new(args.webhook_url.clone());
    let store = IncidentStore::open(&StorageConfig::from_db_path(&args.db_path))?;
    store.ensure_schema()?;
    let client = TrafikverketClient::new(ClientConfig::new(&args.api_key, &args.base_url))?;
    let pipeline = Pipeline::new(Arc::new(client), Arc::new(store));

    let query = IncidentQuery::looking_back(Utc::now(), args.days_back, Some(args.future_days))
        .with_counties(args.counties.clone());

    notifier
        .notify(
            Level::Info,
            &format!(
                "sync started • db=`{}` • days_back=`{}`",
                args.db_path.display(),
                args.days_back
            ),
        )
        .await;

    let report = pipeline.run_cycle(&query).await;

    match &report.outcome {
        CycleOutcome::Completed => {
            notifier
                .notify(
                    Level::Success,
                    &format!(
                        "sync done • fetched=`{}` • upserted=`{}` • skipped=`{}` • took=`{} ms`",
                        report.fetched,
                        report.upserted(),
                        report.skipped,
                        report.duration_ms
                    ),
                )
                .await;
            for warning in row_count_warnings(
                report.transformed as u64,
                args.expect_min_rows,
                args.expect_max_rows,
            ) {
                notifier.notify(Level::Warning, &warning).await;
            }
        }
        CycleOutcome::Failed { stage, message } => {
            notifier
                .notify(Level::Error, &format!("sync failed during {stage}: {message}"))
                .await;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "fetched {} record(s), stored {} ({} new, {} updated), skipped {}",
            report.fetched,
            report.upserted(),
            report.inserted,
            report.updated,
            report.skipped
        );
    }

    match report.outcome {
        CycleOutcome::Completed => Ok(()),
        CycleOutcome::Failed { stage, .. } => {
            anyhow::bail!("cycle failed during {stage}")
        }
    }
}

/// Sanity warnings when a cycle's row count falls outside the expected
/// bounds. Zero rows always warns; the bounds are optional.
fn row_count_warnings(rows: u64, expect_min: Option<u64>, expect_max: Option<u64>) -> Vec<String> {
    let mut warnings = Vec::new();
    if rows == 0 {
        warnings.push("sync yielded 0 rows".to_string());
    }
    if let Some(min) = expect_min {
        if rows < min {
            warnings.push(format!("row count {rows} below expected minimum {min}"));
        }
    }
    if let Some(max) = expect_max {
        if rows > max {
            warnings.push(format!("row count {rows} above expected maximum {max}"));
        }
    }
    warnings
}

fn run_list(args: ListArgs) -> anyhow::Result<()> {
    let store = IncidentStore::open(&StorageConfig::from_db_path(&args.db_path))?;
    store.ensure_schema()?;

    let status = args
        .status
        .as_deref()
        .map(str::parse::<IncidentStatus>)
        .transpose()
        .map_err(|err| anyhow::anyhow!(err))?;
    let filter = IncidentFilter {
        status,
        county: args.county.clone(),
        road_number: args.road.clone(),
        search: args.search.clone(),
        limit: Some(args.limit),
        ..Default::default()
    };

    let incidents = store.read(&filter)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&incidents)?);
        return Ok(());
    }

    if incidents.is_empty() {
        println!("no incidents match the given filter");
        return Ok(());
    }
    for incident in &incidents {
        let start = incident
            .start_time
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unscheduled".to_string());
        println!(
            "{:<10} {:<22} {:<8} {:<16} {}",
            incident.status,
            start,
            incident.road_number.as_deref().unwrap_or("-"),
            incident.county.as_deref().unwrap_or("-"),
            incident.description
        );
    }
    Ok(())
}
