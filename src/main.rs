use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, Months, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod cohort;
mod db;
mod health;
mod models;
mod report;
mod score;

#[derive(Parser)]
#[command(name = "retention-analytics")]
#[command(about = "Client retention analytics for advisory firms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportTable {
    Leads,
    Revenues,
    Interactions,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import records from a CSV file
    Import {
        #[arg(long, value_enum)]
        table: ImportTable,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute (or reuse today's) health score for one client
    Score {
        #[arg(long)]
        client_id: Uuid,
    },
    /// Compute health scores for all active clients
    ScoreAll,
    /// Show cohort retention for leads entered in a date window
    Cohorts {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Generate a retention report
    Report {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        /// Emit the dashboard JSON shapes instead of markdown
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let as_of = Utc::now();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { table, csv } => {
            let inserted = match table {
                ImportTable::Leads => db::import_leads_csv(&pool, &csv).await?,
                ImportTable::Revenues => db::import_revenues_csv(&pool, &csv).await?,
                ImportTable::Interactions => db::import_interactions_csv(&pool, &csv).await?,
            };
            println!("Inserted {inserted} records from {}.", csv.display());
        }
        Commands::Score { client_id } => {
            let row = health::health_for_client(&pool, client_id, as_of).await?;
            println!(
                "Client {} scored {} ({}) at {}",
                row.client_id,
                row.score,
                row.classification.as_str(),
                row.calculated_at
            );
            let c = row.components;
            println!(
                "- recency {} | frequency {} | monetary {} | trend {} | engagement {}",
                c.recency, c.frequency, c.monetary, c.trend, c.engagement
            );
        }
        Commands::ScoreAll => {
            let scored = health::score_all_clients(&pool, as_of).await?;
            println!("Scored {scored} active clients.");
        }
        Commands::Cohorts { from, to } => {
            let (window_start, window_end) = resolve_window(from, to, as_of.date_naive());
            let (_, cohorts) =
                load_cohorts(&pool, window_start, window_end, as_of.date_naive()).await?;

            if cohorts.is_empty() {
                println!("No leads found for this window.");
                return Ok(());
            }

            println!("Cohorts from {window_start} to {window_end}:");
            for cohort in &cohorts {
                println!(
                    "- {}: {} leads, {} converted ({} tracked), conversion {:.1}%",
                    cohort.cohort,
                    cohort.total_leads,
                    cohort.converted_leads,
                    cohort.tracked_leads,
                    cohort.final_conversion_rate
                );
            }
            if let Some(best) = cohort::best_cohort(&cohorts) {
                println!("Best cohort: {}", best.cohort);
            }
            if let Some(avg) = cohort::average_month3_retention(&cohorts) {
                println!("Average month-3 retention: {avg:.1}%");
            }
        }
        Commands::Report {
            from,
            to,
            out,
            json,
        } => {
            let (window_start, window_end) = resolve_window(from, to, as_of.date_naive());
            let (leads, cohorts) =
                load_cohorts(&pool, window_start, window_end, as_of.date_naive()).await?;
            let funnel = cohort::funnel_metrics(&leads);
            let health = db::fetch_health_summary(&pool).await?;

            let assembled = report::assemble(
                cohorts,
                funnel,
                health,
                window_start,
                window_end,
                as_of.date_naive(),
            );
            let rendered = if json {
                serde_json::to_string_pretty(&assembled)?
            } else {
                report::render_markdown(&assembled)
            };
            std::fs::write(&out, rendered)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

/// Defaults to the last twelve entry months when no window is given.
fn resolve_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let window_end = to.unwrap_or(today);
    let window_start = from.unwrap_or(cohort::month_start(window_end) - Months::new(11));
    (window_start, window_end)
}

async fn load_cohorts(
    pool: &PgPool,
    window_start: NaiveDate,
    window_end: NaiveDate,
    as_of: NaiveDate,
) -> anyhow::Result<(Vec<models::LeadRecord>, Vec<models::CohortData>)> {
    // Leads, links and revenues do not depend on each other, so fetch them
    // concurrently.
    let (leads, links, revenues) = tokio::try_join!(
        db::fetch_leads_between(
            pool,
            db::day_start_utc(window_start),
            db::day_start_utc(window_end) + Duration::days(1),
        ),
        db::fetch_client_links(pool),
        db::fetch_revenues_since(pool, cohort::month_start(window_start)),
    )?;
    let revenue_months = db::revenue_months_by_client(&revenues);
    let cohorts = cohort::build_cohorts(&leads, &links, &revenue_months, as_of);
    Ok((leads, cohorts))
}
