use std::collections::HashMap;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cohort::month_start;
use crate::db;
use crate::models::{
    ClientHealthScore, HealthScoreComponents, InteractionRecord, RevenueRecord,
};
use crate::score;

/// Time boundaries for one scoring run, all derived from a single injected
/// `as_of` anchor so runs are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWindows {
    pub as_of: DateTime<Utc>,
    /// First day of the month six months before `as_of`'s month.
    pub six_months_ago: NaiveDate,
    /// Rolling 90-day boundary for interactions.
    pub ninety_days_ago: DateTime<Utc>,
    pub current_month_start: NaiveDate,
    /// Trend pair: the last completed month against the one before it, so a
    /// partial current month never reads as churn.
    pub last_month_start: NaiveDate,
    pub two_months_ago_start: NaiveDate,
}

impl ScoreWindows {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        let current_month_start = month_start(as_of.date_naive());
        ScoreWindows {
            as_of,
            six_months_ago: current_month_start - Months::new(6),
            ninety_days_ago: as_of - Duration::days(90),
            current_month_start,
            last_month_start: current_month_start - Months::new(1),
            two_months_ago_start: current_month_start - Months::new(2),
        }
    }
}

/// Raw facts for one client, already restricted to the scoring windows.
#[derive(Debug, Clone, Copy, Default)]
struct ClientFacts {
    days_since_last_revenue: Option<i64>,
    revenue_count: usize,
    avg_monthly_revenue: f64,
    last_month_revenue: f64,
    prior_month_revenue: f64,
    interactions_last_90_days: usize,
}

fn gather_facts(
    windows: &ScoreWindows,
    revenues: &[RevenueRecord],
    interactions: &[InteractionRecord],
) -> ClientFacts {
    let as_of_day = windows.as_of.date_naive();
    // Future-dated rows are bad import data and must not inflate recency.
    let days_since_last_revenue = revenues
        .iter()
        .map(|r| r.date)
        .filter(|date| *date <= as_of_day)
        .max()
        .map(|last| (as_of_day - last).num_days());

    let total: f64 = revenues.iter().map(|r| r.our_share).sum();
    let month_sum = |month: NaiveDate| -> f64 {
        revenues
            .iter()
            .filter(|r| month_start(r.date) == month)
            .map(|r| r.our_share)
            .sum()
    };

    ClientFacts {
        days_since_last_revenue,
        revenue_count: revenues.len(),
        avg_monthly_revenue: total / 6.0,
        last_month_revenue: month_sum(windows.last_month_start),
        prior_month_revenue: month_sum(windows.two_months_ago_start),
        interactions_last_90_days: interactions
            .iter()
            .filter(|i| i.created_at >= windows.ninety_days_ago)
            .count(),
    }
}

fn score_row(
    client_id: Uuid,
    facts: &ClientFacts,
    median_avg_revenue: f64,
    as_of: DateTime<Utc>,
) -> ClientHealthScore {
    let components = HealthScoreComponents {
        recency: score::recency_score(facts.days_since_last_revenue),
        frequency: score::frequency_score(facts.revenue_count),
        monetary: score::monetary_score(facts.avg_monthly_revenue, median_avg_revenue),
        trend: score::trend_score(facts.last_month_revenue, facts.prior_month_revenue),
        engagement: score::engagement_score(facts.interactions_last_90_days),
    };
    let score = score::blend(&components);
    ClientHealthScore {
        client_id,
        score,
        classification: score::classify(score),
        components,
        calculated_at: as_of,
    }
}

fn group_revenues(revenues: Vec<RevenueRecord>) -> HashMap<Uuid, Vec<RevenueRecord>> {
    let mut grouped: HashMap<Uuid, Vec<RevenueRecord>> = HashMap::new();
    for revenue in revenues {
        grouped.entry(revenue.client_id).or_default().push(revenue);
    }
    grouped
}

fn group_interactions(
    interactions: Vec<InteractionRecord>,
) -> HashMap<Uuid, Vec<InteractionRecord>> {
    let mut grouped: HashMap<Uuid, Vec<InteractionRecord>> = HashMap::new();
    for interaction in interactions {
        grouped
            .entry(interaction.client_id)
            .or_default()
            .push(interaction);
    }
    grouped
}

/// Per-client six-month revenue averages, the population for the cross-client
/// median used by the monetary component.
fn median_of_monthly_averages(grouped: &HashMap<Uuid, Vec<RevenueRecord>>) -> f64 {
    score::median(
        grouped
            .values()
            .map(|revenues| revenues.iter().map(|r| r.our_share).sum::<f64>() / 6.0)
            .collect(),
    )
}

/// Returns today's score for one client, computing and persisting a fresh row
/// only when none exists for `as_of`'s calendar day.
pub async fn health_for_client(
    pool: &PgPool,
    client_id: Uuid,
    as_of: DateTime<Utc>,
) -> anyhow::Result<ClientHealthScore> {
    if let Some(cached) = db::fetch_score_for_day(pool, client_id, as_of.date_naive()).await? {
        debug!(%client_id, "health score cache hit");
        return Ok(cached);
    }

    let windows = ScoreWindows::at(as_of);
    let (all_revenues, interactions) = tokio::try_join!(
        db::fetch_revenues_since(pool, windows.six_months_ago),
        db::fetch_client_interactions_since(pool, client_id, windows.ninety_days_ago),
    )?;

    // The monetary baseline is the median over all clients, so the single-
    // client path still scans the full revenue window once.
    let mut grouped = group_revenues(all_revenues);
    let median_avg_revenue = median_of_monthly_averages(&grouped);
    let revenues = grouped.remove(&client_id).unwrap_or_default();

    let facts = gather_facts(&windows, &revenues, &interactions);
    let row = score_row(client_id, &facts, median_avg_revenue, as_of);
    db::insert_health_scores(pool, std::slice::from_ref(&row)).await?;
    Ok(row)
}

/// Scores every active client in one pass: two bulk reads, in-memory
/// grouping, one shared median, batched appends. Returns the number of
/// clients scored.
pub async fn score_all_clients(pool: &PgPool, as_of: DateTime<Utc>) -> anyhow::Result<usize> {
    let windows = ScoreWindows::at(as_of);
    let (client_ids, revenues, interactions) = tokio::try_join!(
        db::fetch_active_client_ids(pool),
        db::fetch_revenues_since(pool, windows.six_months_ago),
        db::fetch_interactions_since(pool, windows.ninety_days_ago),
    )?;

    let grouped_revenues = group_revenues(revenues);
    let grouped_interactions = group_interactions(interactions);
    let median_avg_revenue = median_of_monthly_averages(&grouped_revenues);

    let empty_revenues: Vec<RevenueRecord> = Vec::new();
    let empty_interactions: Vec<InteractionRecord> = Vec::new();
    let rows: Vec<ClientHealthScore> = client_ids
        .iter()
        .map(|client_id| {
            let facts = gather_facts(
                &windows,
                grouped_revenues.get(client_id).unwrap_or(&empty_revenues),
                grouped_interactions
                    .get(client_id)
                    .unwrap_or(&empty_interactions),
            );
            score_row(*client_id, &facts, median_avg_revenue, as_of)
        })
        .collect();

    db::insert_health_scores(pool, &rows).await?;
    info!(clients = rows.len(), "bulk health scoring complete");
    Ok(rows.len())
}
