use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::cohort::month_start;
use crate::models::{
    Classification, ClientHealthScore, ClientLink, HealthScoreComponents, HealthScoreSummary,
    InteractionRecord, LeadRecord, LeadStatus, RevenueRecord,
};

/// Single-request row ceiling; reads loop past it so callers never see a
/// partial result set.
const PAGE_SIZE: i64 = 1000;

/// Batch size for score inserts, sized for backend payload limits.
const INSERT_BATCH: usize = 500;

pub fn day_start_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn fetch_revenues_since(
    pool: &PgPool,
    since: NaiveDate,
) -> anyhow::Result<Vec<RevenueRecord>> {
    let mut records = Vec::new();
    let mut offset = 0i64;
    loop {
        let rows = sqlx::query(
            "SELECT client_id, revenue_date, our_share \
             FROM retention_analytics.revenues \
             WHERE revenue_date >= $1 \
             ORDER BY revenue_date, id \
             LIMIT $2 OFFSET $3",
        )
        .bind(since)
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to fetch revenues")?;

        let page_len = rows.len();
        for row in rows {
            records.push(RevenueRecord {
                client_id: row.get("client_id"),
                date: row.get("revenue_date"),
                our_share: row.get("our_share"),
            });
        }
        if (page_len as i64) < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
        debug!(offset, "paging revenues");
    }
    Ok(records)
}

pub async fn fetch_interactions_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<InteractionRecord>> {
    let mut records = Vec::new();
    let mut offset = 0i64;
    loop {
        let rows = sqlx::query(
            "SELECT client_id, created_at \
             FROM retention_analytics.interactions \
             WHERE created_at >= $1 \
             ORDER BY created_at, id \
             LIMIT $2 OFFSET $3",
        )
        .bind(since)
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to fetch interactions")?;

        let page_len = rows.len();
        for row in rows {
            records.push(InteractionRecord {
                client_id: row.get("client_id"),
                created_at: row.get("created_at"),
            });
        }
        if (page_len as i64) < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
        debug!(offset, "paging interactions");
    }
    Ok(records)
}

pub async fn fetch_client_interactions_since(
    pool: &PgPool,
    client_id: Uuid,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<InteractionRecord>> {
    let mut records = Vec::new();
    let mut offset = 0i64;
    loop {
        let rows = sqlx::query(
            "SELECT client_id, created_at \
             FROM retention_analytics.interactions \
             WHERE client_id = $1 AND created_at >= $2 \
             ORDER BY created_at, id \
             LIMIT $3 OFFSET $4",
        )
        .bind(client_id)
        .bind(since)
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to fetch client interactions")?;

        let page_len = rows.len();
        for row in rows {
            records.push(InteractionRecord {
                client_id: row.get("client_id"),
                created_at: row.get("created_at"),
            });
        }
        if (page_len as i64) < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }
    Ok(records)
}

/// Leads created in `[from, until)`. Callers build the half-open bound from
/// an inclusive date window.
pub async fn fetch_leads_between(
    pool: &PgPool,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> anyhow::Result<Vec<LeadRecord>> {
    let mut records = Vec::new();
    let mut offset = 0i64;
    loop {
        let rows = sqlx::query(
            "SELECT id, created_at, status, converted_at \
             FROM retention_analytics.leads \
             WHERE created_at >= $1 AND created_at < $2 \
             ORDER BY created_at, id \
             LIMIT $3 OFFSET $4",
        )
        .bind(from)
        .bind(until)
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to fetch leads")?;

        let page_len = rows.len();
        for row in rows {
            let status: String = row.get("status");
            records.push(LeadRecord {
                id: row.get("id"),
                created_at: row.get("created_at"),
                status: LeadStatus::parse(&status)?,
                converted_at: row.get("converted_at"),
            });
        }
        if (page_len as i64) < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
        debug!(offset, "paging leads");
    }
    Ok(records)
}

pub async fn fetch_client_links(pool: &PgPool) -> anyhow::Result<Vec<ClientLink>> {
    let mut links = Vec::new();
    let mut offset = 0i64;
    loop {
        let rows = sqlx::query(
            "SELECT id, converted_from_lead_id \
             FROM retention_analytics.clients \
             WHERE converted_from_lead_id IS NOT NULL \
             ORDER BY id \
             LIMIT $1 OFFSET $2",
        )
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to fetch client links")?;

        let page_len = rows.len();
        for row in rows {
            links.push(ClientLink {
                client_id: row.get("id"),
                converted_from_lead_id: row.get("converted_from_lead_id"),
            });
        }
        if (page_len as i64) < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }
    Ok(links)
}

pub async fn fetch_active_client_ids(pool: &PgPool) -> anyhow::Result<Vec<Uuid>> {
    let mut ids = Vec::new();
    let mut offset = 0i64;
    loop {
        let rows = sqlx::query(
            "SELECT id FROM retention_analytics.clients \
             WHERE active \
             ORDER BY id \
             LIMIT $1 OFFSET $2",
        )
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to fetch active clients")?;

        let page_len = rows.len();
        for row in rows {
            ids.push(row.get("id"));
        }
        if (page_len as i64) < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }
    Ok(ids)
}

/// Most recent score row computed for `client_id` on the given UTC calendar
/// day, if any. Duplicate same-day rows resolve to the latest one.
pub async fn fetch_score_for_day(
    pool: &PgPool,
    client_id: Uuid,
    day: NaiveDate,
) -> anyhow::Result<Option<ClientHealthScore>> {
    let row = sqlx::query(
        "SELECT client_id, score, classification, recency, frequency, monetary, \
                trend, engagement, calculated_at \
         FROM retention_analytics.client_health_scores \
         WHERE client_id = $1 \
           AND date(calculated_at AT TIME ZONE 'UTC') = $2 \
         ORDER BY calculated_at DESC \
         LIMIT 1",
    )
    .bind(client_id)
    .bind(day)
    .fetch_optional(pool)
    .await
    .context("failed to fetch cached health score")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let classification: String = row.get("classification");
    Ok(Some(ClientHealthScore {
        client_id: row.get("client_id"),
        score: row.get("score"),
        classification: Classification::parse(&classification)?,
        components: HealthScoreComponents {
            recency: row.get("recency"),
            frequency: row.get("frequency"),
            monetary: row.get("monetary"),
            trend: row.get("trend"),
            engagement: row.get("engagement"),
        },
        calculated_at: row.get("calculated_at"),
    }))
}

/// Appends score rows in fixed batches. A failed batch aborts the remaining
/// ones and surfaces the error; already-committed batches stay committed.
pub async fn insert_health_scores(
    pool: &PgPool,
    rows: &[ClientHealthScore],
) -> anyhow::Result<()> {
    for (batch_index, batch) in rows.chunks(INSERT_BATCH).enumerate() {
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO retention_analytics.client_health_scores \
             (id, client_id, score, classification, recency, frequency, \
              monetary, trend, engagement, calculated_at) ",
        );
        builder.push_values(batch, |mut values, row| {
            values
                .push_bind(Uuid::new_v4())
                .push_bind(row.client_id)
                .push_bind(row.score)
                .push_bind(row.classification.as_str())
                .push_bind(row.components.recency)
                .push_bind(row.components.frequency)
                .push_bind(row.components.monetary)
                .push_bind(row.components.trend)
                .push_bind(row.components.engagement)
                .push_bind(row.calculated_at);
        });
        builder
            .build()
            .execute(pool)
            .await
            .with_context(|| format!("health score insert failed at batch {batch_index}"))?;
        debug!(batch = batch_index, rows = batch.len(), "inserted health scores");
    }
    Ok(())
}

/// Classification counts over the latest score row per client.
pub async fn fetch_health_summary(pool: &PgPool) -> anyhow::Result<HealthScoreSummary> {
    let row = sqlx::query(
        "SELECT \
            COUNT(*) FILTER (WHERE classification = 'healthy') AS healthy, \
            COUNT(*) FILTER (WHERE classification = 'attention') AS attention, \
            COUNT(*) FILTER (WHERE classification = 'critical') AS critical, \
            COUNT(*) FILTER (WHERE classification = 'lost') AS lost, \
            COUNT(*) AS total, \
            COALESCE(AVG(score::double precision), 0::double precision) AS average_score \
         FROM (\
            SELECT DISTINCT ON (client_id) classification, score \
            FROM retention_analytics.client_health_scores \
            ORDER BY client_id, calculated_at DESC\
         ) latest",
    )
    .fetch_one(pool)
    .await
    .context("failed to aggregate health summary")?;

    Ok(HealthScoreSummary {
        healthy: row.get("healthy"),
        attention: row.get("attention"),
        critical: row.get("critical"),
        lost: row.get("lost"),
        total: row.get("total"),
        average_score: row.get("average_score"),
    })
}

/// Calendar months with at least one revenue record, per client. First-of-
/// month keys, ready for the cohort builder.
pub fn revenue_months_by_client(
    revenues: &[RevenueRecord],
) -> HashMap<Uuid, HashSet<NaiveDate>> {
    let mut months: HashMap<Uuid, HashSet<NaiveDate>> = HashMap::new();
    for revenue in revenues {
        months
            .entry(revenue.client_id)
            .or_default()
            .insert(month_start(revenue.date));
    }
    months
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let leads = vec![
        (
            Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e01")?,
            "Mara Ostheim",
            "converted",
            (2026, 2, 3),
            Some((2026, 2, 18)),
        ),
        (
            Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e02")?,
            "Jonas Brandt",
            "converted",
            (2026, 2, 11),
            Some((2026, 3, 2)),
        ),
        (
            Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e03")?,
            "Petra Vogel",
            "in_contact",
            (2026, 3, 6),
            None,
        ),
        (
            Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e04")?,
            "Henrik Sauer",
            "converted",
            (2026, 3, 14),
            Some((2026, 4, 5)),
        ),
        (
            Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e05")?,
            "Leonie Adler",
            "lost",
            (2026, 3, 21),
            None,
        ),
        (
            Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e06")?,
            "Tim Krueger",
            "new",
            (2026, 4, 2),
            None,
        ),
    ];

    for (id, name, status, (cy, cm, cd), converted) in leads {
        let created_at = day_start_utc(
            NaiveDate::from_ymd_opt(cy, cm, cd).context("invalid seed date")?,
        );
        let converted_at = match converted {
            Some((y, m, d)) => Some(day_start_utc(
                NaiveDate::from_ymd_opt(y, m, d).context("invalid seed date")?,
            )),
            None => None,
        };
        sqlx::query(
            r#"
            INSERT INTO retention_analytics.leads (id, full_name, status, created_at, converted_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, converted_at = EXCLUDED.converted_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(status)
        .bind(created_at)
        .bind(converted_at)
        .execute(pool)
        .await?;
    }

    let clients = vec![
        (
            Uuid::parse_str("1f9ad210-55c3-4b8a-bd34-d4c1a02e7a01")?,
            "Mara Ostheim",
            "mara.ostheim@example.com",
            Some(Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e01")?),
        ),
        (
            Uuid::parse_str("1f9ad210-55c3-4b8a-bd34-d4c1a02e7a02")?,
            "Jonas Brandt",
            "jonas.brandt@example.com",
            Some(Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e02")?),
        ),
        (
            Uuid::parse_str("1f9ad210-55c3-4b8a-bd34-d4c1a02e7a03")?,
            "Henrik Sauer",
            "henrik.sauer@example.com",
            Some(Uuid::parse_str("7b1c58a4-27aa-4e2e-9d52-6a6f6c2b9e04")?),
        ),
        (
            Uuid::parse_str("1f9ad210-55c3-4b8a-bd34-d4c1a02e7a04")?,
            "Stefan Albrecht",
            "stefan.albrecht@example.com",
            None,
        ),
    ];

    for (id, name, email, lead_id) in &clients {
        sqlx::query(
            r#"
            INSERT INTO retention_analytics.clients
            (id, full_name, email, active, converted_from_lead_id)
            VALUES ($1, $2, $3, TRUE, $4)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email,
                converted_from_lead_id = EXCLUDED.converted_from_lead_id
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(lead_id)
        .execute(pool)
        .await?;
    }

    let ostheim = clients[0].0;
    let brandt = clients[1].0;
    let sauer = clients[2].0;
    let albrecht = clients[3].0;

    let revenues = vec![
        ("seed-rev-001", ostheim, (2026, 2, 25), 540.0),
        ("seed-rev-002", ostheim, (2026, 3, 24), 560.0),
        ("seed-rev-003", ostheim, (2026, 4, 26), 580.0),
        ("seed-rev-004", ostheim, (2026, 5, 25), 555.0),
        ("seed-rev-005", ostheim, (2026, 6, 24), 600.0),
        ("seed-rev-006", ostheim, (2026, 7, 27), 620.0),
        ("seed-rev-007", ostheim, (2026, 8, 20), 605.0),
        ("seed-rev-008", brandt, (2026, 3, 10), 310.0),
        ("seed-rev-009", brandt, (2026, 4, 12), 295.0),
        ("seed-rev-010", brandt, (2026, 5, 11), 300.0),
        ("seed-rev-011", sauer, (2026, 4, 18), 880.0),
        ("seed-rev-012", sauer, (2026, 6, 16), 910.0),
        ("seed-rev-013", sauer, (2026, 8, 14), 930.0),
        ("seed-rev-014", albrecht, (2026, 2, 5), 1200.0),
        ("seed-rev-015", albrecht, (2026, 3, 5), 1200.0),
        ("seed-rev-016", albrecht, (2026, 4, 6), 1200.0),
        ("seed-rev-017", albrecht, (2026, 5, 5), 1240.0),
        ("seed-rev-018", albrecht, (2026, 6, 5), 1240.0),
        ("seed-rev-019", albrecht, (2026, 7, 6), 1260.0),
        ("seed-rev-020", albrecht, (2026, 8, 5), 1260.0),
    ];

    for (source_key, client_id, (y, m, d), our_share) in revenues {
        sqlx::query(
            r#"
            INSERT INTO retention_analytics.revenues
            (id, client_id, revenue_date, our_share, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(NaiveDate::from_ymd_opt(y, m, d).context("invalid seed date")?)
        .bind(our_share)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let interactions = vec![
        ("seed-int-001", ostheim, (2026, 7, 2)),
        ("seed-int-002", ostheim, (2026, 7, 21)),
        ("seed-int-003", ostheim, (2026, 8, 12)),
        ("seed-int-004", brandt, (2026, 4, 20)),
        ("seed-int-005", sauer, (2026, 8, 3)),
        ("seed-int-006", albrecht, (2026, 6, 30)),
        ("seed-int-007", albrecht, (2026, 7, 15)),
        ("seed-int-008", albrecht, (2026, 8, 4)),
        ("seed-int-009", albrecht, (2026, 8, 18)),
    ];

    for (source_key, client_id, (y, m, d)) in interactions {
        sqlx::query(
            r#"
            INSERT INTO retention_analytics.interactions
            (id, client_id, created_at, source_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(day_start_utc(
            NaiveDate::from_ymd_opt(y, m, d).context("invalid seed date")?,
        ))
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_leads_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        status: String,
        created_at: NaiveDate,
        converted_at: Option<NaiveDate>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        LeadStatus::parse(&row.status)?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO retention_analytics.leads
            (id, full_name, status, created_at, converted_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(&row.status)
        .bind(day_start_utc(row.created_at))
        .bind(row.converted_at.map(day_start_utc))
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_revenues_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        client_name: String,
        client_email: String,
        revenue_date: NaiveDate,
        our_share: f64,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let client_id = upsert_client(pool, &row.client_name, &row.client_email).await?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO retention_analytics.revenues
            (id, client_id, revenue_date, our_share, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(row.revenue_date)
        .bind(row.our_share)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_interactions_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        client_name: String,
        client_email: String,
        occurred_at: NaiveDate,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let client_id = upsert_client(pool, &row.client_name, &row.client_email).await?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO retention_analytics.interactions
            (id, client_id, created_at, source_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(day_start_utc(row.occurred_at))
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn upsert_client(pool: &PgPool, full_name: &str, email: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO retention_analytics.clients (id, full_name, email, active)
        VALUES ($1, $2, $3, TRUE)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}
