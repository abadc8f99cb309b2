use anyhow::bail;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RevenueRecord {
    pub client_id: Uuid,
    pub date: NaiveDate,
    pub our_share: f64,
}

#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub client_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    InContact,
    AssessorSwitch,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::InContact => "in_contact",
            LeadStatus::AssessorSwitch => "assessor_switch",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        Ok(match value {
            "new" => LeadStatus::New,
            "in_contact" => LeadStatus::InContact,
            "assessor_switch" => LeadStatus::AssessorSwitch,
            "converted" => LeadStatus::Converted,
            "lost" => LeadStatus::Lost,
            other => bail!("unknown lead status '{other}'"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LeadRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: LeadStatus,
    pub converted_at: Option<DateTime<Utc>>,
}

impl LeadRecord {
    /// Conversion date usable for time-based aggregates. Placeholder dates
    /// (before the lead existed, or before year 2000) are excluded without
    /// changing the lead's converted status.
    pub fn trusted_converted_at(&self) -> Option<DateTime<Utc>> {
        self.converted_at
            .filter(|at| *at >= self.created_at && at.year() >= 2000)
    }
}

/// Link from a client back to the lead it was converted from. Exists only
/// for clients created via conversion.
#[derive(Debug, Clone, Copy)]
pub struct ClientLink {
    pub client_id: Uuid,
    pub converted_from_lead_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthScoreComponents {
    pub recency: i32,
    pub frequency: i32,
    pub monetary: i32,
    pub trend: i32,
    pub engagement: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Healthy,
    Attention,
    Critical,
    Lost,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Healthy => "healthy",
            Classification::Attention => "attention",
            Classification::Critical => "critical",
            Classification::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        Ok(match value {
            "healthy" => Classification::Healthy,
            "attention" => Classification::Attention,
            "critical" => Classification::Critical,
            "lost" => Classification::Lost,
            other => bail!("unknown classification '{other}'"),
        })
    }
}

/// One computed score. The table is append-only: every computation inserts a
/// new row and "current" means the most recent row per client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientHealthScore {
    pub client_id: Uuid,
    pub score: i32,
    pub classification: Classification,
    pub components: HealthScoreComponents,
    pub calculated_at: DateTime<Utc>,
}

/// Retention for one month offset after a cohort's entry month.
#[derive(Debug, Clone, Serialize)]
pub struct MonthRetention {
    pub month: u32,
    pub converted: usize,
    pub retained: usize,
    pub retention_rate: f64,
    pub is_future: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortData {
    pub cohort: String,
    pub cohort_date: NaiveDate,
    pub total_leads: usize,
    pub converted_leads: usize,
    pub tracked_leads: usize,
    pub retention: Vec<MonthRetention>,
    pub final_conversion_rate: f64,
    pub avg_time_to_convert_days: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelMetrics {
    pub total_leads: usize,
    pub new: usize,
    pub in_contact: usize,
    pub assessor_switch: usize,
    pub converted: usize,
    pub lost: usize,
    pub conversion_rate: f64,
    pub avg_time_to_convert_days: Option<f64>,
}

/// Classification counts over the latest score row per client.
#[derive(Debug, Clone, Serialize)]
pub struct HealthScoreSummary {
    pub healthy: i64,
    pub attention: i64,
    pub critical: i64,
    pub lost: i64,
    pub total: i64,
    pub average_score: f64,
}
