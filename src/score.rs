use crate::models::{Classification, HealthScoreComponents};

// Blend weights, summing to 1.0.
const WEIGHT_RECENCY: f64 = 0.30;
const WEIGHT_FREQUENCY: f64 = 0.25;
const WEIGHT_MONETARY: f64 = 0.20;
const WEIGHT_TREND: f64 = 0.15;
const WEIGHT_ENGAGEMENT: f64 = 0.10;

/// Days since the client last generated revenue. `None` means no revenue in
/// the scoring window at all.
pub fn recency_score(days_since_last_revenue: Option<i64>) -> i32 {
    match days_since_last_revenue {
        None => 0,
        Some(days) if days <= 30 => 100,
        Some(days) if days <= 60 => 75,
        Some(days) if days <= 90 => 50,
        Some(days) if days <= 180 => 25,
        Some(_) => 0,
    }
}

/// Revenue records in the trailing six months, bucketed by per-month average.
pub fn frequency_score(revenue_count_last_6_months: usize) -> i32 {
    let per_month = revenue_count_last_6_months as f64 / 6.0;
    if per_month >= 4.0 {
        100
    } else if per_month >= 2.0 {
        75
    } else if per_month >= 1.0 {
        50
    } else if per_month >= 0.5 {
        25
    } else {
        0
    }
}

/// Average monthly revenue relative to the median across all clients. A zero
/// median means there is no meaningful baseline: any revenue at all rates 75.
pub fn monetary_score(avg_monthly_revenue: f64, median_across_clients: f64) -> i32 {
    if median_across_clients == 0.0 {
        return if avg_monthly_revenue > 0.0 { 75 } else { 0 };
    }
    let ratio = avg_monthly_revenue / median_across_clients;
    if ratio >= 2.0 {
        100
    } else if ratio >= 1.0 {
        75
    } else if ratio >= 0.5 {
        50
    } else if ratio > 0.0 {
        25
    } else {
        0
    }
}

/// Month-over-month revenue direction. Two empty months carry no signal and
/// sit at the neutral midpoint rather than being penalized.
pub fn trend_score(current_month: f64, previous_month: f64) -> i32 {
    if previous_month == 0.0 && current_month == 0.0 {
        return 50;
    }
    if previous_month == 0.0 {
        return 100;
    }
    if current_month == 0.0 {
        return 0;
    }
    let growth_pct = (current_month - previous_month) / previous_month * 100.0;
    if growth_pct >= 20.0 {
        100
    } else if growth_pct >= 0.0 {
        75
    } else if growth_pct >= -20.0 {
        50
    } else if growth_pct >= -50.0 {
        25
    } else {
        0
    }
}

/// Advisor-client touches in the trailing 90 days.
pub fn engagement_score(interactions_last_90_days: usize) -> i32 {
    if interactions_last_90_days >= 6 {
        100
    } else if interactions_last_90_days >= 4 {
        75
    } else if interactions_last_90_days >= 2 {
        50
    } else if interactions_last_90_days >= 1 {
        25
    } else {
        0
    }
}

pub fn blend(components: &HealthScoreComponents) -> i32 {
    let weighted = f64::from(components.recency) * WEIGHT_RECENCY
        + f64::from(components.frequency) * WEIGHT_FREQUENCY
        + f64::from(components.monetary) * WEIGHT_MONETARY
        + f64::from(components.trend) * WEIGHT_TREND
        + f64::from(components.engagement) * WEIGHT_ENGAGEMENT;
    weighted.round() as i32
}

pub fn classify(score: i32) -> Classification {
    if score >= 75 {
        Classification::Healthy
    } else if score >= 50 {
        Classification::Attention
    } else if score >= 25 {
        Classification::Critical
    } else {
        Classification::Lost
    }
}

/// Median of the per-client six-month revenue averages. Empty input yields
/// zero, which `monetary_score` treats as "no baseline".
pub fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
