use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::cohort;
use crate::models::{CohortData, FunnelMetrics, HealthScoreSummary};

/// Everything the retention dashboards consume, assembled in one place.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub as_of: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub cohorts: Vec<CohortData>,
    pub best_cohort: Option<String>,
    pub average_month3_retention: Option<f64>,
    pub funnel: FunnelMetrics,
    pub health: HealthScoreSummary,
}

pub fn assemble(
    cohorts: Vec<CohortData>,
    funnel: FunnelMetrics,
    health: HealthScoreSummary,
    window_start: NaiveDate,
    window_end: NaiveDate,
    as_of: NaiveDate,
) -> RetentionReport {
    let best_cohort = cohort::best_cohort(&cohorts).map(|c| c.cohort.clone());
    let average_month3_retention = cohort::average_month3_retention(&cohorts);
    RetentionReport {
        as_of,
        window_start,
        window_end,
        cohorts,
        best_cohort,
        average_month3_retention,
        funnel,
        health,
    }
}

pub fn render_markdown(report: &RetentionReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Client Retention Report");
    let _ = writeln!(
        output,
        "Leads entered {} to {} (as of {})",
        report.window_start, report.window_end, report.as_of
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lead Funnel");
    let funnel = &report.funnel;
    if funnel.total_leads == 0 {
        let _ = writeln!(output, "No leads in this window.");
    } else {
        let _ = writeln!(output, "- total leads: {}", funnel.total_leads);
        let _ = writeln!(output, "- new: {}", funnel.new);
        let _ = writeln!(output, "- in contact: {}", funnel.in_contact);
        let _ = writeln!(output, "- assessor switch: {}", funnel.assessor_switch);
        let _ = writeln!(output, "- converted: {}", funnel.converted);
        let _ = writeln!(output, "- lost: {}", funnel.lost);
        let _ = writeln!(
            output,
            "- conversion rate: {:.1}%",
            funnel.conversion_rate
        );
        match funnel.avg_time_to_convert_days {
            Some(days) => {
                let _ = writeln!(output, "- avg time to convert: {days:.1} days");
            }
            None => {
                let _ = writeln!(output, "- avg time to convert: n/a");
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Retention");
    if report.cohorts.is_empty() {
        let _ = writeln!(output, "No cohorts in this window.");
    } else {
        for cohort in &report.cohorts {
            let _ = writeln!(
                output,
                "- {}: {} leads, {} converted, {} tracked, conversion {:.1}%",
                cohort.cohort,
                cohort.total_leads,
                cohort.converted_leads,
                cohort.tracked_leads,
                cohort.final_conversion_rate
            );
            let curve: Vec<String> = cohort
                .retention
                .iter()
                .map(|row| {
                    if row.is_future {
                        format!("m{}: -", row.month)
                    } else {
                        format!("m{}: {:.0}%", row.month, row.retention_rate)
                    }
                })
                .collect();
            let _ = writeln!(output, "  {}", curve.join(" | "));
        }
        if let Some(best) = &report.best_cohort {
            let _ = writeln!(output);
            let _ = writeln!(output, "Best cohort: {best}");
        }
        match report.average_month3_retention {
            Some(avg) => {
                let _ = writeln!(output, "Average month-3 retention: {avg:.1}%");
            }
            None => {
                let _ = writeln!(output, "Average month-3 retention: n/a (no mature cohorts)");
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Client Health");
    let health = &report.health;
    if health.total == 0 {
        let _ = writeln!(output, "No health scores computed yet.");
    } else {
        let _ = writeln!(output, "- healthy: {}", health.healthy);
        let _ = writeln!(output, "- attention: {}", health.attention);
        let _ = writeln!(output, "- critical: {}", health.critical);
        let _ = writeln!(output, "- lost: {}", health.lost);
        let _ = writeln!(output, "- total scored: {}", health.total);
        let _ = writeln!(output, "- average score: {:.1}", health.average_score);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MonthRetention;
    use chrono::NaiveDate;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn empty_health() -> HealthScoreSummary {
        HealthScoreSummary {
            healthy: 0,
            attention: 0,
            critical: 0,
            lost: 0,
            total: 0,
            average_score: 0.0,
        }
    }

    fn sample_cohort() -> CohortData {
        CohortData {
            cohort: "2026-02".to_string(),
            cohort_date: date(2026, 2, 1),
            total_leads: 4,
            converted_leads: 2,
            tracked_leads: 2,
            retention: vec![
                MonthRetention {
                    month: 0,
                    converted: 2,
                    retained: 0,
                    retention_rate: 0.0,
                    is_future: false,
                },
                MonthRetention {
                    month: 1,
                    converted: 2,
                    retained: 1,
                    retention_rate: 50.0,
                    is_future: false,
                },
                MonthRetention {
                    month: 2,
                    converted: 2,
                    retained: 0,
                    retention_rate: 0.0,
                    is_future: true,
                },
            ],
            final_conversion_rate: 50.0,
            avg_time_to_convert_days: Some(12.5),
        }
    }

    #[test]
    fn report_carries_best_cohort_and_average() {
        let funnel = FunnelMetrics {
            total_leads: 4,
            new: 1,
            in_contact: 0,
            assessor_switch: 0,
            converted: 2,
            lost: 1,
            conversion_rate: 50.0,
            avg_time_to_convert_days: Some(12.5),
        };
        let report = assemble(
            vec![sample_cohort()],
            funnel,
            empty_health(),
            date(2026, 2, 1),
            date(2026, 8, 26),
            date(2026, 8, 26),
        );
        assert_eq!(report.best_cohort.as_deref(), Some("2026-02"));
        assert_eq!(report.cohorts.len(), 1);
    }

    #[test]
    fn markdown_marks_future_months_and_empty_sections() {
        let report = assemble(
            vec![sample_cohort()],
            FunnelMetrics {
                total_leads: 4,
                new: 1,
                in_contact: 0,
                assessor_switch: 0,
                converted: 2,
                lost: 1,
                conversion_rate: 50.0,
                avg_time_to_convert_days: None,
            },
            empty_health(),
            date(2026, 2, 1),
            date(2026, 8, 26),
            date(2026, 8, 26),
        );
        let markdown = render_markdown(&report);
        assert!(markdown.contains("# Client Retention Report"));
        assert!(markdown.contains("m1: 50%"));
        assert!(markdown.contains("m2: -"));
        assert!(markdown.contains("avg time to convert: n/a"));
        assert!(markdown.contains("No health scores computed yet."));
    }

    #[test]
    fn markdown_handles_empty_window() {
        let report = assemble(
            Vec::new(),
            FunnelMetrics {
                total_leads: 0,
                new: 0,
                in_contact: 0,
                assessor_switch: 0,
                converted: 0,
                lost: 0,
                conversion_rate: 0.0,
                avg_time_to_convert_days: None,
            },
            empty_health(),
            date(2026, 2, 1),
            date(2026, 8, 26),
            date(2026, 8, 26),
        );
        let markdown = render_markdown(&report);
        assert!(markdown.contains("No leads in this window."));
        assert!(markdown.contains("No cohorts in this window."));
        assert_eq!(report.best_cohort, None);
        assert_eq!(report.average_month3_retention, None);
    }
}
