use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Months, NaiveDate};
use uuid::Uuid;

use crate::models::{ClientLink, CohortData, FunnelMetrics, LeadRecord, LeadStatus, MonthRetention};

/// Months of retention tracked per cohort, starting at the entry month.
pub const RETENTION_MONTHS: u32 = 6;

const SECONDS_PER_DAY: f64 = 86_400.0;

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn month_label(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Builds the per-entry-month cohorts with their six-month retention curves.
///
/// `revenue_months` maps a client to the set of calendar months (first-of-month
/// keys) in which it has at least one revenue record. `as_of` anchors the
/// future-month check so tests can pin time.
pub fn build_cohorts(
    leads: &[LeadRecord],
    links: &[ClientLink],
    revenue_months: &HashMap<Uuid, HashSet<NaiveDate>>,
    as_of: NaiveDate,
) -> Vec<CohortData> {
    let lead_to_client: HashMap<Uuid, Uuid> = links
        .iter()
        .map(|link| (link.converted_from_lead_id, link.client_id))
        .collect();

    let mut groups: BTreeMap<NaiveDate, Vec<&LeadRecord>> = BTreeMap::new();
    for lead in leads {
        groups
            .entry(month_start(lead.created_at.date_naive()))
            .or_default()
            .push(lead);
    }

    let mut cohorts = Vec::with_capacity(groups.len());
    for (cohort_date, members) in groups {
        let total_leads = members.len();
        let converted: Vec<&LeadRecord> = members
            .iter()
            .copied()
            .filter(|lead| lead.status == LeadStatus::Converted)
            .collect();
        let converted_leads = converted.len();

        // Tracked means a trusted conversion date and a resolvable client,
        // the preconditions for revenue-based retention.
        let tracked: Vec<(Uuid, NaiveDate)> = converted
            .iter()
            .filter_map(|lead| {
                let converted_at = lead.trusted_converted_at()?;
                let client_id = lead_to_client.get(&lead.id)?;
                Some((*client_id, month_start(converted_at.date_naive())))
            })
            .collect();
        let tracked_leads = tracked.len();

        let mut retention = Vec::with_capacity(RETENTION_MONTHS as usize);
        for month in 0..RETENTION_MONTHS {
            let check_month = cohort_date + Months::new(month);
            if check_month > as_of {
                retention.push(MonthRetention {
                    month,
                    converted: tracked_leads,
                    retained: 0,
                    retention_rate: 0.0,
                    is_future: true,
                });
                continue;
            }

            // A lead converted in month 3 must not read as retained in
            // months 0..2 off revenue that predates its conversion.
            let retained = tracked
                .iter()
                .filter(|(client_id, conversion_month)| {
                    *conversion_month <= check_month
                        && revenue_months
                            .get(client_id)
                            .is_some_and(|months| months.contains(&check_month))
                })
                .count();
            let retention_rate = if tracked_leads > 0 {
                retained as f64 / tracked_leads as f64 * 100.0
            } else {
                0.0
            };
            retention.push(MonthRetention {
                month,
                converted: tracked_leads,
                retained,
                retention_rate,
                is_future: false,
            });
        }

        // Conversion itself does not require a resolvable client link, so
        // the rate is over all converted leads, tracked or not.
        let final_conversion_rate = if total_leads > 0 {
            converted_leads as f64 / total_leads as f64 * 100.0
        } else {
            0.0
        };

        cohorts.push(CohortData {
            cohort: month_label(cohort_date),
            cohort_date,
            total_leads,
            converted_leads,
            tracked_leads,
            retention,
            final_conversion_rate,
            avg_time_to_convert_days: avg_days_to_convert(members.iter().copied()),
        });
    }

    cohorts
}

fn avg_days_to_convert<'a>(leads: impl Iterator<Item = &'a LeadRecord>) -> Option<f64> {
    let durations: Vec<f64> = leads
        .filter(|lead| lead.status == LeadStatus::Converted)
        .filter_map(|lead| {
            let converted_at = lead.trusted_converted_at()?;
            Some((converted_at - lead.created_at).num_seconds() as f64 / SECONDS_PER_DAY)
        })
        .collect();
    if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    }
}

/// Heuristic ranking: mature cohorts compare on month-3 retention, cohorts
/// whose month 3 has not started yet compare on raw conversion rate instead.
/// The two metrics are deliberately mixed on one scale; immature cohorts are
/// not excluded.
pub fn best_cohort(cohorts: &[CohortData]) -> Option<&CohortData> {
    cohorts.iter().max_by(|a, b| {
        ranking_metric(a)
            .partial_cmp(&ranking_metric(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn ranking_metric(cohort: &CohortData) -> f64 {
    cohort
        .retention
        .get(3)
        .filter(|row| !row.is_future)
        .map(|row| row.retention_rate)
        .unwrap_or(cohort.final_conversion_rate)
}

/// Mean month-3 retention over cohorts whose month 3 has already started.
pub fn average_month3_retention(cohorts: &[CohortData]) -> Option<f64> {
    let rates: Vec<f64> = cohorts
        .iter()
        .filter_map(|cohort| cohort.retention.get(3))
        .filter(|row| !row.is_future)
        .map(|row| row.retention_rate)
        .collect();
    if rates.is_empty() {
        None
    } else {
        Some(rates.iter().sum::<f64>() / rates.len() as f64)
    }
}

pub fn funnel_metrics(leads: &[LeadRecord]) -> FunnelMetrics {
    let mut metrics = FunnelMetrics {
        total_leads: leads.len(),
        new: 0,
        in_contact: 0,
        assessor_switch: 0,
        converted: 0,
        lost: 0,
        conversion_rate: 0.0,
        avg_time_to_convert_days: None,
    };
    for lead in leads {
        match lead.status {
            LeadStatus::New => metrics.new += 1,
            LeadStatus::InContact => metrics.in_contact += 1,
            LeadStatus::AssessorSwitch => metrics.assessor_switch += 1,
            LeadStatus::Converted => metrics.converted += 1,
            LeadStatus::Lost => metrics.lost += 1,
        }
    }
    if metrics.total_leads > 0 {
        metrics.conversion_rate =
            metrics.converted as f64 / metrics.total_leads as f64 * 100.0;
    }
    metrics.avg_time_to_convert_days = avg_days_to_convert(leads.iter());
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, NaiveTime};

    fn utc(year: i32, month: u32, day: u32) -> chrono::DateTime<chrono::Utc> {
        NaiveDateTime::new(
            NaiveDate::from_ymd_opt(year, month, day).unwrap(),
            NaiveTime::MIN,
        )
        .and_utc()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn lead(
        id: Uuid,
        created: chrono::DateTime<chrono::Utc>,
        status: LeadStatus,
        converted: Option<chrono::DateTime<chrono::Utc>>,
    ) -> LeadRecord {
        LeadRecord {
            id,
            created_at: created,
            status,
            converted_at: converted,
        }
    }

    #[test]
    fn retention_counts_only_after_conversion_month() {
        let lead_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let leads = vec![lead(
            lead_id,
            utc(2024, 1, 10),
            LeadStatus::Converted,
            Some(utc(2024, 2, 5)),
        )];
        let links = vec![ClientLink {
            client_id,
            converted_from_lead_id: lead_id,
        }];
        let mut revenue_months = HashMap::new();
        revenue_months.insert(
            client_id,
            HashSet::from([date(2024, 2, 1), date(2024, 4, 1)]),
        );

        let cohorts = build_cohorts(&leads, &links, &revenue_months, date(2024, 8, 15));
        assert_eq!(cohorts.len(), 1);
        let cohort = &cohorts[0];
        assert_eq!(cohort.cohort, "2024-01");
        assert_eq!(cohort.tracked_leads, 1);

        let retained: Vec<usize> = cohort.retention.iter().map(|r| r.retained).collect();
        // Month 0 is January: revenue exists only from February, and the
        // conversion-month guard keeps pre-conversion months at zero anyway.
        assert_eq!(retained, vec![0, 1, 0, 1, 0, 0]);
        assert!(cohort.retention.iter().all(|r| !r.is_future));
        assert!(cohort.retention.iter().all(|r| r.converted == 1));
    }

    #[test]
    fn cohort_counts_respect_tracking_hierarchy() {
        let tracked_lead = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let leads = vec![
            lead(
                tracked_lead,
                utc(2024, 3, 2),
                LeadStatus::Converted,
                Some(utc(2024, 3, 20)),
            ),
            // Converted but no client link: counted as converted, not tracked.
            lead(
                Uuid::new_v4(),
                utc(2024, 3, 5),
                LeadStatus::Converted,
                Some(utc(2024, 4, 1)),
            ),
            lead(Uuid::new_v4(), utc(2024, 3, 9), LeadStatus::InContact, None),
            lead(Uuid::new_v4(), utc(2024, 3, 12), LeadStatus::Lost, None),
        ];
        let links = vec![ClientLink {
            client_id,
            converted_from_lead_id: tracked_lead,
        }];
        let revenue_months = HashMap::new();

        let cohorts = build_cohorts(&leads, &links, &revenue_months, date(2024, 12, 1));
        let cohort = &cohorts[0];
        assert_eq!(cohort.total_leads, 4);
        assert_eq!(cohort.converted_leads, 2);
        assert_eq!(cohort.tracked_leads, 1);
        assert!(cohort.tracked_leads <= cohort.converted_leads);
        assert!(cohort.converted_leads <= cohort.total_leads);
        assert!(cohort.retention.iter().all(|r| r.converted == 1));
        assert!((cohort.final_conversion_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn future_months_are_flagged_and_zeroed() {
        let lead_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let leads = vec![lead(
            lead_id,
            utc(2024, 5, 3),
            LeadStatus::Converted,
            Some(utc(2024, 5, 10)),
        )];
        let links = vec![ClientLink {
            client_id,
            converted_from_lead_id: lead_id,
        }];
        let mut revenue_months = HashMap::new();
        revenue_months.insert(client_id, HashSet::from([date(2024, 5, 1)]));

        // as_of mid-July: months 0..=2 (May, Jun, Jul) have started.
        let cohorts = build_cohorts(&leads, &links, &revenue_months, date(2024, 7, 15));
        let cohort = &cohorts[0];
        for row in &cohort.retention {
            if row.month <= 2 {
                assert!(!row.is_future);
            } else {
                assert!(row.is_future);
                assert_eq!(row.retained, 0);
                assert_eq!(row.retention_rate, 0.0);
                assert_eq!(row.converted, cohort.tracked_leads);
            }
        }
    }

    #[test]
    fn placeholder_conversion_dates_are_excluded_from_time_aggregates() {
        let leads = vec![
            // Placeholder epoch-era date: still converted, never tracked.
            lead(
                Uuid::new_v4(),
                utc(2024, 1, 8),
                LeadStatus::Converted,
                Some(utc(1970, 1, 1)),
            ),
            // Converted before creation: same treatment.
            lead(
                Uuid::new_v4(),
                utc(2024, 1, 9),
                LeadStatus::Converted,
                Some(utc(2023, 12, 1)),
            ),
        ];
        let cohorts = build_cohorts(&leads, &[], &HashMap::new(), date(2024, 12, 1));
        let cohort = &cohorts[0];
        assert_eq!(cohort.converted_leads, 2);
        assert_eq!(cohort.tracked_leads, 0);
        assert_eq!(cohort.avg_time_to_convert_days, None);
        assert!(cohort.retention.iter().all(|r| r.retention_rate == 0.0));
    }

    #[test]
    fn avg_time_to_convert_averages_trusted_dates() {
        let leads = vec![
            lead(
                Uuid::new_v4(),
                utc(2024, 1, 1),
                LeadStatus::Converted,
                Some(utc(2024, 1, 11)),
            ),
            lead(
                Uuid::new_v4(),
                utc(2024, 1, 1),
                LeadStatus::Converted,
                Some(utc(2024, 1, 21)),
            ),
            lead(Uuid::new_v4(), utc(2024, 1, 2), LeadStatus::Lost, None),
        ];
        let cohorts = build_cohorts(&leads, &[], &HashMap::new(), date(2024, 12, 1));
        let avg = cohorts[0].avg_time_to_convert_days.unwrap();
        assert!((avg - 15.0).abs() < 1e-9);
    }

    #[test]
    fn best_cohort_prefers_mature_month3_retention() {
        let mature_lead = Uuid::new_v4();
        let mature_client = Uuid::new_v4();
        let young_lead = Uuid::new_v4();
        let young_client = Uuid::new_v4();
        let leads = vec![
            lead(
                mature_lead,
                utc(2024, 1, 5),
                LeadStatus::Converted,
                Some(utc(2024, 1, 20)),
            ),
            lead(
                young_lead,
                utc(2024, 6, 5),
                LeadStatus::Converted,
                Some(utc(2024, 6, 10)),
            ),
            lead(Uuid::new_v4(), utc(2024, 6, 7), LeadStatus::Lost, None),
        ];
        let links = vec![
            ClientLink {
                client_id: mature_client,
                converted_from_lead_id: mature_lead,
            },
            ClientLink {
                client_id: young_client,
                converted_from_lead_id: young_lead,
            },
        ];
        let mut revenue_months = HashMap::new();
        revenue_months.insert(
            mature_client,
            HashSet::from([date(2024, 4, 1)]),
        );
        revenue_months.insert(young_client, HashSet::from([date(2024, 6, 1)]));

        // June's month 3 (September) has not started, so June compares on
        // its 50% conversion rate while January compares on its 100%
        // month-3 retention.
        let cohorts = build_cohorts(&leads, &links, &revenue_months, date(2024, 7, 10));
        let best = best_cohort(&cohorts).unwrap();
        assert_eq!(best.cohort, "2024-01");
        assert!((cohorts[0].retention[3].retention_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn average_month3_retention_skips_future_rows() {
        let lead_a = Uuid::new_v4();
        let client_a = Uuid::new_v4();
        let leads = vec![
            lead(
                lead_a,
                utc(2024, 1, 5),
                LeadStatus::Converted,
                Some(utc(2024, 1, 20)),
            ),
            lead(
                Uuid::new_v4(),
                utc(2024, 6, 5),
                LeadStatus::Converted,
                Some(utc(2024, 6, 10)),
            ),
        ];
        let links = vec![ClientLink {
            client_id: client_a,
            converted_from_lead_id: lead_a,
        }];
        let mut revenue_months = HashMap::new();
        revenue_months.insert(client_a, HashSet::from([date(2024, 4, 1)]));

        let cohorts = build_cohorts(&leads, &links, &revenue_months, date(2024, 7, 10));
        // Only January's month 3 (April) has started.
        let avg = average_month3_retention(&cohorts).unwrap();
        assert!((avg - 100.0).abs() < 1e-9);

        let none = average_month3_retention(&build_cohorts(
            &leads[1..],
            &[],
            &HashMap::new(),
            date(2024, 7, 10),
        ));
        assert_eq!(none, None);
    }

    #[test]
    fn funnel_counts_statuses_and_conversion_rate() {
        let leads = vec![
            lead(Uuid::new_v4(), utc(2024, 2, 1), LeadStatus::New, None),
            lead(Uuid::new_v4(), utc(2024, 2, 2), LeadStatus::InContact, None),
            lead(
                Uuid::new_v4(),
                utc(2024, 2, 3),
                LeadStatus::AssessorSwitch,
                None,
            ),
            lead(
                Uuid::new_v4(),
                utc(2024, 2, 4),
                LeadStatus::Converted,
                Some(utc(2024, 2, 14)),
            ),
            lead(Uuid::new_v4(), utc(2024, 2, 5), LeadStatus::Lost, None),
        ];
        let funnel = funnel_metrics(&leads);
        assert_eq!(funnel.total_leads, 5);
        assert_eq!(funnel.new, 1);
        assert_eq!(funnel.in_contact, 1);
        assert_eq!(funnel.assessor_switch, 1);
        assert_eq!(funnel.converted, 1);
        assert_eq!(funnel.lost, 1);
        assert!((funnel.conversion_rate - 20.0).abs() < 1e-9);
        assert!((funnel.avg_time_to_convert_days.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_leads_produce_no_cohorts_and_empty_funnel() {
        let cohorts = build_cohorts(&[], &[], &HashMap::new(), date(2024, 7, 10));
        assert!(cohorts.is_empty());
        assert!(best_cohort(&cohorts).is_none());
        let funnel = funnel_metrics(&[]);
        assert_eq!(funnel.total_leads, 0);
        assert_eq!(funnel.conversion_rate, 0.0);
        assert_eq!(funnel.avg_time_to_convert_days, None);
    }
}
