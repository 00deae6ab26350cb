//! Pure per-property calculators: unified rows in, a metric bundle out.

use std::collections::BTreeMap;

use portico_core::{round1, round2, DateWindow, LeaseStatus, WorkOrderStatus};
use serde::Serialize;

use crate::{
    BreakdownKey, CategoryBreakdown, MetricBundle, MetricKey, MetricValue, MetricsConfig,
    MetricsError, PropertySlice, SeriesKey, SeriesPoint,
};

/// Compute every metric family that has rows inside the window. Families
/// without rows are omitted rather than reported as zero; a slice whose
/// total in-window row count is below `cfg.min_rows` is rejected outright.
pub fn compute_bundle(
    slice: &PropertySlice,
    window: DateWindow,
    cfg: &MetricsConfig,
) -> Result<MetricBundle, MetricsError> {
    let clipped = slice.clip_to(window);
    let got = clipped.row_count();
    if got < cfg.min_rows {
        return Err(MetricsError::InsufficientData {
            needed: cfg.min_rows,
            got,
        });
    }

    let mut bundle = MetricBundle::new(window);
    occupancy_metrics(&clipped, &mut bundle);
    funnel_metrics(&clipped, &mut bundle);
    financial_metrics(&clipped, &mut bundle);
    delinquency_metrics(&clipped, &mut bundle);
    lease_metrics(&clipped, window, &mut bundle);
    work_order_metrics(&clipped, window, &mut bundle);
    marketing_breakdowns(&clipped, &mut bundle);
    reputation_metrics(&clipped, &mut bundle);
    Ok(bundle)
}

/// Point-in-time occupancy comes from the latest snapshot in the window;
/// the full set of snapshots becomes the occupancy trend series.
fn occupancy_metrics(slice: &PropertySlice, bundle: &mut MetricBundle) {
    let Some(latest) = slice.occupancy.iter().max_by_key(|row| row.snapshot_date) else {
        return;
    };

    bundle.insert(MetricKey::TotalUnits, MetricValue::Count { n: latest.total_units });
    bundle.insert(
        MetricKey::OccupiedUnits,
        MetricValue::Count { n: latest.occupied_units },
    );
    bundle.insert(MetricKey::VacantUnits, MetricValue::Count { n: latest.vacant_units });
    bundle.insert(
        MetricKey::PhysicalOccupancy,
        MetricValue::Rate {
            numerator: latest.occupied_units as f64,
            denominator: latest.total_units as f64,
        },
    );
    bundle.insert(
        MetricKey::LeasedPercentage,
        MetricValue::Rate {
            numerator: (latest.occupied_units + latest.preleased_vacant_units) as f64,
            denominator: latest.total_units as f64,
        },
    );
    // Exposure can go negative when scheduled move-ins outpace vacancy plus
    // notices; the negative value is meaningful and is not clamped.
    bundle.insert(
        MetricKey::Exposure30,
        MetricValue::Count {
            n: latest.vacant_units + latest.notice_units_30d - latest.scheduled_moveins_30d,
        },
    );
    bundle.insert(
        MetricKey::Exposure60,
        MetricValue::Count {
            n: latest.vacant_units + latest.notice_units_60d - latest.scheduled_moveins_60d,
        },
    );

    let mut points: Vec<SeriesPoint> = slice
        .occupancy
        .iter()
        .map(|row| SeriesPoint {
            date: row.snapshot_date,
            value: MetricValue::Rate {
                numerator: row.occupied_units as f64,
                denominator: row.total_units as f64,
            },
        })
        .collect();
    points.sort_by_key(|point| point.date);
    bundle.series.insert(SeriesKey::OccupancyTrend, points);
}

/// Funnel counts sum over the window; conversion rates keep stage counts as
/// raw components.
fn funnel_metrics(slice: &PropertySlice, bundle: &mut MetricBundle) {
    if slice.activity.is_empty() {
        return;
    }
    let leads: i64 = slice.activity.iter().map(|row| row.leads).sum();
    let tours: i64 = slice.activity.iter().map(|row| row.tours).sum();
    let applications: i64 = slice.activity.iter().map(|row| row.applications).sum();
    let leases_signed: i64 = slice.activity.iter().map(|row| row.leases_signed).sum();
    let move_ins: i64 = slice.activity.iter().map(|row| row.move_ins).sum();
    let move_outs: i64 = slice.activity.iter().map(|row| row.move_outs).sum();

    bundle.insert(MetricKey::Leads, MetricValue::Count { n: leads });
    bundle.insert(MetricKey::Tours, MetricValue::Count { n: tours });
    bundle.insert(MetricKey::Applications, MetricValue::Count { n: applications });
    bundle.insert(MetricKey::LeasesSigned, MetricValue::Count { n: leases_signed });
    bundle.insert(MetricKey::MoveIns, MetricValue::Count { n: move_ins });
    bundle.insert(MetricKey::MoveOuts, MetricValue::Count { n: move_outs });
    bundle.insert(
        MetricKey::LeadToTourRate,
        MetricValue::Rate {
            numerator: tours as f64,
            denominator: leads as f64,
        },
    );
    bundle.insert(
        MetricKey::TourToApplicationRate,
        MetricValue::Rate {
            numerator: applications as f64,
            denominator: tours as f64,
        },
    );
    bundle.insert(
        MetricKey::ApplicationToLeaseRate,
        MetricValue::Rate {
            numerator: leases_signed as f64,
            denominator: applications as f64,
        },
    );
    bundle.insert(
        MetricKey::LeadToLeaseRate,
        MetricValue::Rate {
            numerator: leases_signed as f64,
            denominator: leads as f64,
        },
    );
}

/// Fiscal rollups sum across the window's periods. RevPAU divides summed
/// revenue by the latest unit count, so it needs an occupancy snapshot.
fn financial_metrics(slice: &PropertySlice, bundle: &mut MetricBundle) {
    if slice.financials.is_empty() {
        return;
    }
    let possible: f64 = slice.financials.iter().map(|row| row.total_possible).sum();
    let collected: f64 = slice.financials.iter().map(|row| row.total_collected).sum();
    let revenue: f64 = slice.financials.iter().map(|row| row.total_revenue).sum();
    let expenses: f64 = slice.financials.iter().map(|row| row.total_expenses).sum();

    bundle.insert(MetricKey::TotalPossible, MetricValue::Amount { total: possible });
    bundle.insert(MetricKey::TotalCollected, MetricValue::Amount { total: collected });
    bundle.insert(
        MetricKey::CollectionRate,
        MetricValue::Rate {
            numerator: collected,
            denominator: possible,
        },
    );
    bundle.insert(
        MetricKey::NetOperatingIncome,
        MetricValue::Amount {
            total: revenue - expenses,
        },
    );
    if let Some(latest) = slice.occupancy.iter().max_by_key(|row| row.snapshot_date) {
        bundle.insert(
            MetricKey::RevPau,
            MetricValue::Average {
                sum: revenue,
                count: latest.total_units as f64,
            },
        );
    }
}

fn delinquency_metrics(slice: &PropertySlice, bundle: &mut MetricBundle) {
    let Some(latest) = slice.delinquency.iter().max_by_key(|row| row.snapshot_date) else {
        return;
    };

    bundle.insert(
        MetricKey::TotalDelinquent,
        MetricValue::Amount {
            total: latest.total_owed,
        },
    );
    bundle.insert(
        MetricKey::DelinquentOver90,
        MetricValue::Amount {
            total: latest.owed_over_90,
        },
    );

    let mut aging = CategoryBreakdown::default();
    aging.add("0-30", latest.owed_0_30);
    aging.add("31-60", latest.owed_31_60);
    aging.add("61-90", latest.owed_61_90);
    aging.add("90+", latest.owed_over_90);
    aging.recompute_shares();
    bundle.breakdowns.insert(BreakdownKey::DelinquencyAging, aging);

    let mut points: Vec<SeriesPoint> = slice
        .delinquency
        .iter()
        .map(|row| SeriesPoint {
            date: row.snapshot_date,
            value: MetricValue::Amount {
                total: row.total_owed,
            },
        })
        .collect();
    points.sort_by_key(|point| point.date);
    bundle.series.insert(SeriesKey::DelinquencyTrend, points);
}

/// Rent metrics read the latest lease snapshot in the window. Trade-out
/// covers only leases that started inside the window with a known prior
/// rent.
fn lease_metrics(slice: &PropertySlice, window: DateWindow, bundle: &mut MetricBundle) {
    let Some(latest_date) = slice.leases.iter().map(|row| row.snapshot_date).max() else {
        return;
    };
    let current: Vec<_> = slice
        .leases
        .iter()
        .filter(|row| row.snapshot_date == latest_date)
        .collect();

    let mut mix = CategoryBreakdown::default();
    for lease in &current {
        mix.add(lease.status.as_str(), 1.0);
    }
    mix.recompute_shares();
    bundle.breakdowns.insert(BreakdownKey::LeaseStatusMix, mix);

    let occupied: Vec<f64> = current
        .iter()
        .filter(|lease| matches!(lease.status, LeaseStatus::Current | LeaseStatus::Notice))
        .map(|lease| lease.lease_rent)
        .collect();
    if !occupied.is_empty() {
        bundle.insert(
            MetricKey::AvgLeaseRent,
            MetricValue::Average {
                sum: occupied.iter().sum(),
                count: occupied.len() as f64,
            },
        );
    }

    let mut trade_sum = 0.0;
    let mut trade_count = 0.0;
    for lease in &current {
        let (Some(start), Some(prior)) = (lease.lease_start, lease.prior_lease_rent) else {
            continue;
        };
        if window.contains(start) {
            trade_sum += lease.lease_rent - prior;
            trade_count += 1.0;
        }
    }
    if trade_count > 0.0 {
        bundle.insert(
            MetricKey::AvgTradeOut,
            MetricValue::Average {
                sum: trade_sum,
                count: trade_count,
            },
        );
    }
}

/// Work-order state comes from the latest snapshot; completion stats count
/// only orders completed inside the window.
fn work_order_metrics(slice: &PropertySlice, window: DateWindow, bundle: &mut MetricBundle) {
    let Some(latest_date) = slice.work_orders.iter().map(|row| row.snapshot_date).max() else {
        return;
    };
    let current: Vec<_> = slice
        .work_orders
        .iter()
        .filter(|row| row.snapshot_date == latest_date)
        .collect();

    let open = current
        .iter()
        .filter(|wo| matches!(wo.status, WorkOrderStatus::Open | WorkOrderStatus::InProgress))
        .count() as i64;
    bundle.insert(MetricKey::OpenWorkOrders, MetricValue::Count { n: open });

    let mut days_sum = 0.0;
    let mut completed = 0i64;
    for wo in &current {
        if wo.status != WorkOrderStatus::Completed {
            continue;
        }
        let Some(done) = wo.completed_on else { continue };
        if !window.contains(done) {
            continue;
        }
        completed += 1;
        days_sum += (done - wo.opened_on).num_days() as f64;
    }
    bundle.insert(MetricKey::CompletedWorkOrders, MetricValue::Count { n: completed });
    if completed > 0 {
        bundle.insert(
            MetricKey::AvgDaysToComplete,
            MetricValue::Average {
                sum: days_sum,
                count: completed as f64,
            },
        );
    }

    let mut categories = CategoryBreakdown::default();
    for wo in &current {
        categories.add(&wo.category, 1.0);
    }
    categories.recompute_shares();
    bundle
        .breakdowns
        .insert(BreakdownKey::WorkOrderCategories, categories);
}

/// Ad-source and move-out-reason breakdowns sum across the window's fiscal
/// periods.
fn marketing_breakdowns(slice: &PropertySlice, bundle: &mut MetricBundle) {
    if !slice.ad_sources.is_empty() {
        let mut sources = CategoryBreakdown::default();
        for row in &slice.ad_sources {
            sources.add_with_extra(
                &row.source_label,
                row.leads as f64,
                &[("leases_signed", row.leases_signed as f64)],
            );
        }
        sources.recompute_shares();
        bundle.breakdowns.insert(BreakdownKey::AdSources, sources);
    }

    if !slice.moveout_reasons.is_empty() {
        let mut reasons = CategoryBreakdown::default();
        for row in &slice.moveout_reasons {
            reasons.add(&row.reason, row.move_outs as f64);
        }
        reasons.recompute_shares();
        bundle.breakdowns.insert(BreakdownKey::MoveOutReasons, reasons);
    }
}

/// Portfolio-safe rating: the average is review-weighted, never a mean of
/// per-platform means.
fn reputation_metrics(slice: &PropertySlice, bundle: &mut MetricBundle) {
    let Some(latest_date) = slice.reputation.iter().map(|row| row.snapshot_date).max() else {
        return;
    };
    let current: Vec<_> = slice
        .reputation
        .iter()
        .filter(|row| row.snapshot_date == latest_date)
        .collect();

    let reviews: i64 = current.iter().map(|row| row.review_count).sum();
    let rating_mass: f64 = current
        .iter()
        .map(|row| row.average_rating * row.review_count as f64)
        .sum();
    bundle.insert(MetricKey::ReviewCount, MetricValue::Count { n: reviews });
    bundle.insert(
        MetricKey::AverageRating,
        MetricValue::Average {
            sum: rating_mass,
            count: reviews as f64,
        },
    );

    let mut platforms = CategoryBreakdown::default();
    for row in &current {
        platforms.add_with_extra(
            &row.platform,
            row.review_count as f64,
            &[("rating_sum", row.average_rating * row.review_count as f64)],
        );
    }
    platforms.recompute_shares();
    bundle
        .breakdowns
        .insert(BreakdownKey::RatingByPlatform, platforms);
}

/// Direction of a metric's movement between two windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Improved,
    Worsened,
    Flat,
}

impl Direction {
    pub fn from_delta(delta: f64, higher_is_better: bool) -> Self {
        if delta == 0.0 {
            Direction::Flat
        } else if (delta > 0.0) == higher_is_better {
            Direction::Improved
        } else {
            Direction::Worsened
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricDelta {
    pub current: f64,
    pub prior: f64,
    pub delta: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub current_window: DateWindow,
    pub prior_window: DateWindow,
    pub deltas: BTreeMap<MetricKey, MetricDelta>,
}

/// Compare two computed bundles metric by metric with every key's default
/// improvement polarity.
pub fn compare_windows(current: &MetricBundle, prior: &MetricBundle) -> TrendReport {
    compare_windows_with(current, prior, &BTreeMap::new())
}

/// Compare two computed bundles metric by metric. Only keys present in
/// both windows produce a delta; deltas are taken over rendered values so
/// they line up with what clients display. A key in `higher_is_better`
/// overrides [`MetricKey::higher_is_better`] when classifying the
/// direction; absent keys keep their default polarity.
pub fn compare_windows_with(
    current: &MetricBundle,
    prior: &MetricBundle,
    higher_is_better: &BTreeMap<MetricKey, bool>,
) -> TrendReport {
    let mut deltas = BTreeMap::new();
    for (key, value) in &current.metrics {
        let Some(prior_value) = prior.metrics.get(key) else {
            continue;
        };
        let now = value.render();
        let before = prior_value.render();
        let delta = match value {
            MetricValue::Count { .. } => now - before,
            MetricValue::Amount { .. } => round2(now - before),
            MetricValue::Rate { .. } | MetricValue::Average { .. } => round1(now - before),
        };
        let polarity = higher_is_better
            .get(key)
            .copied()
            .unwrap_or_else(|| key.higher_is_better());
        deltas.insert(
            *key,
            MetricDelta {
                current: now,
                prior: before,
                delta,
                direction: Direction::from_delta(delta, polarity),
            },
        );
    }
    TrendReport {
        current_window: current.window,
        prior_window: prior.window,
        deltas,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use portico_core::{
        AdSourceActivity, DelinquencySnapshot, FinancialPeriod, FiscalPeriod, LeaseRecord,
        LeasingActivity, OccupancySnapshot, PmsSource, PropertyId, ReputationSnapshot,
        WorkOrderRecord,
    };

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn pid() -> PropertyId {
        PropertyId::from("maple-court")
    }

    fn occ(date: &str, total: i64, occupied: i64) -> OccupancySnapshot {
        OccupancySnapshot {
            property_id: pid(),
            pms_source: PmsSource::RealPage,
            snapshot_date: d(date),
            total_units: total,
            occupied_units: occupied,
            vacant_units: total - occupied,
            preleased_vacant_units: 0,
            notice_units_30d: 0,
            notice_units_60d: 0,
            scheduled_moveins_30d: 0,
            scheduled_moveins_60d: 0,
        }
    }

    fn lease(id: &str, status: LeaseStatus, rent: f64) -> LeaseRecord {
        LeaseRecord {
            property_id: pid(),
            pms_source: PmsSource::RealPage,
            snapshot_date: d("2025-01-20"),
            lease_id: id.to_string(),
            unit_number: format!("unit-{id}"),
            status,
            market_rent: rent + 50.0,
            lease_rent: rent,
            prior_lease_rent: None,
            lease_start: None,
            lease_end: None,
        }
    }

    fn window() -> DateWindow {
        DateWindow::new(d("2025-01-01"), d("2025-01-31")).unwrap()
    }

    #[test]
    fn empty_slice_is_insufficient_data() {
        let err = compute_bundle(&PropertySlice::default(), window(), &MetricsConfig::default())
            .unwrap_err();
        assert_eq!(err, MetricsError::InsufficientData { needed: 1, got: 0 });
    }

    #[test]
    fn min_rows_threshold_counts_only_in_window_rows() {
        let slice = PropertySlice {
            occupancy: vec![occ("2024-12-15", 100, 90), occ("2025-01-10", 100, 92)],
            ..PropertySlice::default()
        };
        let cfg = MetricsConfig { min_rows: 2 };
        let err = compute_bundle(&slice, window(), &cfg).unwrap_err();
        assert_eq!(err, MetricsError::InsufficientData { needed: 2, got: 1 });
    }

    #[test]
    fn occupancy_uses_latest_snapshot_in_window() {
        let slice = PropertySlice {
            occupancy: vec![
                occ("2025-01-10", 100, 80),
                occ("2025-01-25", 100, 95),
                occ("2025-02-05", 100, 50),
            ],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::OccupiedUnits], MetricValue::Count { n: 95 });
        assert_eq!(bundle.metrics[&MetricKey::PhysicalOccupancy].render(), 95.0);
        let trend = &bundle.series[&SeriesKey::OccupancyTrend];
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].date, d("2025-01-10"));
        assert_eq!(trend[1].date, d("2025-01-25"));
    }

    #[test]
    fn exposure_is_not_clamped_at_zero() {
        let mut snapshot = occ("2025-01-15", 100, 97);
        snapshot.notice_units_30d = 1;
        snapshot.scheduled_moveins_30d = 6;
        let slice = PropertySlice {
            occupancy: vec![snapshot],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        // 3 vacant + 1 notice - 6 scheduled move-ins.
        assert_eq!(bundle.metrics[&MetricKey::Exposure30], MetricValue::Count { n: -2 });
    }

    #[test]
    fn leased_percentage_includes_preleased_vacants() {
        let mut snapshot = occ("2025-01-15", 200, 180);
        snapshot.preleased_vacant_units = 10;
        let slice = PropertySlice {
            occupancy: vec![snapshot],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::PhysicalOccupancy].render(), 90.0);
        assert_eq!(bundle.metrics[&MetricKey::LeasedPercentage].render(), 95.0);
    }

    #[test]
    fn funnel_with_zero_leads_renders_zero_rates() {
        let slice = PropertySlice {
            activity: vec![LeasingActivity {
                property_id: pid(),
                pms_source: PmsSource::Yardi,
                activity_date: d("2025-01-08"),
                leads: 0,
                tours: 0,
                applications: 0,
                leases_signed: 0,
                move_ins: 1,
                move_outs: 2,
            }],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::LeadToTourRate].render(), 0.0);
        assert_eq!(bundle.metrics[&MetricKey::LeadToLeaseRate].render(), 0.0);
        assert_eq!(bundle.metrics[&MetricKey::MoveOuts], MetricValue::Count { n: 2 });
    }

    #[test]
    fn funnel_sums_across_days() {
        let mk = |date: &str, leads: i64, tours: i64, leases: i64| LeasingActivity {
            property_id: pid(),
            pms_source: PmsSource::RealPage,
            activity_date: d(date),
            leads,
            tours,
            applications: tours,
            leases_signed: leases,
            move_ins: 0,
            move_outs: 0,
        };
        let slice = PropertySlice {
            activity: vec![mk("2025-01-02", 10, 4, 1), mk("2025-01-03", 10, 6, 3)],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::Leads], MetricValue::Count { n: 20 });
        assert_eq!(bundle.metrics[&MetricKey::LeadToTourRate].render(), 50.0);
        assert_eq!(bundle.metrics[&MetricKey::LeadToLeaseRate].render(), 20.0);
    }

    #[test]
    fn financials_roll_up_and_revpau_needs_occupancy() {
        let fin = |month: u32, collected: f64| FinancialPeriod {
            property_id: pid(),
            pms_source: PmsSource::RealPage,
            fiscal_period: FiscalPeriod::new(2025, month).unwrap(),
            gross_potential_rent: 120_000.0,
            total_possible: 100_000.0,
            total_collected: collected,
            total_revenue: 110_000.0,
            total_expenses: 45_000.0,
        };
        let window = DateWindow::new(d("2025-01-01"), d("2025-02-28")).unwrap();

        let without_occupancy = PropertySlice {
            financials: vec![fin(1, 96_000.0), fin(2, 98_000.0)],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&without_occupancy, window, &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::CollectionRate].render(), 97.0);
        assert_eq!(
            bundle.metrics[&MetricKey::NetOperatingIncome],
            MetricValue::Amount { total: 130_000.0 }
        );
        assert!(!bundle.metrics.contains_key(&MetricKey::RevPau));

        let with_occupancy = PropertySlice {
            occupancy: vec![occ("2025-02-15", 110, 100)],
            ..without_occupancy
        };
        let bundle = compute_bundle(&with_occupancy, window, &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::RevPau].render(), 2000.0);
    }

    #[test]
    fn delinquency_uses_latest_snapshot_and_builds_aging() {
        let snap = |date: &str, total: f64| DelinquencySnapshot {
            property_id: pid(),
            pms_source: PmsSource::Yardi,
            snapshot_date: d(date),
            total_owed: total,
            owed_0_30: total / 2.0,
            owed_31_60: total / 4.0,
            owed_61_90: total / 8.0,
            owed_over_90: total / 8.0,
            prepaid_credits: 0.0,
        };
        let slice = PropertySlice {
            delinquency: vec![snap("2025-01-05", 10_000.0), snap("2025-01-28", 8_000.0)],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(
            bundle.metrics[&MetricKey::TotalDelinquent],
            MetricValue::Amount { total: 8_000.0 }
        );
        let aging = &bundle.breakdowns[&BreakdownKey::DelinquencyAging];
        assert_eq!(aging.entries["0-30"].count, 4_000.0);
        assert_eq!(aging.entries["0-30"].share_pct, 50.0);
        assert_eq!(bundle.series[&SeriesKey::DelinquencyTrend].len(), 2);
    }

    #[test]
    fn avg_lease_rent_covers_current_and_notice_only() {
        let slice = PropertySlice {
            leases: vec![
                lease("a", LeaseStatus::Current, 1_000.0),
                lease("b", LeaseStatus::Notice, 1_200.0),
                lease("c", LeaseStatus::Former, 5_000.0),
                lease("d", LeaseStatus::Future, 5_000.0),
            ],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::AvgLeaseRent].render(), 1100.0);
        let mix = &bundle.breakdowns[&BreakdownKey::LeaseStatusMix];
        assert_eq!(mix.entries["current"].count, 1.0);
        assert_eq!(mix.entries["current"].share_pct, 25.0);
    }

    #[test]
    fn trade_out_counts_only_window_starts_with_prior_rent() {
        let mut in_window = lease("a", LeaseStatus::Current, 1_500.0);
        in_window.prior_lease_rent = Some(1_400.0);
        in_window.lease_start = Some(d("2025-01-10"));
        let mut out_of_window = lease("b", LeaseStatus::Current, 2_000.0);
        out_of_window.prior_lease_rent = Some(1_000.0);
        out_of_window.lease_start = Some(d("2024-06-01"));
        let mut no_prior = lease("c", LeaseStatus::Current, 1_800.0);
        no_prior.lease_start = Some(d("2025-01-12"));

        let slice = PropertySlice {
            leases: vec![in_window, out_of_window, no_prior],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(
            bundle.metrics[&MetricKey::AvgTradeOut],
            MetricValue::Average {
                sum: 100.0,
                count: 1.0,
            }
        );
    }

    #[test]
    fn work_orders_split_open_and_completed() {
        let wo = |id: &str, status: WorkOrderStatus, opened: &str, done: Option<&str>| {
            WorkOrderRecord {
                property_id: pid(),
                pms_source: PmsSource::RealPage,
                snapshot_date: d("2025-01-30"),
                work_order_id: id.to_string(),
                category: "Plumbing".to_string(),
                status,
                opened_on: d(opened),
                completed_on: done.map(d),
            }
        };
        let slice = PropertySlice {
            work_orders: vec![
                wo("1", WorkOrderStatus::Open, "2025-01-20", None),
                wo("2", WorkOrderStatus::InProgress, "2025-01-22", None),
                wo("3", WorkOrderStatus::Completed, "2025-01-10", Some("2025-01-14")),
                wo("4", WorkOrderStatus::Completed, "2025-01-01", Some("2025-01-09")),
                // Completed before the window opened; excluded from stats.
                wo("5", WorkOrderStatus::Completed, "2024-12-01", Some("2024-12-20")),
                wo("6", WorkOrderStatus::Cancelled, "2025-01-05", None),
            ],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        assert_eq!(bundle.metrics[&MetricKey::OpenWorkOrders], MetricValue::Count { n: 2 });
        assert_eq!(
            bundle.metrics[&MetricKey::CompletedWorkOrders],
            MetricValue::Count { n: 2 }
        );
        // (4 + 8) / 2 days.
        assert_eq!(bundle.metrics[&MetricKey::AvgDaysToComplete].render(), 6.0);
        let categories = &bundle.breakdowns[&BreakdownKey::WorkOrderCategories];
        assert_eq!(categories.entries["plumbing"].count, 6.0);
    }

    #[test]
    fn ad_sources_aggregate_leads_and_leases() {
        let row = |label: &str, leads: i64, leases: i64| AdSourceActivity {
            property_id: pid(),
            pms_source: PmsSource::Yardi,
            fiscal_period: FiscalPeriod::new(2025, 1).unwrap(),
            source_label: label.to_string(),
            leads,
            leases_signed: leases,
        };
        let slice = PropertySlice {
            ad_sources: vec![row("Google", 30, 4), row("Zillow", 10, 1)],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        let sources = &bundle.breakdowns[&BreakdownKey::AdSources];
        assert_eq!(sources.entries["google"].count, 30.0);
        assert_eq!(sources.entries["google"].share_pct, 75.0);
        assert_eq!(sources.entries["google"].extra["leases_signed"], 4.0);
    }

    #[test]
    fn average_rating_is_review_weighted() {
        let rep = |platform: &str, rating: f64, reviews: i64| ReputationSnapshot {
            property_id: pid(),
            pms_source: PmsSource::RealPage,
            snapshot_date: d("2025-01-31"),
            platform: platform.to_string(),
            average_rating: rating,
            review_count: reviews,
            recommend_pct: None,
        };
        let slice = PropertySlice {
            reputation: vec![rep("Google", 4.0, 300), rep("Yelp", 2.0, 100)],
            ..PropertySlice::default()
        };
        let bundle = compute_bundle(&slice, window(), &MetricsConfig::default()).unwrap();
        // (4.0 * 300 + 2.0 * 100) / 400, not (4.0 + 2.0) / 2.
        assert_eq!(bundle.metrics[&MetricKey::AverageRating].render(), 3.5);
        assert_eq!(bundle.metrics[&MetricKey::ReviewCount], MetricValue::Count { n: 400 });
    }

    #[test]
    fn trend_direction_respects_metric_polarity() {
        let current_window = DateWindow::new(d("2025-02-01"), d("2025-02-28")).unwrap();
        let prior_window = DateWindow::new(d("2025-01-01"), d("2025-01-31")).unwrap();

        let mut current = MetricBundle::new(current_window);
        current.insert(
            MetricKey::PhysicalOccupancy,
            MetricValue::Rate {
                numerator: 95.0,
                denominator: 100.0,
            },
        );
        current.insert(MetricKey::Exposure30, MetricValue::Count { n: 4 });
        current.insert(MetricKey::TotalUnits, MetricValue::Count { n: 100 });
        // Present only in the current window; no delta should appear.
        current.insert(MetricKey::Leads, MetricValue::Count { n: 50 });

        let mut prior = MetricBundle::new(prior_window);
        prior.insert(
            MetricKey::PhysicalOccupancy,
            MetricValue::Rate {
                numerator: 92.0,
                denominator: 100.0,
            },
        );
        prior.insert(MetricKey::Exposure30, MetricValue::Count { n: 9 });
        prior.insert(MetricKey::TotalUnits, MetricValue::Count { n: 100 });

        let report = compare_windows(&current, &prior);
        let occupancy = &report.deltas[&MetricKey::PhysicalOccupancy];
        assert_eq!(occupancy.delta, 3.0);
        assert_eq!(occupancy.direction, Direction::Improved);
        // Exposure fell by five, and lower exposure is better.
        let exposure = &report.deltas[&MetricKey::Exposure30];
        assert_eq!(exposure.delta, -5.0);
        assert_eq!(exposure.direction, Direction::Improved);
        assert_eq!(report.deltas[&MetricKey::TotalUnits].direction, Direction::Flat);
        assert!(!report.deltas.contains_key(&MetricKey::Leads));
    }

    #[test]
    fn caller_polarity_override_reclassifies_direction() {
        let current_window = DateWindow::new(d("2025-02-01"), d("2025-02-28")).unwrap();
        let prior_window = DateWindow::new(d("2025-01-01"), d("2025-01-31")).unwrap();

        let mut current = MetricBundle::new(current_window);
        current.insert(
            MetricKey::PhysicalOccupancy,
            MetricValue::Rate {
                numerator: 95.0,
                denominator: 100.0,
            },
        );
        current.insert(MetricKey::Exposure30, MetricValue::Count { n: 4 });
        let mut prior = MetricBundle::new(prior_window);
        prior.insert(
            MetricKey::PhysicalOccupancy,
            MetricValue::Rate {
                numerator: 92.0,
                denominator: 100.0,
            },
        );
        prior.insert(MetricKey::Exposure30, MetricValue::Count { n: 9 });

        let overrides = BTreeMap::from([(MetricKey::PhysicalOccupancy, false)]);
        let report = compare_windows_with(&current, &prior, &overrides);
        // The override flips rising occupancy to bad; the untouched key
        // keeps its default polarity.
        assert_eq!(
            report.deltas[&MetricKey::PhysicalOccupancy].direction,
            Direction::Worsened
        );
        assert_eq!(
            report.deltas[&MetricKey::Exposure30].direction,
            Direction::Improved
        );
    }
}
