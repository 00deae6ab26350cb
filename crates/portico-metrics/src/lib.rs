//! Metric model, per-property calculators and the portfolio aggregation engine.

pub mod aggregate;
pub mod calculator;
pub mod gather;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use portico_core::{
    round1, round2, share_pct, AdSourceActivity, DateWindow, DelinquencySnapshot, FinancialPeriod,
    LeaseRecord, LeasingActivity, MoveOutReasonCount, OccupancySnapshot, PropertyId,
    ReputationSnapshot, WorkOrderRecord,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aggregate::{merge_bundles, PortfolioBundle, SkippedSource};
pub use calculator::{
    compare_windows, compare_windows_with, compute_bundle, Direction, MetricDelta, TrendReport,
};
pub use gather::{gather_bundles, CancelHandle, GatherConfig, SliceSource};

pub const CRATE_NAME: &str = "portico-metrics";

/// Errors produced while computing or combining metric bundles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("insufficient data: needed {needed} rows, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("no valid sources: all {requested} requested properties failed")]
    NoValidSources { requested: usize },
    #[error("merge invariant violated: {detail}")]
    MergeInvariant { detail: String },
    #[error("fetch failed: {message}")]
    FetchFailed { message: String },
    #[error("fetch timed out after {waited_ms}ms")]
    FetchTimeout { waited_ms: u64 },
    #[error("gather cancelled")]
    Cancelled,
}

/// How two values of the same metric combine across properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    Sum,
    WeightedAverage,
    CategoryUnion,
}

/// A metric value that keeps its raw components so merged ratios can be
/// recomputed from merged numerators and denominators instead of averaging
/// the already-divided results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Count { n: i64 },
    Amount { total: f64 },
    Rate { numerator: f64, denominator: f64 },
    Average { sum: f64, count: f64 },
}

impl MetricValue {
    /// The merge mode this shape participates in.
    pub fn merge_shape(&self) -> MergeMode {
        match self {
            MetricValue::Count { .. } | MetricValue::Amount { .. } => MergeMode::Sum,
            MetricValue::Rate { .. } | MetricValue::Average { .. } => MergeMode::WeightedAverage,
        }
    }

    /// Collapse to the value clients see. Rates become percentages on a
    /// 0-100 scale rounded to one decimal; a zero denominator renders 0.0.
    pub fn render(&self) -> f64 {
        match self {
            MetricValue::Count { n } => *n as f64,
            MetricValue::Amount { total } => round2(*total),
            MetricValue::Rate {
                numerator,
                denominator,
            } => {
                if *denominator == 0.0 {
                    0.0
                } else {
                    round1(numerator / denominator * 100.0)
                }
            }
            MetricValue::Average { sum, count } => {
                if *count == 0.0 {
                    0.0
                } else {
                    round1(sum / count)
                }
            }
        }
    }

    /// Combine two values under `mode`. Anything but like shapes under
    /// their declared mode is an invariant violation.
    pub fn merge(self, other: MetricValue, mode: MergeMode) -> Result<MetricValue, MetricsError> {
        match (mode, self, other) {
            (MergeMode::Sum, MetricValue::Count { n: a }, MetricValue::Count { n: b }) => {
                Ok(MetricValue::Count { n: a + b })
            }
            (MergeMode::Sum, MetricValue::Amount { total: a }, MetricValue::Amount { total: b }) => {
                Ok(MetricValue::Amount { total: a + b })
            }
            (
                MergeMode::WeightedAverage,
                MetricValue::Rate {
                    numerator: an,
                    denominator: ad,
                },
                MetricValue::Rate {
                    numerator: bn,
                    denominator: bd,
                },
            ) => Ok(MetricValue::Rate {
                numerator: an + bn,
                denominator: ad + bd,
            }),
            (
                MergeMode::WeightedAverage,
                MetricValue::Average { sum: asum, count: ac },
                MetricValue::Average { sum: bsum, count: bc },
            ) => Ok(MetricValue::Average {
                sum: asum + bsum,
                count: ac + bc,
            }),
            (mode, a, b) => Err(MetricsError::MergeInvariant {
                detail: format!("cannot merge {a:?} with {b:?} under {mode:?}"),
            }),
        }
    }
}

/// Every scalar metric the calculators emit. Ordering fixes the JSON key
/// order clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    PhysicalOccupancy,
    LeasedPercentage,
    Exposure30,
    Exposure60,
    TotalUnits,
    OccupiedUnits,
    VacantUnits,
    Leads,
    Tours,
    Applications,
    LeasesSigned,
    MoveIns,
    MoveOuts,
    LeadToTourRate,
    TourToApplicationRate,
    ApplicationToLeaseRate,
    LeadToLeaseRate,
    TotalPossible,
    TotalCollected,
    CollectionRate,
    TotalDelinquent,
    DelinquentOver90,
    NetOperatingIncome,
    RevPau,
    AvgLeaseRent,
    AvgTradeOut,
    OpenWorkOrders,
    CompletedWorkOrders,
    AvgDaysToComplete,
    AverageRating,
    ReviewCount,
}

impl MetricKey {
    /// Declared merge mode. Ratio and per-unit metrics recombine from raw
    /// components; everything else sums.
    pub fn merge_mode(&self) -> MergeMode {
        match self {
            MetricKey::PhysicalOccupancy
            | MetricKey::LeasedPercentage
            | MetricKey::LeadToTourRate
            | MetricKey::TourToApplicationRate
            | MetricKey::ApplicationToLeaseRate
            | MetricKey::LeadToLeaseRate
            | MetricKey::CollectionRate
            | MetricKey::RevPau
            | MetricKey::AvgLeaseRent
            | MetricKey::AvgTradeOut
            | MetricKey::AvgDaysToComplete
            | MetricKey::AverageRating => MergeMode::WeightedAverage,
            _ => MergeMode::Sum,
        }
    }

    /// Default direction used by trend comparison when a caller does not
    /// override it.
    pub fn higher_is_better(&self) -> bool {
        !matches!(
            self,
            MetricKey::Exposure30
                | MetricKey::Exposure60
                | MetricKey::VacantUnits
                | MetricKey::MoveOuts
                | MetricKey::TotalDelinquent
                | MetricKey::DelinquentOver90
                | MetricKey::OpenWorkOrders
                | MetricKey::AvgDaysToComplete
        )
    }
}

/// Labelled category breakdowns attached to a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownKey {
    LeaseStatusMix,
    DelinquencyAging,
    WorkOrderCategories,
    AdSources,
    MoveOutReasons,
    RatingByPlatform,
}

/// One category within a breakdown. `count` drives the share; `extra`
/// carries secondary sums (leases per ad source, rating mass per platform).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryEntry {
    pub label: String,
    pub count: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
    pub share_pct: f64,
}

/// Categories keyed by normalized label so "Apartments.com" and
/// "apartments.com " land in the same bucket across sources.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CategoryBreakdown {
    pub entries: BTreeMap<String, CategoryEntry>,
}

impl CategoryBreakdown {
    pub fn normalize_label(raw: &str) -> String {
        raw.trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn add(&mut self, label: &str, count: f64) {
        self.add_with_extra(label, count, &[]);
    }

    /// Accumulate into the bucket for `label`, creating it on first sight.
    /// The first spelling seen becomes the display label.
    pub fn add_with_extra(&mut self, label: &str, count: f64, extra: &[(&str, f64)]) {
        let key = Self::normalize_label(label);
        let entry = self.entries.entry(key).or_insert_with(|| CategoryEntry {
            label: label.trim().to_string(),
            count: 0.0,
            extra: BTreeMap::new(),
            share_pct: 0.0,
        });
        entry.count += count;
        for (name, value) in extra {
            *entry.extra.entry((*name).to_string()).or_default() += value;
        }
    }

    /// Union another breakdown into this one and recompute shares over the
    /// combined totals.
    pub fn merge(&mut self, other: &CategoryBreakdown) {
        for (key, entry) in &other.entries {
            let target = self.entries.entry(key.clone()).or_insert_with(|| CategoryEntry {
                label: entry.label.clone(),
                count: 0.0,
                extra: BTreeMap::new(),
                share_pct: 0.0,
            });
            target.count += entry.count;
            for (name, value) in &entry.extra {
                *target.extra.entry(name.clone()).or_default() += value;
            }
        }
        self.recompute_shares();
    }

    pub fn total(&self) -> f64 {
        self.entries.values().map(|entry| entry.count).sum()
    }

    pub fn recompute_shares(&mut self) {
        let total = self.total();
        for entry in self.entries.values_mut() {
            entry.share_pct = share_pct(entry.count, total);
        }
    }
}

/// Dated series attached to a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKey {
    OccupancyTrend,
    DelinquencyTrend,
}

impl SeriesKey {
    pub fn merge_mode(&self) -> MergeMode {
        match self {
            SeriesKey::OccupancyTrend => MergeMode::WeightedAverage,
            SeriesKey::DelinquencyTrend => MergeMode::Sum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: MetricValue,
}

/// Everything computed for one property (or one merged portfolio) over a
/// window: scalar metrics, category breakdowns and dated series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricBundle {
    pub window: DateWindow,
    pub metrics: BTreeMap<MetricKey, MetricValue>,
    pub breakdowns: BTreeMap<BreakdownKey, CategoryBreakdown>,
    pub series: BTreeMap<SeriesKey, Vec<SeriesPoint>>,
}

impl MetricBundle {
    pub fn new(window: DateWindow) -> Self {
        Self {
            window,
            metrics: BTreeMap::new(),
            breakdowns: BTreeMap::new(),
            series: BTreeMap::new(),
        }
    }

    /// Insert a scalar metric. The value's shape must agree with the key's
    /// declared merge mode.
    pub fn insert(&mut self, key: MetricKey, value: MetricValue) {
        debug_assert!(
            value.merge_shape() == key.merge_mode(),
            "metric {key:?} declares {:?} but value {value:?} has shape {:?}",
            key.merge_mode(),
            value.merge_shape(),
        );
        self.metrics.insert(key, value);
    }

    /// Rendered view of the scalar metrics, ready for serialization.
    pub fn rendered_metrics(&self) -> BTreeMap<MetricKey, f64> {
        self.metrics
            .iter()
            .map(|(key, value)| (*key, value.render()))
            .collect()
    }
}

/// Unified rows for one property, grouped by family.
#[derive(Debug, Clone, Default)]
pub struct PropertySlice {
    pub occupancy: Vec<OccupancySnapshot>,
    pub activity: Vec<LeasingActivity>,
    pub leases: Vec<LeaseRecord>,
    pub delinquency: Vec<DelinquencySnapshot>,
    pub financials: Vec<FinancialPeriod>,
    pub work_orders: Vec<WorkOrderRecord>,
    pub ad_sources: Vec<AdSourceActivity>,
    pub moveout_reasons: Vec<MoveOutReasonCount>,
    pub reputation: Vec<ReputationSnapshot>,
}

impl PropertySlice {
    pub fn row_count(&self) -> usize {
        self.occupancy.len()
            + self.activity.len()
            + self.leases.len()
            + self.delinquency.len()
            + self.financials.len()
            + self.work_orders.len()
            + self.ad_sources.len()
            + self.moveout_reasons.len()
            + self.reputation.len()
    }

    /// Restrict every family to the window: snapshot and activity rows by
    /// date, fiscal rows by period.
    pub fn clip_to(&self, window: DateWindow) -> PropertySlice {
        let periods = window.fiscal_periods();
        PropertySlice {
            occupancy: self
                .occupancy
                .iter()
                .filter(|row| window.contains(row.snapshot_date))
                .cloned()
                .collect(),
            activity: self
                .activity
                .iter()
                .filter(|row| window.contains(row.activity_date))
                .cloned()
                .collect(),
            leases: self
                .leases
                .iter()
                .filter(|row| window.contains(row.snapshot_date))
                .cloned()
                .collect(),
            delinquency: self
                .delinquency
                .iter()
                .filter(|row| window.contains(row.snapshot_date))
                .cloned()
                .collect(),
            financials: self
                .financials
                .iter()
                .filter(|row| periods.contains(&row.fiscal_period))
                .cloned()
                .collect(),
            work_orders: self
                .work_orders
                .iter()
                .filter(|row| window.contains(row.snapshot_date))
                .cloned()
                .collect(),
            ad_sources: self
                .ad_sources
                .iter()
                .filter(|row| periods.contains(&row.fiscal_period))
                .cloned()
                .collect(),
            moveout_reasons: self
                .moveout_reasons
                .iter()
                .filter(|row| periods.contains(&row.fiscal_period))
                .cloned()
                .collect(),
            reputation: self
                .reputation
                .iter()
                .filter(|row| window.contains(row.snapshot_date))
                .cloned()
                .collect(),
        }
    }
}

/// Knobs for the per-property calculators.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Minimum unified rows inside the window before a bundle is computed.
    pub min_rows: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { min_rows: 1 }
    }
}

impl MetricsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_rows: std::env::var("PORTICO_MIN_ROWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_rows),
        }
    }
}

/// Identifies one property in a portfolio merge.
pub type PropertyResult = (PropertyId, Result<MetricBundle, MetricsError>);

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn count_renders_as_plain_number() {
        assert_eq!(MetricValue::Count { n: 42 }.render(), 42.0);
    }

    #[test]
    fn amount_renders_to_cents() {
        assert_eq!(MetricValue::Amount { total: 1234.567 }.render(), 1234.57);
    }

    #[test]
    fn rate_renders_as_percentage_one_decimal() {
        let rate = MetricValue::Rate {
            numerator: 1.0,
            denominator: 3.0,
        };
        assert_eq!(rate.render(), 33.3);
    }

    #[test]
    fn zero_denominator_renders_zero() {
        let rate = MetricValue::Rate {
            numerator: 5.0,
            denominator: 0.0,
        };
        assert_eq!(rate.render(), 0.0);
        let avg = MetricValue::Average {
            sum: 10.0,
            count: 0.0,
        };
        assert_eq!(avg.render(), 0.0);
    }

    #[test]
    fn rates_merge_from_raw_components() {
        let a = MetricValue::Rate {
            numerator: 95.0,
            denominator: 100.0,
        };
        let b = MetricValue::Rate {
            numerator: 40.0,
            denominator: 50.0,
        };
        let merged = a.merge(b, MergeMode::WeightedAverage).unwrap();
        assert_eq!(
            merged,
            MetricValue::Rate {
                numerator: 135.0,
                denominator: 150.0,
            }
        );
        assert_eq!(merged.render(), 90.0);
    }

    #[test]
    fn counts_and_amounts_merge_by_sum() {
        let n = MetricValue::Count { n: 3 }
            .merge(MetricValue::Count { n: 4 }, MergeMode::Sum)
            .unwrap();
        assert_eq!(n, MetricValue::Count { n: 7 });
        let total = MetricValue::Amount { total: 10.5 }
            .merge(MetricValue::Amount { total: 2.25 }, MergeMode::Sum)
            .unwrap();
        assert_eq!(total, MetricValue::Amount { total: 12.75 });
    }

    #[test]
    fn shape_mismatch_is_an_invariant_violation() {
        let err = MetricValue::Count { n: 1 }
            .merge(
                MetricValue::Rate {
                    numerator: 1.0,
                    denominator: 2.0,
                },
                MergeMode::Sum,
            )
            .unwrap_err();
        assert!(matches!(err, MetricsError::MergeInvariant { .. }));

        let err = MetricValue::Count { n: 1 }
            .merge(MetricValue::Count { n: 2 }, MergeMode::WeightedAverage)
            .unwrap_err();
        assert!(matches!(err, MetricsError::MergeInvariant { .. }));
    }

    #[test]
    fn ratio_keys_declare_weighted_average() {
        assert_eq!(
            MetricKey::PhysicalOccupancy.merge_mode(),
            MergeMode::WeightedAverage
        );
        assert_eq!(MetricKey::AvgLeaseRent.merge_mode(), MergeMode::WeightedAverage);
        assert_eq!(MetricKey::TotalUnits.merge_mode(), MergeMode::Sum);
        assert_eq!(MetricKey::NetOperatingIncome.merge_mode(), MergeMode::Sum);
    }

    #[test]
    fn label_normalization_collapses_case_and_whitespace() {
        assert_eq!(
            CategoryBreakdown::normalize_label("  Apartments.com  "),
            "apartments.com"
        );
        assert_eq!(
            CategoryBreakdown::normalize_label("Google   My\tBusiness"),
            "google my business"
        );
    }

    #[test]
    fn breakdown_add_accumulates_under_normalized_label() {
        let mut breakdown = CategoryBreakdown::default();
        breakdown.add("Google", 3.0);
        breakdown.add("google ", 2.0);
        breakdown.add("Zillow", 5.0);
        breakdown.recompute_shares();
        assert_eq!(breakdown.entries.len(), 2);
        let google = &breakdown.entries["google"];
        assert_eq!(google.label, "Google");
        assert_eq!(google.count, 5.0);
        assert_eq!(google.share_pct, 50.0);
    }

    #[test]
    fn breakdown_merge_sums_counts_and_extras_then_reshapes() {
        let mut a = CategoryBreakdown::default();
        a.add_with_extra("Google", 30.0, &[("leases_signed", 4.0)]);
        a.add_with_extra("Zillow", 10.0, &[("leases_signed", 1.0)]);
        a.recompute_shares();
        assert_eq!(a.entries["google"].share_pct, 75.0);

        let mut b = CategoryBreakdown::default();
        b.add_with_extra("google", 10.0, &[("leases_signed", 2.0)]);
        b.add_with_extra("Craigslist", 10.0, &[("leases_signed", 0.0)]);
        b.recompute_shares();

        a.merge(&b);
        assert_eq!(a.entries.len(), 3);
        let google = &a.entries["google"];
        assert_eq!(google.count, 40.0);
        assert_eq!(google.extra["leases_signed"], 6.0);
        // 40 of 60, not the mean of the per-source shares.
        assert_eq!(google.share_pct, 66.7);
    }

    #[test]
    fn bundle_insert_accepts_matching_shapes() {
        let window = DateWindow::new(d("2025-01-01"), d("2025-01-31")).unwrap();
        let mut bundle = MetricBundle::new(window);
        bundle.insert(MetricKey::TotalUnits, MetricValue::Count { n: 120 });
        bundle.insert(
            MetricKey::PhysicalOccupancy,
            MetricValue::Rate {
                numerator: 110.0,
                denominator: 120.0,
            },
        );
        assert_eq!(bundle.rendered_metrics()[&MetricKey::PhysicalOccupancy], 91.7);
    }

    #[test]
    fn metric_keys_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&MetricKey::PhysicalOccupancy).unwrap(),
            "\"physical_occupancy\""
        );
        assert_eq!(
            serde_json::to_string(&MetricKey::RevPau).unwrap(),
            "\"rev_pau\""
        );
    }

    #[test]
    fn slice_clip_respects_window_per_family() {
        use portico_core::{FiscalPeriod, PmsSource};
        let window = DateWindow::new(d("2025-02-01"), d("2025-02-28")).unwrap();
        let slice = PropertySlice {
            occupancy: vec![
                OccupancySnapshot {
                    property_id: PropertyId::from("p1"),
                    pms_source: PmsSource::RealPage,
                    snapshot_date: d("2025-01-31"),
                    total_units: 100,
                    occupied_units: 90,
                    vacant_units: 10,
                    preleased_vacant_units: 2,
                    notice_units_30d: 3,
                    notice_units_60d: 5,
                    scheduled_moveins_30d: 1,
                    scheduled_moveins_60d: 2,
                },
                OccupancySnapshot {
                    property_id: PropertyId::from("p1"),
                    pms_source: PmsSource::RealPage,
                    snapshot_date: d("2025-02-14"),
                    total_units: 100,
                    occupied_units: 92,
                    vacant_units: 8,
                    preleased_vacant_units: 1,
                    notice_units_30d: 2,
                    notice_units_60d: 4,
                    scheduled_moveins_30d: 1,
                    scheduled_moveins_60d: 1,
                },
            ],
            financials: vec![
                FinancialPeriod {
                    property_id: PropertyId::from("p1"),
                    pms_source: PmsSource::RealPage,
                    fiscal_period: FiscalPeriod::new(2025, 1).unwrap(),
                    gross_potential_rent: 100_000.0,
                    total_possible: 100_000.0,
                    total_collected: 97_000.0,
                    total_revenue: 99_000.0,
                    total_expenses: 40_000.0,
                },
                FinancialPeriod {
                    property_id: PropertyId::from("p1"),
                    pms_source: PmsSource::RealPage,
                    fiscal_period: FiscalPeriod::new(2025, 2).unwrap(),
                    gross_potential_rent: 100_000.0,
                    total_possible: 101_000.0,
                    total_collected: 98_500.0,
                    total_revenue: 99_500.0,
                    total_expenses: 41_000.0,
                },
            ],
            ..PropertySlice::default()
        };
        let clipped = slice.clip_to(window);
        assert_eq!(clipped.occupancy.len(), 1);
        assert_eq!(clipped.occupancy[0].snapshot_date, d("2025-02-14"));
        assert_eq!(clipped.financials.len(), 1);
        assert_eq!(
            clipped.financials[0].fiscal_period,
            FiscalPeriod::new(2025, 2).unwrap()
        );
        assert_eq!(clipped.row_count(), 2);
    }
}
