//! Portfolio aggregation: merge per-property bundles into one.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use portico_core::PropertyId;
use tracing::warn;

use crate::{
    BreakdownKey, CategoryBreakdown, MetricBundle, MetricKey, MetricValue, MetricsError,
    PropertyResult, SeriesKey, SeriesPoint,
};

/// A property left out of a portfolio merge, with the error that excluded
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSource {
    pub property_id: PropertyId,
    pub reason: MetricsError,
}

/// The merged bundle plus the provenance callers need to label partial
/// results.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioBundle {
    pub bundle: MetricBundle,
    pub sources_requested: usize,
    pub sources_contributing: Vec<PropertyId>,
    pub skipped: Vec<SkippedSource>,
}

/// Merge per-property results into a portfolio bundle. Failed properties
/// are skipped and recorded; the merge fails when nothing survives, or when
/// the surviving bundles disagree on the window they cover.
///
/// Scalar metrics merge across every contributing bundle that carries the
/// key. Breakdowns union their categories and recompute shares over the
/// combined totals. Series keep only dates present in every contributing
/// bundle, so a property with a missing snapshot drops that date for the
/// whole portfolio.
pub fn merge_bundles(results: Vec<PropertyResult>) -> Result<PortfolioBundle, MetricsError> {
    let requested = results.len();
    let mut contributing: Vec<(PropertyId, MetricBundle)> = Vec::new();
    let mut skipped = Vec::new();
    for (property_id, result) in results {
        match result {
            Ok(bundle) => contributing.push((property_id, bundle)),
            Err(reason) => {
                warn!(property = %property_id, %reason, "excluding property from portfolio merge");
                skipped.push(SkippedSource {
                    property_id,
                    reason,
                });
            }
        }
    }

    let Some((_, first)) = contributing.first() else {
        return Err(MetricsError::NoValidSources { requested });
    };
    let window = first.window;
    for (property_id, bundle) in &contributing {
        if bundle.window != window {
            return Err(MetricsError::MergeInvariant {
                detail: format!(
                    "bundle for {property_id} covers {}..{}, expected {}..{}",
                    bundle.window.start, bundle.window.end, window.start, window.end
                ),
            });
        }
    }
    let mut merged = MetricBundle::new(window);

    let metric_keys: BTreeSet<MetricKey> = contributing
        .iter()
        .flat_map(|(_, bundle)| bundle.metrics.keys().copied())
        .collect();
    for key in metric_keys {
        let mut acc: Option<MetricValue> = None;
        for (_, bundle) in &contributing {
            let Some(value) = bundle.metrics.get(&key) else {
                continue;
            };
            acc = Some(match acc {
                None => *value,
                Some(prev) => prev.merge(*value, key.merge_mode())?,
            });
        }
        if let Some(value) = acc {
            merged.metrics.insert(key, value);
        }
    }

    let breakdown_keys: BTreeSet<BreakdownKey> = contributing
        .iter()
        .flat_map(|(_, bundle)| bundle.breakdowns.keys().copied())
        .collect();
    for key in breakdown_keys {
        let mut acc = CategoryBreakdown::default();
        for (_, bundle) in &contributing {
            if let Some(breakdown) = bundle.breakdowns.get(&key) {
                acc.merge(breakdown);
            }
        }
        merged.breakdowns.insert(key, acc);
    }

    let series_keys: BTreeSet<SeriesKey> = contributing
        .iter()
        .flat_map(|(_, bundle)| bundle.series.keys().copied())
        .collect();
    for key in series_keys {
        let dates = shared_dates(&contributing, key);
        let mut points = Vec::with_capacity(dates.len());
        for date in dates {
            let mut acc: Option<MetricValue> = None;
            for (_, bundle) in &contributing {
                let Some(point) = bundle
                    .series
                    .get(&key)
                    .and_then(|series| series.iter().find(|point| point.date == date))
                else {
                    continue;
                };
                acc = Some(match acc {
                    None => point.value,
                    Some(prev) => prev.merge(point.value, key.merge_mode())?,
                });
            }
            if let Some(value) = acc {
                points.push(SeriesPoint { date, value });
            }
        }
        merged.series.insert(key, points);
    }

    let sources_contributing = contributing.iter().map(|(id, _)| id.clone()).collect();
    Ok(PortfolioBundle {
        bundle: merged,
        sources_requested: requested,
        sources_contributing,
        skipped,
    })
}

/// Dates present in this series for every contributing bundle. A bundle
/// without the series contributes an empty set, which empties the
/// intersection.
fn shared_dates(
    contributing: &[(PropertyId, MetricBundle)],
    key: SeriesKey,
) -> BTreeSet<NaiveDate> {
    let mut dates: Option<BTreeSet<NaiveDate>> = None;
    for (_, bundle) in contributing {
        let bundle_dates: BTreeSet<NaiveDate> = bundle
            .series
            .get(&key)
            .map(|series| series.iter().map(|point| point.date).collect())
            .unwrap_or_default();
        dates = Some(match dates {
            None => bundle_dates,
            Some(acc) => acc.intersection(&bundle_dates).copied().collect(),
        });
    }
    dates.unwrap_or_default()
}
