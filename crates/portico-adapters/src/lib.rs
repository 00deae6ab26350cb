//! Per-PMS report mappers: raw report rows in, unified rows out. Pure, no I/O.

use chrono::NaiveDate;
use portico_core::{
    AdSourceActivity, DelinquencySnapshot, FinancialPeriod, FiscalPeriod, LeaseRecord, LeaseStatus,
    LeasingActivity, MoveOutReasonCount, OccupancySnapshot, PmsSource, PropertyId,
    ReputationSnapshot, TableRows, UnifiedTable, WorkOrderRecord, WorkOrderStatus,
};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CRATE_NAME: &str = "portico-adapters";

/// Why a single raw row could not be mapped. Rows failing with these are
/// skipped and counted; they never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("raw payload is not a JSON object")]
    NotAnObject,
    #[error("missing field `{field}`")]
    MissingField { field: String },
    #[error("field `{field}` is malformed: {detail}")]
    MalformedField { field: String, detail: String },
    #[error("field `{field}` has unrecognized status `{value}`")]
    UnknownStatus { field: String, value: String },
    #[error("field `{field}` has unparseable date `{value}`")]
    BadDate { field: String, value: String },
}

impl MapError {
    fn malformed(field: &str, detail: impl Into<String>) -> Self {
        MapError::MalformedField {
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

/// One duck-typed report row as delivered by the raw source store.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow(Map<String, Value>);

impl RawRow {
    pub fn from_value(value: Value) -> Result<Self, MapError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(MapError::NotAnObject),
        }
    }

    fn field(&self, field: &str) -> Result<&Value, MapError> {
        self.0.get(field).ok_or_else(|| MapError::MissingField {
            field: field.to_string(),
        })
    }

    pub fn str_field(&self, field: &str) -> Result<&str, MapError> {
        self.field(field)?
            .as_str()
            .ok_or_else(|| MapError::malformed(field, "expected a string"))
    }

    /// Missing, null, or blank reads as `None`.
    pub fn opt_str(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn i64_field(&self, field: &str) -> Result<i64, MapError> {
        let value = self.field(field)?;
        if let Some(n) = value.as_i64() {
            return Ok(n);
        }
        if let Some(s) = value.as_str() {
            if let Ok(n) = s.trim().replace(',', "").parse::<i64>() {
                return Ok(n);
            }
        }
        Err(MapError::malformed(
            field,
            format!("expected an integer, got {value}"),
        ))
    }

    pub fn f64_field(&self, field: &str) -> Result<f64, MapError> {
        let value = self.field(field)?;
        if let Some(n) = value.as_f64() {
            return Ok(n);
        }
        if let Some(s) = value.as_str() {
            if let Ok(n) = s.trim().replace(',', "").parse::<f64>() {
                return Ok(n);
            }
        }
        Err(MapError::malformed(
            field,
            format!("expected a number, got {value}"),
        ))
    }

    /// Money column: JSON number, or a PMS-export string like `$1,234.56`,
    /// `(850.00)` for negatives, blank for zero.
    pub fn money_field(&self, field: &str) -> Result<f64, MapError> {
        let value = self.field(field)?;
        if let Some(n) = value.as_f64() {
            return Ok(n);
        }
        if let Some(s) = value.as_str() {
            if let Some(amount) = parse_money(s) {
                return Ok(amount);
            }
        }
        Err(MapError::malformed(
            field,
            format!("expected a money amount, got {value}"),
        ))
    }

    /// Money column that may be absent entirely (missing/null/blank -> None).
    pub fn opt_money(&self, field: &str) -> Result<Option<f64>, MapError> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                if let Some(n) = value.as_f64() {
                    return Ok(Some(n));
                }
                if let Some(s) = value.as_str() {
                    if s.trim().is_empty() {
                        return Ok(None);
                    }
                    if let Some(amount) = parse_money(s) {
                        return Ok(Some(amount));
                    }
                }
                Err(MapError::malformed(
                    field,
                    format!("expected a money amount, got {value}"),
                ))
            }
        }
    }

    pub fn date_field(&self, field: &str) -> Result<NaiveDate, MapError> {
        let s = self.str_field(field)?.trim();
        parse_date(s).ok_or_else(|| MapError::BadDate {
            field: field.to_string(),
            value: s.to_string(),
        })
    }

    pub fn opt_date(&self, field: &str) -> Result<Option<NaiveDate>, MapError> {
        match self.opt_str(field) {
            None => Ok(None),
            Some(s) => parse_date(s).map(Some).ok_or_else(|| MapError::BadDate {
                field: field.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

fn parse_money(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let stripped: String = trimmed
        .trim_start_matches('(')
        .trim_end_matches(')')
        .chars()
        .filter(|c| !matches!(c, '$' | ','))
        .collect();
    let stripped = stripped.trim();
    let amount: f64 = stripped.parse().ok()?;
    Some(if negative { -amount } else { amount })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

/// Run-scoped identity stamped onto every mapped row.
#[derive(Debug, Clone)]
pub struct MapContext {
    pub property_id: PropertyId,
    /// Snapshot date for as-of reports that carry no date column themselves.
    pub as_of: NaiveDate,
}

/// Output of mapping one raw batch: unified rows in natural-key order plus
/// the per-row failures that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedBatch {
    pub rows: TableRows,
    pub skipped: Vec<MapError>,
}

/// One mapper per PMS; selected via [`mapper_for`].
pub trait PmsMapper: Send + Sync {
    fn pms(&self) -> PmsSource;

    /// Raw `report_kind` that feeds the given unified table for this PMS.
    fn report_kind(&self, table: UnifiedTable) -> &'static str;

    /// Map one raw batch for one unified table. Malformed rows are skipped
    /// and counted, never fatal to the batch.
    fn map_table(&self, table: UnifiedTable, ctx: &MapContext, rows: &[RawRow]) -> MappedBatch;
}

pub fn mapper_for(pms: PmsSource) -> Box<dyn PmsMapper> {
    match pms {
        PmsSource::RealPage => Box::new(RealPageMapper),
        PmsSource::Yardi => Box::new(YardiMapper),
    }
}

fn collect_rows<T>(
    raw: &[RawRow],
    mut map_one: impl FnMut(&RawRow) -> Result<T, MapError>,
    wrap: impl FnOnce(Vec<T>) -> TableRows,
) -> MappedBatch {
    let mut mapped = Vec::with_capacity(raw.len());
    let mut skipped = Vec::new();
    for row in raw {
        match map_one(row) {
            Ok(unified) => mapped.push(unified),
            Err(err) => skipped.push(err),
        }
    }
    let mut rows = wrap(mapped);
    rows.sort();
    MappedBatch { rows, skipped }
}

/// RealPage exports: PascalCase columns, `$1,234.56` money strings,
/// `MM/DD/YYYY` dates, `YYYY/MM` fiscal periods.
#[derive(Debug, Clone, Copy)]
pub struct RealPageMapper;

impl RealPageMapper {
    fn period(row: &RawRow, field: &str) -> Result<FiscalPeriod, MapError> {
        let s = row.str_field(field)?.trim();
        let parsed = s.split_once('/').and_then(|(year, month)| {
            let year: i32 = year.parse().ok()?;
            let month: u32 = month.parse().ok()?;
            FiscalPeriod::new(year, month).ok()
        });
        parsed.ok_or_else(|| MapError::malformed(field, format!("expected YYYY/MM, got `{s}`")))
    }

    fn lease_status(row: &RawRow) -> Result<LeaseStatus, MapError> {
        let raw = row.str_field("LeaseStatus")?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(LeaseStatus::Current),
            "notice" | "ntv" => Ok(LeaseStatus::Notice),
            "past" | "former" => Ok(LeaseStatus::Former),
            "pending" | "future" => Ok(LeaseStatus::Future),
            _ => Err(MapError::UnknownStatus {
                field: "LeaseStatus".to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn work_order_status(row: &RawRow) -> Result<WorkOrderStatus, MapError> {
        let raw = row.str_field("Status")?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" | "new" => Ok(WorkOrderStatus::Open),
            "in progress" | "assigned" => Ok(WorkOrderStatus::InProgress),
            "completed" | "closed" => Ok(WorkOrderStatus::Completed),
            "cancelled" | "canceled" => Ok(WorkOrderStatus::Cancelled),
            _ => Err(MapError::UnknownStatus {
                field: "Status".to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn occupancy(ctx: &MapContext, row: &RawRow) -> Result<OccupancySnapshot, MapError> {
        Ok(OccupancySnapshot {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            snapshot_date: ctx.as_of,
            total_units: row.i64_field("TotalUnits")?,
            occupied_units: row.i64_field("OccupiedUnits")?,
            vacant_units: row.i64_field("VacantUnits")?,
            preleased_vacant_units: row.i64_field("PreleasedVacant")?,
            notice_units_30d: row.i64_field("NoticeUnits30")?,
            notice_units_60d: row.i64_field("NoticeUnits60")?,
            scheduled_moveins_30d: row.i64_field("ScheduledMoveIns30")?,
            scheduled_moveins_60d: row.i64_field("ScheduledMoveIns60")?,
        })
    }

    fn activity(ctx: &MapContext, row: &RawRow) -> Result<LeasingActivity, MapError> {
        Ok(LeasingActivity {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            activity_date: row.date_field("ActivityDate")?,
            leads: row.i64_field("GuestCards")?,
            tours: row.i64_field("Shows")?,
            applications: row.i64_field("Apps")?,
            leases_signed: row.i64_field("NewLeases")?,
            move_ins: row.i64_field("MoveIns")?,
            move_outs: row.i64_field("MoveOuts")?,
        })
    }

    fn lease(ctx: &MapContext, row: &RawRow) -> Result<LeaseRecord, MapError> {
        Ok(LeaseRecord {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            snapshot_date: ctx.as_of,
            lease_id: row.str_field("LeaseId")?.trim().to_string(),
            unit_number: row.str_field("Unit")?.trim().to_string(),
            status: Self::lease_status(row)?,
            market_rent: row.money_field("MarketRent")?,
            lease_rent: row.money_field("LeaseRent")?,
            prior_lease_rent: row.opt_money("PriorLeaseRent")?,
            lease_start: row.opt_date("LeaseStart")?,
            lease_end: row.opt_date("LeaseEnd")?,
        })
    }

    fn delinquency(ctx: &MapContext, row: &RawRow) -> Result<DelinquencySnapshot, MapError> {
        Ok(DelinquencySnapshot {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            snapshot_date: ctx.as_of,
            total_owed: row.money_field("TotalOwed")?,
            owed_0_30: row.money_field("Owed0To30")?,
            owed_31_60: row.money_field("Owed31To60")?,
            owed_61_90: row.money_field("Owed61To90")?,
            owed_over_90: row.money_field("OwedOver90")?,
            prepaid_credits: row.money_field("PrepaidCredits")?,
        })
    }

    fn financial(ctx: &MapContext, row: &RawRow) -> Result<FinancialPeriod, MapError> {
        Ok(FinancialPeriod {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            fiscal_period: Self::period(row, "Period")?,
            gross_potential_rent: row.money_field("GrossPotentialRent")?,
            total_possible: row.money_field("TotalBilled")?,
            total_collected: row.money_field("TotalCollected")?,
            total_revenue: row.money_field("TotalIncome")?,
            total_expenses: row.money_field("TotalExpense")?,
        })
    }

    fn work_order(ctx: &MapContext, row: &RawRow) -> Result<WorkOrderRecord, MapError> {
        Ok(WorkOrderRecord {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            snapshot_date: ctx.as_of,
            work_order_id: row.str_field("ServiceRequestId")?.trim().to_string(),
            category: row.str_field("Category")?.trim().to_string(),
            status: Self::work_order_status(row)?,
            opened_on: row.date_field("OpenedDate")?,
            completed_on: row.opt_date("CompletedDate")?,
        })
    }

    fn ad_source(ctx: &MapContext, row: &RawRow) -> Result<AdSourceActivity, MapError> {
        Ok(AdSourceActivity {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            fiscal_period: Self::period(row, "Period")?,
            source_label: row.str_field("SourceName")?.trim().to_string(),
            leads: row.i64_field("GuestCards")?,
            leases_signed: row.i64_field("NewLeases")?,
        })
    }

    fn moveout_reason(ctx: &MapContext, row: &RawRow) -> Result<MoveOutReasonCount, MapError> {
        Ok(MoveOutReasonCount {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            fiscal_period: Self::period(row, "Period")?,
            reason: row.str_field("Reason")?.trim().to_string(),
            move_outs: row.i64_field("MoveOuts")?,
        })
    }

    fn reputation(ctx: &MapContext, row: &RawRow) -> Result<ReputationSnapshot, MapError> {
        // RealPage reports the recommend share as a 0..1 fraction.
        let recommend_pct = match row.0.get("RecommendShare") {
            None | Some(Value::Null) => None,
            Some(_) => Some(row.f64_field("RecommendShare")? * 100.0),
        };
        Ok(ReputationSnapshot {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::RealPage,
            snapshot_date: ctx.as_of,
            platform: row.str_field("Platform")?.trim().to_string(),
            average_rating: row.f64_field("AvgRating")?,
            review_count: row.i64_field("ReviewCount")?,
            recommend_pct,
        })
    }
}

impl PmsMapper for RealPageMapper {
    fn pms(&self) -> PmsSource {
        PmsSource::RealPage
    }

    fn report_kind(&self, table: UnifiedTable) -> &'static str {
        match table {
            UnifiedTable::Occupancy => "realpage_box_score",
            UnifiedTable::LeasingActivity => "realpage_activity",
            UnifiedTable::Leases => "realpage_leases",
            UnifiedTable::Delinquency => "realpage_delinquency",
            UnifiedTable::Financials => "realpage_financials",
            UnifiedTable::WorkOrders => "realpage_service_requests",
            UnifiedTable::AdSources => "realpage_marketing_sources",
            UnifiedTable::MoveOutReasons => "realpage_moveout_reasons",
            UnifiedTable::Reputation => "realpage_reputation",
        }
    }

    fn map_table(&self, table: UnifiedTable, ctx: &MapContext, rows: &[RawRow]) -> MappedBatch {
        match table {
            UnifiedTable::Occupancy => {
                collect_rows(rows, |r| Self::occupancy(ctx, r), TableRows::Occupancy)
            }
            UnifiedTable::LeasingActivity => {
                collect_rows(rows, |r| Self::activity(ctx, r), TableRows::LeasingActivity)
            }
            UnifiedTable::Leases => collect_rows(rows, |r| Self::lease(ctx, r), TableRows::Leases),
            UnifiedTable::Delinquency => {
                collect_rows(rows, |r| Self::delinquency(ctx, r), TableRows::Delinquency)
            }
            UnifiedTable::Financials => {
                collect_rows(rows, |r| Self::financial(ctx, r), TableRows::Financials)
            }
            UnifiedTable::WorkOrders => {
                collect_rows(rows, |r| Self::work_order(ctx, r), TableRows::WorkOrders)
            }
            UnifiedTable::AdSources => {
                collect_rows(rows, |r| Self::ad_source(ctx, r), TableRows::AdSources)
            }
            UnifiedTable::MoveOutReasons => collect_rows(
                rows,
                |r| Self::moveout_reason(ctx, r),
                TableRows::MoveOutReasons,
            ),
            UnifiedTable::Reputation => {
                collect_rows(rows, |r| Self::reputation(ctx, r), TableRows::Reputation)
            }
        }
    }
}

/// Yardi exports: snake_case columns, plain JSON numbers, ISO dates,
/// `MM/YYYY` fiscal periods.
#[derive(Debug, Clone, Copy)]
pub struct YardiMapper;

impl YardiMapper {
    fn period(row: &RawRow, field: &str) -> Result<FiscalPeriod, MapError> {
        let s = row.str_field(field)?.trim();
        let parsed = s.split_once('/').and_then(|(month, year)| {
            let month: u32 = month.parse().ok()?;
            let year: i32 = year.parse().ok()?;
            FiscalPeriod::new(year, month).ok()
        });
        parsed.ok_or_else(|| MapError::malformed(field, format!("expected MM/YYYY, got `{s}`")))
    }

    fn lease_status(row: &RawRow) -> Result<LeaseStatus, MapError> {
        let raw = row.str_field("tenant_status")?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(LeaseStatus::Current),
            // Evictions still occupy the unit; they are current until vacated.
            "eviction" => Ok(LeaseStatus::Current),
            "notice" => Ok(LeaseStatus::Notice),
            "past" => Ok(LeaseStatus::Former),
            "future" | "applicant" => Ok(LeaseStatus::Future),
            _ => Err(MapError::UnknownStatus {
                field: "tenant_status".to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn work_order_status(row: &RawRow) -> Result<WorkOrderStatus, MapError> {
        let raw = row.str_field("wo_status")?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "call" | "open" => Ok(WorkOrderStatus::Open),
            "in progress" | "scheduled" => Ok(WorkOrderStatus::InProgress),
            "completed" | "complete" => Ok(WorkOrderStatus::Completed),
            "canceled" | "cancelled" => Ok(WorkOrderStatus::Cancelled),
            _ => Err(MapError::UnknownStatus {
                field: "wo_status".to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn occupancy(ctx: &MapContext, row: &RawRow) -> Result<OccupancySnapshot, MapError> {
        Ok(OccupancySnapshot {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            snapshot_date: ctx.as_of,
            total_units: row.i64_field("total_units")?,
            occupied_units: row.i64_field("occupied_units")?,
            vacant_units: row.i64_field("vacant_units")?,
            preleased_vacant_units: row.i64_field("preleased_vacant")?,
            notice_units_30d: row.i64_field("on_notice_30")?,
            notice_units_60d: row.i64_field("on_notice_60")?,
            scheduled_moveins_30d: row.i64_field("scheduled_move_ins_30")?,
            scheduled_moveins_60d: row.i64_field("scheduled_move_ins_60")?,
        })
    }

    fn activity(ctx: &MapContext, row: &RawRow) -> Result<LeasingActivity, MapError> {
        Ok(LeasingActivity {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            activity_date: row.date_field("activity_date")?,
            leads: row.i64_field("prospect_count")?,
            tours: row.i64_field("showings")?,
            applications: row.i64_field("applications")?,
            leases_signed: row.i64_field("leases_executed")?,
            move_ins: row.i64_field("move_ins")?,
            move_outs: row.i64_field("move_outs")?,
        })
    }

    fn lease(ctx: &MapContext, row: &RawRow) -> Result<LeaseRecord, MapError> {
        Ok(LeaseRecord {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            snapshot_date: ctx.as_of,
            lease_id: row.str_field("tenant_code")?.trim().to_string(),
            unit_number: row.str_field("unit_code")?.trim().to_string(),
            status: Self::lease_status(row)?,
            market_rent: row.money_field("market_rent")?,
            lease_rent: row.money_field("lease_rent")?,
            prior_lease_rent: row.opt_money("prior_rent")?,
            lease_start: row.opt_date("lease_from")?,
            lease_end: row.opt_date("lease_to")?,
        })
    }

    fn delinquency(ctx: &MapContext, row: &RawRow) -> Result<DelinquencySnapshot, MapError> {
        Ok(DelinquencySnapshot {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            snapshot_date: ctx.as_of,
            total_owed: row.money_field("total_owed")?,
            owed_0_30: row.money_field("owed_0_30")?,
            owed_31_60: row.money_field("owed_31_60")?,
            owed_61_90: row.money_field("owed_61_90")?,
            owed_over_90: row.money_field("owed_90_plus")?,
            prepaid_credits: row.money_field("prepays")?,
        })
    }

    fn financial(ctx: &MapContext, row: &RawRow) -> Result<FinancialPeriod, MapError> {
        Ok(FinancialPeriod {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            fiscal_period: Self::period(row, "period")?,
            gross_potential_rent: row.money_field("gross_potential")?,
            total_possible: row.money_field("charges_total")?,
            total_collected: row.money_field("receipts_total")?,
            total_revenue: row.money_field("revenue_total")?,
            total_expenses: row.money_field("expense_total")?,
        })
    }

    fn work_order(ctx: &MapContext, row: &RawRow) -> Result<WorkOrderRecord, MapError> {
        Ok(WorkOrderRecord {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            snapshot_date: ctx.as_of,
            work_order_id: row.str_field("wo_number")?.trim().to_string(),
            category: row.str_field("category")?.trim().to_string(),
            status: Self::work_order_status(row)?,
            opened_on: row.date_field("open_date")?,
            completed_on: row.opt_date("complete_date")?,
        })
    }

    fn ad_source(ctx: &MapContext, row: &RawRow) -> Result<AdSourceActivity, MapError> {
        Ok(AdSourceActivity {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            fiscal_period: Self::period(row, "period")?,
            source_label: row.str_field("source")?.trim().to_string(),
            leads: row.i64_field("prospects")?,
            leases_signed: row.i64_field("leases")?,
        })
    }

    fn moveout_reason(ctx: &MapContext, row: &RawRow) -> Result<MoveOutReasonCount, MapError> {
        Ok(MoveOutReasonCount {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            fiscal_period: Self::period(row, "period")?,
            reason: row.str_field("reason")?.trim().to_string(),
            move_outs: row.i64_field("count")?,
        })
    }

    fn reputation(ctx: &MapContext, row: &RawRow) -> Result<ReputationSnapshot, MapError> {
        // Yardi reports the recommend share as `92%` or a bare 0..100 number.
        let recommend_pct = match row.0.get("recommend_pct") {
            None | Some(Value::Null) => None,
            Some(value) => {
                if let Some(n) = value.as_f64() {
                    Some(n)
                } else if let Some(s) = value.as_str() {
                    let trimmed = s.trim().trim_end_matches('%').trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.parse::<f64>().map_err(|_| {
                            MapError::malformed("recommend_pct", format!("got `{s}`"))
                        })?)
                    }
                } else {
                    return Err(MapError::malformed(
                        "recommend_pct",
                        format!("expected a percentage, got {value}"),
                    ));
                }
            }
        };
        Ok(ReputationSnapshot {
            property_id: ctx.property_id.clone(),
            pms_source: PmsSource::Yardi,
            snapshot_date: ctx.as_of,
            platform: row.str_field("platform")?.trim().to_string(),
            average_rating: row.f64_field("avg_rating")?,
            review_count: row.i64_field("review_count")?,
            recommend_pct,
        })
    }
}

impl PmsMapper for YardiMapper {
    fn pms(&self) -> PmsSource {
        PmsSource::Yardi
    }

    fn report_kind(&self, table: UnifiedTable) -> &'static str {
        match table {
            UnifiedTable::Occupancy => "yardi_unit_availability",
            UnifiedTable::LeasingActivity => "yardi_prospect_activity",
            UnifiedTable::Leases => "yardi_tenants",
            UnifiedTable::Delinquency => "yardi_aged_receivables",
            UnifiedTable::Financials => "yardi_income_statement",
            UnifiedTable::WorkOrders => "yardi_work_orders",
            UnifiedTable::AdSources => "yardi_prospect_sources",
            UnifiedTable::MoveOutReasons => "yardi_moveout_reasons",
            UnifiedTable::Reputation => "yardi_review_summary",
        }
    }

    fn map_table(&self, table: UnifiedTable, ctx: &MapContext, rows: &[RawRow]) -> MappedBatch {
        match table {
            UnifiedTable::Occupancy => {
                collect_rows(rows, |r| Self::occupancy(ctx, r), TableRows::Occupancy)
            }
            UnifiedTable::LeasingActivity => {
                collect_rows(rows, |r| Self::activity(ctx, r), TableRows::LeasingActivity)
            }
            UnifiedTable::Leases => collect_rows(rows, |r| Self::lease(ctx, r), TableRows::Leases),
            UnifiedTable::Delinquency => {
                collect_rows(rows, |r| Self::delinquency(ctx, r), TableRows::Delinquency)
            }
            UnifiedTable::Financials => {
                collect_rows(rows, |r| Self::financial(ctx, r), TableRows::Financials)
            }
            UnifiedTable::WorkOrders => {
                collect_rows(rows, |r| Self::work_order(ctx, r), TableRows::WorkOrders)
            }
            UnifiedTable::AdSources => {
                collect_rows(rows, |r| Self::ad_source(ctx, r), TableRows::AdSources)
            }
            UnifiedTable::MoveOutReasons => collect_rows(
                rows,
                |r| Self::moveout_reason(ctx, r),
                TableRows::MoveOutReasons,
            ),
            UnifiedTable::Reputation => {
                collect_rows(rows, |r| Self::reputation(ctx, r), TableRows::Reputation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> MapContext {
        MapContext {
            property_id: PropertyId::from("cedar-ridge"),
            as_of: "2025-03-15".parse().unwrap(),
        }
    }

    fn row(value: Value) -> RawRow {
        RawRow::from_value(value).unwrap()
    }

    fn realpage_box_score_row() -> RawRow {
        row(json!({
            "TotalUnits": 120,
            "OccupiedUnits": 114,
            "VacantUnits": 6,
            "PreleasedVacant": 2,
            "NoticeUnits30": 3,
            "NoticeUnits60": 5,
            "ScheduledMoveIns30": 4,
            "ScheduledMoveIns60": 6
        }))
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert_eq!(
            RawRow::from_value(json!([1, 2, 3])).unwrap_err(),
            MapError::NotAnObject
        );
    }

    #[test]
    fn money_parsing_handles_pms_export_strings() {
        let r = row(json!({
            "plain": 1250.5,
            "dollars": "$1,234.56",
            "negative": "(850.00)",
            "blank": ""
        }));
        assert_eq!(r.money_field("plain").unwrap(), 1250.5);
        assert_eq!(r.money_field("dollars").unwrap(), 1234.56);
        assert_eq!(r.money_field("negative").unwrap(), -850.0);
        assert_eq!(r.money_field("blank").unwrap(), 0.0);
        assert!(r.money_field("missing").is_err());
    }

    #[test]
    fn realpage_box_score_stamps_identity_and_as_of() {
        let batch = RealPageMapper.map_table(
            UnifiedTable::Occupancy,
            &ctx(),
            &[realpage_box_score_row()],
        );
        assert!(batch.skipped.is_empty());
        let TableRows::Occupancy(rows) = batch.rows else {
            panic!("wrong table");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].property_id, PropertyId::from("cedar-ridge"));
        assert_eq!(rows[0].pms_source, PmsSource::RealPage);
        assert_eq!(rows[0].snapshot_date, "2025-03-15".parse().unwrap());
        assert_eq!(rows[0].occupied_units, 114);
    }

    #[test]
    fn realpage_activity_uses_row_date_not_as_of() {
        let batch = RealPageMapper.map_table(
            UnifiedTable::LeasingActivity,
            &ctx(),
            &[row(json!({
                "ActivityDate": "03/02/2025",
                "GuestCards": 14, "Shows": 9, "Apps": 4,
                "NewLeases": 3, "MoveIns": 2, "MoveOuts": 1
            }))],
        );
        let TableRows::LeasingActivity(rows) = batch.rows else {
            panic!("wrong table");
        };
        assert_eq!(rows[0].activity_date, "2025-03-02".parse().unwrap());
        assert_eq!(rows[0].leads, 14);
        assert_eq!(rows[0].tours, 9);
    }

    #[test]
    fn realpage_lease_status_vocabulary_collapses() {
        let make = |status: &str| {
            row(json!({
                "LeaseId": "L-1", "Unit": "101", "LeaseStatus": status,
                "MarketRent": "$1,500.00", "LeaseRent": "$1,450.00"
            }))
        };
        let batch = RealPageMapper.map_table(
            UnifiedTable::Leases,
            &ctx(),
            &[make("Current"), make("NTV"), make("Past"), make("Pending")],
        );
        let TableRows::Leases(rows) = batch.rows else {
            panic!("wrong table");
        };
        let statuses: Vec<_> = rows.iter().map(|l| l.status).collect();
        assert!(statuses.contains(&LeaseStatus::Current));
        assert!(statuses.contains(&LeaseStatus::Notice));
        assert!(statuses.contains(&LeaseStatus::Former));
        assert!(statuses.contains(&LeaseStatus::Future));
    }

    #[test]
    fn yardi_eviction_counts_as_current() {
        let batch = YardiMapper.map_table(
            UnifiedTable::Leases,
            &ctx(),
            &[row(json!({
                "tenant_code": "t0012", "unit_code": "A-07",
                "tenant_status": "Eviction",
                "market_rent": 1395.0, "lease_rent": 1380.0,
                "lease_from": "2024-08-01", "lease_to": "2025-07-31"
            }))],
        );
        let TableRows::Leases(rows) = batch.rows else {
            panic!("wrong table");
        };
        assert_eq!(rows[0].status, LeaseStatus::Current);
        assert_eq!(rows[0].prior_lease_rent, None);
    }

    #[test]
    fn unknown_status_skips_row_and_counts_it() {
        let good = row(json!({
            "tenant_code": "t1", "unit_code": "A-01", "tenant_status": "Current",
            "market_rent": 1000.0, "lease_rent": 990.0
        }));
        let bad = row(json!({
            "tenant_code": "t2", "unit_code": "A-02", "tenant_status": "Wombat",
            "market_rent": 1000.0, "lease_rent": 990.0
        }));
        let batch = YardiMapper.map_table(UnifiedTable::Leases, &ctx(), &[good, bad]);
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
        assert!(matches!(
            batch.skipped[0],
            MapError::UnknownStatus { ref value, .. } if value == "Wombat"
        ));
    }

    #[test]
    fn fiscal_period_formats_differ_per_pms() {
        let rp = RealPageMapper.map_table(
            UnifiedTable::Financials,
            &ctx(),
            &[row(json!({
                "Period": "2025/01",
                "GrossPotentialRent": "$180,000.00", "TotalBilled": "$176,500.00",
                "TotalCollected": "$171,200.00", "TotalIncome": "$184,000.00",
                "TotalExpense": "$97,300.00"
            }))],
        );
        let TableRows::Financials(rp_rows) = rp.rows else {
            panic!("wrong table");
        };
        assert_eq!(rp_rows[0].fiscal_period.to_string(), "202501");
        assert_eq!(rp_rows[0].total_possible, 176_500.0);

        let yd = YardiMapper.map_table(
            UnifiedTable::Financials,
            &ctx(),
            &[row(json!({
                "period": "01/2025",
                "gross_potential": 180000.0, "charges_total": 176500.0,
                "receipts_total": 171200.0, "revenue_total": 184000.0,
                "expense_total": 97300.0
            }))],
        );
        let TableRows::Financials(yd_rows) = yd.rows else {
            panic!("wrong table");
        };
        assert_eq!(yd_rows[0].fiscal_period.to_string(), "202501");
    }

    #[test]
    fn recommend_share_normalizes_to_0_100() {
        let rp = RealPageMapper.map_table(
            UnifiedTable::Reputation,
            &ctx(),
            &[row(json!({
                "Platform": "Google", "AvgRating": 4.4,
                "ReviewCount": 212, "RecommendShare": 0.92
            }))],
        );
        let TableRows::Reputation(rp_rows) = rp.rows else {
            panic!("wrong table");
        };
        assert_eq!(rp_rows[0].recommend_pct, Some(92.0));

        let yd = YardiMapper.map_table(
            UnifiedTable::Reputation,
            &ctx(),
            &[row(json!({
                "platform": "Google", "avg_rating": 4.1,
                "review_count": 88, "recommend_pct": "87%"
            }))],
        );
        let TableRows::Reputation(yd_rows) = yd.rows else {
            panic!("wrong table");
        };
        assert_eq!(yd_rows[0].recommend_pct, Some(87.0));
    }

    #[test]
    fn mapping_identical_input_twice_is_identical_and_ordered() {
        let raw = vec![
            row(json!({
                "wo_number": "W-9", "category": "Plumbing", "wo_status": "Completed",
                "open_date": "2025-03-01", "complete_date": "2025-03-04"
            })),
            row(json!({
                "wo_number": "W-2", "category": "HVAC", "wo_status": "Open",
                "open_date": "2025-03-10"
            })),
        ];
        let first = YardiMapper.map_table(UnifiedTable::WorkOrders, &ctx(), &raw);
        let second = YardiMapper.map_table(UnifiedTable::WorkOrders, &ctx(), &raw);
        assert_eq!(first, second);
        let TableRows::WorkOrders(rows) = first.rows else {
            panic!("wrong table");
        };
        // Natural-key order, not input order.
        assert_eq!(rows[0].work_order_id, "W-2");
        assert_eq!(rows[1].work_order_id, "W-9");
    }

    #[test]
    fn report_kinds_cover_every_table_for_both_pms() {
        for pms in PmsSource::ALL {
            let mapper = mapper_for(pms);
            assert_eq!(mapper.pms(), pms);
            let kinds: std::collections::BTreeSet<_> = UnifiedTable::ALL
                .iter()
                .map(|t| mapper.report_kind(*t))
                .collect();
            assert_eq!(kinds.len(), UnifiedTable::ALL.len());
            for kind in kinds {
                assert!(kind.starts_with(pms.as_str()));
            }
        }
    }

    #[test]
    fn empty_raw_batch_maps_to_empty_rows() {
        let batch = RealPageMapper.map_table(UnifiedTable::Delinquency, &ctx(), &[]);
        assert!(batch.rows.is_empty());
        assert!(batch.skipped.is_empty());
        assert!(batch.rows.temporal_scope().is_empty());
    }
}
