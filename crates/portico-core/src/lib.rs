//! PMS-agnostic domain model shared by every Portico crate.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const CRATE_NAME: &str = "portico-core";

/// A property-management system feeding the raw source store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmsSource {
    RealPage,
    Yardi,
}

impl PmsSource {
    pub const ALL: [PmsSource; 2] = [PmsSource::RealPage, PmsSource::Yardi];

    /// Lowercase wire/storage form (`pms_source` column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            PmsSource::RealPage => "realpage",
            PmsSource::Yardi => "yardi",
        }
    }
}

impl fmt::Display for PmsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown pms_source `{0}`")]
pub struct UnknownPms(pub String);

impl FromStr for PmsSource {
    type Err = UnknownPms;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realpage" => Ok(PmsSource::RealPage),
            "yardi" => Ok(PmsSource::Yardi),
            other => Err(UnknownPms(other.to_string())),
        }
    }
}

/// PMS-agnostic property identifier, stable across PMS migrations. All
/// cross-source joins key on this, never on PMS site ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PropertyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Month-granularity accounting period, wire form `YYYYMM` (e.g. `202501`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiscalPeriod {
    year: i32,
    month: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodParseError {
    #[error("fiscal period `{0}` is not a 6-digit YYYYMM code")]
    BadFormat(String),
    #[error("fiscal period `{0}` has month outside 1..=12")]
    BadMonth(String),
    #[error("fiscal period `{0}` has year outside 1..=9999")]
    BadYear(String),
}

impl FiscalPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodParseError> {
        if !(1..=9999).contains(&year) {
            return Err(PeriodParseError::BadYear(format!("{year:04}{month:02}")));
        }
        if !(1..=12).contains(&month) {
            return Err(PeriodParseError::BadMonth(format!("{year:04}{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("year and month validated")
    }

    pub fn last_day(&self) -> NaiveDate {
        self.first_day() + Months::new(1) - Days::new(1)
    }

    pub fn next(&self) -> Self {
        Self::from_date(self.first_day() + Months::new(1))
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for FiscalPeriod {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PeriodParseError::BadFormat(s.to_string()));
        }
        let year: i32 = s[..4]
            .parse()
            .map_err(|_| PeriodParseError::BadFormat(s.to_string()))?;
        let month: u32 = s[4..]
            .parse()
            .map_err(|_| PeriodParseError::BadFormat(s.to_string()))?;
        Self::new(year, month)
    }
}

impl Serialize for FiscalPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FiscalPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Inclusive `[start, end]` date range for metric queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("window start {start} is after end {end}")]
pub struct WindowError {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// The equal-duration window ending the day before this one starts.
    pub fn prior(&self) -> Self {
        let end = self.start - Days::new(1);
        let start = end - Days::new((self.days() - 1) as u64);
        Self { start, end }
    }

    /// Fiscal periods overlapping the window, ascending.
    pub fn fiscal_periods(&self) -> Vec<FiscalPeriod> {
        let mut periods = Vec::new();
        let mut cursor = FiscalPeriod::from_date(self.start);
        let last = FiscalPeriod::from_date(self.end);
        while cursor <= last {
            periods.push(cursor);
            cursor = cursor.next();
        }
        periods
    }
}

/// One-decimal rounding used for every percentage and average.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Two-decimal rounding used for currency amounts.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `count / total * 100` at one decimal; 0.0 when the total is empty.
pub fn share_pct(count: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        round1(count / total * 100.0)
    }
}

/// Resident lease lifecycle stage after vocabulary collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Current,
    Notice,
    Former,
    Future,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Current => "current",
            LeaseStatus::Notice => "notice",
            LeaseStatus::Former => "former",
            LeaseStatus::Future => "future",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown lease status: {0}")]
pub struct UnknownLeaseStatus(pub String);

impl FromStr for LeaseStatus {
    type Err = UnknownLeaseStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(LeaseStatus::Current),
            "notice" => Ok(LeaseStatus::Notice),
            "former" => Ok(LeaseStatus::Former),
            "future" => Ok(LeaseStatus::Future),
            other => Err(UnknownLeaseStatus(other.to_string())),
        }
    }
}

/// Maintenance ticket lifecycle stage after vocabulary collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown work order status: {0}")]
pub struct UnknownWorkOrderStatus(pub String);

impl FromStr for WorkOrderStatus {
    type Err = UnknownWorkOrderStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(WorkOrderStatus::Open),
            "in_progress" => Ok(WorkOrderStatus::InProgress),
            "completed" => Ok(WorkOrderStatus::Completed),
            "cancelled" => Ok(WorkOrderStatus::Cancelled),
            other => Err(UnknownWorkOrderStatus(other.to_string())),
        }
    }
}

/// Daily unit-inventory snapshot (box score / availability report).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub snapshot_date: NaiveDate,
    pub total_units: i64,
    pub occupied_units: i64,
    pub vacant_units: i64,
    pub preleased_vacant_units: i64,
    pub notice_units_30d: i64,
    pub notice_units_60d: i64,
    pub scheduled_moveins_30d: i64,
    pub scheduled_moveins_60d: i64,
}

/// Daily leasing funnel counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasingActivity {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub activity_date: NaiveDate,
    pub leads: i64,
    pub tours: i64,
    pub applications: i64,
    pub leases_signed: i64,
    pub move_ins: i64,
    pub move_outs: i64,
}

/// One lease as of a snapshot date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub snapshot_date: NaiveDate,
    pub lease_id: String,
    pub unit_number: String,
    pub status: LeaseStatus,
    pub market_rent: f64,
    pub lease_rent: f64,
    pub prior_lease_rent: Option<f64>,
    pub lease_start: Option<NaiveDate>,
    pub lease_end: Option<NaiveDate>,
}

/// Daily receivables aging snapshot, bucketed by days past due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelinquencySnapshot {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub snapshot_date: NaiveDate,
    pub total_owed: f64,
    pub owed_0_30: f64,
    pub owed_31_60: f64,
    pub owed_61_90: f64,
    pub owed_over_90: f64,
    pub prepaid_credits: f64,
}

/// Monthly income-statement rollup keyed by fiscal period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialPeriod {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub fiscal_period: FiscalPeriod,
    pub gross_potential_rent: f64,
    pub total_possible: f64,
    pub total_collected: f64,
    pub total_revenue: f64,
    pub total_expenses: f64,
}

/// One maintenance ticket as of a snapshot date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrderRecord {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub snapshot_date: NaiveDate,
    pub work_order_id: String,
    pub category: String,
    pub status: WorkOrderStatus,
    pub opened_on: NaiveDate,
    pub completed_on: Option<NaiveDate>,
}

/// Lead counts attributed to one advertising source for a fiscal period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdSourceActivity {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub fiscal_period: FiscalPeriod,
    pub source_label: String,
    pub leads: i64,
    pub leases_signed: i64,
}

/// Move-out count for one stated reason in a fiscal period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOutReasonCount {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub fiscal_period: FiscalPeriod,
    pub reason: String,
    pub move_outs: i64,
}

/// Review-platform standing as of a snapshot date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub property_id: PropertyId,
    pub pms_source: PmsSource,
    pub snapshot_date: NaiveDate,
    pub platform: String,
    pub average_rating: f64,
    pub review_count: i64,
    pub recommend_pct: Option<f64>,
}

/// The nine unified tables the sync pipeline can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedTable {
    Occupancy,
    LeasingActivity,
    Leases,
    Delinquency,
    Financials,
    WorkOrders,
    AdSources,
    MoveOutReasons,
    Reputation,
}

impl UnifiedTable {
    pub const ALL: [UnifiedTable; 9] = [
        UnifiedTable::Occupancy,
        UnifiedTable::LeasingActivity,
        UnifiedTable::Leases,
        UnifiedTable::Delinquency,
        UnifiedTable::Financials,
        UnifiedTable::WorkOrders,
        UnifiedTable::AdSources,
        UnifiedTable::MoveOutReasons,
        UnifiedTable::Reputation,
    ];

    /// Postgres table name for this unified table.
    pub fn table_name(&self) -> &'static str {
        match self {
            UnifiedTable::Occupancy => "unified_occupancy_snapshots",
            UnifiedTable::LeasingActivity => "unified_leasing_activity",
            UnifiedTable::Leases => "unified_leases",
            UnifiedTable::Delinquency => "unified_delinquency_snapshots",
            UnifiedTable::Financials => "unified_financial_periods",
            UnifiedTable::WorkOrders => "unified_work_orders",
            UnifiedTable::AdSources => "unified_ad_source_activity",
            UnifiedTable::MoveOutReasons => "unified_moveout_reasons",
            UnifiedTable::Reputation => "unified_reputation_snapshots",
        }
    }

    /// Column holding this table's temporal key.
    pub fn temporal_column(&self) -> &'static str {
        match self {
            UnifiedTable::LeasingActivity => "activity_date",
            UnifiedTable::Financials
            | UnifiedTable::AdSources
            | UnifiedTable::MoveOutReasons => "fiscal_period",
            _ => "snapshot_date",
        }
    }
}

impl fmt::Display for UnifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Temporal keys covered by a staged batch; the replace step deletes exactly
/// these keys before inserting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalScope {
    Dates(BTreeSet<NaiveDate>),
    Periods(BTreeSet<FiscalPeriod>),
}

impl TemporalScope {
    pub fn is_empty(&self) -> bool {
        match self {
            TemporalScope::Dates(dates) => dates.is_empty(),
            TemporalScope::Periods(periods) => periods.is_empty(),
        }
    }
}

/// A homogeneous batch of mapped rows destined for one unified table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableRows {
    Occupancy(Vec<OccupancySnapshot>),
    LeasingActivity(Vec<LeasingActivity>),
    Leases(Vec<LeaseRecord>),
    Delinquency(Vec<DelinquencySnapshot>),
    Financials(Vec<FinancialPeriod>),
    WorkOrders(Vec<WorkOrderRecord>),
    AdSources(Vec<AdSourceActivity>),
    MoveOutReasons(Vec<MoveOutReasonCount>),
    Reputation(Vec<ReputationSnapshot>),
}

impl TableRows {
    /// Empty batch for the given table.
    pub fn empty(table: UnifiedTable) -> Self {
        match table {
            UnifiedTable::Occupancy => TableRows::Occupancy(Vec::new()),
            UnifiedTable::LeasingActivity => TableRows::LeasingActivity(Vec::new()),
            UnifiedTable::Leases => TableRows::Leases(Vec::new()),
            UnifiedTable::Delinquency => TableRows::Delinquency(Vec::new()),
            UnifiedTable::Financials => TableRows::Financials(Vec::new()),
            UnifiedTable::WorkOrders => TableRows::WorkOrders(Vec::new()),
            UnifiedTable::AdSources => TableRows::AdSources(Vec::new()),
            UnifiedTable::MoveOutReasons => TableRows::MoveOutReasons(Vec::new()),
            UnifiedTable::Reputation => TableRows::Reputation(Vec::new()),
        }
    }

    pub fn table(&self) -> UnifiedTable {
        match self {
            TableRows::Occupancy(_) => UnifiedTable::Occupancy,
            TableRows::LeasingActivity(_) => UnifiedTable::LeasingActivity,
            TableRows::Leases(_) => UnifiedTable::Leases,
            TableRows::Delinquency(_) => UnifiedTable::Delinquency,
            TableRows::Financials(_) => UnifiedTable::Financials,
            TableRows::WorkOrders(_) => UnifiedTable::WorkOrders,
            TableRows::AdSources(_) => UnifiedTable::AdSources,
            TableRows::MoveOutReasons(_) => UnifiedTable::MoveOutReasons,
            TableRows::Reputation(_) => UnifiedTable::Reputation,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableRows::Occupancy(rows) => rows.len(),
            TableRows::LeasingActivity(rows) => rows.len(),
            TableRows::Leases(rows) => rows.len(),
            TableRows::Delinquency(rows) => rows.len(),
            TableRows::Financials(rows) => rows.len(),
            TableRows::WorkOrders(rows) => rows.len(),
            TableRows::AdSources(rows) => rows.len(),
            TableRows::MoveOutReasons(rows) => rows.len(),
            TableRows::Reputation(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sort rows by natural key so two syncs of the same input insert in the
    /// same order.
    pub fn sort(&mut self) {
        match self {
            TableRows::Occupancy(rows) => {
                rows.sort_by(|a, b| {
                    (a.snapshot_date, a.pms_source).cmp(&(b.snapshot_date, b.pms_source))
                });
            }
            TableRows::LeasingActivity(rows) => {
                rows.sort_by(|a, b| {
                    (a.activity_date, a.pms_source).cmp(&(b.activity_date, b.pms_source))
                });
            }
            TableRows::Leases(rows) => {
                rows.sort_by(|a, b| {
                    (a.snapshot_date, a.lease_id.as_str())
                        .cmp(&(b.snapshot_date, b.lease_id.as_str()))
                });
            }
            TableRows::Delinquency(rows) => {
                rows.sort_by(|a, b| {
                    (a.snapshot_date, a.pms_source).cmp(&(b.snapshot_date, b.pms_source))
                });
            }
            TableRows::Financials(rows) => {
                rows.sort_by(|a, b| {
                    (a.fiscal_period, a.pms_source).cmp(&(b.fiscal_period, b.pms_source))
                });
            }
            TableRows::WorkOrders(rows) => {
                rows.sort_by(|a, b| {
                    (a.snapshot_date, a.work_order_id.as_str())
                        .cmp(&(b.snapshot_date, b.work_order_id.as_str()))
                });
            }
            TableRows::AdSources(rows) => {
                rows.sort_by(|a, b| {
                    (a.fiscal_period, a.source_label.as_str())
                        .cmp(&(b.fiscal_period, b.source_label.as_str()))
                });
            }
            TableRows::MoveOutReasons(rows) => {
                rows.sort_by(|a, b| {
                    (a.fiscal_period, a.reason.as_str()).cmp(&(b.fiscal_period, b.reason.as_str()))
                });
            }
            TableRows::Reputation(rows) => {
                rows.sort_by(|a, b| {
                    (a.snapshot_date, a.platform.as_str())
                        .cmp(&(b.snapshot_date, b.platform.as_str()))
                });
            }
        }
    }

    /// Distinct temporal keys present in the batch.
    pub fn temporal_scope(&self) -> TemporalScope {
        match self {
            TableRows::Occupancy(rows) => {
                TemporalScope::Dates(rows.iter().map(|r| r.snapshot_date).collect())
            }
            TableRows::LeasingActivity(rows) => {
                TemporalScope::Dates(rows.iter().map(|r| r.activity_date).collect())
            }
            TableRows::Leases(rows) => {
                TemporalScope::Dates(rows.iter().map(|r| r.snapshot_date).collect())
            }
            TableRows::Delinquency(rows) => {
                TemporalScope::Dates(rows.iter().map(|r| r.snapshot_date).collect())
            }
            TableRows::Financials(rows) => {
                TemporalScope::Periods(rows.iter().map(|r| r.fiscal_period).collect())
            }
            TableRows::WorkOrders(rows) => {
                TemporalScope::Dates(rows.iter().map(|r| r.snapshot_date).collect())
            }
            TableRows::AdSources(rows) => {
                TemporalScope::Periods(rows.iter().map(|r| r.fiscal_period).collect())
            }
            TableRows::MoveOutReasons(rows) => {
                TemporalScope::Periods(rows.iter().map(|r| r.fiscal_period).collect())
            }
            TableRows::Reputation(rows) => {
                TemporalScope::Dates(rows.iter().map(|r| r.snapshot_date).collect())
            }
        }
    }
}
