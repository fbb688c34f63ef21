//! Typed rows for every warehouse table.
//!
//! Raw rows mirror the source sheets and carry `Option` everywhere because
//! nothing is enforced at ingestion. Clean, dimension and fact rows carry
//! their invariants in their types (no optional fields).

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::table::Table;
use crate::value::{Record, Value};

/// Canonical form of a zone or rack identifier: trimmed and upper-cased.
/// Blank identifiers count as missing.
pub fn normalize_identifier(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// Conversion between a typed row and the named-field record stored in a table.
pub trait TableRow: Sized {
    const TABLE: Table;

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self>;
}

/// Typed column accessors over a record, with errors naming the table.
struct Fields<'a> {
    table: Table,
    record: &'a Record,
}

impl<'a> Fields<'a> {
    fn new(table: Table, record: &'a Record) -> Self {
        Self { table, record }
    }

    fn mismatch(&self, column: &'static str, expected: &str, found: &Value) -> Error {
        Error::decode(
            self.table.name(),
            column,
            format!("expected {}, found {}", expected, found.kind_name()),
        )
    }

    fn missing(&self, column: &'static str) -> Error {
        Error::decode(self.table.name(), column, "unexpected NULL")
    }

    fn opt_text(&self, column: &'static str) -> Result<Option<String>> {
        match self.record.get(column) {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            other => Err(self.mismatch(column, "text", other)),
        }
    }

    fn text(&self, column: &'static str) -> Result<String> {
        self.opt_text(column)?.ok_or_else(|| self.missing(column))
    }

    fn opt_float(&self, column: &'static str) -> Result<Option<f64>> {
        match self.record.get(column) {
            Value::Null => Ok(None),
            Value::Float(f) => Ok(Some(*f)),
            Value::Int(i) => Ok(Some(*i as f64)),
            other => Err(self.mismatch(column, "float", other)),
        }
    }

    fn float(&self, column: &'static str) -> Result<f64> {
        self.opt_float(column)?.ok_or_else(|| self.missing(column))
    }

    fn int(&self, column: &'static str) -> Result<i64> {
        match self.record.get(column) {
            Value::Int(i) => Ok(*i),
            Value::Null => Err(self.missing(column)),
            other => Err(self.mismatch(column, "int", other)),
        }
    }

    fn small_int(&self, column: &'static str) -> Result<i32> {
        let value = self.int(column)?;
        i32::try_from(value)
            .map_err(|_| Error::decode(self.table.name(), column, format!("{} out of range", value)))
    }

    fn opt_timestamp(&self, column: &'static str) -> Result<Option<NaiveDateTime>> {
        match self.record.get(column) {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(*ts)),
            other => Err(self.mismatch(column, "timestamp", other)),
        }
    }

    fn timestamp(&self, column: &'static str) -> Result<NaiveDateTime> {
        self.opt_timestamp(column)?.ok_or_else(|| self.missing(column))
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate> {
        match self.record.get(column) {
            Value::Date(d) => Ok(*d),
            Value::Null => Err(self.missing(column)),
            other => Err(self.mismatch(column, "date", other)),
        }
    }
}

// =============================================================================
// Staging
// =============================================================================

/// One telemetry reading as exported, timestamp already coerced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawOperationRow {
    pub datetime: Option<NaiveDateTime>,
    pub zone: Option<String>,
    pub rack_id: Option<String>,
    pub power_kw: Option<f64>,
    pub temperature_c: Option<f64>,
    pub utilization_pct: Option<f64>,
    pub incidents: Option<f64>,
}

impl TableRow for RawOperationRow {
    const TABLE: Table = Table::StgOperations;

    fn to_record(&self) -> Record {
        Record::new()
            .with("datetime", self.datetime)
            .with("zone", self.zone.clone())
            .with("rack_id", self.rack_id.clone())
            .with("power_kw", self.power_kw)
            .with("temperature_c", self.temperature_c)
            .with("utilization_pct", self.utilization_pct)
            .with("incidents", self.incidents)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            datetime: f.opt_timestamp("datetime")?,
            zone: f.opt_text("zone")?,
            rack_id: f.opt_text("rack_id")?,
            power_kw: f.opt_float("power_kw")?,
            temperature_c: f.opt_float("temperature_c")?,
            utilization_pct: f.opt_float("utilization_pct")?,
            incidents: f.opt_float("incidents")?,
        })
    }
}

/// One energy-cost reading as exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawCostRow {
    pub datetime: Option<NaiveDateTime>,
    pub zone: Option<String>,
    pub total_power_kw: Option<f64>,
    pub cost_per_kw_usd: Option<f64>,
}

impl TableRow for RawCostRow {
    const TABLE: Table = Table::StgEnergyCosts;

    fn to_record(&self) -> Record {
        Record::new()
            .with("datetime", self.datetime)
            .with("zone", self.zone.clone())
            .with("total_power_kw", self.total_power_kw)
            .with("cost_per_kw_usd", self.cost_per_kw_usd)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            datetime: f.opt_timestamp("datetime")?,
            zone: f.opt_text("zone")?,
            total_power_kw: f.opt_float("total_power_kw")?,
            cost_per_kw_usd: f.opt_float("cost_per_kw_usd")?,
        })
    }
}

// =============================================================================
// Clean
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanOperationRow {
    pub datetime: NaiveDateTime,
    pub zone: String,
    pub rack_id: String,
    pub power_kw: f64,
    pub temperature_c: f64,
    pub utilization_pct: f64,
    /// 0 or 1
    pub incidents: i64,
}

impl TableRow for CleanOperationRow {
    const TABLE: Table = Table::ClnOperations;

    fn to_record(&self) -> Record {
        Record::new()
            .with("datetime", self.datetime)
            .with("zone", self.zone.as_str())
            .with("rack_id", self.rack_id.as_str())
            .with("power_kw", self.power_kw)
            .with("temperature_c", self.temperature_c)
            .with("utilization_pct", self.utilization_pct)
            .with("incidents", self.incidents)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            datetime: f.timestamp("datetime")?,
            zone: f.text("zone")?,
            rack_id: f.text("rack_id")?,
            power_kw: f.float("power_kw")?,
            temperature_c: f.float("temperature_c")?,
            utilization_pct: f.float("utilization_pct")?,
            incidents: f.int("incidents")?,
        })
    }
}

/// A cost reading reduced to daily grain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanCostRow {
    pub date: NaiveDate,
    pub zone: String,
    pub total_power_kw: f64,
    pub cost_per_kw_usd: f64,
}

impl TableRow for CleanCostRow {
    const TABLE: Table = Table::ClnEnergyCosts;

    fn to_record(&self) -> Record {
        Record::new()
            .with("date", self.date)
            .with("zone", self.zone.as_str())
            .with("total_power_kw", self.total_power_kw)
            .with("cost_per_kw_usd", self.cost_per_kw_usd)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            date: f.date("date")?,
            zone: f.text("zone")?,
            total_power_kw: f.float("total_power_kw")?,
            cost_per_kw_usd: f.float("cost_per_kw_usd")?,
        })
    }
}

// =============================================================================
// Dimensions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneDim {
    pub zone_key: i64,
    pub zone: String,
}

impl TableRow for ZoneDim {
    const TABLE: Table = Table::DimZone;

    fn to_record(&self) -> Record {
        Record::new()
            .with("zone_key", self.zone_key)
            .with("zone", self.zone.as_str())
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            zone_key: f.int("zone_key")?,
            zone: f.text("zone")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeHourDim {
    pub time_key: i64,
    pub datetime: NaiveDateTime,
    pub date: NaiveDate,
    pub hour: i32,
    pub month: i32,
    pub year: i32,
}

impl TableRow for TimeHourDim {
    const TABLE: Table = Table::DimTimeHour;

    fn to_record(&self) -> Record {
        Record::new()
            .with("time_key", self.time_key)
            .with("datetime", self.datetime)
            .with("date", self.date)
            .with("hour", self.hour)
            .with("month", self.month)
            .with("year", self.year)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            time_key: f.int("time_key")?,
            datetime: f.timestamp("datetime")?,
            date: f.date("date")?,
            hour: f.small_int("hour")?,
            month: f.small_int("month")?,
            year: f.small_int("year")?,
        })
    }
}

// =============================================================================
// Facts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSampleFact {
    pub time_key: i64,
    pub zone_key: i64,
    pub rack_id: String,
    pub power_kw: f64,
    pub temperature_c: f64,
    pub utilization_pct: f64,
    pub incidents: i64,
}

impl TableRow for OperationSampleFact {
    const TABLE: Table = Table::FactOperationsSampled;

    fn to_record(&self) -> Record {
        Record::new()
            .with("time_key", self.time_key)
            .with("zone_key", self.zone_key)
            .with("rack_id", self.rack_id.as_str())
            .with("power_kw", self.power_kw)
            .with("temperature_c", self.temperature_c)
            .with("utilization_pct", self.utilization_pct)
            .with("incidents", self.incidents)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            time_key: f.int("time_key")?,
            zone_key: f.int("zone_key")?,
            rack_id: f.text("rack_id")?,
            power_kw: f.float("power_kw")?,
            temperature_c: f.float("temperature_c")?,
            utilization_pct: f.float("utilization_pct")?,
            incidents: f.int("incidents")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneHourlyFact {
    pub time_key: i64,
    pub zone_key: i64,
    pub avg_power_kw: f64,
    pub avg_temperature_c: f64,
    pub avg_utilization_pct: f64,
    pub incident_count: i64,
    pub sample_count: i64,
}

impl TableRow for ZoneHourlyFact {
    const TABLE: Table = Table::FactZoneHourly;

    fn to_record(&self) -> Record {
        Record::new()
            .with("time_key", self.time_key)
            .with("zone_key", self.zone_key)
            .with("avg_power_kw", self.avg_power_kw)
            .with("avg_temperature_c", self.avg_temperature_c)
            .with("avg_utilization_pct", self.avg_utilization_pct)
            .with("incident_count", self.incident_count)
            .with("sample_count", self.sample_count)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            time_key: f.int("time_key")?,
            zone_key: f.int("zone_key")?,
            avg_power_kw: f.float("avg_power_kw")?,
            avg_temperature_c: f.float("avg_temperature_c")?,
            avg_utilization_pct: f.float("avg_utilization_pct")?,
            incident_count: f.int("incident_count")?,
            sample_count: f.int("sample_count")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyCostDailyFact {
    pub date: NaiveDate,
    pub zone_key: i64,
    pub total_power_kw: f64,
    pub cost_per_kw_usd: f64,
    pub daily_cost_usd: f64,
}

impl TableRow for EnergyCostDailyFact {
    const TABLE: Table = Table::FactEnergyCostDaily;

    fn to_record(&self) -> Record {
        Record::new()
            .with("date", self.date)
            .with("zone_key", self.zone_key)
            .with("total_power_kw", self.total_power_kw)
            .with("cost_per_kw_usd", self.cost_per_kw_usd)
            .with("daily_cost_usd", self.daily_cost_usd)
    }

    fn from_record(record: &Record) -> Result<Self> {
        let f = Fields::new(Self::TABLE, record);
        Ok(Self {
            date: f.date("date")?,
            zone_key: f.int("zone_key")?,
            total_power_kw: f.float("total_power_kw")?,
            cost_per_kw_usd: f.float("cost_per_kw_usd")?,
            daily_cost_usd: f.float("daily_cost_usd")?,
        })
    }
}
