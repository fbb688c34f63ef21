//! Warehouse table catalog.
//!
//! Every table the pipeline owns is listed here with its column contract.
//! Each stage's output schema is consumed verbatim by the next stage, so a
//! column rename here is a breaking change for every downstream reader.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Text,
    Timestamp,
    Date,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Int => "BIGINT",
            ColumnKind::Float => "DOUBLE PRECISION",
            ColumnKind::Text => "TEXT",
            ColumnKind::Timestamp => "TIMESTAMP",
            ColumnKind::Date => "DATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

const fn required(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        nullable: false,
    }
}

const fn optional(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        nullable: true,
    }
}

use ColumnKind::{Date, Float, Int, Text, Timestamp};

const STG_OPERATIONS: &[Column] = &[
    optional("datetime", Timestamp),
    optional("zone", Text),
    optional("rack_id", Text),
    optional("power_kw", Float),
    optional("temperature_c", Float),
    optional("utilization_pct", Float),
    optional("incidents", Float),
];

const STG_ENERGY_COSTS: &[Column] = &[
    optional("datetime", Timestamp),
    optional("zone", Text),
    optional("total_power_kw", Float),
    optional("cost_per_kw_usd", Float),
];

const CLN_OPERATIONS: &[Column] = &[
    required("datetime", Timestamp),
    required("zone", Text),
    required("rack_id", Text),
    required("power_kw", Float),
    required("temperature_c", Float),
    required("utilization_pct", Float),
    required("incidents", Int),
];

const CLN_ENERGY_COSTS: &[Column] = &[
    required("date", Date),
    required("zone", Text),
    required("total_power_kw", Float),
    required("cost_per_kw_usd", Float),
];

const DIM_ZONE: &[Column] = &[required("zone_key", Int), required("zone", Text)];

const DIM_TIME_HOUR: &[Column] = &[
    required("time_key", Int),
    required("datetime", Timestamp),
    required("date", Date),
    required("hour", Int),
    required("month", Int),
    required("year", Int),
];

const FACT_OPERATIONS_SAMPLED: &[Column] = &[
    required("time_key", Int),
    required("zone_key", Int),
    required("rack_id", Text),
    required("power_kw", Float),
    required("temperature_c", Float),
    required("utilization_pct", Float),
    required("incidents", Int),
];

const FACT_ZONE_HOURLY: &[Column] = &[
    required("time_key", Int),
    required("zone_key", Int),
    required("avg_power_kw", Float),
    required("avg_temperature_c", Float),
    required("avg_utilization_pct", Float),
    required("incident_count", Int),
    required("sample_count", Int),
];

const FACT_ENERGY_COST_DAILY: &[Column] = &[
    required("date", Date),
    required("zone_key", Int),
    required("total_power_kw", Float),
    required("cost_per_kw_usd", Float),
    required("daily_cost_usd", Float),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    StgOperations,
    StgEnergyCosts,
    ClnOperations,
    ClnEnergyCosts,
    DimZone,
    DimTimeHour,
    FactOperationsSampled,
    FactZoneHourly,
    FactEnergyCostDaily,
}

impl Table {
    /// All tables in pipeline order (staging, clean, dimensions, facts).
    pub const ALL: [Table; 9] = [
        Table::StgOperations,
        Table::StgEnergyCosts,
        Table::ClnOperations,
        Table::ClnEnergyCosts,
        Table::DimZone,
        Table::DimTimeHour,
        Table::FactOperationsSampled,
        Table::FactZoneHourly,
        Table::FactEnergyCostDaily,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::StgOperations => "stg_operations",
            Table::StgEnergyCosts => "stg_energy_costs",
            Table::ClnOperations => "cln_operations",
            Table::ClnEnergyCosts => "cln_energy_costs",
            Table::DimZone => "dim_zone",
            Table::DimTimeHour => "dim_time_hour",
            Table::FactOperationsSampled => "fact_operations_sampled",
            Table::FactZoneHourly => "fact_zone_hourly",
            Table::FactEnergyCostDaily => "fact_energy_cost_daily",
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::StgOperations => STG_OPERATIONS,
            Table::StgEnergyCosts => STG_ENERGY_COSTS,
            Table::ClnOperations => CLN_OPERATIONS,
            Table::ClnEnergyCosts => CLN_ENERGY_COSTS,
            Table::DimZone => DIM_ZONE,
            Table::DimTimeHour => DIM_TIME_HOUR,
            Table::FactOperationsSampled => FACT_OPERATIONS_SAMPLED,
            Table::FactZoneHourly => FACT_ZONE_HOURLY,
            Table::FactEnergyCostDaily => FACT_ENERGY_COST_DAILY,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn primary_key(self) -> &'static [&'static str] {
        match self {
            Table::DimZone => &["zone_key"],
            Table::DimTimeHour => &["time_key"],
            Table::FactZoneHourly => &["time_key", "zone_key"],
            _ => &[],
        }
    }

    /// Natural key that must stay unique within a rebuild.
    pub fn natural_key(self) -> Option<&'static str> {
        match self {
            Table::DimZone => Some("zone"),
            Table::DimTimeHour => Some("datetime"),
            _ => None,
        }
    }

    pub fn create_sql(self) -> String {
        let mut defs: Vec<String> = self
            .columns()
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("    {} {}{}", c.name, c.kind.sql_type(), null)
            })
            .collect();

        let pk = self.primary_key();
        if !pk.is_empty() {
            defs.push(format!("    PRIMARY KEY ({})", pk.join(", ")));
        }
        if let Some(natural) = self.natural_key() {
            defs.push(format!("    UNIQUE ({})", natural));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.name(),
            defs.join(",\n")
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
