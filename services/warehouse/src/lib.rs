//! Warehouse - storage layer for the facility telemetry mart
//!
//! Responsibilities:
//! - Table catalog (staging, clean, dimensions, facts) and DDL
//! - Typed rows and their named-field records
//! - Replace-load of a stage's tables in one transactional scope
//! - Stage run bookkeeping (`etl_runs`)
//!
//! Two implementations of [`Warehouse`]: PostgreSQL ([`PgWarehouse`]) and an
//! in-process [`MemoryWarehouse`] for tests and dry runs.

pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod replace;
pub mod store;
pub mod table;
pub mod telemetry;
pub mod value;

pub use config::WarehouseConfig;
pub use error::{Error, Result};
pub use memory::MemoryWarehouse;
pub use model::{
    normalize_identifier, CleanCostRow, CleanOperationRow, EnergyCostDailyFact, OperationSampleFact, RawCostRow,
    RawOperationRow, TableRow, TimeHourDim, ZoneDim, ZoneHourlyFact,
};
pub use postgres::PgWarehouse;
pub use replace::ReplaceSet;
pub use store::{read_table, RunOutcome, RunStatus, Stage, Warehouse};
pub use table::Table;
pub use value::{Record, Value};
