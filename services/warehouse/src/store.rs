//! Storage handle used by every pipeline stage.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::model::TableRow;
use crate::replace::ReplaceSet;
use crate::table::Table;
use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Clean,
    Mart,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Clean => "clean",
            Stage::Mart => "mart",
        }
    }

    /// Tables this stage owns and exclusively writes.
    pub fn tables(self) -> &'static [Table] {
        match self {
            Stage::Ingest => &[Table::StgOperations, Table::StgEnergyCosts],
            Stage::Clean => &[Table::ClnOperations, Table::ClnEnergyCosts],
            Stage::Mart => &[
                Table::DimZone,
                Table::DimTimeHour,
                Table::FactOperationsSampled,
                Table::FactZoneHourly,
                Table::FactEnergyCostDaily,
            ],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Ok,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
        }
    }
}

/// Final state of one stage execution, written to `etl_runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub stage: Stage,
    pub status: RunStatus,
    pub error: Option<String>,
    pub detail: serde_json::Value,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// All rows of `table`, in storage order.
    async fn fetch(&self, table: Table) -> Result<Vec<Record>>;

    async fn count(&self, table: Table) -> Result<i64>;

    /// Applies every write of the set atomically (see [`ReplaceSet`]).
    async fn replace(&self, set: ReplaceSet) -> Result<()>;

    async fn begin_run(&self, stage: Stage) -> Result<Uuid>;

    async fn finish_run(&self, outcome: &RunOutcome) -> Result<()>;

    /// Releases the underlying connections.
    async fn close(&self) {}
}

/// A shared handle is a warehouse too, so a caller can keep a reference to
/// the store it hands over to a pipeline context.
#[async_trait]
impl<W: Warehouse + ?Sized> Warehouse for Arc<W> {
    async fn fetch(&self, table: Table) -> Result<Vec<Record>> {
        (**self).fetch(table).await
    }

    async fn count(&self, table: Table) -> Result<i64> {
        (**self).count(table).await
    }

    async fn replace(&self, set: ReplaceSet) -> Result<()> {
        (**self).replace(set).await
    }

    async fn begin_run(&self, stage: Stage) -> Result<Uuid> {
        (**self).begin_run(stage).await
    }

    async fn finish_run(&self, outcome: &RunOutcome) -> Result<()> {
        (**self).finish_run(outcome).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Reads `T::TABLE` and decodes every row.
pub async fn read_table<T: TableRow>(warehouse: &dyn Warehouse) -> Result<Vec<T>> {
    warehouse
        .fetch(T::TABLE)
        .await?
        .iter()
        .map(T::from_record)
        .collect()
}
