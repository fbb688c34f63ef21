//! In-process warehouse for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::replace::ReplaceSet;
use crate::store::{RunOutcome, RunStatus, Stage, Warehouse};
use crate::table::Table;
use crate::value::Record;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<Table, Vec<Record>>,
    runs: Vec<RunOutcome>,
    fail_on: Option<Table>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later replace that includes `table` fail before anything
    /// is applied.
    pub async fn fail_writes_to(&self, table: Table) {
        self.state.lock().await.fail_on = Some(table);
    }

    pub async fn clear_failure(&self) {
        self.state.lock().await.fail_on = None;
    }

    /// Recorded stage runs, oldest first.
    pub async fn runs(&self) -> Vec<RunOutcome> {
        self.state.lock().await.runs.clone()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn fetch(&self, table: Table) -> Result<Vec<Record>> {
        Ok(self
            .state
            .lock()
            .await
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, table: Table) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.tables.get(&table).map_or(0, |rows| rows.len() as i64))
    }

    async fn replace(&self, set: ReplaceSet) -> Result<()> {
        set.validate()?;

        let mut state = self.state.lock().await;
        if let Some(failing) = state.fail_on {
            if set.tables().contains(&failing) {
                return Err(Error::Storage(format!("injected failure writing {}", failing)));
            }
        }

        // Build the complete next state first so a failure can never leave a
        // partially replaced set behind.
        let mut next = state.tables.clone();
        for write in set.into_writes() {
            next.insert(write.table, write.records);
        }
        state.tables = next;
        Ok(())
    }

    async fn begin_run(&self, stage: Stage) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        self.state.lock().await.runs.push(RunOutcome {
            run_id,
            stage,
            status: RunStatus::Running,
            error: None,
            detail: serde_json::json!({}),
        });
        Ok(run_id)
    }

    async fn finish_run(&self, outcome: &RunOutcome) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.run_id == outcome.run_id)
            .ok_or_else(|| Error::Storage(format!("unknown run {}", outcome.run_id)))?;
        *run = outcome.clone();
        Ok(())
    }
}
