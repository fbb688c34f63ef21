use std::path::PathBuf;

use anyhow::Result;
use warehouse::config::env_or;

/// Where the source export lives and which sheets to read.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workbook: PathBuf,
    pub operations_sheet: String,
    pub costs_sheet: String,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            workbook: env_or("SOURCE_WORKBOOK", PathBuf::from("./data/facility_export.xlsx"))?,
            operations_sheet: env_or("OPERATIONS_SHEET", "operations".to_string())?,
            costs_sheet: env_or("COSTS_SHEET", "energy_costs".to_string())?,
        })
    }

    /// A `--workbook` flag wins over `SOURCE_WORKBOOK`.
    pub fn with_workbook(mut self, workbook: Option<PathBuf>) -> Self {
        if let Some(path) = workbook {
            self.workbook = path;
        }
        self
    }
}
