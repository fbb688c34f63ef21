//! Ingestion: land both source sheets in the staging tables as-is.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use warehouse::{ReplaceSet, Stage, Table};

use crate::context::PipelineContext;
use crate::runs::tracked;
use crate::workbook::SourceExport;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub staged_operations: i64,
    pub staged_costs: i64,
    pub source_hash: Option<String>,
    pub dry_run: bool,
}

/// Replaces `stg_operations` and `stg_energy_costs` with the export, recorded
/// as one `ingest` run.
pub async fn run(ctx: &PipelineContext, export: &SourceExport) -> Result<IngestReport> {
    tracked(ctx, Stage::Ingest, stage(ctx, export)).await
}

async fn stage(ctx: &PipelineContext, export: &SourceExport) -> Result<IngestReport> {
    if ctx.is_dry_run() {
        let report = IngestReport {
            staged_operations: export.operations.len() as i64,
            staged_costs: export.costs.len() as i64,
            source_hash: export.content_hash.clone(),
            dry_run: true,
        };
        info!(
            operations = report.staged_operations,
            costs = report.staged_costs,
            "dry run: staging tables left untouched"
        );
        return Ok(report);
    }

    let warehouse = ctx.warehouse();
    let set = ReplaceSet::new()
        .rows(&export.operations)
        .rows(&export.costs);
    warehouse
        .replace(set)
        .await
        .context("Failed to replace staging tables")?;

    let report = IngestReport {
        staged_operations: warehouse.count(Table::StgOperations).await?,
        staged_costs: warehouse.count(Table::StgEnergyCosts).await?,
        source_hash: export.content_hash.clone(),
        dry_run: false,
    };
    info!(
        operations = report.staged_operations,
        costs = report.staged_costs,
        "staging tables replaced"
    );
    Ok(report)
}
