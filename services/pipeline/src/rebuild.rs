use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::clean::{self, CleanOutput};
use crate::context::PipelineContext;
use crate::ingest::{self, IngestReport};
use crate::mart::{self, MartReport};
use crate::workbook::SourceExport;

pub struct RebuildOutput {
    pub ingest: IngestReport,
    pub clean: CleanOutput,
    pub mart: MartReport,
}

/// Ingest, clean and mart in order, stopping at the first failing stage.
pub async fn rebuild(
    ctx: &PipelineContext,
    export: &SourceExport,
    rejects_path: Option<&Path>,
) -> Result<RebuildOutput> {
    let ingest = ingest::run(ctx, export).await?;
    let clean = clean::run(ctx, rejects_path).await?;
    let mart = mart::run(ctx).await?;

    info!(
        staged = ingest.staged_operations + ingest.staged_costs,
        clean = clean.report.clean_operations + clean.report.clean_costs,
        rejected = clean.rejections.len(),
        hourly = mart.hourly_facts,
        "warehouse rebuilt"
    );
    Ok(RebuildOutput { ingest, clean, mart })
}
