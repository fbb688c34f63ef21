//! `etl_runs` bookkeeping around a stage.

use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use tracing::{error, info, warn};
use warehouse::{RunOutcome, RunStatus, Stage};

use crate::context::PipelineContext;

/// Runs `work` as one tracked execution of `stage`.
///
/// A `running` row is inserted first and finished as `ok` with the report as
/// detail, or `failed` with the error text. The stage's own error is what the
/// caller gets back. Dry runs are not recorded.
pub async fn tracked<T, F>(ctx: &PipelineContext, stage: Stage, work: F) -> Result<T>
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    if ctx.is_dry_run() {
        return work.await;
    }

    let warehouse = ctx.warehouse();
    let run_id = warehouse
        .begin_run(stage)
        .await
        .with_context(|| format!("Failed to record start of {} run", stage))?;
    info!(%run_id, %stage, "stage started");

    match work.await {
        Ok(report) => {
            let detail = serde_json::to_value(&report).context("Failed to serialize stage report")?;
            warehouse
                .finish_run(&RunOutcome {
                    run_id,
                    stage,
                    status: RunStatus::Ok,
                    error: None,
                    detail,
                })
                .await
                .with_context(|| format!("Failed to record end of {} run", stage))?;
            info!(%run_id, %stage, "stage finished");
            Ok(report)
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(%run_id, %stage, error = %message, "stage failed");
            let outcome = RunOutcome {
                run_id,
                stage,
                status: RunStatus::Failed,
                error: Some(message),
                detail: serde_json::json!({}),
            };
            if let Err(record_err) = warehouse.finish_run(&outcome).await {
                warn!(%run_id, error = %record_err, "could not record failed run");
            }
            Err(e)
        }
    }
}
