//! Cleaning: normalize identifiers, drop incomplete or implausible rows.
//!
//! Validation is exposed as lazy iterators ([`screen_operations`],
//! [`screen_costs`]) yielding either the clean row or a [`Rejected`]. The
//! stage collects accepted rows into the clean tables and hands rejected
//! ones back to the caller as [`Rejections`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};
use warehouse::{
    normalize_identifier, read_table, CleanCostRow, CleanOperationRow, RawCostRow,
    RawOperationRow, ReplaceSet, Stage, Table,
};

use crate::context::PipelineContext;
use crate::rejects::{RejectReason, Rejected, RejectedRow, Rejections};
use crate::runs::tracked;

fn required_number(value: Option<f64>, field: &'static str) -> Result<f64, RejectReason> {
    match value {
        Some(v) if !v.is_nan() => Ok(v),
        _ => Err(RejectReason::MissingField(field)),
    }
}

fn required_identifier(value: Option<&str>, field: &'static str) -> Result<String, RejectReason> {
    normalize_identifier(value).ok_or(RejectReason::MissingField(field))
}

pub fn validate_operation(raw: &RawOperationRow) -> Result<CleanOperationRow, RejectReason> {
    let datetime = raw.datetime.ok_or(RejectReason::MissingField("datetime"))?;
    let zone = required_identifier(raw.zone.as_deref(), "zone")?;
    let rack_id = required_identifier(raw.rack_id.as_deref(), "rack_id")?;
    let power_kw = required_number(raw.power_kw, "power_kw")?;
    let temperature_c = required_number(raw.temperature_c, "temperature_c")?;
    let utilization_pct = required_number(raw.utilization_pct, "utilization_pct")?;
    let incidents = required_number(raw.incidents, "incidents")?;

    if power_kw < 0.0 {
        return Err(RejectReason::NegativePower);
    }
    if !(0.0..=100.0).contains(&utilization_pct) {
        return Err(RejectReason::UtilizationOutOfRange);
    }
    let incidents = if incidents == 0.0 {
        0
    } else if incidents == 1.0 {
        1
    } else {
        return Err(RejectReason::InvalidIncidentFlag);
    };

    Ok(CleanOperationRow {
        datetime,
        zone,
        rack_id,
        power_kw,
        temperature_c,
        utilization_pct,
        incidents,
    })
}

pub fn validate_cost(raw: &RawCostRow) -> Result<CleanCostRow, RejectReason> {
    let datetime = raw.datetime.ok_or(RejectReason::MissingField("datetime"))?;
    let zone = required_identifier(raw.zone.as_deref(), "zone")?;
    let total_power_kw = required_number(raw.total_power_kw, "total_power_kw")?;
    let cost_per_kw_usd = required_number(raw.cost_per_kw_usd, "cost_per_kw_usd")?;

    if total_power_kw < 0.0 {
        return Err(RejectReason::NegativeTotalPower);
    }
    if cost_per_kw_usd <= 0.0 {
        return Err(RejectReason::NonPositiveCostRate);
    }

    Ok(CleanCostRow {
        date: datetime.date(),
        zone,
        total_power_kw,
        cost_per_kw_usd,
    })
}

pub fn screen_operations(
    rows: &[RawOperationRow],
) -> impl Iterator<Item = Result<CleanOperationRow, Rejected>> + '_ {
    rows.iter().enumerate().map(|(idx, raw)| {
        validate_operation(raw).map_err(|reason| Rejected {
            source: Table::StgOperations,
            row_number: idx + 1,
            reason,
            row: RejectedRow::Operation(raw.clone()),
        })
    })
}

pub fn screen_costs(
    rows: &[RawCostRow],
) -> impl Iterator<Item = Result<CleanCostRow, Rejected>> + '_ {
    rows.iter().enumerate().map(|(idx, raw)| {
        validate_cost(raw).map_err(|reason| Rejected {
            source: Table::StgEnergyCosts,
            row_number: idx + 1,
            reason,
            row: RejectedRow::Cost(raw.clone()),
        })
    })
}

/// Splits verdicts into accepted rows and rejections, keeping input order.
fn partition<T>(verdicts: impl Iterator<Item = Result<T, Rejected>>, rejected: &mut Vec<Rejected>) -> Vec<T> {
    let mut accepted = Vec::new();
    for verdict in verdicts {
        match verdict {
            Ok(row) => accepted.push(row),
            Err(r) => rejected.push(r),
        }
    }
    accepted
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanReport {
    pub staged_operations: usize,
    pub staged_costs: usize,
    pub clean_operations: usize,
    pub clean_costs: usize,
    /// Rejection count per reason code.
    pub rejected: BTreeMap<String, usize>,
    pub dry_run: bool,
}

/// Stage result. Only the report is serialized into the run detail.
#[derive(Debug, Serialize)]
pub struct CleanOutput {
    #[serde(flatten)]
    pub report: CleanReport,
    #[serde(skip)]
    pub rejections: Rejections,
}

/// Rebuilds `cln_operations` and `cln_energy_costs` from staging, recorded as
/// one `clean` run. Rejections are also written to `rejects_path` when given;
/// failing to write them fails the run before any clean table is replaced.
pub async fn run(ctx: &PipelineContext, rejects_path: Option<&Path>) -> Result<CleanOutput> {
    tracked(ctx, Stage::Clean, stage(ctx, rejects_path)).await
}

async fn stage(ctx: &PipelineContext, rejects_path: Option<&Path>) -> Result<CleanOutput> {
    let warehouse = ctx.warehouse();
    let staged_operations: Vec<RawOperationRow> = read_table(warehouse)
        .await
        .context("Failed to read stg_operations")?;
    let staged_costs: Vec<RawCostRow> = read_table(warehouse)
        .await
        .context("Failed to read stg_energy_costs")?;

    let mut rejected = Vec::new();
    let operations = partition(screen_operations(&staged_operations), &mut rejected);
    let costs = partition(screen_costs(&staged_costs), &mut rejected);
    let rejections = Rejections::new(rejected);

    let report = CleanReport {
        staged_operations: staged_operations.len(),
        staged_costs: staged_costs.len(),
        clean_operations: operations.len(),
        clean_costs: costs.len(),
        rejected: rejections.counts(),
        dry_run: ctx.is_dry_run(),
    };

    for (reason, count) in &report.rejected {
        warn!(reason = %reason, rows = count, "rows rejected");
    }

    if let Some(path) = rejects_path {
        let written = rejections.write_csv_file(path)?;
        info!(rows = written, path = %path.display(), "wrote rejected rows");
    }

    if !ctx.is_dry_run() {
        let replaced = warehouse
            .replace(ReplaceSet::new().rows(&operations).rows(&costs))
            .await
            .context("Failed to replace clean tables");
        if let Err(e) = replaced {
            // A failed clean leaves no rejects file behind
            if let Some(path) = rejects_path {
                let _ = std::fs::remove_file(path);
            }
            return Err(e);
        }
    }

    info!(
        operations = report.clean_operations,
        costs = report.clean_costs,
        rejected = rejections.len(),
        dry_run = report.dry_run,
        "clean tables rebuilt"
    );
    Ok(CleanOutput { report, rejections })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Arc;
    use warehouse::{MemoryWarehouse, RunStatus, Warehouse};

    fn ts(s: &str) -> Option<NaiveDateTime> {
        Some(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    fn op() -> RawOperationRow {
        RawOperationRow {
            datetime: ts("2024-01-01 00:00:00"),
            zone: Some("  east-1 ".to_string()),
            rack_id: Some("r-01".to_string()),
            power_kw: Some(10.0),
            temperature_c: Some(22.0),
            utilization_pct: Some(55.0),
            incidents: Some(1.0),
        }
    }

    fn cost() -> RawCostRow {
        RawCostRow {
            datetime: ts("2024-01-01 18:30:00"),
            zone: Some("west-2".to_string()),
            total_power_kw: Some(100.0),
            cost_per_kw_usd: Some(0.12),
        }
    }

    #[test]
    fn test_valid_operation_is_normalized() {
        let clean = validate_operation(&op()).unwrap();
        assert_eq!(clean.zone, "EAST-1");
        assert_eq!(clean.rack_id, "R-01");
        assert_eq!(clean.incidents, 1);
    }

    #[test]
    fn test_utilization_out_of_range() {
        let raw = RawOperationRow {
            utilization_pct: Some(150.0),
            ..op()
        };
        assert_eq!(
            validate_operation(&raw),
            Err(RejectReason::UtilizationOutOfRange)
        );
    }

    #[test]
    fn test_utilization_bounds_are_inclusive() {
        for pct in [0.0, 100.0] {
            let raw = RawOperationRow {
                utilization_pct: Some(pct),
                ..op()
            };
            assert!(validate_operation(&raw).is_ok());
        }
    }

    #[test]
    fn test_negative_power_rejected_zero_accepted() {
        let raw = RawOperationRow {
            power_kw: Some(-0.5),
            ..op()
        };
        assert_eq!(validate_operation(&raw), Err(RejectReason::NegativePower));

        let raw = RawOperationRow {
            power_kw: Some(0.0),
            ..op()
        };
        assert!(validate_operation(&raw).is_ok());
    }

    #[test]
    fn test_incident_flag_must_be_zero_or_one() {
        let raw = RawOperationRow {
            incidents: Some(2.0),
            ..op()
        };
        assert_eq!(validate_operation(&raw), Err(RejectReason::InvalidIncidentFlag));

        let raw = RawOperationRow {
            incidents: Some(0.5),
            ..op()
        };
        assert_eq!(validate_operation(&raw), Err(RejectReason::InvalidIncidentFlag));
    }

    #[test]
    fn test_missing_checks_run_before_predicates() {
        let raw = RawOperationRow {
            rack_id: Some(" ".to_string()),
            utilization_pct: Some(150.0),
            ..op()
        };
        assert_eq!(
            validate_operation(&raw),
            Err(RejectReason::MissingField("rack_id"))
        );

        let raw = RawOperationRow {
            temperature_c: Some(f64::NAN),
            ..op()
        };
        assert_eq!(
            validate_operation(&raw),
            Err(RejectReason::MissingField("temperature_c"))
        );
    }

    #[test]
    fn test_cost_projected_to_date() {
        let clean = validate_cost(&cost()).unwrap();
        assert_eq!(clean.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(clean.zone, "WEST-2");
    }

    #[test]
    fn test_cost_predicates() {
        let raw = RawCostRow {
            cost_per_kw_usd: Some(0.0),
            ..cost()
        };
        assert_eq!(validate_cost(&raw), Err(RejectReason::NonPositiveCostRate));

        let raw = RawCostRow {
            total_power_kw: Some(-1.0),
            ..cost()
        };
        assert_eq!(validate_cost(&raw), Err(RejectReason::NegativeTotalPower));

        let raw = RawCostRow {
            total_power_kw: Some(0.0),
            ..cost()
        };
        assert!(validate_cost(&raw).is_ok());
    }

    #[test]
    fn test_cost_missing_fields() {
        let raw = RawCostRow {
            zone: None,
            ..cost()
        };
        assert_eq!(validate_cost(&raw), Err(RejectReason::MissingField("zone")));

        let raw = RawCostRow {
            total_power_kw: Some(f64::NAN),
            cost_per_kw_usd: Some(0.0),
            ..cost()
        };
        assert_eq!(
            validate_cost(&raw),
            Err(RejectReason::MissingField("total_power_kw"))
        );

        let raw = RawCostRow {
            cost_per_kw_usd: Some(f64::NAN),
            ..cost()
        };
        assert_eq!(
            validate_cost(&raw),
            Err(RejectReason::MissingField("cost_per_kw_usd"))
        );

        let raw = RawCostRow {
            datetime: None,
            ..cost()
        };
        assert_eq!(validate_cost(&raw), Err(RejectReason::MissingField("datetime")));
    }

    #[test]
    fn test_screen_is_lazy_and_numbers_rows() {
        let rows = vec![
            op(),
            RawOperationRow {
                utilization_pct: Some(150.0),
                ..op()
            },
        ];
        let mut verdicts = screen_operations(&rows);
        assert!(verdicts.next().unwrap().is_ok());
        let rejected = verdicts.next().unwrap().unwrap_err();
        assert_eq!(rejected.row_number, 2);
        assert_eq!(rejected.source, Table::StgOperations);
        assert!(verdicts.next().is_none());
    }

    #[test]
    fn test_row_numbers_follow_read_order() {
        let rows = vec![
            RawCostRow {
                zone: None,
                ..cost()
            },
            cost(),
            RawCostRow {
                cost_per_kw_usd: Some(0.0),
                ..cost()
            },
        ];
        let numbers: Vec<usize> = screen_costs(&rows)
            .filter_map(|v| v.err())
            .map(|r| r.row_number)
            .collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    async fn staged(wh: &MemoryWarehouse, ops: Vec<RawOperationRow>, costs: Vec<RawCostRow>) {
        wh.replace(ReplaceSet::new().rows(&ops).rows(&costs))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clean_stage_filters_and_reports() {
        let wh = Arc::new(MemoryWarehouse::new());
        let bad = RawOperationRow {
            utilization_pct: Some(150.0),
            ..op()
        };
        staged(&wh, vec![op(), bad.clone()], vec![cost()]).await;

        let ctx = PipelineContext::new(wh.clone());
        let output = run(&ctx, None).await.unwrap();

        assert_eq!(output.report.staged_operations, 2);
        assert_eq!(output.report.clean_operations, 1);
        assert_eq!(output.report.clean_costs, 1);
        assert_eq!(output.report.rejected["utilization_out_of_range"], 1);

        let rejected: Vec<Rejected> = output.rejections.collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].row, RejectedRow::Operation(bad));

        let clean: Vec<CleanOperationRow> = read_table(wh.as_ref()).await.unwrap();
        assert!(clean.iter().all(|r| r.utilization_pct <= 100.0));
        assert_eq!(wh.runs().await[0].detail["rejected"]["utilization_out_of_range"], 1);
    }

    #[tokio::test]
    async fn test_clean_stage_writes_rejects_file() {
        let wh = Arc::new(MemoryWarehouse::new());
        let bad = RawCostRow {
            cost_per_kw_usd: Some(-1.0),
            ..cost()
        };
        staged(&wh, vec![op()], vec![bad]).await;

        let path = std::env::temp_dir().join(format!("rejects-{}.csv", uuid::Uuid::new_v4()));
        let ctx = PipelineContext::new(wh.clone());
        let output = run(&ctx, Some(&path)).await.unwrap();
        assert_eq!(output.rejections.len(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.contains("stg_energy_costs,1,non_positive_cost_rate,"));
    }

    #[tokio::test]
    async fn test_clean_failure_keeps_previous_clean_tables() {
        let wh = Arc::new(MemoryWarehouse::new());
        staged(&wh, vec![op()], vec![cost()]).await;
        let ctx = PipelineContext::new(wh.clone());
        run(&ctx, None).await.unwrap();

        staged(&wh, vec![], vec![]).await;
        wh.fail_writes_to(Table::ClnEnergyCosts).await;
        assert!(run(&ctx, None).await.is_err());

        assert_eq!(wh.count(Table::ClnOperations).await.unwrap(), 1);
        assert_eq!(wh.count(Table::ClnEnergyCosts).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_clean_removes_rejects_file() {
        let wh = Arc::new(MemoryWarehouse::new());
        staged(&wh, vec![op()], vec![RawCostRow { zone: None, ..cost() }]).await;
        wh.fail_writes_to(Table::ClnOperations).await;

        let path = std::env::temp_dir().join(format!("rejects-{}.csv", uuid::Uuid::new_v4()));
        let ctx = PipelineContext::new(wh.clone());
        assert!(run(&ctx, Some(&path)).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unwritable_rejects_file_fails_the_run() {
        let wh = Arc::new(MemoryWarehouse::new());
        staged(&wh, vec![op()], vec![cost()]).await;
        let ctx = PipelineContext::new(wh.clone());
        run(&ctx, None).await.unwrap();

        let bad = RawOperationRow {
            power_kw: Some(-1.0),
            ..op()
        };
        staged(&wh, vec![bad], vec![]).await;
        let path = std::env::temp_dir()
            .join(format!("missing-{}", uuid::Uuid::new_v4()))
            .join("rejects.csv");
        let err = run(&ctx, Some(&path)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to create rejects file"));

        let runs = wh.runs().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].stage, Stage::Clean);
        assert_eq!(runs[1].status, RunStatus::Failed);

        // Clean tables still hold the previous run's rows
        assert_eq!(wh.count(Table::ClnOperations).await.unwrap(), 1);
        assert_eq!(wh.count(Table::ClnEnergyCosts).await.unwrap(), 1);
    }
}
