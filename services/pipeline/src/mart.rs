//! Mart stage: dimensions and facts from the clean tables, in one replace.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use warehouse::{read_table, CleanCostRow, CleanOperationRow, ReplaceSet, Stage};

use crate::context::PipelineContext;
use crate::dimensions::{build_time_dimension, build_zone_dimension, cost_only_zones};
use crate::facts::{build_facts, KeyLookup, Unresolved};
use crate::runs::tracked;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MartReport {
    pub zones: usize,
    pub hours: usize,
    pub sample_facts: usize,
    pub hourly_facts: usize,
    pub cost_facts: usize,
    pub unresolved: Unresolved,
    /// Zones with cost rows but no operations.
    pub cost_only_zones: Vec<String>,
    pub dry_run: bool,
}

/// Rebuilds both dimensions and all three fact tables, recorded as one
/// `mart` run.
pub async fn run(ctx: &PipelineContext) -> Result<MartReport> {
    tracked(ctx, Stage::Mart, stage(ctx)).await
}

async fn stage(ctx: &PipelineContext) -> Result<MartReport> {
    let warehouse = ctx.warehouse();
    let operations: Vec<CleanOperationRow> = read_table(warehouse)
        .await
        .context("Failed to read cln_operations")?;
    let costs: Vec<CleanCostRow> = read_table(warehouse)
        .await
        .context("Failed to read cln_energy_costs")?;

    let zones = build_zone_dimension(&operations, &costs);
    let hours = build_time_dimension(&operations);
    let facts = build_facts(&KeyLookup::new(&zones, &hours), &operations, &costs);

    if facts.unresolved.total() > 0 {
        warn!(
            operations = facts.unresolved.operations,
            costs = facts.unresolved.costs,
            "rows dropped: dimension key not found"
        );
    }

    let report = MartReport {
        zones: zones.len(),
        hours: hours.len(),
        sample_facts: facts.samples.len(),
        hourly_facts: facts.hourly.len(),
        cost_facts: facts.costs.len(),
        unresolved: facts.unresolved,
        cost_only_zones: cost_only_zones(&operations, &costs),
        dry_run: ctx.is_dry_run(),
    };

    if !report.cost_only_zones.is_empty() {
        info!(zones = ?report.cost_only_zones, "zones with costs but no operations");
    }

    if !ctx.is_dry_run() {
        let set = ReplaceSet::new()
            .rows(&zones)
            .rows(&hours)
            .rows(&facts.samples)
            .rows(&facts.hourly)
            .rows(&facts.costs);
        warehouse
            .replace(set)
            .await
            .context("Failed to replace dimension and fact tables")?;
    }

    info!(
        zones = report.zones,
        hours = report.hours,
        samples = report.sample_facts,
        hourly = report.hourly_facts,
        costs = report.cost_facts,
        "mart rebuilt"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Arc;
    use warehouse::{MemoryWarehouse, Table, Warehouse, ZoneDim, ZoneHourlyFact};

    fn op(zone: &str, power_kw: f64, incidents: i64) -> CleanOperationRow {
        CleanOperationRow {
            datetime: NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            zone: zone.to_string(),
            rack_id: "R-01".to_string(),
            power_kw,
            temperature_c: 20.0,
            utilization_pct: 40.0,
            incidents,
        }
    }

    fn cost(zone: &str) -> CleanCostRow {
        CleanCostRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            zone: zone.to_string(),
            total_power_kw: 100.0,
            cost_per_kw_usd: 0.12,
        }
    }

    async fn seeded() -> Arc<MemoryWarehouse> {
        let wh = Arc::new(MemoryWarehouse::new());
        let ops = vec![op("EAST-1", 10.0, 0), op("EAST-1", 20.0, 1)];
        let costs = vec![cost("EAST-1"), cost("NORTH-9")];
        wh.replace(ReplaceSet::new().rows(&ops).rows(&costs))
            .await
            .unwrap();
        wh
    }

    #[tokio::test]
    async fn test_mart_builds_all_five_tables() {
        let wh = seeded().await;
        let ctx = PipelineContext::new(wh.clone());
        let report = run(&ctx).await.unwrap();

        assert_eq!(report.zones, 2);
        assert_eq!(report.hours, 1);
        assert_eq!(report.sample_facts, 2);
        assert_eq!(report.hourly_facts, 1);
        assert_eq!(report.cost_facts, 2);
        assert_eq!(report.cost_only_zones, vec!["NORTH-9".to_string()]);

        let hourly: Vec<ZoneHourlyFact> = read_table(wh.as_ref()).await.unwrap();
        assert_eq!(hourly[0].avg_power_kw, 15.0);

        let zones: Vec<ZoneDim> = read_table(wh.as_ref()).await.unwrap();
        assert_eq!(zones.len(), 2);
    }

    #[tokio::test]
    async fn test_mart_failure_leaves_every_mart_table_unchanged() {
        let wh = seeded().await;
        let ctx = PipelineContext::new(wh.clone());
        run(&ctx).await.unwrap();

        wh.replace(ReplaceSet::new().rows(&[op("WEST-2", 1.0, 0)]).rows::<CleanCostRow>(&[]))
            .await
            .unwrap();
        wh.fail_writes_to(Table::FactEnergyCostDaily).await;
        assert!(run(&ctx).await.is_err());

        let zones: Vec<ZoneDim> = read_table(wh.as_ref()).await.unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(wh.count(Table::FactOperationsSampled).await.unwrap(), 2);
        assert_eq!(wh.count(Table::FactEnergyCostDaily).await.unwrap(), 2);

        let runs = wh.runs().await;
        assert_eq!(runs.last().unwrap().status, warehouse::RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_mart_dry_run_writes_nothing() {
        let wh = seeded().await;
        let ctx = PipelineContext::new(wh.clone()).with_dry_run(true);
        let report = run(&ctx).await.unwrap();
        assert_eq!(report.hourly_facts, 1);
        assert_eq!(wh.count(Table::FactZoneHourly).await.unwrap(), 0);
    }
}
