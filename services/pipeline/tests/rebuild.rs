use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;

use pipeline::rejects::RejectReason;
use pipeline::workbook::SourceExport;
use pipeline::{rebuild, PipelineContext};
use warehouse::{
    read_table, CleanOperationRow, EnergyCostDailyFact, MemoryWarehouse, OperationSampleFact,
    RawCostRow, RawOperationRow, RunStatus, Stage, Table, TimeHourDim, Warehouse, ZoneDim,
    ZoneHourlyFact,
};

fn ts(s: &str) -> Option<NaiveDateTime> {
    Some(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
}

fn reading(at: &str, zone: &str, rack: &str, power_kw: f64, utilization: f64, incidents: f64) -> RawOperationRow {
    RawOperationRow {
        datetime: ts(at),
        zone: Some(zone.to_string()),
        rack_id: Some(rack.to_string()),
        power_kw: Some(power_kw),
        temperature_c: Some(24.0),
        utilization_pct: Some(utilization),
        incidents: Some(incidents),
    }
}

fn cost(at: &str, zone: &str, total_power_kw: f64, rate: f64) -> RawCostRow {
    RawCostRow {
        datetime: ts(at),
        zone: Some(zone.to_string()),
        total_power_kw: Some(total_power_kw),
        cost_per_kw_usd: Some(rate),
    }
}

fn export() -> SourceExport {
    SourceExport {
        operations: vec![
            reading("2024-01-01 00:00:00", "east-1", "r-01", 10.0, 40.0, 0.0),
            reading("2024-01-01 00:00:00", " EAST-1 ", "r-02", 20.0, 60.0, 1.0),
            reading("2024-01-01 01:00:00", "west-2", "r-07", 8.0, 30.0, 0.0),
            reading("2024-01-01 01:00:00", "west-2", "r-08", 4.0, 150.0, 0.0),
            reading("2024-01-01 02:00:00", "west-2", "r-07", -3.0, 10.0, 0.0),
            RawOperationRow {
                zone: None,
                ..reading("2024-01-01 02:00:00", "x", "r-09", 1.0, 1.0, 0.0)
            },
        ],
        costs: vec![
            cost("2024-01-01 00:00:00", "east-1", 100.0, 0.12),
            cost("2024-01-01 00:00:00", "west-2", 50.0, 0.2),
            cost("2024-01-01 00:00:00", "south-3", 75.0, 0.1),
            cost("2024-01-01 00:00:00", "west-2", 50.0, 0.0),
        ],
        content_hash: Some("sha256:fixture".to_string()),
    }
}

struct Snapshot {
    zones: Vec<ZoneDim>,
    hours: Vec<TimeHourDim>,
    samples: Vec<OperationSampleFact>,
    hourly: Vec<ZoneHourlyFact>,
    costs: Vec<EnergyCostDailyFact>,
}

async fn snapshot(wh: &dyn Warehouse) -> Snapshot {
    Snapshot {
        zones: read_table(wh).await.unwrap(),
        hours: read_table(wh).await.unwrap(),
        samples: read_table(wh).await.unwrap(),
        hourly: read_table(wh).await.unwrap(),
        costs: read_table(wh).await.unwrap(),
    }
}

#[tokio::test]
async fn test_full_rebuild() {
    let wh = Arc::new(MemoryWarehouse::new());
    let ctx = PipelineContext::new(wh.clone());

    let output = rebuild(&ctx, &export(), None).await.unwrap();
    assert_eq!(output.ingest.staged_operations, 6);
    assert_eq!(output.ingest.staged_costs, 4);
    assert_eq!(output.clean.report.clean_operations, 3);
    assert_eq!(output.clean.report.clean_costs, 3);

    // Rejected rows come back with their reasons
    let reasons: Vec<RejectReason> = output.clean.rejections.map(|r| r.reason).collect();
    assert_eq!(
        reasons,
        vec![
            RejectReason::UtilizationOutOfRange,
            RejectReason::NegativePower,
            RejectReason::MissingField("zone"),
            RejectReason::NonPositiveCostRate,
        ]
    );

    // Staging keeps the implausible reading, clean and facts do not
    let staged: Vec<RawOperationRow> = read_table(wh.as_ref()).await.unwrap();
    assert!(staged.iter().any(|r| r.utilization_pct == Some(150.0)));
    let clean: Vec<CleanOperationRow> = read_table(wh.as_ref()).await.unwrap();
    assert!(clean
        .iter()
        .all(|r| r.power_kw >= 0.0 && (0.0..=100.0).contains(&r.utilization_pct) && r.incidents <= 1));

    let snap = snapshot(wh.as_ref()).await;
    assert!(snap.samples.iter().all(|s| s.utilization_pct <= 100.0));

    // Zone union, including the cost-only zone
    let zone_names: Vec<&str> = snap.zones.iter().map(|z| z.zone.as_str()).collect();
    assert_eq!(zone_names, vec!["EAST-1", "SOUTH-3", "WEST-2"]);
    assert_eq!(output.mart.cost_only_zones, vec!["SOUTH-3".to_string()]);

    // Only operations timestamps in the hour dimension
    assert_eq!(snap.hours.len(), 2);

    let east = snap.zones.iter().find(|z| z.zone == "EAST-1").unwrap().zone_key;
    let south = snap.zones.iter().find(|z| z.zone == "SOUTH-3").unwrap().zone_key;
    let east_hourly: Vec<&ZoneHourlyFact> = snap.hourly.iter().filter(|h| h.zone_key == east).collect();
    assert_eq!(east_hourly.len(), 1);
    assert_eq!(east_hourly[0].avg_power_kw, 15.0);
    assert_eq!(east_hourly[0].incident_count, 1);
    assert_eq!(east_hourly[0].sample_count, 2);
    assert!(snap.hourly.iter().all(|h| h.zone_key != south));

    // Every hourly row is the mean over exactly its samples
    for h in &snap.hourly {
        let group: Vec<&OperationSampleFact> = snap
            .samples
            .iter()
            .filter(|s| s.time_key == h.time_key && s.zone_key == h.zone_key)
            .collect();
        assert_eq!(group.len() as i64, h.sample_count);
        let mean = group.iter().map(|s| s.power_kw).sum::<f64>() / group.len() as f64;
        assert_eq!(mean, h.avg_power_kw);
    }

    for c in &snap.costs {
        assert_eq!(c.daily_cost_usd, c.total_power_kw * c.cost_per_kw_usd);
    }
    let east_cost = snap.costs.iter().find(|c| c.zone_key == east).unwrap();
    assert_eq!(east_cost.daily_cost_usd, 12.0);
    assert_eq!(east_cost.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

    let runs = wh.runs().await;
    let stages: Vec<Stage> = runs.iter().map(|r| r.stage).collect();
    assert_eq!(stages, vec![Stage::Ingest, Stage::Clean, Stage::Mart]);
    assert!(runs.iter().all(|r| r.status == RunStatus::Ok));
    assert_eq!(runs[0].detail["source_hash"], "sha256:fixture");
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let wh = Arc::new(MemoryWarehouse::new());
    let ctx = PipelineContext::new(wh.clone());

    rebuild(&ctx, &export(), None).await.unwrap();
    let first = snapshot(wh.as_ref()).await;
    rebuild(&ctx, &export(), None).await.unwrap();
    let second = snapshot(wh.as_ref()).await;

    assert_eq!(first.zones, second.zones);
    assert_eq!(first.hours, second.hours);
    assert_eq!(first.samples, second.samples);
    assert_eq!(first.hourly, second.hourly);
    assert_eq!(first.costs, second.costs);

    let unique: HashSet<&str> = second.zones.iter().map(|z| z.zone.as_str()).collect();
    assert_eq!(unique.len(), second.zones.len());
    let unique: HashSet<NaiveDateTime> = second.hours.iter().map(|h| h.datetime).collect();
    assert_eq!(unique.len(), second.hours.len());
}

#[tokio::test]
async fn test_failed_stage_stops_the_rebuild() {
    let wh = Arc::new(MemoryWarehouse::new());
    let ctx = PipelineContext::new(wh.clone());
    rebuild(&ctx, &export(), None).await.unwrap();
    let before = snapshot(wh.as_ref()).await;

    let mut smaller = export();
    smaller.operations.truncate(1);
    wh.fail_writes_to(Table::ClnOperations).await;
    assert!(rebuild(&ctx, &smaller, None).await.is_err());

    // Ingest went through, clean failed, mart never ran
    assert_eq!(wh.count(Table::StgOperations).await.unwrap(), 1);
    assert_eq!(wh.count(Table::ClnOperations).await.unwrap(), 3);
    let after = snapshot(wh.as_ref()).await;
    assert_eq!(before.hourly, after.hourly);

    let runs = wh.runs().await;
    assert_eq!(runs.len(), 5);
    assert_eq!(runs[4].stage, Stage::Clean);
    assert_eq!(runs[4].status, RunStatus::Failed);

    wh.clear_failure().await;
    ctx.close().await;
}
