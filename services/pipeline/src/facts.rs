//! Fact tables keyed by the dimension surrogate keys.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use warehouse::{
    CleanCostRow, CleanOperationRow, EnergyCostDailyFact, OperationSampleFact, TimeHourDim,
    ZoneDim, ZoneHourlyFact,
};

/// Natural key to surrogate key, for both dimensions.
pub struct KeyLookup {
    zones: HashMap<String, i64>,
    times: HashMap<NaiveDateTime, i64>,
}

impl KeyLookup {
    pub fn new(zones: &[ZoneDim], times: &[TimeHourDim]) -> Self {
        Self {
            zones: zones.iter().map(|z| (z.zone.clone(), z.zone_key)).collect(),
            times: times.iter().map(|t| (t.datetime, t.time_key)).collect(),
        }
    }

    pub fn zone_key(&self, zone: &str) -> Option<i64> {
        self.zones.get(zone).copied()
    }

    pub fn time_key(&self, datetime: &NaiveDateTime) -> Option<i64> {
        self.times.get(datetime).copied()
    }
}

/// Source rows dropped because a key did not resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub operations: usize,
    pub costs: usize,
}

impl Unresolved {
    pub fn total(&self) -> usize {
        self.operations + self.costs
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSet {
    pub samples: Vec<OperationSampleFact>,
    pub hourly: Vec<ZoneHourlyFact>,
    pub costs: Vec<EnergyCostDailyFact>,
    pub unresolved: Unresolved,
}

pub fn build_facts(lookup: &KeyLookup, operations: &[CleanOperationRow], costs: &[CleanCostRow]) -> FactSet {
    let (samples, unresolved_operations) = build_sample_facts(lookup, operations);
    let hourly = aggregate_zone_hourly(&samples);
    let (costs, unresolved_costs) = build_cost_facts(lookup, costs);
    FactSet {
        samples,
        hourly,
        costs,
        unresolved: Unresolved {
            operations: unresolved_operations,
            costs: unresolved_costs,
        },
    }
}

/// One fact per operation row whose zone and timestamp both resolve. Returns
/// the facts and the number of rows dropped.
pub fn build_sample_facts(
    lookup: &KeyLookup,
    operations: &[CleanOperationRow],
) -> (Vec<OperationSampleFact>, usize) {
    let mut dropped = 0;
    let facts = operations
        .iter()
        .filter_map(|row| {
            let keys = lookup
                .time_key(&row.datetime)
                .zip(lookup.zone_key(&row.zone));
            if keys.is_none() {
                dropped += 1;
            }
            let (time_key, zone_key) = keys?;
            Some(OperationSampleFact {
                time_key,
                zone_key,
                rack_id: row.rack_id.clone(),
                power_kw: row.power_kw,
                temperature_c: row.temperature_c,
                utilization_pct: row.utilization_pct,
                incidents: row.incidents,
            })
        })
        .collect();
    (facts, dropped)
}

#[derive(Default)]
struct HourlyAccumulator {
    power: f64,
    temperature: f64,
    utilization: f64,
    incidents: i64,
    samples: i64,
}

/// Groups samples by (time_key, zone_key), ascending.
pub fn aggregate_zone_hourly(samples: &[OperationSampleFact]) -> Vec<ZoneHourlyFact> {
    let mut groups: BTreeMap<(i64, i64), HourlyAccumulator> = BTreeMap::new();
    for s in samples {
        let acc = groups.entry((s.time_key, s.zone_key)).or_default();
        acc.power += s.power_kw;
        acc.temperature += s.temperature_c;
        acc.utilization += s.utilization_pct;
        acc.incidents += s.incidents;
        acc.samples += 1;
    }

    groups
        .into_iter()
        .map(|((time_key, zone_key), acc)| {
            let n = acc.samples as f64;
            ZoneHourlyFact {
                time_key,
                zone_key,
                avg_power_kw: acc.power / n,
                avg_temperature_c: acc.temperature / n,
                avg_utilization_pct: acc.utilization / n,
                incident_count: acc.incidents,
                sample_count: acc.samples,
            }
        })
        .collect()
}

/// One fact per cost row whose zone resolves, with the daily cost derived.
pub fn build_cost_facts(lookup: &KeyLookup, costs: &[CleanCostRow]) -> (Vec<EnergyCostDailyFact>, usize) {
    let mut dropped = 0;
    let facts = costs
        .iter()
        .filter_map(|row| match lookup.zone_key(&row.zone) {
            Some(zone_key) => Some(EnergyCostDailyFact {
                date: row.date,
                zone_key,
                total_power_kw: row.total_power_kw,
                cost_per_kw_usd: row.cost_per_kw_usd,
                daily_cost_usd: row.total_power_kw * row.cost_per_kw_usd,
            }),
            None => {
                dropped += 1;
                None
            }
        })
        .collect();
    (facts, dropped)
}
