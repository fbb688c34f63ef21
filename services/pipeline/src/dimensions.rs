//! Zone and hour dimensions with in-memory surrogate keys.
//!
//! Keys are sequential from 1 in sort order: zones by byte order of the
//! normalized identifier, hours chronologically. Identical input always
//! yields identical keys.

use chrono::{Datelike, Timelike};
use std::collections::BTreeSet;
use warehouse::{CleanCostRow, CleanOperationRow, TimeHourDim, ZoneDim};

/// Every zone seen in operations or costs, one row each.
pub fn build_zone_dimension(operations: &[CleanOperationRow], costs: &[CleanCostRow]) -> Vec<ZoneDim> {
    let zones: BTreeSet<&str> = operations
        .iter()
        .map(|r| r.zone.as_str())
        .chain(costs.iter().map(|r| r.zone.as_str()))
        .collect();

    zones
        .into_iter()
        .zip(1..)
        .map(|(zone, zone_key)| ZoneDim {
            zone_key,
            zone: zone.to_string(),
        })
        .collect()
}

/// Every distinct operations timestamp, one row each. Costs carry only a
/// date and do not contribute.
pub fn build_time_dimension(operations: &[CleanOperationRow]) -> Vec<TimeHourDim> {
    let stamps: BTreeSet<_> = operations.iter().map(|r| r.datetime).collect();

    stamps
        .into_iter()
        .zip(1..)
        .map(|(datetime, time_key)| TimeHourDim {
            time_key,
            datetime,
            date: datetime.date(),
            hour: datetime.hour() as i32,
            month: datetime.month() as i32,
            year: datetime.year(),
        })
        .collect()
}

/// Zones present in costs but never in operations.
pub fn cost_only_zones(operations: &[CleanOperationRow], costs: &[CleanCostRow]) -> Vec<String> {
    let seen: BTreeSet<&str> = operations.iter().map(|r| r.zone.as_str()).collect();
    let only: BTreeSet<&str> = costs
        .iter()
        .map(|r| r.zone.as_str())
        .filter(|z| !seen.contains(z))
        .collect();
    only.into_iter().map(str::to_string).collect()
}
