//! Rows turned away by cleaning, and why.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use warehouse::{RawCostRow, RawOperationRow, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    /// NULL, NaN, or an identifier that is blank after trimming.
    MissingField(&'static str),
    NegativePower,
    UtilizationOutOfRange,
    InvalidIncidentFlag,
    NegativeTotalPower,
    NonPositiveCostRate,
}

impl RejectReason {
    pub fn code(&self) -> String {
        match self {
            RejectReason::MissingField(field) => format!("missing_field:{}", field),
            RejectReason::NegativePower => "negative_power".to_string(),
            RejectReason::UtilizationOutOfRange => "utilization_out_of_range".to_string(),
            RejectReason::InvalidIncidentFlag => "invalid_incident_flag".to_string(),
            RejectReason::NegativeTotalPower => "negative_total_power".to_string(),
            RejectReason::NonPositiveCostRate => "non_positive_cost_rate".to_string(),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RejectedRow {
    Operation(RawOperationRow),
    Cost(RawCostRow),
}

/// One staged row that did not make it into the clean tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub source: Table,
    /// 1-based position of the row in the order its staging table was read.
    /// PostgreSQL returns heap order, which is not guaranteed to match the
    /// workbook once the table has seen updates.
    pub row_number: usize,
    pub reason: RejectReason,
    pub row: RejectedRow,
}

/// The rejections of one cleaning run. Iterating consumes them.
#[derive(Debug, Default)]
pub struct Rejections {
    inner: std::vec::IntoIter<Rejected>,
}

impl Rejections {
    pub fn new(rejected: Vec<Rejected>) -> Self {
        Self {
            inner: rejected.into_iter(),
        }
    }

    /// Remaining rejections per reason code.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in self.inner.as_slice() {
            *counts.entry(r.reason.code()).or_insert(0) += 1;
        }
        counts
    }

    /// Writes the remaining rejections as CSV without consuming them.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["source", "row_number", "reason", "row"])?;
        let mut written = 0;
        for r in self.inner.as_slice() {
            let row = serde_json::to_string(&r.row).context("Failed to serialize rejected row")?;
            wtr.write_record([
                r.source.name().to_string(),
                r.row_number.to_string(),
                r.reason.code(),
                row,
            ])?;
            written += 1;
        }
        wtr.flush()?;
        Ok(written)
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<usize> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create rejects file {}", path.display()))?;
        self.write_csv(file)
    }
}

impl Iterator for Rejections {
    type Item = Rejected;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Rejections {}
