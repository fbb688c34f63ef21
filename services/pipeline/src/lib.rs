//! Pipeline - facility export to dimensional warehouse
//!
//! Stages, each replacing the tables it owns:
//! - ingest: workbook sheets to `stg_*`, unmodified
//! - clean: normalize and validate into `cln_*`, rejected rows reported
//! - mart: zone/hour dimensions and the three fact tables

pub mod clean;
pub mod config;
pub mod context;
pub mod dimensions;
pub mod facts;
pub mod ingest;
pub mod mart;
pub mod rebuild;
pub mod rejects;
pub mod runs;
pub mod workbook;

pub use context::PipelineContext;
pub use rebuild::{rebuild, RebuildOutput};
