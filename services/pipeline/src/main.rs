//! Pipeline CLI - rebuilds the facility warehouse from a workbook export
//!
//! Every command opens one warehouse connection, runs, and closes it again
//! whatever the outcome. The workbook is parsed before connecting so a bad
//! export never touches the database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use warehouse::telemetry::init_tracing;
use warehouse::{MemoryWarehouse, PgWarehouse, Table, WarehouseConfig};

use pipeline::config::PipelineConfig;
use pipeline::workbook::{read_workbook, SourceExport};
use pipeline::{clean, ingest, mart, rebuild, PipelineContext};

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Loads facility telemetry into the warehouse")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the staging tables with the workbook contents
    Ingest {
        /// Workbook path (overrides SOURCE_WORKBOOK)
        #[arg(long)]
        workbook: Option<PathBuf>,

        /// Dry run - parse only, don't touch the database
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Rebuild the clean tables from staging
    Clean {
        /// Write rejected rows to this CSV file
        #[arg(long)]
        rejects: Option<PathBuf>,

        /// Dry run - validate and report, don't save
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Rebuild dimensions and facts from the clean tables
    Mart,
    /// Ingest, clean and mart in order
    Run {
        #[arg(long)]
        workbook: Option<PathBuf>,

        #[arg(long)]
        rejects: Option<PathBuf>,
    },
    /// Create any missing warehouse tables
    InitSchema,
    /// Print the row count of every warehouse table
    Status,
}

impl Command {
    /// Dry runs leave the database untouched, schema included.
    fn prepares_schema(&self) -> bool {
        !matches!(
            self,
            Command::Ingest { dry_run: true, .. } | Command::Clean { dry_run: true, .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = PipelineConfig::from_env()?;

    println!("=== Facility Warehouse Pipeline ===");

    let prepare_schema = args.command.prepares_schema();

    match args.command {
        Command::Ingest { workbook, dry_run } => {
            let config = config.with_workbook(workbook);
            let export = load_export(&config)?;
            let ctx = if dry_run {
                PipelineContext::new(MemoryWarehouse::new()).with_dry_run(true)
            } else {
                connect(prepare_schema).await?
            };
            let result = ingest::run(&ctx, &export).await;
            ctx.close().await;
            print_ingest(&result?);
        }
        Command::Clean { rejects, dry_run } => {
            let ctx = connect(prepare_schema).await?.with_dry_run(dry_run);
            let result = clean::run(&ctx, rejects.as_deref()).await;
            ctx.close().await;
            let output = result?;
            print_clean(&output.report, rejects.as_deref());
        }
        Command::Mart => {
            let ctx = connect(prepare_schema).await?;
            let result = mart::run(&ctx).await;
            ctx.close().await;
            print_mart(&result?);
        }
        Command::Run { workbook, rejects } => {
            let config = config.with_workbook(workbook);
            let export = load_export(&config)?;
            let ctx = connect(prepare_schema).await?;
            let result = rebuild(&ctx, &export, rejects.as_deref()).await;
            ctx.close().await;
            let output = result?;
            print_ingest(&output.ingest);
            print_clean(&output.clean.report, rejects.as_deref());
            print_mart(&output.mart);
        }
        Command::InitSchema => {
            // connect() ensures the schema for every non-dry command
            let ctx = connect(prepare_schema).await?;
            ctx.close().await;
            println!("Schema ready.");
        }
        Command::Status => {
            let ctx = connect(prepare_schema).await?;
            let result = print_status(&ctx).await;
            ctx.close().await;
            result?;
        }
    }

    Ok(())
}

fn load_export(config: &PipelineConfig) -> Result<SourceExport> {
    println!("Workbook: {}", config.workbook.display());
    read_workbook(&config.workbook, &config.operations_sheet, &config.costs_sheet)
}

/// Opens the warehouse, creating any missing tables when `prepare_schema` is set.
async fn connect(prepare_schema: bool) -> Result<PipelineContext> {
    let config = WarehouseConfig::from_env()?;
    let warehouse = PgWarehouse::connect(&config)
        .await
        .context("Failed to connect to database")?;
    if prepare_schema {
        if let Err(e) = warehouse.ensure_schema().await {
            warehouse.pool().close().await;
            return Err(e).context("Failed to prepare warehouse schema");
        }
    }
    info!(batch_size = config.load_batch_size, "warehouse ready");
    Ok(PipelineContext::new(warehouse))
}

async fn print_status(ctx: &PipelineContext) -> Result<()> {
    println!("{:<28} {:>10}", "table", "rows");
    for table in Table::ALL {
        let rows = ctx
            .warehouse()
            .count(table)
            .await
            .with_context(|| format!("Failed to count {}", table))?;
        println!("{:<28} {:>10}", table.name(), rows);
    }
    Ok(())
}

fn print_ingest(report: &ingest::IngestReport) {
    println!("\n--- ingest{} ---", if report.dry_run { " (dry run)" } else { "" });
    println!("Staged operations: {}", report.staged_operations);
    println!("Staged costs:      {}", report.staged_costs);
    if let Some(hash) = &report.source_hash {
        println!("Source hash:       {}", hash);
    }
}

fn print_clean(report: &clean::CleanReport, rejects: Option<&Path>) {
    println!("\n--- clean{} ---", if report.dry_run { " (dry run)" } else { "" });
    println!(
        "Operations: {} staged, {} clean",
        report.staged_operations, report.clean_operations
    );
    println!("Costs:      {} staged, {} clean", report.staged_costs, report.clean_costs);
    for (reason, count) in &report.rejected {
        println!("  rejected {:<32} {}", reason, count);
    }
    if let Some(path) = rejects {
        println!("Rejected rows written to {}", path.display());
    }
}

fn print_mart(report: &mart::MartReport) {
    println!("\n--- mart ---");
    println!("dim_zone:                {}", report.zones);
    println!("dim_time_hour:           {}", report.hours);
    println!("fact_operations_sampled: {}", report.sample_facts);
    println!("fact_zone_hourly:        {}", report.hourly_facts);
    println!("fact_energy_cost_daily:  {}", report.cost_facts);
    if report.unresolved.total() > 0 {
        println!(
            "Unresolved rows dropped: {} operations, {} costs",
            report.unresolved.operations, report.unresolved.costs
        );
    }
    if !report.cost_only_zones.is_empty() {
        println!("Zones with costs only:   {}", report.cost_only_zones.join(", "));
    }
}
