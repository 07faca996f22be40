//! Property ETL CLI
//!
//! Loads a property records file into PostgreSQL using a field-mapping
//! spreadsheet:
//! 1. Load the mapping (the xlsx workbook, a CSV/TSV export of it, or YAML)
//! 2. Connect to the database and make sure the schema exists
//! 3. Normalize and write each record in its own transaction
//! 4. Print a summary of written and failed records
//!
//! Usage:
//!   cargo run --bin property_etl -- \
//!     --json data/properties.json \
//!     --mapping "data/Field Config.xlsx" \
//!     --env .env
//!
//!   # Validate mapping and records without touching the database
//!   cargo run --bin property_etl -- --json data/properties.json \
//!     --mapping "data/Field Config.csv" --dry-run
//!
//! Exit codes: 0 all records written, 1 some records failed, 2 fatal error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};

use property_etl::{
    load_env, load_mapping, read_records, DatabaseConfig, DatabaseManager, MappingTable,
    MemorySink, Pipeline, RecordSink, RunReport, DEFAULT_FUZZY_THRESHOLD,
};

/// Normalize property JSON into the relational property schema
#[derive(Parser, Debug)]
#[command(name = "property_etl")]
#[command(about = "Load property records into PostgreSQL using a field-mapping spreadsheet")]
struct Args {
    /// Records file: JSON array or JSON Lines
    #[arg(long)]
    json: PathBuf,

    /// Field mapping spreadsheet (xlsx/xls/ods, CSV/TSV export, or YAML)
    #[arg(long, visible_alias = "excel")]
    mapping: PathBuf,

    /// .env file with DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_NAME
    #[arg(long, default_value = ".env")]
    env: PathBuf,

    /// Resolve and validate records without writing to the database
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// Only process the first N records
    #[arg(long, short = 'l')]
    limit: Option<usize>,

    /// Jaro-Winkler similarity for fuzzy field-name matching (0 disables)
    #[arg(long, default_value_t = DEFAULT_FUZZY_THRESHOLD)]
    fuzzy_threshold: f64,

    /// Do not create missing tables before loading
    #[arg(long)]
    skip_schema: bool,

    /// Print the final report as JSON
    #[arg(long)]
    report_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    load_env(Some(&args.env));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(&args).await {
        Ok(report) => {
            if let Err(e) = print_report(&report, args.report_json) {
                eprintln!("{} {:#}", "ERROR:".red().bold(), e);
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("{} {:#}", "ERROR:".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: &Args) -> Result<RunReport> {
    let mapping = load_mapping(&args.mapping)?.with_fuzzy_threshold(Some(args.fuzzy_threshold));
    if mapping.is_empty() {
        warn!("Mapping has no usable rows; every field will be stored as an attribute");
    }

    let mut records = read_records(&args.json)?;
    if let Some(limit) = args.limit {
        records.truncate(limit);
    }
    info!("Loaded {} records from {}", records.len(), args.json.display());

    if args.dry_run {
        info!("Dry run: writing to in-memory sink");
        return Ok(load(&mapping, &records, MemorySink::new()).await);
    }

    let config = DatabaseConfig::from_env();
    let db = DatabaseManager::connect(&config).await?;
    if !args.skip_schema {
        db.ensure_schema().await?;
    }

    let report = load(&mapping, &records, db.property_repository()).await;
    db.close().await;
    Ok(report)
}

async fn load<S: RecordSink>(
    mapping: &MappingTable,
    records: &[serde_json::Value],
    sink: S,
) -> RunReport {
    let mut pipeline = Pipeline::new(mapping, sink);
    pipeline.run(records).await
}

fn print_report(report: &RunReport, as_json: bool) -> Result<()> {
    if as_json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{}", json);
        return Ok(());
    }

    println!("\n{}", "═══ Load Summary ═══".cyan().bold());
    println!("  {} {}", "Records:".cyan(), report.total);
    println!("  {} {}", "Written:".green(), report.written);
    println!(
        "  {} {}",
        "Failed: ".red(),
        if report.failed.is_empty() {
            "0".normal()
        } else {
            report.failed_count().to_string().red().bold()
        }
    );
    println!("  {} {}", "Attribute rows:".cyan(), report.attribute_rows);
    println!("  {} {}", "Demoted fields:".yellow(), report.demoted_fields);

    if !report.failed.is_empty() {
        println!("\n{}", "Failures:".red().bold());
        for failure in &report.failed {
            println!("  {} {}", "✗".red(), failure);
        }
    }
    Ok(())
}
