//! Tabulon Repartition Binary
//!
//! One-shot monthly repartitioning of a table.

use tabulon::config::ComponentFactory;
use tabulon::lifecycle::PartitionManager;
use tabulon::planner::{parse_target_date, RepartitionPlanner, DEFAULT_PARTITION_COUNT};
use tabulon::retry::SaveOrchestrator;
use tabulon::telemetry::Telemetry;
use tabulon::Error;

use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

/// Tabulon Repartition
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database to repartition (defaults to TABULAR_DATABASE)
    #[arg(long)]
    database: Option<String>,

    /// Table to repartition
    #[arg(long)]
    table: String,

    /// Number of monthly partitions
    #[arg(long, default_value_t = DEFAULT_PARTITION_COUNT)]
    count: u32,

    /// Newest month to cover, e.g. 2024-03-15 (default: today)
    #[arg(long)]
    date: Option<String>,

    /// Print the plan without creating anything
    #[arg(long)]
    dry_run: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("tabulon-repartition", &args.log_level)?;

    let config = ComponentFactory::service_config_from_env()?;
    let engine = ComponentFactory::create_engine(&config.engine)?;
    let manager = PartitionManager::new(
        engine,
        config.engine.clone(),
        SaveOrchestrator::new(config.retry),
    );
    let templates = Arc::new(ComponentFactory::load_query_templates(
        config.query_templates_file.as_deref(),
    )?);

    let mut planner = RepartitionPlanner::new(manager, templates);
    if let Some(database) = &args.database {
        planner = planner.for_database(database);
    }

    let target = match args.date.as_deref() {
        Some(raw) => {
            let parsed = parse_target_date(raw);
            if parsed.is_none() {
                warn!(date = raw, "Unparsable target date, using today");
            }
            parsed
        }
        None => None,
    };

    if args.dry_run {
        let target = target.unwrap_or_else(|| chrono::Utc::now().date_naive());
        let specs = planner.plan_monthly(&args.table, target, args.count)?;
        for spec in &specs {
            println!("{}\t{}", spec.partition_name, spec.source_query);
        }
        return Ok(());
    }

    let report = planner
        .repartition_monthly(&args.table, target, Some(args.count))
        .await?;
    if report.outcome.template_missing {
        return Err(Error::NotFound(format!("template partition for table '{}'", args.table)).into());
    }

    info!(
        table = %report.table,
        target_date = %report.target_date,
        created = report.outcome.created.len(),
        skipped = report.outcome.skipped.len(),
        "Repartition complete"
    );

    Ok(())
}
