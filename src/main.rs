use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rust_stocks_metrics::{
    database_sqlx::DatabaseManagerSqlx,
    export::export_company_metrics,
    metrics::MetricCalculator,
    models::{Company, Config, PeriodType},
    pipeline::{DateRange, MetricsPipeline, PipelineConfig},
    quality::QualityFlag,
    reconciler::BalanceSheetReconciler,
    store::MetricsSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Historical financial metrics and balance-sheet reconciliation", long_about = None)]
struct Cli {
    /// SQLite database file (defaults to stocks.db)
    #[arg(long, global = true, env = "DATABASE_PATH")]
    database: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long, global = true, env = "NUM_WORKERS")]
    workers: Option<usize>,

    /// Retry attempts per store operation
    #[arg(short, long, global = true, env = "RETRY_ATTEMPTS")]
    retries: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repair balance sheets and refresh their quality scores
    Reconcile {
        /// Only this symbol
        #[arg(long)]
        symbol: Option<String>,
        /// annual or quarterly (both when omitted)
        #[arg(long, value_parser = parse_period_type)]
        period_type: Option<PeriodType>,
    },
    /// Compute and store metrics for one company as of a date
    Compute {
        #[arg(long)]
        symbol: String,
        /// Target date, YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long, value_parser = parse_period_type, default_value = "annual")]
        period_type: PeriodType,
    },
    /// Reconcile then compute metrics for every company
    Run {
        /// First metric date, YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        start_date: Option<NaiveDate>,
        /// Last metric date, YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        end_date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_period_type)]
        period_type: Option<PeriodType>,
    },
    /// Print the balance-sheet quality summary
    Report,
    /// Write a company's metric rows to CSV
    Export {
        #[arg(long)]
        symbol: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Fix inverted high/low prices and clear negative price rows
    MaintainPrices,
}

fn parse_period_type(raw: &str) -> std::result::Result<PeriodType, String> {
    raw.parse::<PeriodType>().map_err(|e| e.to_string())
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{}': {}. Expected YYYY-MM-DD", raw, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads env-backed flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rust_stocks_metrics=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(workers) = cli.workers {
        config.num_workers = workers;
    }
    if let Some(retries) = cli.retries {
        config.retry_attempts = retries;
    }

    let db = Arc::new(DatabaseManagerSqlx::new(&config.database_path).await?);
    info!("💾 Database ready at {}", config.database_path);

    match cli.command {
        Commands::Reconcile { symbol, period_type } => {
            let mut pipeline_config = PipelineConfig::from_config(&config);
            pipeline_config.compute_metrics = false;
            if let Some(period_type) = period_type {
                pipeline_config.period_types = vec![period_type];
            }
            if let Some(symbol) = symbol {
                pipeline_config.company_ids = Some(vec![find_company(&db, &symbol).await?.id]);
            }
            run_pipeline(&db, &config, pipeline_config).await?;
        }
        Commands::Compute {
            symbol,
            date,
            period_type,
        } => {
            let company = find_company(&db, &symbol).await?;
            let calculator = MetricCalculator::new(db.clone(), db.clone());
            let record = calculator.compute(company.id, date, period_type).await?;
            db.upsert_metric(&record).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Run {
            start_date,
            end_date,
            period_type,
        } => {
            let mut pipeline_config = PipelineConfig::from_config(&config);
            if let Some(period_type) = period_type {
                pipeline_config.period_types = vec![period_type];
            }
            pipeline_config.date_range = match (start_date, end_date) {
                (None, None) => None,
                (start, end) => {
                    let range = DateRange {
                        start_date: start.unwrap_or(NaiveDate::MIN),
                        end_date: end.unwrap_or_else(|| chrono::Utc::now().date_naive()),
                    };
                    if range.start_date > range.end_date {
                        return Err(anyhow!("Start date must be before end date"));
                    }
                    Some(range)
                }
            };
            run_pipeline(&db, &config, pipeline_config).await?;
        }
        Commands::Report => {
            let report = db.quality_summary(&config.quality).await?;
            info!("📋 Balance sheet quality:");
            info!("   - Records: {}", report.total_records);
            info!(
                "   - Complete: {} ({:.1}%)",
                report.complete_records,
                report.completeness() * 100.0
            );
            for flag in [
                QualityFlag::Clean,
                QualityFlag::MinorImbalance,
                QualityFlag::MajorImbalance,
                QualityFlag::MissingAssets,
                QualityFlag::MissingLiabilities,
                QualityFlag::MissingEquity,
            ] {
                info!("   - {}: {}", flag, report.count(flag));
            }
            info!("   - Overall score: {:.1}", report.overall_score());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export { symbol, output } => {
            let company = find_company(&db, &symbol).await?;
            let rows = export_company_metrics(&db, company.id, &output).await?;
            if rows == 0 {
                warn!("No metric rows stored for {}", symbol);
            }
        }
        Commands::MaintainPrices => {
            let stats = db.repair_price_history().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn find_company(db: &DatabaseManagerSqlx, symbol: &str) -> Result<Company> {
    db.get_company_by_symbol(symbol)
        .await?
        .ok_or_else(|| anyhow!("Unknown symbol: {}", symbol))
}

async fn run_pipeline(
    db: &Arc<DatabaseManagerSqlx>,
    config: &Config,
    pipeline_config: PipelineConfig,
) -> Result<()> {
    let reconciler = BalanceSheetReconciler::new(config.reconciler, config.quality);
    let pipeline = MetricsPipeline::new(
        db.clone(),
        db.clone(),
        db.clone(),
        reconciler,
        pipeline_config,
    );

    // Ctrl-C finishes the companies in flight, then stops
    let cancel = pipeline.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Cancellation requested; finishing in-flight companies");
            cancel.cancel();
        }
    });

    let report = pipeline.run().await?;

    info!("📊 Reconciliation:");
    info!("   - Balance sheets seen: {}", report.reconcile.records_seen);
    info!("   - Discarded as corrupt: {}", report.reconcile.discarded);
    info!("   - Equity repaired: {}", report.reconcile.equity_repaired);
    info!("   - Liabilities repaired: {}", report.reconcile.liabilities_repaired);
    info!("   - Remaining major imbalances: {}", report.quality.remaining_major_imbalances());
    for failure in &report.failures {
        warn!("   ❌ company {}: {}", failure.company_id, failure.error);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed > 0 {
        warn!("{} of {} companies failed", report.failed, report.total_companies);
    }
    Ok(())
}
