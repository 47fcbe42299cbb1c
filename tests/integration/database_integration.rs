//! End-to-end runs against a real SQLite file

use pretty_assertions::assert_eq;

use crate::common::{database, logging, test_data};
use rust_stocks_metrics::export::export_company_metrics;
use rust_stocks_metrics::models::PeriodType;
use rust_stocks_metrics::pipeline::{DateRange, MetricsPipeline, PipelineConfig};
use rust_stocks_metrics::quality::{QualityFlag, QualityThresholds};
use rust_stocks_metrics::reconciler::BalanceSheetReconciler;
use rust_stocks_metrics::store::StatementStore;
use rust_stocks_metrics::utils::RetryPolicy;

fn annual_config() -> PipelineConfig {
    PipelineConfig {
        num_workers: 2,
        retry: RetryPolicy::immediate(2),
        period_types: vec![PeriodType::Annual],
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_full_reconcile_and_compute_workflow() {
    logging::init_test_logging();
    logging::log_test_step("Seeding three companies");

    let test_db = database::init_fresh_test_database().await.unwrap();
    let db = test_db.db.clone();
    let ids = database::insert_sample_companies(&db).await.unwrap();

    for (i, company_id) in ids.iter().copied().enumerate() {
        for (year, revenue) in [(2022, 1_000.0), (2023, 1_200.0)] {
            let period_ending = test_data::date(year, 12, 31);
            db.insert_income_statement(&test_data::create_test_income_statement(
                company_id,
                period_ending,
                PeriodType::Annual,
                revenue,
                revenue / 10.0,
            ))
            .await
            .unwrap();
            db.insert_cash_flow_statement(&test_data::create_test_cash_flow(
                company_id,
                period_ending,
                PeriodType::Annual,
            ))
            .await
            .unwrap();

            // The first company is missing equity every year
            let equity = if i == 0 { None } else { Some(400_000.0) };
            db.insert_balance_sheet(&test_data::create_test_balance_sheet(
                company_id,
                period_ending,
                Some(1_000_000.0),
                Some(600_000.0),
                equity,
            ))
            .await
            .unwrap();
        }
        db.insert_daily_price(&test_data::create_test_daily_price(
            company_id,
            test_data::date(2023, 12, 29),
            50.0,
        ))
        .await
        .unwrap();
    }

    // A corrupt record that must be discarded
    db.insert_balance_sheet(&test_data::create_test_balance_sheet(
        ids[1],
        test_data::date(2021, 12, 31),
        Some(-5.0),
        None,
        None,
    ))
    .await
    .unwrap();

    logging::log_test_step("First run");
    let pipeline = MetricsPipeline::new(
        db.clone(),
        db.clone(),
        db.clone(),
        BalanceSheetReconciler::default(),
        annual_config(),
    );
    let first = pipeline.run().await.unwrap();
    logging::log_test_data("first run", &first);

    assert_eq!(first.succeeded, 3);
    assert_eq!(first.failed, 0);
    assert_eq!(first.reconcile.discarded, 1);
    assert_eq!(first.reconcile.equity_repaired, 2);
    assert_eq!(first.balance_writes, 6);
    assert_eq!(first.metrics_written, 6);
    assert_eq!(first.quality.count(QualityFlag::Clean), 6);

    let sheets = db.get_balance_sheets(ids[0], PeriodType::Annual).await.unwrap();
    assert!(sheets.iter().all(|s| s.stockholders_equity == Some(400_000.0)));
    assert!(db
        .get_balance_sheets(ids[1], PeriodType::Annual)
        .await
        .unwrap()
        .iter()
        .all(|s| s.total_assets >= Some(0.0)));

    let metric = db
        .get_metric(ids[0], test_data::date(2023, 12, 31), PeriodType::Annual)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metric.current_price, Some(50.0));
    assert_eq!(metric.revenue_growth_yoy, Some(0.2));
    assert_eq!(metric.return_on_equity, Some(0.0003));
    assert!(metric.is_well_formed());

    logging::log_test_step("Second run is a no-op for balance sheets");
    let second = pipeline.run().await.unwrap();
    assert_eq!(second.balance_writes, 0);
    assert_eq!(second.balance_deletes, 0);
    assert_eq!(second.metrics_written, 6);
    assert_eq!(db.count_metrics().await.unwrap(), 6);

    let report = db.quality_summary(&QualityThresholds::default()).await.unwrap();
    assert_eq!(report.total_records, 6);
    assert_eq!(report.overall_score(), 100.0);

    logging::log_test_step("Export");
    let out = tempfile::NamedTempFile::new().unwrap();
    let rows = export_company_metrics(&db, ids[0], out.path()).await.unwrap();
    assert_eq!(rows, 2);
    let text = std::fs::read_to_string(out.path()).unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[tokio::test]
async fn test_date_range_limits_metric_dates() {
    let test_db = database::init_fresh_test_database().await.unwrap();
    let db = test_db.db.clone();
    let company = db.upsert_company("RANGE", None).await.unwrap();

    for year in 2019..=2023 {
        db.insert_income_statement(&test_data::create_test_income_statement(
            company,
            test_data::date(year, 12, 31),
            PeriodType::Annual,
            1_000.0,
            100.0,
        ))
        .await
        .unwrap();
    }

    let pipeline = MetricsPipeline::new(
        db.clone(),
        db.clone(),
        db.clone(),
        BalanceSheetReconciler::default(),
        PipelineConfig {
            date_range: Some(DateRange {
                start_date: test_data::date(2021, 1, 1),
                end_date: test_data::date(2022, 12, 31),
            }),
            ..annual_config()
        },
    );
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.metrics_written, 2);
    let dates: Vec<_> = db
        .get_metrics_for_company(company)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.metric_date)
        .collect();
    assert_eq!(dates, vec![test_data::date(2021, 12, 31), test_data::date(2022, 12, 31)]);
}
