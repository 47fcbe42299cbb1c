//! Batch behaviour against the in-memory store: retries, isolation, alignment

use pretty_assertions::assert_eq;
use std::sync::Arc;

use crate::common::{logging, test_data};
use rust_stocks_metrics::models::PeriodType;
use rust_stocks_metrics::pipeline::{MetricsPipeline, PipelineConfig};
use rust_stocks_metrics::reconciler::BalanceSheetReconciler;
use rust_stocks_metrics::store::InMemoryStore;
use rust_stocks_metrics::utils::RetryPolicy;

fn pipeline(store: &Arc<InMemoryStore>, config: PipelineConfig) -> MetricsPipeline {
    MetricsPipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        BalanceSheetReconciler::default(),
        config,
    )
}

async fn seed_annual_company(store: &InMemoryStore, symbol: &str) -> i64 {
    let company = store.insert_company(symbol, None).await;
    store
        .insert_income(test_data::create_test_income_statement(
            company,
            test_data::date(2023, 12, 31),
            PeriodType::Annual,
            1_000.0,
            100.0,
        ))
        .await;
    store
        .insert_balance(test_data::create_test_balance_sheet(
            company,
            test_data::date(2023, 12, 31),
            Some(1_000_000.0),
            Some(600_000.0),
            Some(400_000.0),
        ))
        .await;
    company
}

fn annual(workers: usize, attempts: u32) -> PipelineConfig {
    PipelineConfig {
        num_workers: workers,
        retry: RetryPolicy::immediate(attempts),
        period_types: vec![PeriodType::Annual],
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_transient_reads_are_retried() {
    logging::init_test_logging();
    let store = Arc::new(InMemoryStore::new());
    let company = seed_annual_company(&store, "AAA").await;

    store.fail_next_reads(2);
    let report = pipeline(&store, annual(1, 3)).run().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert!(store
        .metric(company, test_data::date(2023, 12, 31), PeriodType::Annual)
        .await
        .is_some());
}

#[tokio::test]
async fn test_failing_company_does_not_block_others() {
    logging::init_test_logging();
    let store = Arc::new(InMemoryStore::new());
    let good_a = seed_annual_company(&store, "AAA").await;
    let broken = seed_annual_company(&store, "BBB").await;
    let good_c = seed_annual_company(&store, "CCC").await;
    store.fail_company(broken).await;

    let report = pipeline(&store, annual(2, 2)).run().await.unwrap();
    logging::log_test_data("report", &report);

    assert_eq!(report.total_companies, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].company_id, broken);
    assert!(report.failures[0].transient);

    let mut computed: Vec<i64> = store.metrics().await.iter().map(|m| m.company_id).collect();
    computed.sort_unstable();
    assert_eq!(computed, vec![good_a, good_c]);
}

#[tokio::test]
async fn test_unknown_company_is_a_permanent_failure() {
    let store = Arc::new(InMemoryStore::new());
    let company = seed_annual_company(&store, "AAA").await;

    let report = pipeline(
        &store,
        PipelineConfig {
            company_ids: Some(vec![company, 9_999]),
            ..annual(1, 3)
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].company_id, 9_999);
    assert!(!report.failures[0].transient);
}

#[tokio::test]
async fn test_quarterly_growth_uses_same_quarter_last_year() {
    logging::init_test_logging();
    let store = Arc::new(InMemoryStore::new());
    let company = store.insert_company("QTR", None).await;

    let quarters = test_data::quarter_ends(8);
    for (i, period_ending) in quarters.iter().copied().enumerate() {
        let scale = i as f64 + 1.0;
        store
            .insert_income(test_data::create_test_income_statement(
                company,
                period_ending,
                PeriodType::Quarterly,
                100.0 * scale,
                10.0 * scale,
            ))
            .await;
    }
    store
        .insert_price(test_data::create_test_daily_price(
            company,
            test_data::date(2023, 12, 29),
            20.0,
        ))
        .await;

    let report = pipeline(
        &store,
        PipelineConfig {
            period_types: vec![PeriodType::Quarterly],
            ..annual(1, 1)
        },
    )
    .run()
    .await
    .unwrap();
    assert_eq!(report.metrics_written, 8);

    let last = store
        .metric(company, quarters[7], PeriodType::Quarterly)
        .await
        .unwrap();
    assert_eq!(last.revenue_growth_yoy, Some(1.0));
    assert_eq!(last.current_price, Some(20.0));
    // 20 * 100 shares / 800 revenue
    assert_eq!(last.price_to_sales, Some(2.5));

    let fifth = store
        .metric(company, quarters[4], PeriodType::Quarterly)
        .await
        .unwrap();
    assert_eq!(fifth.revenue_growth_yoy, Some(4.0));

    let fourth = store
        .metric(company, quarters[3], PeriodType::Quarterly)
        .await
        .unwrap();
    assert_eq!(fourth.revenue_growth_yoy, None);
    assert_eq!(fourth.current_price, None);
}
