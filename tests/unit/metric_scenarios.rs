//! Metric and growth behaviour through the public API

use pretty_assertions::assert_eq;
use test_log::test;

use crate::common::test_data::{create_test_income_statement, date, quarter_ends};
use rust_stocks_metrics::metrics::{derive_metrics, safe_div, yoy_growth_in_series, YoyGrowth};
use rust_stocks_metrics::models::{IncomeStatement, PeriodType, PriceContext};
use rust_stocks_metrics::resolver::ResolvedStatements;

fn income_only(income: &IncomeStatement) -> ResolvedStatements<'_> {
    ResolvedStatements {
        income: Some(income),
        balance: None,
        cash_flow: None,
    }
}

#[test]
fn test_zero_revenue_and_zero_income() {
    let income = create_test_income_statement(1, date(2023, 12, 31), PeriodType::Annual, 0.0, 0.0);
    let record = derive_metrics(
        1,
        date(2023, 12, 31),
        PeriodType::Annual,
        income_only(&income),
        None,
        YoyGrowth::default(),
    );

    assert_eq!(record.profit_margin, None);
    assert_eq!(record.gross_margin, None);
    assert!(record.is_well_formed());
}

#[test]
fn test_negative_eps_guard() {
    let mut income =
        create_test_income_statement(1, date(2023, 12, 31), PeriodType::Annual, 1_000.0, -200.0);
    income.diluted_eps = Some(-2.0);

    let record = derive_metrics(
        1,
        date(2024, 1, 15),
        PeriodType::Annual,
        income_only(&income),
        Some(PriceContext {
            as_of: date(2024, 1, 12),
            close_price: 100.0,
            shares_outstanding: Some(100.0),
        }),
        YoyGrowth::default(),
    );

    assert_eq!(record.trailing_pe, None);
    assert_eq!(record.market_cap, Some(10_000.0));
    assert_eq!(record.price_to_sales, Some(10.0));
    assert_eq!(record.profit_margin, Some(-0.2));
}

#[test]
fn test_safe_div_exactness() {
    for (n, d) in [(1.0, 3.0), (-7.5, 2.5), (0.0, -4.0), (1e12, 7.0)] {
        assert_eq!(safe_div(Some(n), Some(d)), Some(n / d));
    }
    assert_eq!(safe_div(Some(1.0), Some(0.0)), None);
    assert_eq!(safe_div(None, Some(1.0)), None);
    assert_eq!(safe_div(Some(1.0), None), None);
}

#[test]
fn test_eight_quarter_alignment() {
    let series: Vec<IncomeStatement> = quarter_ends(8)
        .into_iter()
        .enumerate()
        .map(|(i, period_ending)| {
            create_test_income_statement(
                1,
                period_ending,
                PeriodType::Quarterly,
                100.0 * (i as f64 + 1.0),
                10.0 * (i as f64 + 1.0),
            )
        })
        .collect();

    let growth = yoy_growth_in_series(&series, series[7].period_ending, PeriodType::Quarterly);
    // 800 vs 400 (index 3), not 700 (index 6)
    assert_eq!(growth.revenue_growth, Some(1.0));
    assert_eq!(growth.earnings_growth, Some(1.0));

    let early = yoy_growth_in_series(&series, series[2].period_ending, PeriodType::Quarterly);
    assert_eq!(early, YoyGrowth::default());
}

#[test]
fn test_negative_base_keeps_sign() {
    let series = vec![
        create_test_income_statement(1, date(2022, 12, 31), PeriodType::Annual, 1_000.0, -400.0),
        create_test_income_statement(1, date(2023, 12, 31), PeriodType::Annual, 900.0, -100.0),
    ];
    let growth = yoy_growth_in_series(&series, date(2023, 12, 31), PeriodType::Annual);

    assert_eq!(growth.earnings_growth, Some(0.75));
    assert_eq!(growth.revenue_growth, Some(-0.1));
}
