//! Common test utilities and helpers

pub mod database;

pub use database::{init_fresh_test_database, insert_sample_companies, TestDatabase};

/// Test data utilities
pub mod test_data {
    use chrono::{Months, NaiveDate};
    use rust_stocks_metrics::models::{
        BalanceSheet, CashFlowStatement, DailyPrice, IncomeStatement, PeriodType,
    };

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Balance sheet with only the three core fields set
    pub fn create_test_balance_sheet(
        company_id: i64,
        period_ending: NaiveDate,
        assets: Option<f64>,
        liabilities: Option<f64>,
        equity: Option<f64>,
    ) -> BalanceSheet {
        let mut sheet = BalanceSheet::new(company_id, period_ending, PeriodType::Annual);
        sheet.total_assets = assets;
        sheet.total_liabilities = liabilities;
        sheet.stockholders_equity = equity;
        sheet
    }

    pub fn create_test_income_statement(
        company_id: i64,
        period_ending: NaiveDate,
        period_type: PeriodType,
        revenue: f64,
        net_income: f64,
    ) -> IncomeStatement {
        let mut income = IncomeStatement::new(company_id, period_ending, period_type);
        income.total_revenue = Some(revenue);
        income.gross_profit = Some(revenue * 0.4);
        income.operating_income = Some(revenue * 0.2);
        income.net_income = Some(net_income);
        income.diluted_eps = Some(net_income / 100.0);
        income.diluted_average_shares = Some(100.0);
        income
    }

    pub fn create_test_cash_flow(
        company_id: i64,
        period_ending: NaiveDate,
        period_type: PeriodType,
    ) -> CashFlowStatement {
        let mut cash_flow = CashFlowStatement::new(company_id, period_ending, period_type);
        cash_flow.operating_cash_flow = Some(500.0);
        cash_flow.capital_expenditure = Some(-200.0);
        cash_flow.free_cash_flow = Some(300.0);
        cash_flow
    }

    pub fn create_test_daily_price(company_id: i64, date: NaiveDate, close: f64) -> DailyPrice {
        DailyPrice {
            id: None,
            company_id,
            date,
            open_price: Some(close - 1.0),
            high_price: Some(close + 2.0),
            low_price: Some(close - 2.0),
            close_price: Some(close),
            volume: Some(1_000_000),
            shares_outstanding: Some(100.0),
        }
    }

    /// Consecutive quarter ends starting at 2022-03-31
    pub fn quarter_ends(count: usize) -> Vec<NaiveDate> {
        let start = date(2022, 3, 31);
        (0..count)
            .map(|i| start + Months::new(3 * i as u32))
            .collect()
    }
}

/// Logging utilities for tests
pub mod logging {
    use std::sync::Once;
    use tracing::{debug, info};

    static INIT: Once = Once::new();

    /// Initialize test logging
    pub fn init_test_logging() {
        INIT.call_once(|| {
            // Another test harness may already have installed a subscriber
            let _ = tracing::subscriber::set_global_default(
                tracing_subscriber::fmt()
                    .with_env_filter("rust_stocks_metrics=debug,main=debug")
                    .with_test_writer()
                    .finish(),
            );
        });
    }

    /// Log test step
    pub fn log_test_step(step: &str) {
        info!("🧪 Test Step: {}", step);
    }

    /// Log test data
    pub fn log_test_data<T: std::fmt::Debug>(label: &str, data: &T) {
        debug!("📊 {}: {:?}", label, data);
    }
}
