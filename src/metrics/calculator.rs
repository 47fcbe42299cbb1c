//! Derived metric calculation.
//!
//! All ratios are fractions. Missing inputs produce missing outputs; the only
//! error a computation raises is for an unknown company.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

use super::growth::{yoy_growth_in_series, YoyGrowth};
use super::safe_math::{safe_add, safe_div, safe_mul, safe_sub};
use crate::error::Result;
use crate::models::{DerivedMetricRecord, PeriodType, PriceContext};
use crate::resolver::{CompanyStatements, ResolvedStatements};
use crate::store::{require_company, PriceProvider, StatementStore};

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Builds a metric row from already-resolved inputs
pub fn derive_metrics(
    company_id: i64,
    metric_date: NaiveDate,
    period_type: PeriodType,
    statements: ResolvedStatements<'_>,
    price: Option<PriceContext>,
    growth: YoyGrowth,
) -> DerivedMetricRecord {
    let mut record = DerivedMetricRecord::new(company_id, metric_date, period_type);

    let income = statements.income;
    let balance = statements.balance;
    let cash_flow = statements.cash_flow;

    let revenue = income.and_then(|i| i.total_revenue);
    let net_income = income.and_then(|i| i.net_income);
    let equity = balance.and_then(|b| b.stockholders_equity);

    let current_price = finite(price.map(|p| p.close_price));
    let shares = finite(
        price
            .and_then(|p| p.shares_outstanding)
            .or_else(|| income.and_then(|i| i.diluted_average_shares)),
    );

    record.current_price = current_price;
    record.shares_outstanding = shares;
    record.market_cap = safe_mul(current_price, shares);
    record.enterprise_value = safe_sub(
        safe_add(record.market_cap, balance.and_then(|b| b.total_debt)),
        balance.and_then(|b| b.cash_and_cash_equivalents),
    );

    // Valuation
    let positive_eps = income.and_then(|i| i.diluted_eps).filter(|eps| *eps > 0.0);
    record.trailing_pe = safe_div(current_price, positive_eps);
    record.book_value_per_share = safe_div(equity, shares);
    record.price_to_book = safe_div(current_price, record.book_value_per_share);
    record.price_to_sales = safe_div(record.market_cap, revenue);

    // Profitability
    record.gross_margin = safe_div(income.and_then(|i| i.gross_profit), revenue);
    record.operating_margin = safe_div(income.and_then(|i| i.operating_income), revenue);
    record.profit_margin = safe_div(net_income, revenue);
    record.return_on_assets = safe_div(net_income, balance.and_then(|b| b.total_assets));
    record.return_on_equity = safe_div(net_income, equity);

    // Financial health
    record.debt_to_equity = safe_div(balance.and_then(|b| b.total_debt), equity);
    let current_liabilities = balance.and_then(|b| b.current_liabilities);
    record.current_ratio = safe_div(balance.and_then(|b| b.current_assets), current_liabilities);
    record.quick_ratio = safe_div(
        safe_sub(
            balance.and_then(|b| b.current_assets),
            balance.and_then(|b| b.inventory),
        ),
        current_liabilities,
    );

    // Cash flow
    record.operating_cashflow = finite(cash_flow.and_then(|c| c.operating_cash_flow));
    record.free_cashflow = finite(cash_flow.and_then(|c| c.free_cash_flow));
    record.fcf_per_share = safe_div(record.free_cashflow, shares);

    record.revenue_growth_yoy = finite(growth.revenue_growth);
    record.earnings_growth_yoy = finite(growth.earnings_growth);

    record
}

/// Computes metric rows from store data and price history
#[derive(Clone)]
pub struct MetricCalculator {
    store: Arc<dyn StatementStore>,
    prices: Arc<dyn PriceProvider>,
}

impl MetricCalculator {
    pub fn new(store: Arc<dyn StatementStore>, prices: Arc<dyn PriceProvider>) -> Self {
        Self { store, prices }
    }

    /// Metrics for one company as of `target_date`
    pub async fn compute(
        &self,
        company_id: i64,
        target_date: NaiveDate,
        period_type: PeriodType,
    ) -> Result<DerivedMetricRecord> {
        require_company(self.store.as_ref(), company_id).await?;
        let statements = CompanyStatements::load(self.store.as_ref(), company_id, period_type).await?;
        self.compute_from(&statements, target_date).await
    }

    /// Metrics from a preloaded series, e.g. one whose balance sheets were
    /// just reconciled. Only the price lookup touches I/O.
    pub async fn compute_from(
        &self,
        statements: &CompanyStatements,
        target_date: NaiveDate,
    ) -> Result<DerivedMetricRecord> {
        let resolved = statements.resolve(target_date);
        let price = self
            .prices
            .get_price_asof(statements.company_id, target_date)
            .await?;

        let growth = match resolved.income {
            Some(income) => {
                yoy_growth_in_series(&statements.income, income.period_ending, statements.period_type)
            }
            None => YoyGrowth::default(),
        };

        let record = derive_metrics(
            statements.company_id,
            target_date,
            statements.period_type,
            resolved,
            price,
            growth,
        );
        debug!(
            "Computed {} metrics for company {} on {} ({})",
            record.populated_fields(),
            record.company_id,
            record.metric_date,
            record.period_type
        );
        Ok(record)
    }
}
