//! Year-over-year growth.
//!
//! The comparison period is found by position, not by calendar: one record
//! back for annual series, four records back for quarterly series.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use super::safe_math::{safe_div, safe_sub};
use crate::error::Result;
use crate::models::{IncomeStatement, PeriodType};
use crate::store::{require_company, StatementStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct YoyGrowth {
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
}

/// `(current - previous) / |previous|`
pub fn growth_rate(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    safe_div(safe_sub(current, previous), previous.map(f64::abs))
}

/// Growth for `period_ending` within an ascending income series.
///
/// Absent when the period is not in the series or has fewer than
/// `period_type.yoy_lag()` predecessors.
pub fn yoy_growth_in_series(
    series: &[IncomeStatement],
    period_ending: NaiveDate,
    period_type: PeriodType,
) -> YoyGrowth {
    // One entry per period_ending; duplicates keep the highest id
    let mut periods: Vec<&IncomeStatement> = Vec::with_capacity(series.len());
    for record in series.iter().filter(|r| r.period_type == period_type) {
        match periods.last_mut() {
            Some(last) if last.period_ending == record.period_ending => {
                if record.id > last.id {
                    *last = record;
                }
            }
            _ => periods.push(record),
        }
    }

    let lag = period_type.yoy_lag();
    let current_index = match periods.iter().position(|r| r.period_ending == period_ending) {
        Some(index) if index >= lag => index,
        _ => return YoyGrowth::default(),
    };
    let current = periods[current_index];
    let previous = periods[current_index - lag];

    YoyGrowth {
        revenue_growth: growth_rate(current.total_revenue, previous.total_revenue),
        earnings_growth: growth_rate(current.net_income, previous.net_income),
    }
}

pub struct GrowthCalculator {
    store: Arc<dyn StatementStore>,
}

impl GrowthCalculator {
    pub fn new(store: Arc<dyn StatementStore>) -> Self {
        Self { store }
    }

    pub async fn yoy_growth(
        &self,
        company_id: i64,
        current_period_ending: NaiveDate,
        period_type: PeriodType,
    ) -> Result<YoyGrowth> {
        require_company(self.store.as_ref(), company_id).await?;
        let series = self
            .store
            .get_income_statements(company_id, period_type)
            .await?;
        Ok(yoy_growth_in_series(&series, current_period_ending, period_type))
    }
}
