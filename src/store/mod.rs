//! Collaborator interfaces the engine reads from and writes to.
//!
//! The SQLite implementation lives in `database_sqlx`; `memory` holds an
//! in-process fake used by tests and dry runs.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{EngineError, Result};
use crate::models::{
    BalanceSheet, CashFlowStatement, Company, DerivedMetricRecord, IncomeStatement, PeriodType,
    PriceContext,
};

pub mod memory;

pub use memory::InMemoryStore;

/// Source of statement records. Every `get_*` returns records ordered by
/// `period_ending` ascending; an empty vector means "no data", not an error.
#[async_trait]
pub trait StatementStore: Send + Sync {
    async fn get_company(&self, company_id: i64) -> Result<Option<Company>>;

    async fn list_companies(&self) -> Result<Vec<Company>>;

    async fn get_income_statements(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<IncomeStatement>>;

    async fn get_balance_sheets(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<BalanceSheet>>;

    async fn get_cash_flow_statements(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<CashFlowStatement>>;

    /// Write back a reconciled balance sheet, including its quality annotation
    async fn upsert_balance(&self, sheet: &BalanceSheet) -> Result<()>;

    /// Remove a corrupt balance sheet
    async fn delete_balance(&self, sheet: &BalanceSheet) -> Result<()>;
}

/// Look up a company, treating a missing id as `UnknownCompany`
pub async fn require_company(store: &dyn StatementStore, company_id: i64) -> Result<Company> {
    store
        .get_company(company_id)
        .await?
        .ok_or(EngineError::UnknownCompany(company_id))
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Most recent close at or before `date`
    async fn get_price_asof(&self, company_id: i64, date: NaiveDate)
        -> Result<Option<PriceContext>>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Last write wins per (company_id, metric_date, period_type); every field is replaced
    async fn upsert_metric(&self, record: &DerivedMetricRecord) -> Result<()>;
}
