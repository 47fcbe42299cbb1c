//! As-of statement resolution.
//!
//! For a company, target date and period type, each statement kind resolves
//! independently to the record with the latest `period_ending <= target`.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::models::{BalanceSheet, CashFlowStatement, IncomeStatement, PeriodType, Statement};
use crate::store::{require_company, StatementStore};

/// Latest record at or before `target` with a matching period type.
///
/// Records sharing the winning `period_ending` are an integrity anomaly: it is
/// logged and the record with the highest id is chosen.
pub fn resolve_latest<S: Statement>(
    records: &[S],
    target: NaiveDate,
    period_type: PeriodType,
) -> Option<&S> {
    let latest = records
        .iter()
        .filter(|r| r.period_type() == period_type && r.period_ending() <= target)
        .map(Statement::period_ending)
        .max()?;

    let candidates: Vec<&S> = records
        .iter()
        .filter(|r| r.period_type() == period_type && r.period_ending() == latest)
        .collect();

    if candidates.len() > 1 {
        let first = candidates[0];
        let anomaly = EngineError::IntegrityAnomaly {
            kind: S::KIND,
            company_id: first.company_id(),
            period_ending: latest,
            period_type,
            count: candidates.len(),
        };
        warn!("⚠️  {}; using highest id", anomaly);
    }

    candidates.into_iter().max_by_key(|r| r.id())
}

/// The statements resolved for one target date
#[derive(Debug, Clone, Copy)]
pub struct ResolvedStatements<'a> {
    pub income: Option<&'a IncomeStatement>,
    pub balance: Option<&'a BalanceSheet>,
    pub cash_flow: Option<&'a CashFlowStatement>,
}

/// One company's statement series for a single period type, ascending by
/// `period_ending`.
#[derive(Debug, Clone)]
pub struct CompanyStatements {
    pub company_id: i64,
    pub period_type: PeriodType,
    pub income: Vec<IncomeStatement>,
    pub balance: Vec<BalanceSheet>,
    pub cash_flow: Vec<CashFlowStatement>,
}

impl CompanyStatements {
    pub async fn load(
        store: &dyn StatementStore,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Self> {
        let income = store.get_income_statements(company_id, period_type).await?;
        let balance = store.get_balance_sheets(company_id, period_type).await?;
        let cash_flow = store.get_cash_flow_statements(company_id, period_type).await?;

        Ok(Self {
            company_id,
            period_type,
            income,
            balance,
            cash_flow,
        })
    }

    /// Swap in reconciled balance sheets so later lookups see the repairs
    pub fn with_balance(mut self, balance: Vec<BalanceSheet>) -> Self {
        self.balance = balance;
        self.balance.sort_by_key(|r| (r.period_ending, r.id));
        self
    }

    pub fn resolve(&self, target: NaiveDate) -> ResolvedStatements<'_> {
        ResolvedStatements {
            income: resolve_latest(&self.income, target, self.period_type),
            balance: resolve_latest(&self.balance, target, self.period_type),
            cash_flow: resolve_latest(&self.cash_flow, target, self.period_type),
        }
    }

    /// Income period endings within `[start, end]`, deduplicated
    pub fn income_periods_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut periods: Vec<NaiveDate> = self
            .income
            .iter()
            .map(|r| r.period_ending)
            .filter(|d| *d >= start && *d <= end)
            .collect();
        periods.dedup();
        periods
    }
}

/// Store-backed resolver returning owned records. An id with no company row
/// is `UnknownCompany`, not an absent statement.
#[derive(Clone)]
pub struct PeriodAlignedResolver {
    store: Arc<dyn StatementStore>,
}

impl PeriodAlignedResolver {
    pub fn new(store: Arc<dyn StatementStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_income(
        &self,
        company_id: i64,
        target: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<IncomeStatement>> {
        require_company(self.store.as_ref(), company_id).await?;
        let records = self.store.get_income_statements(company_id, period_type).await?;
        Ok(resolve_latest(&records, target, period_type).cloned())
    }

    pub async fn resolve_balance(
        &self,
        company_id: i64,
        target: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<BalanceSheet>> {
        require_company(self.store.as_ref(), company_id).await?;
        let records = self.store.get_balance_sheets(company_id, period_type).await?;
        Ok(resolve_latest(&records, target, period_type).cloned())
    }

    pub async fn resolve_cash_flow(
        &self,
        company_id: i64,
        target: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<CashFlowStatement>> {
        require_company(self.store.as_ref(), company_id).await?;
        let records = self
            .store
            .get_cash_flow_statements(company_id, period_type)
            .await?;
        Ok(resolve_latest(&records, target, period_type).cloned())
    }
}
