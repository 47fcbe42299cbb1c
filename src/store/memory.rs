//! In-memory collaborator fake.
//!
//! Behaves like the SQLite store (ascending order, as-of price lookups,
//! last-write-wins metrics) and can inject failures for retry and batch tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{MetricsSink, PriceProvider, StatementStore};
use crate::error::{EngineError, Result};
use crate::models::{
    BalanceSheet, CashFlowStatement, Company, DailyPrice, DerivedMetricRecord, IncomeStatement,
    PeriodType, PriceContext, Statement,
};

type MetricKey = (i64, NaiveDate, PeriodType);

#[derive(Default)]
struct State {
    companies: BTreeMap<i64, Company>,
    income: Vec<IncomeStatement>,
    balance: Vec<BalanceSheet>,
    cash_flow: Vec<CashFlowStatement>,
    prices: Vec<DailyPrice>,
    metrics: BTreeMap<MetricKey, DerivedMetricRecord>,
    failing_companies: HashSet<i64>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    next_id: AtomicI64,
    transient_failures: AtomicU32,
    balance_writes: AtomicUsize,
    balance_deletes: AtomicUsize,
    metric_writes: AtomicUsize,
}

fn series<S: Statement + Clone>(records: &[S], company_id: i64, period_type: PeriodType) -> Vec<S> {
    let mut out: Vec<S> = records
        .iter()
        .filter(|r| r.company_id() == company_id && r.period_type() == period_type)
        .cloned()
        .collect();
    out.sort_by_key(|r| (r.period_ending(), r.id()));
    out
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn insert_company(&self, symbol: &str, name: Option<&str>) -> i64 {
        let id = self.allocate_id();
        self.state.write().await.companies.insert(
            id,
            Company {
                id,
                symbol: symbol.to_string(),
                name: name.map(str::to_string),
            },
        );
        id
    }

    /// Inserts without a uniqueness check so duplicate keys can be staged
    pub async fn insert_income(&self, mut record: IncomeStatement) -> i64 {
        let id = *record.id.get_or_insert_with(|| self.allocate_id());
        self.state.write().await.income.push(record);
        id
    }

    pub async fn insert_balance(&self, mut record: BalanceSheet) -> i64 {
        let id = *record.id.get_or_insert_with(|| self.allocate_id());
        self.state.write().await.balance.push(record);
        id
    }

    pub async fn insert_cash_flow(&self, mut record: CashFlowStatement) -> i64 {
        let id = *record.id.get_or_insert_with(|| self.allocate_id());
        self.state.write().await.cash_flow.push(record);
        id
    }

    pub async fn insert_price(&self, mut price: DailyPrice) {
        price.id.get_or_insert_with(|| self.allocate_id());
        self.state.write().await.prices.push(price);
    }

    /// The next `count` reads fail with a transient error
    pub fn fail_next_reads(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Every read for `company_id` fails with a transient error
    pub async fn fail_company(&self, company_id: i64) {
        self.state.write().await.failing_companies.insert(company_id);
    }

    pub async fn balance_sheets(&self) -> Vec<BalanceSheet> {
        self.state.read().await.balance.clone()
    }

    pub async fn metric(
        &self,
        company_id: i64,
        metric_date: NaiveDate,
        period_type: PeriodType,
    ) -> Option<DerivedMetricRecord> {
        self.state
            .read()
            .await
            .metrics
            .get(&(company_id, metric_date, period_type))
            .cloned()
    }

    pub async fn metrics(&self) -> Vec<DerivedMetricRecord> {
        self.state.read().await.metrics.values().cloned().collect()
    }

    pub fn balance_writes(&self) -> usize {
        self.balance_writes.load(Ordering::SeqCst)
    }

    pub fn balance_deletes(&self) -> usize {
        self.balance_deletes.load(Ordering::SeqCst)
    }

    pub fn metric_writes(&self) -> usize {
        self.metric_writes.load(Ordering::SeqCst)
    }

    async fn check_read(&self, operation: &str, company_id: i64) -> Result<()> {
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.state.read().await.failing_companies.contains(&company_id) {
            return Err(EngineError::transient(
                operation,
                format!("simulated failure for company {}", company_id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StatementStore for InMemoryStore {
    async fn get_company(&self, company_id: i64) -> Result<Option<Company>> {
        self.check_read("get_company", company_id).await?;
        Ok(self.state.read().await.companies.get(&company_id).cloned())
    }

    async fn list_companies(&self) -> Result<Vec<Company>> {
        let mut companies: Vec<Company> =
            self.state.read().await.companies.values().cloned().collect();
        companies.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(companies)
    }

    async fn get_income_statements(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<IncomeStatement>> {
        self.check_read("get_income_statements", company_id).await?;
        Ok(series(&self.state.read().await.income, company_id, period_type))
    }

    async fn get_balance_sheets(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<BalanceSheet>> {
        self.check_read("get_balance_sheets", company_id).await?;
        Ok(series(&self.state.read().await.balance, company_id, period_type))
    }

    async fn get_cash_flow_statements(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<CashFlowStatement>> {
        self.check_read("get_cash_flow_statements", company_id).await?;
        Ok(series(&self.state.read().await.cash_flow, company_id, period_type))
    }

    async fn upsert_balance(&self, sheet: &BalanceSheet) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state.balance.iter().position(|r| match sheet.id {
            Some(id) => r.id == Some(id),
            None => {
                r.company_id == sheet.company_id
                    && r.period_ending == sheet.period_ending
                    && r.period_type == sheet.period_type
            }
        });
        match existing {
            Some(index) => {
                let id = state.balance[index].id;
                state.balance[index] = sheet.clone();
                state.balance[index].id = id;
            }
            None => {
                let mut inserted = sheet.clone();
                inserted.id.get_or_insert_with(|| self.allocate_id());
                state.balance.push(inserted);
            }
        }
        self.balance_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_balance(&self, sheet: &BalanceSheet) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.balance.len();
        state.balance.retain(|r| match sheet.id {
            Some(id) => r.id != Some(id),
            None => {
                !(r.company_id == sheet.company_id
                    && r.period_ending == sheet.period_ending
                    && r.period_type == sheet.period_type)
            }
        });
        if state.balance.len() != before {
            self.balance_deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl PriceProvider for InMemoryStore {
    async fn get_price_asof(
        &self,
        company_id: i64,
        date: NaiveDate,
    ) -> Result<Option<PriceContext>> {
        self.check_read("get_price_asof", company_id).await?;
        let state = self.state.read().await;
        let latest = state
            .prices
            .iter()
            .filter(|p| p.company_id == company_id && p.date <= date)
            .filter_map(|p| p.close_price.map(|close| (p, close)))
            .max_by_key(|(p, _)| (p.date, p.id));

        Ok(latest.map(|(p, close)| PriceContext {
            as_of: p.date,
            close_price: close,
            shares_outstanding: p.shares_outstanding,
        }))
    }
}

#[async_trait]
impl MetricsSink for InMemoryStore {
    async fn upsert_metric(&self, record: &DerivedMetricRecord) -> Result<()> {
        let key = (record.company_id, record.metric_date, record.period_type);
        self.state.write().await.metrics.insert(key, record.clone());
        self.metric_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
