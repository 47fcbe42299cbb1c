//! Concurrent reconcile-and-compute batch runner
//!
//! Companies are pulled from a shared queue by a configurable number of
//! workers. Within one company every step runs in order: balance sheets are
//! reconciled and written back before any metric is computed from them.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

use crate::metrics::MetricCalculator;
use crate::models::{Company, Config, PeriodType};
use crate::quality::QualityReport;
use crate::reconciler::{BalanceSheetReconciler, ReconcileStats};
use crate::resolver::CompanyStatements;
use crate::store::{require_company, MetricsSink, PriceProvider, StatementStore};
use crate::utils::{retry_with_backoff, RetryPolicy};

/// Configuration for a batch run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_workers: usize,
    pub retry: RetryPolicy,
    pub period_types: Vec<PeriodType>,
    /// Metric dates are income period endings inside this range; all of them when `None`
    pub date_range: Option<DateRange>,
    pub reconcile: bool,
    pub compute_metrics: bool,
    /// Restrict the run to these ids instead of every known company
    pub company_ids: Option<Vec<i64>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            retry: RetryPolicy::default(),
            period_types: PeriodType::ALL.to_vec(),
            date_range: None,
            reconcile: true,
            compute_metrics: true,
            company_ids: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_workers: config.num_workers.max(1),
            retry: RetryPolicy::new(config.retry_attempts, config.retry_base_delay_ms),
            ..Self::default()
        }
    }
}

/// Date range for metric computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Progress update from worker tasks
#[derive(Debug, Clone)]
pub struct PipelineProgress {
    pub worker_id: usize,
    pub company_id: i64,
    pub status: ProgressStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
    Started,
    Completed,
    Failed(String),
}

/// What one company's pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompanyOutcome {
    pub company_id: i64,
    pub symbol: String,
    pub reconcile: ReconcileStats,
    pub quality: QualityReport,
    pub balance_writes: usize,
    pub balance_deletes: usize,
    pub metrics_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanyFailure {
    pub company_id: i64,
    pub error: String,
    pub transient: bool,
}

/// Result of a batch run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub total_companies: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Companies never started because the run was cancelled
    pub skipped: usize,
    pub reconcile: ReconcileStats,
    pub quality: QualityReport,
    pub balance_writes: usize,
    pub balance_deletes: usize,
    pub metrics_written: usize,
    pub failures: Vec<CompanyFailure>,
}

impl PipelineReport {
    fn absorb(&mut self, outcome: &CompanyOutcome) {
        self.succeeded += 1;
        self.reconcile.merge(&outcome.reconcile);
        self.quality.merge(&outcome.quality);
        self.balance_writes += outcome.balance_writes;
        self.balance_deletes += outcome.balance_deletes;
        self.metrics_written += outcome.metrics_written;
    }
}

#[derive(Clone)]
pub struct MetricsPipeline {
    store: Arc<dyn StatementStore>,
    sink: Arc<dyn MetricsSink>,
    calculator: MetricCalculator,
    reconciler: BalanceSheetReconciler,
    config: PipelineConfig,
    cancelled: Arc<AtomicBool>,
    progress: broadcast::Sender<PipelineProgress>,
}

impl MetricsPipeline {
    pub fn new(
        store: Arc<dyn StatementStore>,
        prices: Arc<dyn PriceProvider>,
        sink: Arc<dyn MetricsSink>,
        reconciler: BalanceSheetReconciler,
        config: PipelineConfig,
    ) -> Self {
        let (progress, _) = broadcast::channel(100);
        Self {
            calculator: MetricCalculator::new(store.clone(), prices),
            store,
            sink,
            reconciler,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineProgress> {
        self.progress.subscribe()
    }

    /// Stop after the companies already in flight finish
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Process every company with a pool of workers. Per-company failures are
    /// counted in the report and never abort the batch.
    pub async fn run(&self) -> Result<PipelineReport> {
        let company_ids = match &self.config.company_ids {
            Some(ids) => ids.clone(),
            None => {
                let policy = self.config.retry;
                let store = self.store.as_ref();
                retry_with_backoff(&policy, "list companies", || store.list_companies())
                    .await?
                    .into_iter()
                    .map(|c| c.id)
                    .collect()
            }
        };

        let total_companies = company_ids.len();
        let num_workers = self.config.num_workers.max(1);
        info!(
            "🚀 Starting metrics pipeline for {} companies with {} workers",
            total_companies, num_workers
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(company_ids)));
        let report = Arc::new(Mutex::new(PipelineReport {
            total_companies,
            ..PipelineReport::default()
        }));

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let pipeline = self.clone();
            let queue = Arc::clone(&queue);
            let report = Arc::clone(&report);
            handles.push(tokio::spawn(async move {
                pipeline.worker(worker_id, queue, report).await
            }));
        }

        for joined in futures::future::join_all(handles).await {
            joined?;
        }

        let mut report = report.lock().await.clone();
        report.skipped = queue.lock().await.len();

        info!("✅ Metrics pipeline completed");
        info!(
            "📊 Results: {} succeeded, {} failed, {} skipped, {} balance sheets written, {} metrics written",
            report.succeeded,
            report.failed,
            report.skipped,
            report.balance_writes,
            report.metrics_written
        );
        Ok(report)
    }

    async fn worker(
        &self,
        worker_id: usize,
        queue: Arc<Mutex<VecDeque<i64>>>,
        report: Arc<Mutex<PipelineReport>>,
    ) {
        loop {
            if self.is_cancelled() {
                debug!("Worker {} stopping: run cancelled", worker_id);
                break;
            }

            let company_id = match queue.lock().await.pop_front() {
                Some(id) => id,
                None => break,
            };

            let _ = self.progress.send(PipelineProgress {
                worker_id,
                company_id,
                status: ProgressStatus::Started,
                message: format!("Worker {}: starting company {}", worker_id, company_id),
            });

            match self.process_company(company_id).await {
                Ok(outcome) => {
                    let message = format!(
                        "✅ Worker {}: completed {} ({} balance sheets written, {} metrics)",
                        worker_id, outcome.symbol, outcome.balance_writes, outcome.metrics_written
                    );
                    info!("{}", message);
                    let _ = self.progress.send(PipelineProgress {
                        worker_id,
                        company_id,
                        status: ProgressStatus::Completed,
                        message,
                    });
                    report.lock().await.absorb(&outcome);
                }
                Err(e) => {
                    let message =
                        format!("❌ Worker {}: failed company {} - {}", worker_id, company_id, e);
                    error!("{}", message);
                    let _ = self.progress.send(PipelineProgress {
                        worker_id,
                        company_id,
                        status: ProgressStatus::Failed(e.to_string()),
                        message,
                    });
                    let mut report = report.lock().await;
                    report.failed += 1;
                    report.failures.push(CompanyFailure {
                        company_id,
                        error: e.to_string(),
                        transient: e.is_transient(),
                    });
                }
            }
        }
    }

    /// Reconcile, then compute, for one company across the configured period types
    pub async fn process_company(&self, company_id: i64) -> crate::error::Result<CompanyOutcome> {
        let policy = self.config.retry;
        let store = self.store.as_ref();

        let company: Company =
            retry_with_backoff(&policy, "get company", || require_company(store, company_id))
                .await?;

        let mut outcome = CompanyOutcome {
            company_id,
            symbol: company.symbol.clone(),
            ..CompanyOutcome::default()
        };

        for &period_type in &self.config.period_types {
            let mut statements = retry_with_backoff(&policy, "load statements", || {
                CompanyStatements::load(store, company_id, period_type)
            })
            .await?;

            if self.config.reconcile {
                statements = self.reconcile(statements, &mut outcome).await?;
            }

            if self.config.compute_metrics {
                self.compute(&statements, &mut outcome).await?;
            }
        }

        Ok(outcome)
    }

    async fn reconcile(
        &self,
        statements: CompanyStatements,
        outcome: &mut CompanyOutcome,
    ) -> crate::error::Result<CompanyStatements> {
        let policy = self.config.retry;
        let store = self.store.as_ref();
        let pass = self.reconciler.reconcile_all(statements.balance.clone());

        for sheet in &pass.discarded {
            retry_with_backoff(&policy, "delete balance sheet", || store.delete_balance(sheet))
                .await?;
            outcome.balance_deletes += 1;
        }

        for reconciled in pass.pending_writes() {
            retry_with_backoff(&policy, "upsert balance sheet", || {
                store.upsert_balance(&reconciled.sheet)
            })
            .await?;
            outcome.balance_writes += 1;
        }

        for reconciled in &pass.kept {
            outcome.quality.record(&reconciled.sheet, &reconciled.assessment);
        }
        outcome.reconcile.merge(&pass.stats);

        Ok(statements.with_balance(pass.sheets()))
    }

    async fn compute(
        &self,
        statements: &CompanyStatements,
        outcome: &mut CompanyOutcome,
    ) -> crate::error::Result<()> {
        let policy = self.config.retry;
        let calculator = &self.calculator;
        let sink = self.sink.as_ref();

        let metric_dates = match self.config.date_range {
            Some(range) => statements.income_periods_between(range.start_date, range.end_date),
            None => statements.income_periods_between(NaiveDate::MIN, NaiveDate::MAX),
        };

        for metric_date in metric_dates {
            let record = retry_with_backoff(&policy, "compute metrics", || {
                calculator.compute_from(statements, metric_date)
            })
            .await?;

            retry_with_backoff(&policy, "upsert metric", || sink.upsert_metric(&record)).await?;
            outcome.metrics_written += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BalanceSheet, CashFlowStatement, IncomeStatement};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Parks the first `get_company` call until `release` is notified
    struct GatedStore {
        inner: Arc<InMemoryStore>,
        gate_open: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedStore {
        fn new(inner: Arc<InMemoryStore>) -> Self {
            Self {
                inner,
                gate_open: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl StatementStore for GatedStore {
        async fn get_company(&self, company_id: i64) -> crate::error::Result<Option<Company>> {
            if !self.gate_open.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.get_company(company_id).await
        }

        async fn list_companies(&self) -> crate::error::Result<Vec<Company>> {
            self.inner.list_companies().await
        }

        async fn get_income_statements(
            &self,
            company_id: i64,
            period_type: PeriodType,
        ) -> crate::error::Result<Vec<IncomeStatement>> {
            self.inner.get_income_statements(company_id, period_type).await
        }

        async fn get_balance_sheets(
            &self,
            company_id: i64,
            period_type: PeriodType,
        ) -> crate::error::Result<Vec<BalanceSheet>> {
            self.inner.get_balance_sheets(company_id, period_type).await
        }

        async fn get_cash_flow_statements(
            &self,
            company_id: i64,
            period_type: PeriodType,
        ) -> crate::error::Result<Vec<CashFlowStatement>> {
            self.inner.get_cash_flow_statements(company_id, period_type).await
        }

        async fn upsert_balance(&self, sheet: &BalanceSheet) -> crate::error::Result<()> {
            self.inner.upsert_balance(sheet).await
        }

        async fn delete_balance(&self, sheet: &BalanceSheet) -> crate::error::Result<()> {
            self.inner.delete_balance(sheet).await
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn pipeline_for(store: &Arc<InMemoryStore>, config: PipelineConfig) -> MetricsPipeline {
        MetricsPipeline::new(
            store.clone(),
            store.clone(),
            store.clone(),
            BalanceSheetReconciler::default(),
            config,
        )
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.period_types, vec![PeriodType::Annual, PeriodType::Quarterly]);
        assert!(config.reconcile && config.compute_metrics);

        let from_env = PipelineConfig::from_config(&Config {
            num_workers: 0,
            ..Config::default()
        });
        assert_eq!(from_env.num_workers, 1);
        assert_eq!(from_env.retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_metrics_see_reconciled_equity() {
        let store = Arc::new(InMemoryStore::new());
        let company = store.insert_company("AAA", None).await;

        let mut sheet = BalanceSheet::new(company, date(2023, 12, 31), PeriodType::Annual);
        sheet.total_assets = Some(1_000_000.0);
        sheet.total_liabilities = Some(600_000.0);
        store.insert_balance(sheet).await;

        let mut income = IncomeStatement::new(company, date(2023, 12, 31), PeriodType::Annual);
        income.net_income = Some(40_000.0);
        store.insert_income(income).await;

        let pipeline = pipeline_for(
            &store,
            PipelineConfig {
                period_types: vec![PeriodType::Annual],
                retry: RetryPolicy::immediate(2),
                ..PipelineConfig::default()
            },
        );
        let outcome = pipeline.process_company(company).await.unwrap();
        assert_eq!(outcome.balance_writes, 1);
        assert_eq!(outcome.metrics_written, 1);

        let metric = store
            .metric(company, date(2023, 12, 31), PeriodType::Annual)
            .await
            .unwrap();
        // 40k / reconciled equity of 400k
        assert_eq!(metric.return_on_equity, Some(0.1));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_everything() {
        let store = Arc::new(InMemoryStore::new());
        for symbol in ["AAA", "BBB", "CCC"] {
            store.insert_company(symbol, None).await;
        }

        let pipeline = pipeline_for(&store, PipelineConfig::default());
        pipeline.cancel();
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.total_companies, 3);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.succeeded + report.failed, 0);
    }

    #[tokio::test]
    async fn test_progress_events_are_broadcast() {
        let store = Arc::new(InMemoryStore::new());
        let company = store.insert_company("AAA", None).await;

        let pipeline = pipeline_for(
            &store,
            PipelineConfig {
                num_workers: 1,
                ..PipelineConfig::default()
            },
        );
        let mut events = pipeline.subscribe();
        pipeline.run().await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.company_id, company);
        assert_eq!(first.status, ProgressStatus::Started);
        let second = events.recv().await.unwrap();
        assert_eq!(second.status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_finishes_in_flight_company_then_stops() {
        let inner = Arc::new(InMemoryStore::new());
        let first = inner.insert_company("AAA", None).await;
        let mut income = IncomeStatement::new(first, date(2023, 12, 31), PeriodType::Annual);
        income.total_revenue = Some(1_000.0);
        inner.insert_income(income).await;
        for symbol in ["BBB", "CCC", "DDD"] {
            inner.insert_company(symbol, None).await;
        }

        let gated = Arc::new(GatedStore::new(inner.clone()));
        let pipeline = MetricsPipeline::new(
            gated.clone(),
            inner.clone(),
            inner.clone(),
            BalanceSheetReconciler::default(),
            PipelineConfig {
                num_workers: 1,
                period_types: vec![PeriodType::Annual],
                ..PipelineConfig::default()
            },
        );

        let runner = pipeline.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        gated.entered.notified().await;
        pipeline.cancel();
        gated.release.notify_one();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.total_companies, 4);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(inner.metric_writes(), 1);
        assert!(inner
            .metric(first, date(2023, 12, 31), PeriodType::Annual)
            .await
            .is_some());
    }
}
