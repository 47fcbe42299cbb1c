use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::models::{
    BalanceSheet, CashFlowStatement, Company, DailyPrice, DerivedMetricRecord, IncomeStatement,
    PeriodType, PriceContext,
};
use crate::quality::{assess, QualityAssessment, QualityReport, QualityThresholds};
use crate::store::{MetricsSink, PriceProvider, StatementStore};

/// Counts from a price-history maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriceRepairStats {
    pub swapped_high_low: u64,
    pub nulled_negative: u64,
}

/// SQLX-based store for statements, prices and derived metrics
#[derive(Clone)]
pub struct DatabaseManagerSqlx {
    pool: SqlitePool,
}

impl DatabaseManagerSqlx {
    /// Open (or create) the database file and make sure the schema exists
    pub async fn new(database_path: &str) -> Result<Self> {
        let path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        info!("🗄️  Connecting to database: {}", path);

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT UNIQUE NOT NULL,
                name TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS income_statements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                period_ending DATE NOT NULL,
                period_type TEXT NOT NULL,
                total_revenue REAL,
                cost_of_revenue REAL,
                gross_profit REAL,
                operating_income REAL,
                ebitda REAL,
                net_income REAL,
                diluted_eps REAL,
                basic_eps REAL,
                diluted_average_shares REAL,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, period_ending, period_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance_sheets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                period_ending DATE NOT NULL,
                period_type TEXT NOT NULL,
                total_assets REAL,
                total_liabilities REAL,
                stockholders_equity REAL,
                current_assets REAL,
                current_liabilities REAL,
                working_capital REAL,
                cash_and_cash_equivalents REAL,
                inventory REAL,
                short_term_debt REAL,
                long_term_debt REAL,
                total_debt REAL,
                minority_interest REAL,
                common_stock_equity REAL,
                data_quality_score INTEGER,
                quality_flags TEXT,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, period_ending, period_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cash_flow_statements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                period_ending DATE NOT NULL,
                period_type TEXT NOT NULL,
                operating_cash_flow REAL,
                investing_cash_flow REAL,
                financing_cash_flow REAL,
                capital_expenditure REAL,
                free_cash_flow REAL,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, period_ending, period_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                date DATE NOT NULL,
                open_price REAL,
                high_price REAL,
                low_price REAL,
                close_price REAL,
                volume INTEGER,
                shares_outstanding REAL,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_company_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                metric_date DATE NOT NULL,
                period_type TEXT NOT NULL,
                current_price REAL,
                shares_outstanding REAL,
                market_cap REAL,
                enterprise_value REAL,
                trailing_pe REAL,
                price_to_book REAL,
                price_to_sales REAL,
                gross_margin REAL,
                operating_margin REAL,
                profit_margin REAL,
                return_on_assets REAL,
                return_on_equity REAL,
                revenue_growth_yoy REAL,
                earnings_growth_yoy REAL,
                debt_to_equity REAL,
                current_ratio REAL,
                quick_ratio REAL,
                operating_cashflow REAL,
                free_cashflow REAL,
                fcf_per_share REAL,
                book_value_per_share REAL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (company_id) REFERENCES companies(id),
                UNIQUE(company_id, metric_date, period_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_daily_prices_company_date ON daily_prices(company_id, date)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Schema ready");
        Ok(())
    }

    /// Insert or update a company by symbol, returning its id
    pub async fn upsert_company(&self, symbol: &str, name: Option<&str>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO companies (symbol, name)
            VALUES (?, ?)
            ON CONFLICT(symbol) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(symbol)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    pub async fn get_company_by_symbol(&self, symbol: &str) -> Result<Option<Company>> {
        let row = sqlx::query("SELECT id, symbol, name FROM companies WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| company_from_row(&r)))
    }

    pub async fn insert_income_statement(&self, record: &IncomeStatement) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO income_statements (
                company_id, period_ending, period_type, total_revenue, cost_of_revenue,
                gross_profit, operating_income, ebitda, net_income, diluted_eps, basic_eps,
                diluted_average_shares
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company_id, period_ending, period_type) DO UPDATE SET
                total_revenue = excluded.total_revenue,
                cost_of_revenue = excluded.cost_of_revenue,
                gross_profit = excluded.gross_profit,
                operating_income = excluded.operating_income,
                ebitda = excluded.ebitda,
                net_income = excluded.net_income,
                diluted_eps = excluded.diluted_eps,
                basic_eps = excluded.basic_eps,
                diluted_average_shares = excluded.diluted_average_shares
            RETURNING id
            "#,
        )
        .bind(record.company_id)
        .bind(record.period_ending)
        .bind(record.period_type.as_str())
        .bind(record.total_revenue)
        .bind(record.cost_of_revenue)
        .bind(record.gross_profit)
        .bind(record.operating_income)
        .bind(record.ebitda)
        .bind(record.net_income)
        .bind(record.diluted_eps)
        .bind(record.basic_eps)
        .bind(record.diluted_average_shares)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    /// Insert or update a balance sheet by its natural key, returning its id
    pub async fn insert_balance_sheet(&self, sheet: &BalanceSheet) -> Result<i64> {
        let (score, flags) = quality_columns(sheet.quality.as_ref());
        let row = sqlx::query(
            r#"
            INSERT INTO balance_sheets (
                company_id, period_ending, period_type, total_assets, total_liabilities,
                stockholders_equity, current_assets, current_liabilities, working_capital,
                cash_and_cash_equivalents, inventory, short_term_debt, long_term_debt,
                total_debt, minority_interest, common_stock_equity, data_quality_score,
                quality_flags
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company_id, period_ending, period_type) DO UPDATE SET
                total_assets = excluded.total_assets,
                total_liabilities = excluded.total_liabilities,
                stockholders_equity = excluded.stockholders_equity,
                current_assets = excluded.current_assets,
                current_liabilities = excluded.current_liabilities,
                working_capital = excluded.working_capital,
                cash_and_cash_equivalents = excluded.cash_and_cash_equivalents,
                inventory = excluded.inventory,
                short_term_debt = excluded.short_term_debt,
                long_term_debt = excluded.long_term_debt,
                total_debt = excluded.total_debt,
                minority_interest = excluded.minority_interest,
                common_stock_equity = excluded.common_stock_equity,
                data_quality_score = excluded.data_quality_score,
                quality_flags = excluded.quality_flags
            RETURNING id
            "#,
        )
        .bind(sheet.company_id)
        .bind(sheet.period_ending)
        .bind(sheet.period_type.as_str())
        .bind(sheet.total_assets)
        .bind(sheet.total_liabilities)
        .bind(sheet.stockholders_equity)
        .bind(sheet.current_assets)
        .bind(sheet.current_liabilities)
        .bind(sheet.working_capital)
        .bind(sheet.cash_and_cash_equivalents)
        .bind(sheet.inventory)
        .bind(sheet.short_term_debt)
        .bind(sheet.long_term_debt)
        .bind(sheet.total_debt)
        .bind(sheet.minority_interest)
        .bind(sheet.common_stock_equity)
        .bind(score)
        .bind(flags)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    pub async fn insert_cash_flow_statement(&self, record: &CashFlowStatement) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO cash_flow_statements (
                company_id, period_ending, period_type, operating_cash_flow,
                investing_cash_flow, financing_cash_flow, capital_expenditure, free_cash_flow
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company_id, period_ending, period_type) DO UPDATE SET
                operating_cash_flow = excluded.operating_cash_flow,
                investing_cash_flow = excluded.investing_cash_flow,
                financing_cash_flow = excluded.financing_cash_flow,
                capital_expenditure = excluded.capital_expenditure,
                free_cash_flow = excluded.free_cash_flow
            RETURNING id
            "#,
        )
        .bind(record.company_id)
        .bind(record.period_ending)
        .bind(record.period_type.as_str())
        .bind(record.operating_cash_flow)
        .bind(record.investing_cash_flow)
        .bind(record.financing_cash_flow)
        .bind(record.capital_expenditure)
        .bind(record.free_cash_flow)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    /// Insert daily price - using raw SQL
    pub async fn insert_daily_price(&self, price: &DailyPrice) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO daily_prices (
                company_id, date, open_price, high_price, low_price, close_price, volume,
                shares_outstanding
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company_id, date) DO UPDATE SET
                open_price = excluded.open_price,
                high_price = excluded.high_price,
                low_price = excluded.low_price,
                close_price = excluded.close_price,
                volume = excluded.volume,
                shares_outstanding = excluded.shares_outstanding
            RETURNING id
            "#,
        )
        .bind(price.company_id)
        .bind(price.date)
        .bind(price.open_price)
        .bind(price.high_price)
        .bind(price.low_price)
        .bind(price.close_price)
        .bind(price.volume)
        .bind(price.shares_outstanding)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    pub async fn get_daily_prices(&self, company_id: i64) -> Result<Vec<DailyPrice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, company_id, date, open_price, high_price, low_price, close_price, volume,
                   shares_outstanding
            FROM daily_prices
            WHERE company_id = ?
            ORDER BY date
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DailyPrice {
                id: Some(r.get::<i64, _>("id")),
                company_id: r.get::<i64, _>("company_id"),
                date: r.get::<NaiveDate, _>("date"),
                open_price: r.get::<Option<f64>, _>("open_price"),
                high_price: r.get::<Option<f64>, _>("high_price"),
                low_price: r.get::<Option<f64>, _>("low_price"),
                close_price: r.get::<Option<f64>, _>("close_price"),
                volume: r.get::<Option<i64>, _>("volume"),
                shares_outstanding: r.get::<Option<f64>, _>("shares_outstanding"),
            })
            .collect())
    }

    /// Metric row for one key, if it has been computed
    pub async fn get_metric(
        &self,
        company_id: i64,
        metric_date: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<DerivedMetricRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM historical_company_metrics
            WHERE company_id = ? AND metric_date = ? AND period_type = ?
            "#,
        )
        .bind(company_id)
        .bind(metric_date)
        .bind(period_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(metric_from_row).transpose()
    }

    /// All metric rows for a company, oldest first
    pub async fn get_metrics_for_company(&self, company_id: i64) -> Result<Vec<DerivedMetricRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM historical_company_metrics
            WHERE company_id = ?
            ORDER BY metric_date, period_type
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(metric_from_row).collect()
    }

    pub async fn count_metrics(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM historical_company_metrics")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count"))
    }

    /// Fix inverted high/low pairs and clear rows carrying negative prices
    pub async fn repair_price_history(&self) -> Result<PriceRepairStats> {
        // SQLite evaluates every right-hand side against the old row, so this swaps
        let swapped = sqlx::query(
            r#"
            UPDATE daily_prices
            SET high_price = low_price, low_price = high_price
            WHERE high_price < low_price AND high_price > 0 AND low_price > 0
            "#,
        )
        .execute(&self.pool)
        .await?;

        let nulled = sqlx::query(
            r#"
            UPDATE daily_prices
            SET open_price = NULL, high_price = NULL, low_price = NULL, close_price = NULL
            WHERE open_price < 0 OR high_price < 0 OR low_price < 0 OR close_price < 0
            "#,
        )
        .execute(&self.pool)
        .await?;

        let stats = PriceRepairStats {
            swapped_high_low: swapped.rows_affected(),
            nulled_negative: nulled.rows_affected(),
        };
        info!(
            "🔧 Price history repaired: {} high/low swaps, {} negative rows cleared",
            stats.swapped_high_low, stats.nulled_negative
        );
        Ok(stats)
    }

    /// Quality summary over every persisted balance sheet, scored fresh
    pub async fn quality_summary(&self, thresholds: &QualityThresholds) -> Result<QualityReport> {
        let rows = sqlx::query("SELECT * FROM balance_sheets ORDER BY company_id, period_ending")
            .fetch_all(&self.pool)
            .await?;

        let mut report = QualityReport::default();
        for row in &rows {
            let sheet = balance_from_row(row)?;
            report.record(&sheet, &assess(&sheet, thresholds));
        }
        Ok(report)
    }
}

fn company_from_row(r: &SqliteRow) -> Company {
    Company {
        id: r.get::<i64, _>("id"),
        symbol: r.get::<String, _>("symbol"),
        name: r.get::<Option<String>, _>("name"),
    }
}

fn period_type_from_row(r: &SqliteRow) -> Result<PeriodType> {
    r.get::<String, _>("period_type").parse()
}

fn quality_columns(quality: Option<&QualityAssessment>) -> (Option<i64>, Option<String>) {
    match quality {
        Some(q) => (Some(i64::from(q.score)), Some(q.flags_to_string())),
        None => (None, None),
    }
}

fn income_from_row(r: &SqliteRow) -> Result<IncomeStatement> {
    Ok(IncomeStatement {
        id: Some(r.get::<i64, _>("id")),
        company_id: r.get::<i64, _>("company_id"),
        period_ending: r.get::<NaiveDate, _>("period_ending"),
        period_type: period_type_from_row(r)?,
        total_revenue: r.get::<Option<f64>, _>("total_revenue"),
        cost_of_revenue: r.get::<Option<f64>, _>("cost_of_revenue"),
        gross_profit: r.get::<Option<f64>, _>("gross_profit"),
        operating_income: r.get::<Option<f64>, _>("operating_income"),
        ebitda: r.get::<Option<f64>, _>("ebitda"),
        net_income: r.get::<Option<f64>, _>("net_income"),
        diluted_eps: r.get::<Option<f64>, _>("diluted_eps"),
        basic_eps: r.get::<Option<f64>, _>("basic_eps"),
        diluted_average_shares: r.get::<Option<f64>, _>("diluted_average_shares"),
    })
}

fn balance_from_row(r: &SqliteRow) -> Result<BalanceSheet> {
    let quality = match (
        r.get::<Option<i64>, _>("data_quality_score"),
        r.get::<Option<String>, _>("quality_flags"),
    ) {
        (Some(score), Some(flags)) => Some(QualityAssessment {
            score: u8::try_from(score).map_err(|_| {
                EngineError::SchemaMismatch(format!("data_quality_score {} out of range", score))
            })?,
            flags: QualityAssessment::parse_flags(&flags)?,
        }),
        _ => None,
    };

    Ok(BalanceSheet {
        id: Some(r.get::<i64, _>("id")),
        company_id: r.get::<i64, _>("company_id"),
        period_ending: r.get::<NaiveDate, _>("period_ending"),
        period_type: period_type_from_row(r)?,
        total_assets: r.get::<Option<f64>, _>("total_assets"),
        total_liabilities: r.get::<Option<f64>, _>("total_liabilities"),
        stockholders_equity: r.get::<Option<f64>, _>("stockholders_equity"),
        current_assets: r.get::<Option<f64>, _>("current_assets"),
        current_liabilities: r.get::<Option<f64>, _>("current_liabilities"),
        working_capital: r.get::<Option<f64>, _>("working_capital"),
        cash_and_cash_equivalents: r.get::<Option<f64>, _>("cash_and_cash_equivalents"),
        inventory: r.get::<Option<f64>, _>("inventory"),
        short_term_debt: r.get::<Option<f64>, _>("short_term_debt"),
        long_term_debt: r.get::<Option<f64>, _>("long_term_debt"),
        total_debt: r.get::<Option<f64>, _>("total_debt"),
        minority_interest: r.get::<Option<f64>, _>("minority_interest"),
        common_stock_equity: r.get::<Option<f64>, _>("common_stock_equity"),
        quality,
    })
}

fn cash_flow_from_row(r: &SqliteRow) -> Result<CashFlowStatement> {
    Ok(CashFlowStatement {
        id: Some(r.get::<i64, _>("id")),
        company_id: r.get::<i64, _>("company_id"),
        period_ending: r.get::<NaiveDate, _>("period_ending"),
        period_type: period_type_from_row(r)?,
        operating_cash_flow: r.get::<Option<f64>, _>("operating_cash_flow"),
        investing_cash_flow: r.get::<Option<f64>, _>("investing_cash_flow"),
        financing_cash_flow: r.get::<Option<f64>, _>("financing_cash_flow"),
        capital_expenditure: r.get::<Option<f64>, _>("capital_expenditure"),
        free_cash_flow: r.get::<Option<f64>, _>("free_cash_flow"),
    })
}

fn metric_from_row(r: &SqliteRow) -> Result<DerivedMetricRecord> {
    let mut record = DerivedMetricRecord::new(
        r.get::<i64, _>("company_id"),
        r.get::<NaiveDate, _>("metric_date"),
        period_type_from_row(r)?,
    );
    record.current_price = r.get("current_price");
    record.shares_outstanding = r.get("shares_outstanding");
    record.market_cap = r.get("market_cap");
    record.enterprise_value = r.get("enterprise_value");
    record.trailing_pe = r.get("trailing_pe");
    record.price_to_book = r.get("price_to_book");
    record.price_to_sales = r.get("price_to_sales");
    record.gross_margin = r.get("gross_margin");
    record.operating_margin = r.get("operating_margin");
    record.profit_margin = r.get("profit_margin");
    record.return_on_assets = r.get("return_on_assets");
    record.return_on_equity = r.get("return_on_equity");
    record.revenue_growth_yoy = r.get("revenue_growth_yoy");
    record.earnings_growth_yoy = r.get("earnings_growth_yoy");
    record.debt_to_equity = r.get("debt_to_equity");
    record.current_ratio = r.get("current_ratio");
    record.quick_ratio = r.get("quick_ratio");
    record.operating_cashflow = r.get("operating_cashflow");
    record.free_cashflow = r.get("free_cashflow");
    record.fcf_per_share = r.get("fcf_per_share");
    record.book_value_per_share = r.get("book_value_per_share");
    Ok(record)
}

#[async_trait]
impl StatementStore for DatabaseManagerSqlx {
    async fn get_company(&self, company_id: i64) -> Result<Option<Company>> {
        let row = sqlx::query("SELECT id, symbol, name FROM companies WHERE id = ?")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| company_from_row(&r)))
    }

    async fn list_companies(&self) -> Result<Vec<Company>> {
        let rows = sqlx::query("SELECT id, symbol, name FROM companies ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(company_from_row).collect())
    }

    async fn get_income_statements(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<IncomeStatement>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM income_statements
            WHERE company_id = ? AND period_type = ?
            ORDER BY period_ending, id
            "#,
        )
        .bind(company_id)
        .bind(period_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(income_from_row).collect()
    }

    async fn get_balance_sheets(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<BalanceSheet>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM balance_sheets
            WHERE company_id = ? AND period_type = ?
            ORDER BY period_ending, id
            "#,
        )
        .bind(company_id)
        .bind(period_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(balance_from_row).collect()
    }

    async fn get_cash_flow_statements(
        &self,
        company_id: i64,
        period_type: PeriodType,
    ) -> Result<Vec<CashFlowStatement>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM cash_flow_statements
            WHERE company_id = ? AND period_type = ?
            ORDER BY period_ending, id
            "#,
        )
        .bind(company_id)
        .bind(period_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(cash_flow_from_row).collect()
    }

    async fn upsert_balance(&self, sheet: &BalanceSheet) -> Result<()> {
        let id = match sheet.id {
            Some(id) => id,
            None => {
                self.insert_balance_sheet(sheet).await?;
                return Ok(());
            }
        };

        let (score, flags) = quality_columns(sheet.quality.as_ref());
        sqlx::query(
            r#"
            UPDATE balance_sheets SET
                total_assets = ?,
                total_liabilities = ?,
                stockholders_equity = ?,
                current_assets = ?,
                current_liabilities = ?,
                working_capital = ?,
                cash_and_cash_equivalents = ?,
                inventory = ?,
                short_term_debt = ?,
                long_term_debt = ?,
                total_debt = ?,
                minority_interest = ?,
                common_stock_equity = ?,
                data_quality_score = ?,
                quality_flags = ?
            WHERE id = ?
            "#,
        )
        .bind(sheet.total_assets)
        .bind(sheet.total_liabilities)
        .bind(sheet.stockholders_equity)
        .bind(sheet.current_assets)
        .bind(sheet.current_liabilities)
        .bind(sheet.working_capital)
        .bind(sheet.cash_and_cash_equivalents)
        .bind(sheet.inventory)
        .bind(sheet.short_term_debt)
        .bind(sheet.long_term_debt)
        .bind(sheet.total_debt)
        .bind(sheet.minority_interest)
        .bind(sheet.common_stock_equity)
        .bind(score)
        .bind(flags)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_balance(&self, sheet: &BalanceSheet) -> Result<()> {
        match sheet.id {
            Some(id) => {
                sqlx::query("DELETE FROM balance_sheets WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    DELETE FROM balance_sheets
                    WHERE company_id = ? AND period_ending = ? AND period_type = ?
                    "#,
                )
                .bind(sheet.company_id)
                .bind(sheet.period_ending)
                .bind(sheet.period_type.as_str())
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PriceProvider for DatabaseManagerSqlx {
    async fn get_price_asof(
        &self,
        company_id: i64,
        date: NaiveDate,
    ) -> Result<Option<PriceContext>> {
        let row = sqlx::query(
            r#"
            SELECT date, close_price, shares_outstanding
            FROM daily_prices
            WHERE company_id = ? AND date <= ? AND close_price IS NOT NULL
            ORDER BY date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PriceContext {
            as_of: r.get::<NaiveDate, _>("date"),
            close_price: r.get::<f64, _>("close_price"),
            shares_outstanding: r.get::<Option<f64>, _>("shares_outstanding"),
        }))
    }
}

#[async_trait]
impl MetricsSink for DatabaseManagerSqlx {
    async fn upsert_metric(&self, record: &DerivedMetricRecord) -> Result<()> {
        let fields = record.fields();
        let columns: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates = columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(",\n                ");

        let sql = format!(
            r#"
            INSERT INTO historical_company_metrics (
                company_id, metric_date, period_type, {columns}
            )
            VALUES (?, ?, ?, {placeholders})
            ON CONFLICT(company_id, metric_date, period_type) DO UPDATE SET
                {updates},
                updated_at = CURRENT_TIMESTAMP
            "#,
            columns = columns.join(", "),
        );

        let mut query = sqlx::query(&sql)
            .bind(record.company_id)
            .bind(record.metric_date)
            .bind(record.period_type.as_str());
        for (_, value) in fields {
            query = query.bind(value);
        }
        query.execute(&self.pool).await?;

        Ok(())
    }
}
