use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::quality::QualityThresholds;
use crate::reconciler::ReconcilerConfig;

pub mod statements;

pub use statements::{BalanceSheet, CashFlowStatement, IncomeStatement, Statement};

/// Company identity. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
}

/// Reporting cadence of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Annual,
    Quarterly,
}

impl PeriodType {
    pub const ALL: [PeriodType; 2] = [PeriodType::Annual, PeriodType::Quarterly];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Annual => "annual",
            PeriodType::Quarterly => "quarterly",
        }
    }

    /// Number of records back in the chronological series that holds the
    /// same period one year earlier.
    pub fn yoy_lag(&self) -> usize {
        match self {
            PeriodType::Annual => 1,
            PeriodType::Quarterly => 4,
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" | "yearly" => Ok(PeriodType::Annual),
            "quarterly" | "quarter" => Ok(PeriodType::Quarterly),
            other => Err(EngineError::SchemaMismatch(format!(
                "unknown period_type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Income,
    Balance,
    CashFlow,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Income => "income",
            StatementKind::Balance => "balance",
            StatementKind::CashFlow => "cash_flow",
        };
        f.write_str(name)
    }
}

/// One row of daily price history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPrice {
    pub id: Option<i64>,
    pub company_id: i64,
    pub date: NaiveDate,
    pub open_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub close_price: Option<f64>,
    pub volume: Option<i64>,
    pub shares_outstanding: Option<f64>,
}

/// Most recent close (and share count) at or before a target date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceContext {
    pub as_of: NaiveDate,
    pub close_price: f64,
    pub shares_outstanding: Option<f64>,
}

/// Derived ratios for one (company, metric_date, period_type).
///
/// Every ratio is a fraction (0.25 means 25%). A field is either a finite
/// number or `None`; NaN and infinities never reach this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricRecord {
    pub company_id: i64,
    pub metric_date: NaiveDate,
    pub period_type: PeriodType,

    // Market data
    pub current_price: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub market_cap: Option<f64>,
    pub enterprise_value: Option<f64>,

    // Valuation
    pub trailing_pe: Option<f64>,
    pub price_to_book: Option<f64>,
    pub price_to_sales: Option<f64>,

    // Profitability
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub profit_margin: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub return_on_equity: Option<f64>,

    // Growth
    pub revenue_growth_yoy: Option<f64>,
    pub earnings_growth_yoy: Option<f64>,

    // Financial health
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub quick_ratio: Option<f64>,

    // Cash flow and per-share
    pub operating_cashflow: Option<f64>,
    pub free_cashflow: Option<f64>,
    pub fcf_per_share: Option<f64>,
    pub book_value_per_share: Option<f64>,
}

impl DerivedMetricRecord {
    pub fn new(company_id: i64, metric_date: NaiveDate, period_type: PeriodType) -> Self {
        Self {
            company_id,
            metric_date,
            period_type,
            current_price: None,
            shares_outstanding: None,
            market_cap: None,
            enterprise_value: None,
            trailing_pe: None,
            price_to_book: None,
            price_to_sales: None,
            gross_margin: None,
            operating_margin: None,
            profit_margin: None,
            return_on_assets: None,
            return_on_equity: None,
            revenue_growth_yoy: None,
            earnings_growth_yoy: None,
            debt_to_equity: None,
            current_ratio: None,
            quick_ratio: None,
            operating_cashflow: None,
            free_cashflow: None,
            fcf_per_share: None,
            book_value_per_share: None,
        }
    }

    /// All optional numeric fields, named, in storage order
    pub fn fields(&self) -> [(&'static str, Option<f64>); 21] {
        [
            ("current_price", self.current_price),
            ("shares_outstanding", self.shares_outstanding),
            ("market_cap", self.market_cap),
            ("enterprise_value", self.enterprise_value),
            ("trailing_pe", self.trailing_pe),
            ("price_to_book", self.price_to_book),
            ("price_to_sales", self.price_to_sales),
            ("gross_margin", self.gross_margin),
            ("operating_margin", self.operating_margin),
            ("profit_margin", self.profit_margin),
            ("return_on_assets", self.return_on_assets),
            ("return_on_equity", self.return_on_equity),
            ("revenue_growth_yoy", self.revenue_growth_yoy),
            ("earnings_growth_yoy", self.earnings_growth_yoy),
            ("debt_to_equity", self.debt_to_equity),
            ("current_ratio", self.current_ratio),
            ("quick_ratio", self.quick_ratio),
            ("operating_cashflow", self.operating_cashflow),
            ("free_cashflow", self.free_cashflow),
            ("fcf_per_share", self.fcf_per_share),
            ("book_value_per_share", self.book_value_per_share),
        ]
    }

    pub fn is_well_formed(&self) -> bool {
        self.fields()
            .iter()
            .all(|(_, value)| value.map_or(true, f64::is_finite))
    }

    pub fn populated_fields(&self) -> usize {
        self.fields().iter().filter(|(_, v)| v.is_some()).count()
    }
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub reconciler: ReconcilerConfig,
    pub quality: QualityThresholds,
    pub num_workers: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "stocks.db".to_string(),
            reconciler: ReconcilerConfig::default(),
            quality: QualityThresholds::default(),
            num_workers: 4,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();
        let reconciler = ReconcilerConfig {
            tolerance: env_or("RECONCILE_TOLERANCE", defaults.reconciler.tolerance),
            secondary_tolerance: env_or(
                "SECONDARY_TOLERANCE",
                defaults.reconciler.secondary_tolerance,
            ),
            out_of_range_multiplier: env_or(
                "OUT_OF_RANGE_MULTIPLIER",
                defaults.reconciler.out_of_range_multiplier,
            ),
            negative_equity_floor: env_or(
                "NEGATIVE_EQUITY_FLOOR",
                defaults.reconciler.negative_equity_floor,
            ),
        };
        let quality = QualityThresholds {
            major_imbalance: reconciler.tolerance,
            minor_imbalance: env_or(
                "MINOR_IMBALANCE_THRESHOLD",
                defaults.quality.minor_imbalance,
            ),
        };

        Config {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| defaults.database_path.clone()),
            reconciler,
            quality,
            num_workers: env_or("NUM_WORKERS", defaults.num_workers),
            retry_attempts: env_or("RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
