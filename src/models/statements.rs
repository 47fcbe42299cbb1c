//! Typed statement records.
//!
//! Each statement kind is its own struct with explicit `Option<f64>` fields so a
//! missing value can never be mistaken for zero.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{PeriodType, StatementKind};
use crate::quality::QualityAssessment;

/// Identity shared by every statement kind
pub trait Statement {
    const KIND: StatementKind;

    /// Storage primary key, if the record has been persisted
    fn id(&self) -> Option<i64>;
    fn company_id(&self) -> i64;
    fn period_ending(&self) -> NaiveDate;
    fn period_type(&self) -> PeriodType;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub id: Option<i64>,
    pub company_id: i64,
    pub period_ending: NaiveDate,
    pub period_type: PeriodType,
    pub total_revenue: Option<f64>,
    pub cost_of_revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub ebitda: Option<f64>,
    pub net_income: Option<f64>,
    pub diluted_eps: Option<f64>,
    pub basic_eps: Option<f64>,
    pub diluted_average_shares: Option<f64>,
}

impl IncomeStatement {
    pub fn new(company_id: i64, period_ending: NaiveDate, period_type: PeriodType) -> Self {
        Self {
            id: None,
            company_id,
            period_ending,
            period_type,
            total_revenue: None,
            cost_of_revenue: None,
            gross_profit: None,
            operating_income: None,
            ebitda: None,
            net_income: None,
            diluted_eps: None,
            basic_eps: None,
            diluted_average_shares: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub id: Option<i64>,
    pub company_id: i64,
    pub period_ending: NaiveDate,
    pub period_type: PeriodType,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub stockholders_equity: Option<f64>,
    pub current_assets: Option<f64>,
    pub current_liabilities: Option<f64>,
    pub working_capital: Option<f64>,
    pub cash_and_cash_equivalents: Option<f64>,
    pub inventory: Option<f64>,
    pub short_term_debt: Option<f64>,
    pub long_term_debt: Option<f64>,
    pub total_debt: Option<f64>,
    pub minority_interest: Option<f64>,
    pub common_stock_equity: Option<f64>,
    /// Last persisted quality annotation; recomputed on every reconciliation pass
    pub quality: Option<QualityAssessment>,
}

impl BalanceSheet {
    pub fn new(company_id: i64, period_ending: NaiveDate, period_type: PeriodType) -> Self {
        Self {
            id: None,
            company_id,
            period_ending,
            period_type,
            total_assets: None,
            total_liabilities: None,
            stockholders_equity: None,
            current_assets: None,
            current_liabilities: None,
            working_capital: None,
            cash_and_cash_equivalents: None,
            inventory: None,
            short_term_debt: None,
            long_term_debt: None,
            total_debt: None,
            minority_interest: None,
            common_stock_equity: None,
            quality: None,
        }
    }

    /// `assets - (liabilities + equity)` when all three are present
    pub fn imbalance(&self) -> Option<f64> {
        match (self.total_assets, self.total_liabilities, self.stockholders_equity) {
            (Some(assets), Some(liabilities), Some(equity)) => Some(assets - (liabilities + equity)),
            _ => None,
        }
    }

    pub fn has_core_fields(&self) -> bool {
        self.total_assets.is_some()
            && self.total_liabilities.is_some()
            && self.stockholders_equity.is_some()
    }

    /// True when any numeric field differs. Identity and the quality
    /// annotation are ignored.
    pub fn fields_differ(&self, other: &BalanceSheet) -> bool {
        self.total_assets != other.total_assets
            || self.total_liabilities != other.total_liabilities
            || self.stockholders_equity != other.stockholders_equity
            || self.current_assets != other.current_assets
            || self.current_liabilities != other.current_liabilities
            || self.working_capital != other.working_capital
            || self.cash_and_cash_equivalents != other.cash_and_cash_equivalents
            || self.inventory != other.inventory
            || self.short_term_debt != other.short_term_debt
            || self.long_term_debt != other.long_term_debt
            || self.total_debt != other.total_debt
            || self.minority_interest != other.minority_interest
            || self.common_stock_equity != other.common_stock_equity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub id: Option<i64>,
    pub company_id: i64,
    pub period_ending: NaiveDate,
    pub period_type: PeriodType,
    pub operating_cash_flow: Option<f64>,
    pub investing_cash_flow: Option<f64>,
    pub financing_cash_flow: Option<f64>,
    pub capital_expenditure: Option<f64>,
    pub free_cash_flow: Option<f64>,
}

impl CashFlowStatement {
    pub fn new(company_id: i64, period_ending: NaiveDate, period_type: PeriodType) -> Self {
        Self {
            id: None,
            company_id,
            period_ending,
            period_type,
            operating_cash_flow: None,
            investing_cash_flow: None,
            financing_cash_flow: None,
            capital_expenditure: None,
            free_cash_flow: None,
        }
    }
}

macro_rules! impl_statement {
    ($ty:ty, $kind:expr) => {
        impl Statement for $ty {
            const KIND: StatementKind = $kind;

            fn id(&self) -> Option<i64> {
                self.id
            }

            fn company_id(&self) -> i64 {
                self.company_id
            }

            fn period_ending(&self) -> NaiveDate {
                self.period_ending
            }

            fn period_type(&self) -> PeriodType {
                self.period_type
            }
        }
    };
}

impl_statement!(IncomeStatement, StatementKind::Income);
impl_statement!(BalanceSheet, StatementKind::Balance);
impl_statement!(CashFlowStatement, StatementKind::CashFlow);
