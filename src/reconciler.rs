//! Balance-sheet reconciliation.
//!
//! Keeps `total_assets ≈ total_liabilities + stockholders_equity` using a fixed
//! set of bounded repairs. The pass is idempotent: feeding its output back in
//! produces no further changes and no writes.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::models::{BalanceSheet, Statement};
use crate::quality::{assess, QualityAssessment, QualityThresholds};

/// Tunable constants. Defaults are the reference values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerConfig {
    /// Imbalance above which equity is re-derived
    pub tolerance: f64,
    /// Staleness threshold for working capital, total debt and common equity
    pub secondary_tolerance: f64,
    /// Equity or liabilities above `multiplier × assets` are reset
    pub out_of_range_multiplier: f64,
    /// Derived equity may not fall below `-floor × assets`
    pub negative_equity_floor: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tolerance: 1_000_000.0,
            secondary_tolerance: 100_000.0,
            out_of_range_multiplier: 2.0,
            negative_equity_floor: 0.5,
        }
    }
}

/// A single change applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Repair {
    EquityReset { previous: f64 },
    LiabilitiesReset { previous: f64 },
    EquityDerived { previous: Option<f64>, derived: f64 },
    LiabilitiesDerived { derived: f64 },
    WorkingCapital { previous: Option<f64>, derived: f64 },
    TotalDebt { previous: Option<f64>, derived: f64 },
    CommonStockEquity { previous: Option<f64>, derived: f64 },
}

/// A balance sheet after reconciliation, with its fresh quality annotation
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledBalanceSheet {
    pub sheet: BalanceSheet,
    pub assessment: QualityAssessment,
    pub repairs: Vec<Repair>,
    /// Field values or the quality annotation differ from what was read
    pub needs_write: bool,
}

#[derive(Debug)]
pub enum RecordOutcome {
    Kept(ReconciledBalanceSheet),
    Discarded {
        sheet: BalanceSheet,
        reason: EngineError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileStats {
    pub records_seen: usize,
    pub discarded: usize,
    pub equity_reset: usize,
    pub liabilities_reset: usize,
    pub equity_repaired: usize,
    pub liabilities_repaired: usize,
    pub working_capital_fixed: usize,
    pub total_debt_fixed: usize,
    pub common_equity_fixed: usize,
    pub records_to_write: usize,
}

impl ReconcileStats {
    fn count(&mut self, repair: &Repair) {
        match repair {
            Repair::EquityReset { .. } => self.equity_reset += 1,
            Repair::LiabilitiesReset { .. } => self.liabilities_reset += 1,
            Repair::EquityDerived { .. } => self.equity_repaired += 1,
            Repair::LiabilitiesDerived { .. } => self.liabilities_repaired += 1,
            Repair::WorkingCapital { .. } => self.working_capital_fixed += 1,
            Repair::TotalDebt { .. } => self.total_debt_fixed += 1,
            Repair::CommonStockEquity { .. } => self.common_equity_fixed += 1,
        }
    }

    pub fn merge(&mut self, other: &ReconcileStats) {
        self.records_seen += other.records_seen;
        self.discarded += other.discarded;
        self.equity_reset += other.equity_reset;
        self.liabilities_reset += other.liabilities_reset;
        self.equity_repaired += other.equity_repaired;
        self.liabilities_repaired += other.liabilities_repaired;
        self.working_capital_fixed += other.working_capital_fixed;
        self.total_debt_fixed += other.total_debt_fixed;
        self.common_equity_fixed += other.common_equity_fixed;
        self.records_to_write += other.records_to_write;
    }
}

/// Result of reconciling a batch of records
#[derive(Debug, Default)]
pub struct ReconcilePass {
    pub kept: Vec<ReconciledBalanceSheet>,
    pub discarded: Vec<BalanceSheet>,
    pub stats: ReconcileStats,
}

impl ReconcilePass {
    pub fn pending_writes(&self) -> impl Iterator<Item = &ReconciledBalanceSheet> {
        self.kept.iter().filter(|r| r.needs_write)
    }

    /// Kept sheets with their repairs applied, in input order
    pub fn sheets(&self) -> Vec<BalanceSheet> {
        self.kept.iter().map(|r| r.sheet.clone()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BalanceSheetReconciler {
    config: ReconcilerConfig,
    thresholds: QualityThresholds,
}

impl BalanceSheetReconciler {
    pub fn new(config: ReconcilerConfig, thresholds: QualityThresholds) -> Self {
        Self { config, thresholds }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn reconcile_all(&self, sheets: Vec<BalanceSheet>) -> ReconcilePass {
        let mut pass = ReconcilePass::default();

        for sheet in sheets {
            pass.stats.records_seen += 1;
            match self.reconcile_record(sheet) {
                RecordOutcome::Kept(reconciled) => {
                    for repair in &reconciled.repairs {
                        pass.stats.count(repair);
                    }
                    if reconciled.needs_write {
                        pass.stats.records_to_write += 1;
                    }
                    pass.kept.push(reconciled);
                }
                RecordOutcome::Discarded { sheet, reason } => {
                    warn!("🗑️  Discarding balance sheet: {}", reason);
                    pass.stats.discarded += 1;
                    pass.discarded.push(sheet);
                }
            }
        }

        pass
    }

    pub fn reconcile_record(&self, original: BalanceSheet) -> RecordOutcome {
        if let Some(assets) = original.total_assets {
            if assets < 0.0 {
                let reason = EngineError::DataCorruption {
                    kind: BalanceSheet::KIND,
                    company_id: original.company_id,
                    period_ending: original.period_ending,
                    reason: format!("negative total_assets {}", assets),
                };
                return RecordOutcome::Discarded {
                    sheet: original,
                    reason,
                };
            }
        }

        let mut sheet = original.clone();
        let mut repairs = Vec::new();

        self.reset_out_of_range(&mut sheet, &mut repairs);
        self.repair_equation(&mut sheet, &mut repairs);
        self.derive_secondary_fields(&mut sheet, &mut repairs);

        let assessment = assess(&sheet, &self.thresholds);
        let needs_write = sheet.fields_differ(&original)
            || original.quality.as_ref() != Some(&assessment);
        sheet.quality = Some(assessment.clone());

        if !repairs.is_empty() {
            debug!(
                "Reconciled balance sheet {} {} ({}): {:?}",
                sheet.company_id, sheet.period_ending, sheet.period_type, repairs
            );
        }

        RecordOutcome::Kept(ReconciledBalanceSheet {
            sheet,
            assessment,
            repairs,
            needs_write,
        })
    }

    fn reset_out_of_range(&self, sheet: &mut BalanceSheet, repairs: &mut Vec<Repair>) {
        let assets = match sheet.total_assets {
            Some(assets) if assets > 0.0 => assets,
            _ => return,
        };
        let ceiling = assets * self.config.out_of_range_multiplier;

        if let Some(equity) = sheet.stockholders_equity {
            if equity > ceiling {
                sheet.stockholders_equity = None;
                repairs.push(Repair::EquityReset { previous: equity });
            }
        }
        if let Some(liabilities) = sheet.total_liabilities {
            if liabilities > ceiling {
                sheet.total_liabilities = None;
                repairs.push(Repair::LiabilitiesReset {
                    previous: liabilities,
                });
            }
        }
    }

    fn repair_equation(&self, sheet: &mut BalanceSheet, repairs: &mut Vec<Repair>) {
        let assets = match sheet.total_assets {
            Some(assets) => assets,
            None => return,
        };

        if let Some(liabilities) = sheet.total_liabilities {
            let out_of_balance = match sheet.stockholders_equity {
                None => true,
                Some(equity) => (assets - (liabilities + equity)).abs() > self.config.tolerance,
            };
            if out_of_balance {
                let derived = assets - liabilities;
                if derived >= -self.config.negative_equity_floor * assets {
                    repairs.push(Repair::EquityDerived {
                        previous: sheet.stockholders_equity,
                        derived,
                    });
                    sheet.stockholders_equity = Some(derived);
                }
            }
            return;
        }

        if let Some(equity) = sheet.stockholders_equity {
            let derived = assets - equity;
            if (0.0..=assets).contains(&derived) {
                repairs.push(Repair::LiabilitiesDerived { derived });
                sheet.total_liabilities = Some(derived);
            }
        }
    }

    fn derive_secondary_fields(&self, sheet: &mut BalanceSheet, repairs: &mut Vec<Repair>) {
        let tolerance = self.config.secondary_tolerance;

        if let (Some(current_assets), Some(current_liabilities)) =
            (sheet.current_assets, sheet.current_liabilities)
        {
            let derived = current_assets - current_liabilities;
            if is_stale(sheet.working_capital, derived, tolerance) {
                repairs.push(Repair::WorkingCapital {
                    previous: sheet.working_capital,
                    derived,
                });
                sheet.working_capital = Some(derived);
            }
        }

        if sheet.short_term_debt.is_some() || sheet.long_term_debt.is_some() {
            let derived =
                sheet.short_term_debt.unwrap_or(0.0) + sheet.long_term_debt.unwrap_or(0.0);
            if is_stale(sheet.total_debt, derived, tolerance) {
                repairs.push(Repair::TotalDebt {
                    previous: sheet.total_debt,
                    derived,
                });
                sheet.total_debt = Some(derived);
            }
        }

        if let Some(equity) = sheet.stockholders_equity {
            let derived = equity - sheet.minority_interest.unwrap_or(0.0);
            if is_stale(sheet.common_stock_equity, derived, tolerance) {
                repairs.push(Repair::CommonStockEquity {
                    previous: sheet.common_stock_equity,
                    derived,
                });
                sheet.common_stock_equity = Some(derived);
            }
        }
    }
}

fn is_stale(stored: Option<f64>, expected: f64, tolerance: f64) -> bool {
    stored.map_or(true, |value| (value - expected).abs() > tolerance)
}
