//! Reconciler invariants checked over a grid of awkward balance sheets

use pretty_assertions::assert_eq;
use test_log::test;

use crate::common::test_data::{create_test_balance_sheet, date};
use rust_stocks_metrics::models::BalanceSheet;
use rust_stocks_metrics::quality::{QualityFlag, QualityThresholds};
use rust_stocks_metrics::reconciler::{BalanceSheetReconciler, ReconcilerConfig, Repair};

fn grid() -> Vec<BalanceSheet> {
    let values = [
        None,
        Some(0.0),
        Some(-250_000.0),
        Some(100.0),
        Some(400_000.0),
        Some(600_000.0),
        Some(1_000_000.0),
        Some(2_500_000.0),
        Some(50_000_000.0),
    ];

    let mut sheets = Vec::new();
    for assets in values {
        for liabilities in values {
            for equity in values {
                let mut sheet = create_test_balance_sheet(
                    1,
                    date(2023, 12, 31),
                    assets,
                    liabilities,
                    equity,
                );
                sheet.current_assets = liabilities;
                sheet.current_liabilities = equity;
                sheet.long_term_debt = liabilities;
                sheets.push(sheet);
            }
        }
    }
    sheets
}

#[test]
fn test_second_pass_writes_nothing() {
    let reconciler = BalanceSheetReconciler::default();

    let first = reconciler.reconcile_all(grid());
    assert!(first.stats.records_to_write > 0);

    let second = reconciler.reconcile_all(first.sheets());
    assert_eq!(second.stats.records_to_write, 0);
    assert_eq!(second.stats.discarded, 0);
    assert_eq!(second.sheets(), first.sheets());
}

#[test]
fn test_negative_assets_never_survive() {
    let pass = BalanceSheetReconciler::default().reconcile_all(grid());
    assert!(pass
        .kept
        .iter()
        .all(|r| r.sheet.total_assets.map_or(true, |a| a >= 0.0)));
    assert_eq!(pass.stats.discarded, 81);
}

#[test]
fn test_every_imbalance_is_flagged() {
    let reconciler = BalanceSheetReconciler::default();
    let tolerance = ReconcilerConfig::default().tolerance;

    for reconciled in reconciler.reconcile_all(grid()).kept {
        if let Some(imbalance) = reconciled.sheet.imbalance() {
            let flagged = reconciled.assessment.has(QualityFlag::MajorImbalance)
                || reconciled.assessment.has(QualityFlag::MinorImbalance);
            assert!(
                imbalance.abs() <= tolerance || flagged,
                "unflagged imbalance {} in {:?}",
                imbalance,
                reconciled.sheet
            );
        }
    }
}

#[test]
fn test_repairs_stay_within_bounds() {
    let reconciler = BalanceSheetReconciler::default();

    for reconciled in reconciler.reconcile_all(grid()).kept {
        let assets = reconciled.sheet.total_assets.unwrap_or_default();
        for repair in &reconciled.repairs {
            match *repair {
                Repair::EquityDerived { derived, .. } => assert!(derived >= -0.5 * assets),
                Repair::LiabilitiesDerived { derived } => {
                    assert!((0.0..=assets).contains(&derived))
                }
                _ => {}
            }
        }
    }
}

#[test]
fn test_quality_matches_current_fields() {
    let thresholds = QualityThresholds::default();
    let reconciler = BalanceSheetReconciler::new(ReconcilerConfig::default(), thresholds);

    for reconciled in reconciler.reconcile_all(grid()).kept {
        let fresh = rust_stocks_metrics::quality::assess(&reconciled.sheet, &thresholds);
        assert_eq!(reconciled.assessment, fresh);
        assert_eq!(reconciled.sheet.quality.as_ref(), Some(&fresh));
    }
}

#[test]
fn test_tolerances_are_configurable() {
    let strict = BalanceSheetReconciler::new(
        ReconcilerConfig {
            tolerance: 10.0,
            ..ReconcilerConfig::default()
        },
        QualityThresholds::default(),
    );

    let sheet = create_test_balance_sheet(
        1,
        date(2023, 12, 31),
        Some(1_000_000.0),
        Some(600_000.0),
        Some(100.0),
    );
    let pass = strict.reconcile_all(vec![sheet]);
    assert_eq!(pass.kept[0].sheet.stockholders_equity, Some(400_000.0));
}
