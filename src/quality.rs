//! Balance-sheet quality scoring.
//!
//! The score is a pure function of the three core fields. It is recomputed by
//! every reconciliation pass and never read back as an input.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::models::BalanceSheet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    MissingAssets,
    MissingLiabilities,
    MissingEquity,
    MajorImbalance,
    MinorImbalance,
    Clean,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::MissingAssets => "missing_assets",
            QualityFlag::MissingLiabilities => "missing_liabilities",
            QualityFlag::MissingEquity => "missing_equity",
            QualityFlag::MajorImbalance => "major_imbalance",
            QualityFlag::MinorImbalance => "minor_imbalance",
            QualityFlag::Clean => "clean",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityFlag {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "missing_assets" => Ok(QualityFlag::MissingAssets),
            "missing_liabilities" => Ok(QualityFlag::MissingLiabilities),
            "missing_equity" => Ok(QualityFlag::MissingEquity),
            "major_imbalance" => Ok(QualityFlag::MajorImbalance),
            "minor_imbalance" => Ok(QualityFlag::MinorImbalance),
            "clean" => Ok(QualityFlag::Clean),
            other => Err(EngineError::SchemaMismatch(format!(
                "unknown quality flag '{}'",
                other
            ))),
        }
    }
}

/// Score in [0, 100] plus the flags that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: u8,
    pub flags: BTreeSet<QualityFlag>,
}

impl QualityAssessment {
    fn single(score: u8, flag: QualityFlag) -> Self {
        Self {
            score,
            flags: BTreeSet::from([flag]),
        }
    }

    pub fn has(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Comma-separated flag list, the form stored in `balance_sheets.quality_flags`
    pub fn flags_to_string(&self) -> String {
        self.flags
            .iter()
            .map(QualityFlag::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse_flags(raw: &str) -> Result<BTreeSet<QualityFlag>, EngineError> {
        raw.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect()
    }
}

/// Absolute imbalance thresholds for the two imbalance flags
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub major_imbalance: f64,
    pub minor_imbalance: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            major_imbalance: 1_000_000.0,
            minor_imbalance: 100_000.0,
        }
    }
}

/// Scores a balance sheet. First matching row wins.
pub fn assess(sheet: &BalanceSheet, thresholds: &QualityThresholds) -> QualityAssessment {
    let (assets, liabilities, equity) = match (
        sheet.total_assets,
        sheet.total_liabilities,
        sheet.stockholders_equity,
    ) {
        (None, _, _) => return QualityAssessment::single(0, QualityFlag::MissingAssets),
        (_, None, _) => return QualityAssessment::single(30, QualityFlag::MissingLiabilities),
        (_, _, None) => return QualityAssessment::single(30, QualityFlag::MissingEquity),
        (Some(a), Some(l), Some(e)) => (a, l, e),
    };

    let imbalance = (assets - (liabilities + equity)).abs();
    if imbalance > thresholds.major_imbalance {
        QualityAssessment::single(50, QualityFlag::MajorImbalance)
    } else if imbalance > thresholds.minor_imbalance {
        QualityAssessment::single(80, QualityFlag::MinorImbalance)
    } else {
        QualityAssessment::single(100, QualityFlag::Clean)
    }
}

/// Aggregate view over a set of assessed balance sheets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_records: usize,
    pub complete_records: usize,
    pub flag_counts: BTreeMap<QualityFlag, usize>,
}

impl QualityReport {
    pub fn record(&mut self, sheet: &BalanceSheet, assessment: &QualityAssessment) {
        self.total_records += 1;
        if sheet.has_core_fields() {
            self.complete_records += 1;
        }
        for flag in &assessment.flags {
            *self.flag_counts.entry(*flag).or_insert(0) += 1;
        }
    }

    pub fn merge(&mut self, other: &QualityReport) {
        self.total_records += other.total_records;
        self.complete_records += other.complete_records;
        for (flag, count) in &other.flag_counts {
            *self.flag_counts.entry(*flag).or_insert(0) += count;
        }
    }

    pub fn count(&self, flag: QualityFlag) -> usize {
        self.flag_counts.get(&flag).copied().unwrap_or(0)
    }

    pub fn remaining_major_imbalances(&self) -> usize {
        self.count(QualityFlag::MajorImbalance)
    }

    /// `100 - major_imbalances / total * 100`, floored at zero
    pub fn overall_score(&self) -> f64 {
        if self.total_records == 0 {
            return 100.0;
        }
        let ratio = self.remaining_major_imbalances() as f64 / self.total_records as f64;
        (100.0 - ratio * 100.0).max(0.0)
    }

    pub fn completeness(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.complete_records as f64 / self.total_records as f64
    }
}
