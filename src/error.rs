use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{PeriodType, StatementKind};

/// Failure taxonomy for the metrics engine.
///
/// Missing statement fields are not errors; they travel as `None` and come out
/// the other side as absent ratios.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Corrupt {kind} record for company {company_id} on {period_ending}: {reason}")]
    DataCorruption {
        kind: StatementKind,
        company_id: i64,
        period_ending: NaiveDate,
        reason: String,
    },

    #[error("Integrity anomaly: {count} {kind} records for company {company_id} on {period_ending} ({period_type})")]
    IntegrityAnomaly {
        kind: StatementKind,
        company_id: i64,
        period_ending: NaiveDate,
        period_type: PeriodType,
        count: usize,
    },

    #[error("Transient I/O failure during {operation}: {message}")]
    TransientIo { operation: String, message: String },

    #[error("Unknown company id {0}")]
    UnknownCompany(i64),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::TransientIo {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::TransientIo { .. } => true,
            EngineError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            EngineError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
