use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::database_sqlx::DatabaseManagerSqlx;
use crate::error::Result;
use crate::models::DerivedMetricRecord;

/// Write metric rows as CSV with a header. Absent values are empty cells.
pub fn write_metrics_csv<W: Write>(records: &[DerivedMetricRecord], writer: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(records.len())
}

/// Export every persisted metric row for a company to `path`
pub async fn export_company_metrics(
    db: &DatabaseManagerSqlx,
    company_id: i64,
    path: &Path,
) -> Result<usize> {
    let records = db.get_metrics_for_company(company_id).await?;
    let file = std::fs::File::create(path)?;
    let written = write_metrics_csv(&records, file)?;
    info!("📁 Exported {} metric rows to {}", written, path.display());
    Ok(written)
}
