//! CSV export of the query overview table.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use thiserror::Error;
use tracing::info;

use crate::fmt::{FmtStyle, format_ms, normalize_for_display};
use crate::model::ReconciledQueryView;

pub const CSV_HEADER: [&str; 6] = ["ID", "QUERY", "실행횟수", "평균 시간", "총 시간", "호출 수"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// `execution_status_<YYYYMMDD>_<HHmm>.csv`
pub fn export_file_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("execution_status_{}.csv", now.format("%Y%m%d_%H%M"))
}

/// Writes BOM, header and one record per row, in the given order.
pub fn write_csv<'a, W, I>(rows: I, mut out: W) -> Result<usize, ExportError>
where
    W: Write,
    I: IntoIterator<Item = &'a ReconciledQueryView>,
{
    out.write_all(UTF8_BOM)?;
    let mut writer = csv::WriterBuilder::new().from_writer(out);
    writer.write_record(CSV_HEADER)?;
    let mut count = 0;
    for row in rows {
        let stat = &row.stat;
        writer.write_record([
            stat.query_hash.clone(),
            normalize_for_display(stat.query_text()),
            stat.execution_count.to_string(),
            format_ms(stat.avg_time_ms, FmtStyle::Compact),
            format_ms(stat.total_time_ms, FmtStyle::Compact),
            stat.call_count.to_string(),
        ])?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Writes the export into `dir` and returns the file path.
pub fn export_to_dir<'a, Tz, I>(
    dir: &Path,
    rows: I,
    now: &DateTime<Tz>,
) -> Result<PathBuf, ExportError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
    I: IntoIterator<Item = &'a ReconciledQueryView>,
{
    let path = dir.join(export_file_name(now));
    let file = File::create(&path)?;
    let count = write_csv(rows, BufWriter::new(file))?;
    info!(path = %path.display(), rows = count, "exported query table");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::model::AggregatedQueryStat;
    use crate::reconcile::reconcile;

    fn rows() -> Vec<ReconciledQueryView> {
        let stat = |hash: &str, query: &str, count: u64, avg: f64| AggregatedQueryStat {
            query_hash: hash.into(),
            short_query: String::new(),
            full_query: query.into(),
            execution_count: count,
            avg_time_ms: avg,
            total_time_ms: avg * count as f64,
            call_count: count,
            query_type: None,
            last_executed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        reconcile(
            &[
                stat("a1", "SELECT *\n  FROM users", 3, 120.0),
                stat("b2", "SELECT 'x, \"y\"'", 1, 4200.0),
            ],
            &[],
        )
    }

    #[test]
    fn file_name_pattern() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 9, 7, 44).unwrap();
        assert_eq!(export_file_name(&now), "execution_status_20260105_0907.csv");
    }

    #[test]
    fn csv_has_bom_header_and_quoting() {
        let mut buf = Vec::new();
        let n = write_csv(&rows(), &mut buf).unwrap();
        assert_eq!(n, 2);
        assert!(buf.starts_with(UTF8_BOM));
        let text = String::from_utf8(buf[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID,QUERY,실행횟수,평균 시간,총 시간,호출 수");
        assert_eq!(lines[1], "a1,SELECT * FROM users,3,120ms,360ms,3");
        assert_eq!(lines[2], r#"b2,"SELECT 'x, ""y""'",1,4.2s,4.2s,1"#);
    }

    #[test]
    fn export_writes_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        let path = export_to_dir(dir.path(), &rows(), &now).unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("execution_status_20260301_2359.csv")
        );
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(String::from_utf8_lossy(&bytes).lines().count(), 3);
    }
}
