//! Generic table state: three-state column sort, text filter and fixed-size
//! pagination.
//!
//! Rows are kept in insertion order; the visible order is recomputed from
//! that order on every query so that clearing the sort restores it exactly.

use std::cmp::Ordering;

use crate::fmt::parse_duration_ms;
use crate::model::ReconciledQueryView;

// ---------------------------------------------------------------------------
// Sort keys
// ---------------------------------------------------------------------------

/// Comparable value of one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Integer(i64),
    Float(f64),
    String(String),
    /// Duration-like display text (`"123ms"`, `"4.2s"`), compared in milliseconds.
    Duration(String),
    /// Value not available; orders below every present value.
    Missing,
}

impl SortKey {
    fn numeric(&self) -> Option<f64> {
        match self {
            SortKey::Integer(v) => Some(*v as f64),
            SortKey::Float(v) => Some(*v),
            SortKey::Duration(s) => parse_duration_ms(s),
            SortKey::String(_) | SortKey::Missing => None,
        }
    }

    /// Total order: missing < numeric < text.
    pub fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Missing, SortKey::Missing) => Ordering::Equal,
            (SortKey::Missing, _) => Ordering::Less,
            (_, SortKey::Missing) => Ordering::Greater,
            (SortKey::String(a), SortKey::String(b)) => a.cmp(b),
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => match (self, other) {
                    (SortKey::Duration(a), SortKey::Duration(b)) => a.cmp(b),
                    (SortKey::Duration(_), _) => Ordering::Less,
                    (_, SortKey::Duration(_)) => Ordering::Greater,
                    _ => Ordering::Equal,
                },
            },
        }
    }
}

/// A row that can be sorted by column `C` and matched against a filter.
pub trait TableRow<C> {
    fn sort_key(&self, column: C) -> SortKey;

    /// Case-insensitive match; `needle` is already lowercased.
    fn matches(&self, needle: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Sort state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Descending,
    Ascending,
}

/// Active sort. `None` means insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState<C> {
    pub column: C,
    pub direction: SortDirection,
}

/// Next sort after a click on `column`.
///
/// Same column: descending -> ascending -> none. Other column: descending.
pub fn next_sort<C: Copy + PartialEq>(current: Option<SortState<C>>, column: C) -> Option<SortState<C>> {
    match current {
        Some(s) if s.column == column => match s.direction {
            SortDirection::Descending => Some(SortState {
                column,
                direction: SortDirection::Ascending,
            }),
            SortDirection::Ascending => None,
        },
        _ => Some(SortState {
            column,
            direction: SortDirection::Descending,
        }),
    }
}

// ---------------------------------------------------------------------------
// Table view
// ---------------------------------------------------------------------------

/// Rows plus sort, filter and page cursor.
#[derive(Debug, Clone)]
pub struct TableView<R, C> {
    rows: Vec<R>,
    sort: Option<SortState<C>>,
    filter: Option<String>,
    page: usize,
    page_size: usize,
}

impl<R: TableRow<C>, C: Copy + PartialEq> TableView<R, C> {
    pub fn new(page_size: usize) -> Self {
        Self {
            rows: Vec::new(),
            sort: None,
            filter: None,
            page: 1,
            page_size: page_size.max(1),
        }
    }

    /// Replaces all rows. Sort and filter are kept; the page cursor is clamped.
    pub fn set_rows(&mut self, rows: Vec<R>) {
        self.rows = rows;
        self.page = self.page.min(self.page_count());
    }

    /// Drops rows and resets sort, filter and cursor.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.sort = None;
        self.filter = None;
        self.page = 1;
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn sort(&self) -> Option<SortState<C>> {
        self.sort
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Header click: cycles the sort and resets the cursor to page 1.
    pub fn click_sort(&mut self, column: C) {
        self.sort = next_sort(self.sort, column);
        self.page = 1;
    }

    /// Sets the active sort directly and resets the cursor to page 1.
    pub fn set_sort(&mut self, sort: Option<SortState<C>>) {
        self.sort = sort;
        self.page = 1;
    }

    /// Sets the filter (empty means none) and resets the cursor to page 1.
    pub fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty());
        self.page = 1;
    }

    /// Filtered rows in display order. Sorting is stable, so equal keys keep
    /// their insertion order in both directions.
    pub fn visible(&self) -> Vec<&R> {
        let mut out: Vec<&R> = match &self.filter {
            Some(needle) => self.rows.iter().filter(|r| r.matches(needle)).collect(),
            None => self.rows.iter().collect(),
        };
        if let Some(sort) = self.sort {
            out.sort_by(|a, b| {
                let ord = a.sort_key(sort.column).compare(&b.sort_key(sort.column));
                match sort.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }
        out
    }

    pub fn visible_len(&self) -> usize {
        match &self.filter {
            Some(needle) => self.rows.iter().filter(|r| r.matches(needle)).count(),
            None => self.rows.len(),
        }
    }

    /// Number of pages; an empty table still has one (empty) page.
    pub fn page_count(&self) -> usize {
        self.visible_len().div_ceil(self.page_size).max(1)
    }

    /// Moves the cursor, clamping to `1..=page_count`. Returns the page set.
    pub fn set_page(&mut self, page: usize) -> usize {
        self.page = page.clamp(1, self.page_count());
        self.page
    }

    /// Rows of the current page.
    pub fn page_rows(&self) -> Vec<&R> {
        let page = self.page.clamp(1, self.page_count());
        self.visible()
            .into_iter()
            .skip((page - 1) * self.page_size)
            .take(self.page_size)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Query overview columns
// ---------------------------------------------------------------------------

/// Sortable columns of the query overview table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryColumn {
    Id,
    Query,
    ExecutionCount,
    AvgTime,
    TotalTime,
    CallCount,
    LastExecuted,
    Cpu,
    Memory,
    Io,
}

impl QueryColumn {
    pub fn from_name(name: &str) -> Option<Self> {
        let col = match name.trim().to_ascii_lowercase().as_str() {
            "id" | "hash" => QueryColumn::Id,
            "query" => QueryColumn::Query,
            "count" | "executions" => QueryColumn::ExecutionCount,
            "avg" | "avg_time" => QueryColumn::AvgTime,
            "total" | "total_time" => QueryColumn::TotalTime,
            "calls" => QueryColumn::CallCount,
            "last" | "last_executed" => QueryColumn::LastExecuted,
            "cpu" => QueryColumn::Cpu,
            "memory" | "mem" => QueryColumn::Memory,
            "io" => QueryColumn::Io,
            _ => return None,
        };
        Some(col)
    }
}

impl TableRow<QueryColumn> for ReconciledQueryView {
    fn sort_key(&self, column: QueryColumn) -> SortKey {
        let s = &self.stat;
        match column {
            QueryColumn::Id => SortKey::String(s.query_hash.clone()),
            QueryColumn::Query => SortKey::String(s.short_query.clone()),
            QueryColumn::ExecutionCount => SortKey::Integer(s.execution_count as i64),
            QueryColumn::AvgTime => SortKey::Float(s.avg_time_ms),
            QueryColumn::TotalTime => SortKey::Float(s.total_time_ms),
            QueryColumn::CallCount => SortKey::Integer(s.call_count as i64),
            QueryColumn::LastExecuted => SortKey::Integer(s.last_executed_at.timestamp_millis()),
            QueryColumn::Cpu => self
                .resources
                .as_ref()
                .map_or(SortKey::Missing, |r| SortKey::Float(r.cpu_usage_percent)),
            QueryColumn::Memory => self
                .resources
                .as_ref()
                .map_or(SortKey::Missing, |r| SortKey::Float(r.memory_usage_mb)),
            QueryColumn::Io => self
                .resources
                .as_ref()
                .map_or(SortKey::Missing, |r| SortKey::Integer(r.io_blocks)),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.stat.query_hash.to_lowercase().contains(needle)
            || self.stat.full_query.to_lowercase().contains(needle)
            || self.stat.short_query.to_lowercase().contains(needle)
            || self.query_type.as_str().eq_ignore_ascii_case(needle)
    }
}

/// Query overview table.
pub type QueryTable = TableView<ReconciledQueryView, QueryColumn>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        n: i64,
        dur: &'static str,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Col {
        N,
        Dur,
    }

    impl TableRow<Col> for Row {
        fn sort_key(&self, column: Col) -> SortKey {
            match column {
                Col::N => SortKey::Integer(self.n),
                Col::Dur => SortKey::Duration(self.dur.to_string()),
            }
        }

        fn matches(&self, needle: &str) -> bool {
            self.dur.contains(needle)
        }
    }

    fn ids(rows: &[&Row]) -> Vec<u32> {
        rows.iter().map(|r| r.id).collect()
    }

    fn table(rows: Vec<Row>, page_size: usize) -> TableView<Row, Col> {
        let mut t = TableView::new(page_size);
        t.set_rows(rows);
        t
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            Row { id: 1, n: 5, dur: "4.2s" },
            Row { id: 2, n: 9, dur: "123ms" },
            Row { id: 3, n: 5, dur: "1.0m" },
            Row { id: 4, n: 1, dur: "900ms" },
        ]
    }

    #[test]
    fn sort_cycle_desc_asc_none() {
        let mut t = table(sample_rows(), 10);
        t.click_sort(Col::N);
        assert_eq!(ids(&t.visible()), vec![2, 1, 3, 4]);
        t.click_sort(Col::N);
        assert_eq!(ids(&t.visible()), vec![4, 1, 3, 2]);
        t.click_sort(Col::N);
        assert_eq!(t.sort(), None);
        assert_eq!(ids(&t.visible()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn other_column_resets_to_descending() {
        let mut t = table(sample_rows(), 10);
        t.click_sort(Col::N);
        t.click_sort(Col::N);
        t.click_sort(Col::Dur);
        assert_eq!(
            t.sort(),
            Some(SortState {
                column: Col::Dur,
                direction: SortDirection::Descending
            })
        );
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let mut t = table(sample_rows(), 10);
        t.click_sort(Col::N);
        let desc = ids(&t.visible());
        assert!(desc.iter().position(|&i| i == 1) < desc.iter().position(|&i| i == 3));
        t.click_sort(Col::N);
        let asc = ids(&t.visible());
        assert!(asc.iter().position(|&i| i == 1) < asc.iter().position(|&i| i == 3));
    }

    #[test]
    fn duration_strings_compare_in_milliseconds() {
        let mut t = table(sample_rows(), 10);
        t.click_sort(Col::Dur);
        assert_eq!(ids(&t.visible()), vec![3, 1, 4, 2]);
    }

    #[test]
    fn query_times_sort_on_raw_milliseconds() {
        use chrono::{TimeZone, Utc};

        use crate::model::AggregatedQueryStat;
        use crate::reconcile::reconcile;

        let stat = |hash: &str, avg: f64| AggregatedQueryStat {
            query_hash: hash.into(),
            short_query: hash.into(),
            full_query: hash.into(),
            execution_count: 2,
            avg_time_ms: avg,
            total_time_ms: avg * 2.0,
            call_count: 2,
            query_type: None,
            last_executed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        // 1.21s/1.24s and 60.1s/62.9s render identically in compact form
        let stats = [
            stat("a", 1210.0),
            stat("b", 1240.0),
            stat("c", 60_100.0),
            stat("d", 62_900.0),
        ];
        let mut t = QueryTable::new(10);
        t.set_rows(reconcile(&stats, &[]));
        let hashes = |t: &QueryTable| -> Vec<String> {
            t.visible().iter().map(|r| r.stat.query_hash.clone()).collect()
        };

        t.click_sort(QueryColumn::AvgTime);
        assert_eq!(hashes(&t), ["d", "c", "b", "a"]);
        t.click_sort(QueryColumn::AvgTime);
        assert_eq!(hashes(&t), ["a", "b", "c", "d"]);
        t.click_sort(QueryColumn::TotalTime);
        assert_eq!(hashes(&t), ["d", "c", "b", "a"]);
    }

    #[test]
    fn pagination_clamps_past_last_page() {
        let rows = (0..23).map(|i| Row { id: i, n: 0, dur: "1ms" }).collect();
        let mut t = table(rows, 5);
        assert_eq!(t.page_count(), 5);
        assert_eq!(t.set_page(5), 5);
        assert_eq!(t.page_rows().len(), 3);
        assert_eq!(t.set_page(9), 5);
        assert_eq!(ids(&t.page_rows()), vec![20, 21, 22]);
        assert_eq!(t.set_page(0), 1);
    }

    #[test]
    fn sort_and_filter_reset_page() {
        let rows = (0..23).map(|i| Row { id: i, n: i as i64, dur: "1ms" }).collect();
        let mut t = table(rows, 5);
        t.set_page(4);
        t.click_sort(Col::N);
        assert_eq!(t.page(), 1);
        t.set_page(3);
        t.set_filter(Some("1MS".into()));
        assert_eq!(t.page(), 1);
        assert_eq!(t.visible_len(), 23);
    }

    #[test]
    fn empty_table_has_one_page() {
        let mut t: TableView<Row, Col> = TableView::new(5);
        assert_eq!(t.page_count(), 1);
        assert_eq!(t.set_page(3), 1);
        assert!(t.page_rows().is_empty());
    }

    #[test]
    fn missing_values_sort_last_when_descending() {
        assert_eq!(SortKey::Missing.compare(&SortKey::Float(0.0)), Ordering::Less);
        assert_eq!(
            SortKey::Duration("2s".into()).compare(&SortKey::Integer(1500)),
            Ordering::Greater
        );
    }
}
