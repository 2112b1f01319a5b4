//! The statistics CSV writer.
//!
//! Semicolon-separated rows, one per algorithm run. The core stays ignorant
//! of locales: values arrive as plain numbers and only this writer may swap
//! the decimal point for a comma when locale-aware spreadsheets are the
//! consumer.

use std::io::{self, Write};

use aknn_core::RunStats;

/// Column headers of the statistics file.
pub const HEADER: &str = "algorithm;totalSec;sortSec;totalAdds;minAdds;maxAdds;avgAdds;\
numStripes;hasAllocError;pendingPoints;firstPassWindows;secondPassWindows;commitSec;\
finalSortSec;diffs;first5DiffIds";

/// Writes run statistics as semicolon-separated rows.
#[derive(Debug)]
pub struct StatsReport<W: Write> {
    writer: W,
    decimal_comma: bool,
}

impl<W: Write> StatsReport<W> {
    /// Wraps `writer` and emits the header row.
    ///
    /// # Errors
    /// Propagates I/O failures from the underlying writer.
    pub fn new(mut writer: W, decimal_comma: bool) -> io::Result<Self> {
        writeln!(writer, "{HEADER}")?;
        Ok(Self {
            writer,
            decimal_comma,
        })
    }

    /// Appends one row. `differences` is `None` when no comparison ran.
    ///
    /// # Errors
    /// Propagates I/O failures from the underlying writer.
    pub fn write_row(
        &mut self,
        algorithm: &str,
        stats: &RunStats,
        differences: Option<&[u64]>,
    ) -> io::Result<()> {
        let mut row = format!(
            "{algorithm};{};{};{};{};{};{};{};{};{};{};{};{};{}",
            seconds(stats.total_seconds),
            seconds(stats.sort_seconds),
            stats.heap.total_additions,
            stats.heap.min_additions,
            stats.heap.max_additions,
            average(stats.heap.avg_additions),
            stats.num_stripes,
            u8::from(stats.has_allocation_error),
            stats.pending_points,
            stats.first_pass_windows,
            stats.second_pass_windows,
            seconds(stats.commit_seconds),
            seconds(stats.final_sort_seconds),
        );
        match differences {
            Some(ids) => {
                row.push_str(&format!(";{}", ids.len()));
                row.push(';');
                let first_five: Vec<String> =
                    ids.iter().take(5).map(u64::to_string).collect();
                row.push_str(&first_five.join(" "));
            }
            None => row.push_str(";;"),
        }
        if self.decimal_comma {
            row = row.replace('.', ",");
        }
        writeln!(self.writer, "{row}")
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    /// Propagates I/O failures from the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn seconds(value: f64) -> String {
    format!("{value:.3}")
}

fn average(value: f64) -> String {
    format!("{value:.3}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aknn_core::HeapStats;

    fn sample_stats() -> RunStats {
        RunStats {
            total_seconds: 1.5,
            sort_seconds: 0.25,
            commit_seconds: 0.125,
            final_sort_seconds: 0.0625,
            heap: HeapStats {
                total_additions: 100,
                min_additions: 2,
                max_additions: 9,
                avg_additions: 4.5,
            },
            num_stripes: 45,
            has_allocation_error: false,
            pending_points: 3,
            first_pass_windows: 4,
            second_pass_windows: 1,
        }
    }

    #[test]
    fn rows_follow_the_column_order() {
        let mut report = StatsReport::new(Vec::new(), false).expect("header");
        report
            .write_row("stripes", &sample_stats(), Some(&[7, 8, 9, 10, 11, 12]))
            .expect("row");
        let bytes = report.finish().expect("finish");
        let text = String::from_utf8(bytes).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(HEADER));
        assert_eq!(
            lines.next(),
            Some("stripes;1.500;0.250;100;2;9;4.500;45;0;3;4;1;0.125;0.063;6;7 8 9 10 11")
        );
    }

    #[test]
    fn skipped_comparison_leaves_the_trailing_columns_empty() {
        let mut report = StatsReport::new(Vec::new(), false).expect("header");
        report
            .write_row("brute", &sample_stats(), None)
            .expect("row");
        let text = String::from_utf8(report.finish().expect("finish")).expect("utf8");
        assert!(text.lines().nth(1).expect("row").ends_with("0.063;;"));
    }

    #[test]
    fn decimal_comma_only_touches_the_numbers() {
        let mut report = StatsReport::new(Vec::new(), true).expect("header");
        report
            .write_row("stripes", &sample_stats(), Some(&[]))
            .expect("row");
        let text = String::from_utf8(report.finish().expect("finish")).expect("utf8");
        let row = text.lines().nth(1).expect("row");
        assert!(row.starts_with("stripes;1,500;0,250;"));
        assert!(!row.contains('.'));
    }
}
