//! Splitting a date range into calendar-month windows.
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive date span confined to a single calendar month.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// `YYYY_MM` of the month this window lies in.
    pub fn label(&self) -> String {
        self.start.format("%Y_%m").to_string()
    }

    /// Order name, also used as the month's download directory. Months are
    /// disjoint so this is unique within a run.
    pub fn order_name(&self) -> String {
        format!("order_{}", self.label())
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Produces ordered, contiguous month windows covering `[start, end]`.
///
/// The first window starts at `start`, the last ends at `end`, and every
/// window is clipped to one calendar month. Callers validate `start <= end`;
/// a reversed range yields no windows.
pub fn month_windows(start: NaiveDate, end: NaiveDate) -> Vec<DateWindow> {
    let mut windows = vec![];
    let mut cursor = start;

    while cursor <= end {
        let next_month = first_of_next_month(cursor);
        let month_end = next_month
            .and_then(|d| d.pred_opt())
            .map_or(end, |d| d.min(end));

        windows.push(DateWindow {
            start: cursor,
            end: month_end,
        });

        match next_month {
            Some(d) => cursor = d,
            None => break,
        }
    }
    windows
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = match date.month() {
        12 => (date.year() + 1, 1),
        m => (date.year(), m + 1),
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}
