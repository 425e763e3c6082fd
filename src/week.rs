use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

pub const WEEK_DIR_PREFIX: &str = "CW_";

/// A calendar week and its ISO year. Orders by year, then week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CalendarWeek {
    pub year: i32,
    pub week: u32,
}

impl CalendarWeek {
    pub fn new(year: i32, week: u32) -> Option<Self> {
        (year >= 0 && (1..=53).contains(&week)).then_some(Self { year, week })
    }

    /// The ISO week of the given date.
    pub fn of_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    pub fn current() -> Self {
        Self::of_date(Local::now().date_naive())
    }

    /// Parses a path of style `../YYYY/CW_WW`.
    pub fn from_path(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let malformed = |reason| StoreError::MalformedPath {
            path: path.to_path_buf(),
            reason,
        };

        let dir_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| malformed("missing week segment"))?;
        let week = parse_week_dir(dir_name)
            .ok_or_else(|| malformed("week is not of expected format 'CW_WW'"))?;

        let year = path
            .parent()
            .and_then(|parent| parent.file_name())
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|name| name.parse::<i32>().ok())
            .ok_or_else(|| malformed("year is not a number"))?;

        Self::new(year, week).ok_or_else(|| malformed("week out of range"))
    }

    /// Relative folder of the week, e.g. `2024/CW_07`.
    pub fn path(&self) -> PathBuf {
        Path::new(&self.year.to_string()).join(self.dir_name())
    }

    /// Same as [`CalendarWeek::path`] but always `/` separated, for URLs.
    pub fn href(&self) -> String {
        format!("{}/{}", self.year, self.dir_name())
    }

    pub fn dir_name(&self) -> String {
        format!("{WEEK_DIR_PREFIX}{:02}", self.week)
    }

    /// Relative path of a file inside this week's folder.
    pub fn image_path(&self, file_name: &str) -> PathBuf {
        self.path().join(file_name)
    }

    pub fn before(&self, other: &CalendarWeek) -> bool {
        self < other
    }
}

impl fmt::Display for CalendarWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

fn parse_week_dir(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(WEEK_DIR_PREFIX)?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
