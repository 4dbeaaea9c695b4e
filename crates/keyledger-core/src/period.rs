//! Calendar primitives: coarse dates and quarter period labels.
//!
//! Both types are plaintext metadata. They are deliberately coarse: a
//! record carries a day, never a time, and keys are partitioned per
//! quarter.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Years a date or period label may name.
const YEARS: std::ops::RangeInclusive<u16> = 1970..=9999;

/// A calendar date (`YYYY-MM-DD`), ordered chronologically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoarseDate(NaiveDate);

impl CoarseDate {
    /// Build a date, validating month and day (leap years included).
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self, CoreError> {
        let err = || CoreError::InvalidDate(format!("{year:04}-{month:02}-{day:02}"));
        if !YEARS.contains(&year) {
            return Err(err());
        }
        NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())
            .map(Self)
            .ok_or_else(err)
    }

    // Accessors narrow chrono's wider integers; `new` bounds every field.

    pub fn year(&self) -> u16 {
        self.0.year() as u16
    }

    pub fn month(&self) -> u8 {
        self.0.month() as u8
    }

    pub fn day(&self) -> u8 {
        self.0.day() as u8
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    /// The quarter this date falls in.
    pub fn period(&self) -> PeriodLabel {
        PeriodLabel {
            year: self.year(),
            quarter: (self.0.month0() / 3 + 1) as u8,
        }
    }
}

impl TryFrom<NaiveDate> for CoarseDate {
    type Error = CoreError;

    fn try_from(date: NaiveDate) -> Result<Self, Self::Error> {
        let year = u16::try_from(date.year())
            .map_err(|_| CoreError::InvalidDate(date.to_string()))?;
        Self::new(year, date.month() as u8, date.day() as u8)
    }
}

fn parse_digits<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for CoarseDate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CoreError::InvalidDate(s.to_string());
        // chrono also takes signed years and unpadded fields; the wire
        // form is exactly ten characters.
        let shape_ok = s.len() == 10
            && s.bytes().enumerate().all(|(i, b)| match i {
                4 | 7 => b == b'-',
                _ => b.is_ascii_digit(),
            });
        if !shape_ok {
            return Err(err());
        }
        let date = NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| err())?;
        Self::try_from(date).map_err(|_| err())
    }
}

impl fmt::Display for CoarseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl fmt::Debug for CoarseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoarseDate({self})")
    }
}

impl TryFrom<String> for CoarseDate {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CoarseDate> for String {
    fn from(d: CoarseDate) -> Self {
        d.to_string()
    }
}

/// A quarter label (`YYYY-Qn`) partitioning keys of temporal scopes.
///
/// Treated as opaque by the derivation tree; the structure is only used
/// to find the next label when a rolling grant window moves forward.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodLabel {
    year: u16,
    quarter: u8,
}

impl PeriodLabel {
    /// Build a label, validating the quarter.
    pub fn new(year: u16, quarter: u8) -> Result<Self, CoreError> {
        if !YEARS.contains(&year) || !(1..=4).contains(&quarter) {
            return Err(CoreError::InvalidPeriod(format!("{year}-Q{quarter}")));
        }
        Ok(Self { year, quarter })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// The quarter containing `date`.
    pub fn containing(date: &CoarseDate) -> Self {
        date.period()
    }

    /// First calendar day of the quarter.
    pub fn first_day(&self) -> Result<CoarseDate, CoreError> {
        CoarseDate::new(self.year, (self.quarter - 1) * 3 + 1, 1)
    }

    /// Whether `date` falls inside this quarter.
    pub fn contains(&self, date: &CoarseDate) -> bool {
        date.period() == *self
    }

    /// The following quarter, or `None` past year 9999.
    pub fn next(&self) -> Option<Self> {
        if self.quarter == 4 {
            Self::new(self.year.checked_add(1)?, 1).ok()
        } else {
            Some(Self {
                year: self.year,
                quarter: self.quarter + 1,
            })
        }
    }

    /// The preceding quarter, or `None` before 1970.
    pub fn prev(&self) -> Option<Self> {
        if self.quarter == 1 {
            Self::new(self.year.checked_sub(1)?, 4).ok()
        } else {
            Some(Self {
                year: self.year,
                quarter: self.quarter - 1,
            })
        }
    }
}

impl FromStr for PeriodLabel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CoreError::InvalidPeriod(s.to_string());
        let bytes = s.as_bytes();
        if !s.is_ascii() || bytes.len() != 7 || &s[4..6] != "-Q" {
            return Err(err());
        }
        let year = parse_digits(&s[0..4]).ok_or_else(err)?;
        let quarter = parse_digits(&s[6..7]).ok_or_else(err)?;
        Self::new(year, quarter).map_err(|_| err())
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-Q{}", self.year, self.quarter)
    }
}

impl fmt::Debug for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeriodLabel({self})")
    }
}

impl TryFrom<String> for PeriodLabel {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeriodLabel> for String {
    fn from(p: PeriodLabel) -> Self {
        p.to_string()
    }
}
