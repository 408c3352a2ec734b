// src/period.rs
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::EtlError;

/// `<year>_<month>_<half>` or `<year>-<month>-<half>`; the separator must not mix.
static PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})([_-])(\p{L}{3,4})([_-])(\d+)$").expect("valid regex"));

/// Localized (pt-BR) month abbreviations used in export folder names.
const MONTHS: [(&str, u32); 12] = [
    ("Jan", 1),
    ("Fev", 2),
    ("Mar", 3),
    ("Abr", 4),
    ("Maio", 5),
    ("Jun", 6),
    ("Jul", 7),
    ("Ago", 8),
    ("Set", 9),
    ("Out", 10),
    ("Nov", 11),
    ("Dez", 12),
];

/// Which half of the month an export covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Half {
    First,
    Second,
}

/// A half-month extraction bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExtractionPeriod {
    pub token: String,
    pub year: i32,
    pub month: u32,
    pub half: Half,
}

impl ExtractionPeriod {
    /// Parse a period token such as `2024_Jun_1` or `2024-Fev-2`.
    pub fn parse(token: &str) -> Result<Self, EtlError> {
        let token = token.trim();
        let caps = PERIOD_RE
            .captures(token)
            .ok_or_else(|| EtlError::MalformedPeriod(token.to_string()))?;
        if caps[2] != caps[4] {
            return Err(EtlError::MalformedPeriod(token.to_string()));
        }

        let year: i32 = caps[1]
            .parse()
            .map_err(|_| EtlError::MalformedPeriod(token.to_string()))?;
        let month = month_number(&caps[3]).ok_or_else(|| EtlError::UnknownMonth {
            token: token.to_string(),
            month: caps[3].to_string(),
        })?;
        let half = match &caps[5] {
            "1" => Half::First,
            "2" => Half::Second,
            _ => return Err(EtlError::MalformedPeriod(token.to_string())),
        };

        Ok(Self {
            token: token.to_string(),
            year,
            month,
            half,
        })
    }

    /// Representative date: the 15th for the first half, the month's last
    /// calendar day for the second.
    pub fn extraction_date(&self) -> Result<NaiveDate, EtlError> {
        let day = match self.half {
            Half::First => 15,
            Half::Second => last_day_of_month(self.year, self.month)
                .ok_or_else(|| EtlError::MalformedPeriod(self.token.clone()))?,
        };
        NaiveDate::from_ymd_opt(self.year, self.month, day)
            .ok_or_else(|| EtlError::MalformedPeriod(self.token.clone()))
    }
}

impl fmt::Display for ExtractionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

fn month_number(abbrev: &str) -> Option<u32> {
    MONTHS
        .iter()
        .find(|(name, _)| *name == abbrev)
        .map(|(_, n)| *n)
}

/// Last day of `month` in the proleptic Gregorian calendar.
pub fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|d| d.day())
}

/// Parse a token and derive its extraction date in one go.
pub fn extraction_date(token: &str) -> Result<NaiveDate, EtlError> {
    ExtractionPeriod::parse(token)?.extraction_date()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn first_half_is_the_fifteenth() {
        assert_eq!(extraction_date("2024_Jun_1").unwrap(), ymd(2024, 6, 15));
        assert_eq!(extraction_date("2035-Jan-1").unwrap(), ymd(2035, 1, 15));
    }

    #[test]
    fn second_half_is_month_end() {
        assert_eq!(extraction_date("2024_Fev_2").unwrap(), ymd(2024, 2, 29));
        assert_eq!(extraction_date("2023_Fev_2").unwrap(), ymd(2023, 2, 28));
        assert_eq!(extraction_date("2024-Dez-2").unwrap(), ymd(2024, 12, 31));
        assert_eq!(extraction_date("2024_Abr_2").unwrap(), ymd(2024, 4, 30));
        assert_eq!(extraction_date("1900_Fev_2").unwrap(), ymd(1900, 2, 28));
        assert_eq!(extraction_date("2000_Fev_2").unwrap(), ymd(2000, 2, 29));
    }

    #[test]
    fn four_letter_month() {
        assert_eq!(extraction_date("2024_Maio_2").unwrap(), ymd(2024, 5, 31));
    }

    #[test]
    fn unknown_month_is_fatal() {
        let err = extraction_date("2024_June_1").unwrap_err();
        assert!(matches!(err, EtlError::UnknownMonth { ref month, .. } if month == "June"));
        // English abbreviation that is not in the localized table
        assert!(matches!(
            extraction_date("2024_Feb_2"),
            Err(EtlError::UnknownMonth { .. })
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for bad in ["2024_Jun", "2024_Jun_3", "24_Jun_1", "2024_Jun-1", "", "2024__1"] {
            assert!(
                matches!(ExtractionPeriod::parse(bad), Err(EtlError::MalformedPeriod(_))),
                "{bad} should be malformed"
            );
        }
    }
}
