//! Sampling period of one source row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bar length published by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Granularity {
    #[default]
    #[serde(rename = "1s")]
    OneSecond,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown granularity '{0}' (expected one of {list})", list = Granularity::ALL_LABELS.join(","))]
pub struct UnknownGranularity(pub String);

impl Granularity {
    pub const ALL: [Granularity; 13] = [
        Granularity::OneSecond,
        Granularity::OneMinute,
        Granularity::ThreeMinutes,
        Granularity::FiveMinutes,
        Granularity::FifteenMinutes,
        Granularity::ThirtyMinutes,
        Granularity::OneHour,
        Granularity::TwoHours,
        Granularity::FourHours,
        Granularity::SixHours,
        Granularity::EightHours,
        Granularity::TwelveHours,
        Granularity::OneDay,
    ];

    pub const ALL_LABELS: [&'static str; 13] = [
        "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d",
    ];

    /// Label used in provider URLs and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::OneSecond => "1s",
            Granularity::OneMinute => "1m",
            Granularity::ThreeMinutes => "3m",
            Granularity::FiveMinutes => "5m",
            Granularity::FifteenMinutes => "15m",
            Granularity::ThirtyMinutes => "30m",
            Granularity::OneHour => "1h",
            Granularity::TwoHours => "2h",
            Granularity::FourHours => "4h",
            Granularity::SixHours => "6h",
            Granularity::EightHours => "8h",
            Granularity::TwelveHours => "12h",
            Granularity::OneDay => "1d",
        }
    }

    /// Bar length in milliseconds.
    pub fn millis(&self) -> u64 {
        const SECOND: u64 = 1_000;
        const MINUTE: u64 = 60 * SECOND;
        const HOUR: u64 = 60 * MINUTE;
        match self {
            Granularity::OneSecond => SECOND,
            Granularity::OneMinute => MINUTE,
            Granularity::ThreeMinutes => 3 * MINUTE,
            Granularity::FiveMinutes => 5 * MINUTE,
            Granularity::FifteenMinutes => 15 * MINUTE,
            Granularity::ThirtyMinutes => 30 * MINUTE,
            Granularity::OneHour => HOUR,
            Granularity::TwoHours => 2 * HOUR,
            Granularity::FourHours => 4 * HOUR,
            Granularity::SixHours => 6 * HOUR,
            Granularity::EightHours => 8 * HOUR,
            Granularity::TwelveHours => 12 * HOUR,
            Granularity::OneDay => 24 * HOUR,
        }
    }

    /// Lenient parse: blank or unknown input falls back to the default.
    ///
    /// Returns the warning to surface when a substitution happened.
    pub fn resolve(input: &str) -> (Granularity, Option<String>) {
        match input.parse::<Granularity>() {
            Ok(g) => (g, None),
            Err(e) => {
                let fallback = Granularity::default();
                let warning = if input.trim().is_empty() {
                    format!("granularity left blank, using default '{fallback}'")
                } else {
                    format!("{e}, using default '{fallback}'")
                };
                (fallback, Some(warning))
            }
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Granularity::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownGranularity(s.to_string()))
    }
}
