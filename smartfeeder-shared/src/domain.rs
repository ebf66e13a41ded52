use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Rejection reasons when building a schedule definition.
///
/// Definitions are validated once, at construction; the occurrence
/// calculator can assume every value it sees is well-formed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleValidationError {
    #[error("dispense count must be at least 1, got {0}")]
    BadCount(u32),
    #[error("repeat interval must be at least 1, got {0}")]
    BadInterval(u32),
    #[error("unsupported interval unit: {0:?}")]
    UnsupportedUnit(String),
    #[error("weekly schedule needs at least one weekday")]
    NoWeekdays,
    #[error("weekday index {0} out of range (0=Monday..6=Sunday)")]
    BadWeekday(u8),
}

/// Repeat interval unit for recurring schedules. Only whole days are
/// supported; any other unit string is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
}

impl FromStr for IntervalUnit {
    type Err = ScheduleValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "days" => Ok(IntervalUnit::Days),
            other => Err(ScheduleValidationError::UnsupportedUnit(other.to_string())),
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Days => write!(f, "days"),
        }
    }
}

/// Operational status a feeder reports back after a drop attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeederStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
}

impl fmt::Display for FeederStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeederStatus::Ok => write!(f, "OK"),
            FeederStatus::Fail => write!(f, "FAIL"),
        }
    }
}

impl FromStr for FeederStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(FeederStatus::Ok),
            "FAIL" => Ok(FeederStatus::Fail),
            other => Err(format!("unknown feeder status: {other:?}")),
        }
    }
}

/// Provisioning record for one feeder device: where it lives on the
/// network and the key pair it authenticates with. The credential is a
/// bcrypt hash; the plaintext never reaches the server config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederSeed {
    pub product_key: String,
    pub password_hash: String,
    pub address: String,
}

/// Single-letter schedule discriminant, as carried on queue entries and
/// feeding log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleKind {
    #[serde(rename = "R")]
    Recurring,
    #[serde(rename = "W")]
    Weekly,
    #[serde(rename = "S")]
    Single,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::Recurring => write!(f, "R"),
            ScheduleKind::Weekly => write!(f, "W"),
            ScheduleKind::Single => write!(f, "S"),
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" => Ok(ScheduleKind::Recurring),
            "W" => Ok(ScheduleKind::Weekly),
            "S" => Ok(ScheduleKind::Single),
            other => Err(format!("unknown schedule kind: {other:?}")),
        }
    }
}

/// A single entry in a feeder's feeding schedule.
///
/// Closed tagged union; each variant validates its own required fields in
/// the constructors below. A feeder holds a *set* of these: two
/// definitions are the same schedule iff they are structurally equal, and
/// time-of-day is truncated to whole minutes at construction so equality
/// never depends on stray seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScheduleDef {
    /// Every `every` days at `time`, anchored to the day of year.
    #[serde(rename = "R")]
    Recurring {
        time: NaiveTime,
        every: u32,
        unit: IntervalUnit,
        count: u32,
    },
    /// At `time` on each of the given weekdays (0=Monday..6=Sunday).
    #[serde(rename = "W")]
    Weekly {
        time: NaiveTime,
        days: Vec<u8>,
        count: u32,
    },
    /// One-shot at an absolute timestamp; deleted once materialized.
    #[serde(rename = "S")]
    Single { at: NaiveDateTime, count: u32 },
}

fn check_count(count: u32) -> Result<(), ScheduleValidationError> {
    if count < 1 {
        return Err(ScheduleValidationError::BadCount(count));
    }
    Ok(())
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

impl ScheduleDef {
    pub fn recurring(
        time: NaiveTime,
        every: u32,
        unit: IntervalUnit,
        count: u32,
    ) -> Result<Self, ScheduleValidationError> {
        check_count(count)?;
        if every < 1 {
            return Err(ScheduleValidationError::BadInterval(every));
        }
        Ok(ScheduleDef::Recurring {
            time: truncate_to_minute(time),
            every,
            unit,
            count,
        })
    }

    pub fn weekly(
        time: NaiveTime,
        days: &[u8],
        count: u32,
    ) -> Result<Self, ScheduleValidationError> {
        check_count(count)?;
        if days.is_empty() {
            return Err(ScheduleValidationError::NoWeekdays);
        }
        if let Some(bad) = days.iter().find(|d| **d > 6) {
            return Err(ScheduleValidationError::BadWeekday(*bad));
        }
        let mut days = days.to_vec();
        days.sort_unstable();
        days.dedup();
        Ok(ScheduleDef::Weekly {
            time: truncate_to_minute(time),
            days,
            count,
        })
    }

    pub fn single(at: NaiveDateTime, count: u32) -> Result<Self, ScheduleValidationError> {
        check_count(count)?;
        Ok(ScheduleDef::Single {
            at: at.date().and_time(truncate_to_minute(at.time())),
            count,
        })
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            ScheduleDef::Recurring { .. } => ScheduleKind::Recurring,
            ScheduleDef::Weekly { .. } => ScheduleKind::Weekly,
            ScheduleDef::Single { .. } => ScheduleKind::Single,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            ScheduleDef::Recurring { count, .. }
            | ScheduleDef::Weekly { count, .. }
            | ScheduleDef::Single { count, .. } => *count,
        }
    }

    /// Canonical JSON encoding, used as the structural-identity key for
    /// set membership in the store. Field order is the declaration order,
    /// weekday lists are sorted and deduped, times carry no seconds, so
    /// equal definitions always encode identically.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).expect("schedule definition serializes")
    }

    pub fn from_canonical(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn recurring_truncates_seconds() {
        let a = ScheduleDef::recurring(t(7, 30, 42), 2, IntervalUnit::Days, 1).unwrap();
        let b = ScheduleDef::recurring(t(7, 30, 0), 2, IntervalUnit::Days, 1).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn weekly_days_are_a_set() {
        let a = ScheduleDef::weekly(t(12, 0, 0), &[4, 0, 4, 2], 2).unwrap();
        let b = ScheduleDef::weekly(t(12, 0, 0), &[0, 2, 4], 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(
            ScheduleDef::recurring(t(7, 0, 0), 0, IntervalUnit::Days, 1),
            Err(ScheduleValidationError::BadInterval(0))
        );
        assert_eq!(
            ScheduleDef::weekly(t(7, 0, 0), &[], 1),
            Err(ScheduleValidationError::NoWeekdays)
        );
        assert_eq!(
            ScheduleDef::weekly(t(7, 0, 0), &[1, 7], 1),
            Err(ScheduleValidationError::BadWeekday(7))
        );
        let at = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            ScheduleDef::single(at, 0),
            Err(ScheduleValidationError::BadCount(0))
        );
    }

    #[test]
    fn unit_parsing_rejects_non_days() {
        assert!("days".parse::<IntervalUnit>().is_ok());
        assert_eq!(
            "hours".parse::<IntervalUnit>(),
            Err(ScheduleValidationError::UnsupportedUnit("hours".into()))
        );
    }

    #[test]
    fn canonical_round_trips() {
        let def = ScheduleDef::weekly(t(18, 30, 0), &[0, 2, 4, 6], 3).unwrap();
        let back = ScheduleDef::from_canonical(&def.canonical()).unwrap();
        assert_eq!(def, back);
    }
}
