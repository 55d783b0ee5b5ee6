use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDayRange")]
pub struct DayRange {
    #[serde(with = "humantime_serde")]
    start: Duration,
    #[serde(with = "humantime_serde")]
    end: Duration,
}

#[derive(Deserialize)]
struct RawDayRange {
    #[serde(with = "humantime_serde")]
    start: Duration,
    #[serde(with = "humantime_serde")]
    end: Duration,
}

impl TryFrom<RawDayRange> for DayRange {
    type Error = anyhow::Error;

    fn try_from(raw: RawDayRange) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl DayRange {
    pub fn new(start: Duration, end: Duration) -> Result<Self> {
        if start >= end || end > DAY {
            bail!("bad day range {:?}..{:?}", start, end);
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, offset: Duration) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Weekly schedule in a time zone. Days start at Monday; `None` means the
/// schedule does not cover the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub time_zone: Tz,
    pub week: [Option<DayRange>; 7],
}

impl Schedule {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.time_zone);
        let day = local.weekday().num_days_from_monday() as usize;
        let offset = Duration::from_secs(local.num_seconds_from_midnight().into());
        self.week[day].map_or(false, |range| range.contains(offset))
    }
}
