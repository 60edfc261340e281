use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarError;
use crate::model::{Ms, Span};

/// Where a calendar day ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayEnd {
    /// Last millisecond of the day (`23:59:59.999`).
    #[default]
    Inclusive,
    /// Next local midnight; day slots tile the original span exactly.
    Exclusive,
}

/// Day-boundary convention of the rendering context: an IANA zone plus
/// the end-of-day rule. Expansion and bucket keys must share one `Zone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    tz: Tz,
    day_end: DayEnd,
}

impl Default for Zone {
    fn default() -> Self {
        Self::utc()
    }
}

impl Zone {
    pub fn new(tz: Tz, day_end: DayEnd) -> Self {
        Self { tz, day_end }
    }

    pub fn utc() -> Self {
        Self::new(Tz::UTC, DayEnd::default())
    }

    pub fn parse(name: &str) -> Result<Self, CalendarError> {
        name.trim()
            .parse::<Tz>()
            .map(|tz| Self::new(tz, DayEnd::default()))
            .map_err(|_| CalendarError::UnknownTimeZone(name.to_string()))
    }

    pub fn with_day_end(self, day_end: DayEnd) -> Self {
        Self { day_end, ..self }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    pub fn day_end(&self) -> DayEnd {
        self.day_end
    }

    fn local(&self, t: Ms) -> Result<DateTime<Tz>, CalendarError> {
        DateTime::<Utc>::from_timestamp_millis(t)
            .map(|dt| dt.with_timezone(&self.tz))
            .ok_or(CalendarError::TimestampOutOfRange(t))
    }

    /// Calendar date of an instant in this zone.
    pub fn date_of(&self, t: Ms) -> Result<NaiveDate, CalendarError> {
        Ok(self.local(t)?.date_naive())
    }

    /// First instant of `date`. An ambiguous midnight resolves to the
    /// earlier instant; a midnight skipped by a DST gap resolves to the
    /// first local minute that exists.
    pub fn start_of_day(&self, date: NaiveDate) -> Result<Ms, CalendarError> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp_millis()),
            LocalResult::None => (1..=24 * 60)
                .find_map(|m| {
                    self.tz
                        .from_local_datetime(&(midnight + Duration::minutes(m)))
                        .earliest()
                })
                .map(|dt| dt.timestamp_millis())
                .ok_or(CalendarError::NoLocalMidnight(date)),
        }
    }

    /// Last instant of `date` according to the `DayEnd` rule.
    pub fn end_of_day(&self, date: NaiveDate) -> Result<Ms, CalendarError> {
        let next = date
            .succ_opt()
            .ok_or(CalendarError::NoLocalMidnight(date))?;
        let next_start = self.start_of_day(next)?;
        Ok(match self.day_end {
            DayEnd::Inclusive => next_start - 1,
            DayEnd::Exclusive => next_start,
        })
    }

    pub fn day_bounds(&self, date: NaiveDate) -> Result<Span, CalendarError> {
        Ok(Span::new(self.start_of_day(date)?, self.end_of_day(date)?))
    }

    /// Wall-clock milliseconds between local midnight of `date` and `t`.
    /// The next midnight maps to 24h, so exclusive day ends stay in range.
    pub fn local_ms_of_day(&self, date: NaiveDate, t: Ms) -> Result<Ms, CalendarError> {
        let local = self.local(t)?.naive_local();
        Ok((local - date.and_time(NaiveTime::MIN)).num_milliseconds())
    }

    /// RFC 3339 with milliseconds and this zone's offset.
    pub fn format(&self, t: Ms) -> Result<String, CalendarError> {
        Ok(self.local(t)?.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}
