use anyhow::{Result, anyhow};
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

/// Both ends inclusive, as authored in an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    /// `days` calendar days ending on (and including) `end`.
    #[must_use]
    pub fn trailing(end: Date, days: u32) -> Option<Self> {
        let back = i64::from(days.max(1)) - 1;
        let start = end.checked_sub(Duration::days(back))?;
        Some(Self { start, end })
    }

    #[must_use]
    pub fn span_days(self) -> i64 {
        (self.end - self.start).whole_days() + 1
    }

    /// First day after the range; the compiled predicate is half-open.
    #[must_use]
    pub fn end_exclusive(self) -> Option<Date> {
        self.end.next_day()
    }

    /// Every calendar day in the range, oldest first.
    pub fn days(self) -> impl Iterator<Item = Date> {
        std::iter::successors(Some(self.start).filter(|start| *start <= self.end), move |day| {
            day.next_day().filter(|next| *next <= self.end)
        })
    }
}

#[must_use]
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

#[must_use]
pub fn now_utc_rfc3339() -> String {
    format_utc(OffsetDateTime::now_utc())
}

#[must_use]
pub fn format_utc(timestamp: OffsetDateTime) -> String {
    let dt = timestamp.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

pub fn parse_iso_date(raw: &str) -> Result<Date> {
    let trimmed = raw.trim();
    Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
        .map_err(|error| anyhow!("`{trimmed}` is not a YYYY-MM-DD date: {error}"))
}

#[must_use]
pub fn format_iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}
