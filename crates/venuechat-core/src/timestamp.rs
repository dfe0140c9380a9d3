use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Timelike, Utc};

use crate::error::ParseError;

/// Wire format of `created_at`. The server writes wall-clock time in its own
/// fixed offset, without a zone designator and with whole-second precision.
pub const WIRE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used for UI labels.
pub const DISPLAY_FORMAT: &str = "%b %-d, %-I:%M %p";

/// Converts between wire timestamp strings and instants.
///
/// Shared read-only by entry parsing and by the display layer. Only
/// whole-second instants are representable on the wire, so
/// `parse(format(t)) == t` holds for every `t` with no sub-second part
/// (see [`ChatTimestampFormatter::truncate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTimestampFormatter {
    offset: FixedOffset,
}

impl Default for ChatTimestampFormatter {
    fn default() -> Self {
        Self::utc()
    }
}

impl ChatTimestampFormatter {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Formatter for a server writing wall-clock time at `minutes` east of
    /// UTC. Returns `None` outside the ±24h range.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        let seconds = minutes.checked_mul(60)?;
        FixedOffset::east_opt(seconds).map(|offset| Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn parse(&self, raw: &str) -> Result<DateTime<Utc>, ParseError> {
        let invalid = || ParseError::InvalidTimestamp {
            value: raw.to_string(),
        };

        let naive = NaiveDateTime::parse_from_str(raw.trim(), WIRE_FORMAT).map_err(|_| invalid())?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(invalid)
    }

    pub fn format(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format(WIRE_FORMAT)
            .to_string()
    }

    pub fn format_display(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format(DISPLAY_FORMAT)
            .to_string()
    }

    /// Drops the sub-second part, yielding the instant the wire would carry.
    pub fn truncate(instant: DateTime<Utc>) -> DateTime<Utc> {
        instant.with_nanosecond(0).unwrap_or(instant)
    }
}
