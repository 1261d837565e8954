use chrono::{FixedOffset, Utc};

use crate::model::Timestamp;

/// Source of the current instant on the business wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Offset of the business timezone from UTC.
    fn offset(&self) -> FixedOffset;
}

/// System clock shifted into a fixed business timezone.
#[derive(Debug, Clone, Copy)]
pub struct BusinessClock {
    offset: FixedOffset,
}

impl BusinessClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for BusinessClock {
    fn now(&self) -> Timestamp {
        Utc::now().with_timezone(&self.offset).naive_local()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: Timestamp,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: Timestamp, offset: FixedOffset) -> Self {
        Self { now, offset }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Parse `+HH:MM` / `-HH:MM` (or `Z`) into a fixed offset.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
