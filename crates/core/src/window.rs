use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};

/// Local time-of-day range in which updates may be applied.
///
/// `start_hour` is inclusive and `end_hour` exclusive, both in `0..=24` at
/// `offset`. A range with `start_hour > end_hour` wraps past midnight.
#[derive(Debug, Clone, Copy)]
pub struct UpdateWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub offset: FixedOffset,
}

impl UpdateWindow {
    pub fn new(start_hour: u32, end_hour: u32, offset: FixedOffset) -> Self {
        Self {
            start_hour: start_hour.min(24),
            end_hour: end_hour.min(24),
            offset,
        }
    }

    /// Window covering the whole day.
    pub fn always() -> Self {
        Self::new(0, 24, Utc.fix())
    }

    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.offset).hour();
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Offset from whole hours east of UTC. Out-of-range values fall back to UTC.
pub fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.saturating_mul(3600)).unwrap_or_else(|| Utc.fix())
}
