use time::OffsetDateTime;

/// Get the current system time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system time is before the epoch.
#[must_use]
pub fn now_millis() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or_default()
}

/// Issues capture timestamps that strictly increase, even when the wall
/// clock stalls or steps backwards.
#[derive(Copy, Clone, Debug, Default)]
pub struct Clock {
    last: Option<u64>,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp, later than any issued before.
    pub fn stamp(&mut self) -> u64 {
        self.stamp_at(now_millis())
    }

    fn stamp_at(&mut self, now: u64) -> u64 {
        let next = match self.last {
            Some(last) if now <= last => last.saturating_add(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }
}
