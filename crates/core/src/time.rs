use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Seconds since the Unix epoch of the instant frozen clocks start at in tests
/// (2023-11-14T22:13:20Z).
pub const TEST_EPOCH_SECONDS: i64 = 1_700_000_000;

/// Where save timestamps come from.
///
/// Readings are whole seconds, the precision progress stores keep, so a saved record compares
/// equal to the one read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    Wall,
    Frozen(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn wall() -> Self {
        Self::Wall
    }

    #[must_use]
    pub fn frozen(at: DateTime<Utc>) -> Self {
        Self::Frozen(at.trunc_subsecs(0))
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::Wall => Utc::now().trunc_subsecs(0),
            Self::Frozen(at) => *at,
        }
    }

    /// Step a frozen clock forward; the wall clock moves on its own.
    pub fn advance(&mut self, by: Duration) {
        if let Self::Frozen(at) = self {
            *at = (*at + by).trunc_subsecs(0);
        }
    }
}

/// The instant at [`TEST_EPOCH_SECONDS`].
#[must_use]
pub fn frozen_instant() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(TEST_EPOCH_SECONDS, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_moves_only_when_advanced() {
        let mut clock = Clock::frozen(frozen_instant());
        assert_eq!(clock.now(), clock.now());
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), frozen_instant() + Duration::seconds(90));
    }

    #[test]
    fn readings_are_whole_seconds() {
        let mut clock = Clock::frozen(frozen_instant() + Duration::milliseconds(750));
        assert_eq!(clock.now(), frozen_instant());
        clock.advance(Duration::milliseconds(1_500));
        assert_eq!(clock.now(), frozen_instant() + Duration::seconds(1));
        assert_eq!(Clock::wall().now().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn wall_clock_ignores_advance() {
        let mut clock = Clock::wall();
        let before = Utc::now();
        clock.advance(Duration::days(1));
        assert!(clock.now() < before + Duration::hours(1));
    }
}
