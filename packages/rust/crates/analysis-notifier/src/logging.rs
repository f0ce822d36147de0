/// Consecutive failures of one operation, used to keep long outages from
/// flooding `warn`.
///
/// Early failures (1, 2, 4, 8, 16) and every twentieth one are loud; the rest
/// belong at `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FailureStreak {
    len: u32,
}

const LOUD_PREFIX_MAX: u32 = 16;
const LOUD_EVERY: u32 = 20;

impl FailureStreak {
    /// Count one more failure and report whether it should be logged loudly.
    pub(crate) fn record(&mut self) -> bool {
        self.len = self.len.saturating_add(1);
        (self.len <= LOUD_PREFIX_MAX && self.len.is_power_of_two())
            || self.len.is_multiple_of(LOUD_EVERY)
    }

    pub(crate) fn reset(&mut self) {
        self.len = 0;
    }

    pub(crate) fn len(self) -> u32 {
        self.len
    }
}
