//! Correlation id generator for the command channel.

/// Monotonic 16-bit correlation id counter.
///
/// Wraps silently. Only one command is ever in flight on a channel, so a
/// stale id cannot be outstanding when the counter wraps.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: u16,
}

impl SequenceGenerator {
    /// Create a generator whose first id is 1.
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Create a generator continuing after `last`.
    pub const fn starting_after(last: u16) -> Self {
        Self { last }
    }

    /// Advance and return the next id.
    #[inline]
    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        self.last
    }

    /// Most recently issued id (0 before the first call).
    pub fn last(&self) -> u16 {
        self.last
    }
}
