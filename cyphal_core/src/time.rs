//! Generic monotonic timestamps.
//!
//! The transport codec never reads a clock of its own. Callers supply an
//! [`Instant`] with every pushed transfer and every accepted frame, and the
//! codec only ever compares instants and adds durations to them when checking
//! transfer-ID timeouts and TX deadlines.

/// A point in time on some monotonic clock external to the codec.
pub trait Instant: Clone + Copy + PartialEq + Eq + PartialOrd + Ord {
    /// A span of time between two `Instant`s.
    type Duration: Clone
        + Copy
        + PartialEq
        + Eq
        + PartialOrd
        + Ord
        + core::ops::Add<Output = Self::Duration>;

    /// Adds a duration to this instant, returning a later instant.
    fn checked_add(self, duration: Self::Duration) -> Option<Self>;

    /// The difference `self - earlier`, or `None` if `earlier` is later than
    /// `self` and the duration type cannot represent a negative span.
    fn duration_since(self, earlier: Self) -> Option<Self::Duration>;
}
