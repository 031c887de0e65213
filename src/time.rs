//! Time-related types based on the transceiver's system time

use core::ops::Add;

use crate::TIME_MAX;

/// System time ticks per microsecond
///
/// The radio's counter advances at 499.2 MHz × 128; the value is rounded
/// from 63 897.6.
pub const TICKS_PER_MICRO: u64 = 63_898;

/// Distance a radio wave travels per system time tick
///
/// One tick is about 15.65 ps, or 4.69 mm of propagation at the speed of
/// light.
pub const METERS_PER_TICK: f32 = 0.004_691_764;

/// An instant in transceiver system time
///
/// Internally uses the same 40-bit timestamps that the radio's local
/// oscillator produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None`
    /// if it isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_contact::{
    ///     time::Instant,
    ///     TIME_MAX,
    /// };
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Please make sure that this is the case, as this method
    /// has no way of knowing (the radio's timestamps can overflow, so
    /// comparing the numerical value of the timestamp doesn't tell
    /// anything about order).
    ///
    /// # Example
    ///
    /// ``` rust
    /// use uwb_contact::{
    ///     time::Instant,
    ///     TIME_MAX,
    /// };
    ///
    /// // `unwrap`ing here is okay, since we're passing constants that we
    /// // know are in the valid range.
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// // Works as expected, if the later timestamp is larger than the
    /// // earlier one.
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the
    /// // numerically smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        if self.value() >= earlier.value() {
            Duration(self.value() - earlier.value())
        } else {
            Duration(TIME_MAX - earlier.value() + self.value() + 1)
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both `Instant` and `Duration` are guaranteed to contain 40-bit
        // numbers, so this addition will never overflow.
        let value = (self.value() + rhs.value()) % (TIME_MAX + 1);

        // We made sure to keep the result of the addition within
        // `TIME_MAX`, so the following will never panic.
        Instant::new(value).unwrap()
    }
}

/// A duration between two instants in transceiver system time
///
/// Internally uses the same 40-bit timestamps that the radio uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None`
    /// if it isn't.
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Creates an instance of `Duration` from a number of microseconds
    ///
    /// A 16-bit count keeps the product well inside the 40-bit range (it
    /// takes up at most 33 bits), so the `unwrap` never panics.
    pub fn from_micros(micros: u16) -> Self {
        Duration::new(micros as u64 * TICKS_PER_MICRO).unwrap()
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Converts the duration into meters of radio propagation
    ///
    /// Interprets the duration as a one-way time of flight and multiplies
    /// it with the distance light travels per system time tick.
    pub fn as_meters(&self) -> f32 {
        self.0 as f32 * METERS_PER_TICK
    }
}
