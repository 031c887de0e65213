//! The asymmetric time-of-flight computation

use crate::time::{Duration, Instant};

/// The six timestamps captured over one completed exchange
///
/// Three are captured locally by the anchor; the other three are echoed
/// by the tag inside the range frame, in the tag's own clock domain.
/// Only differences within one domain enter the computation, so the two
/// clocks never need to agree.
#[derive(Clone, Copy, Debug)]
pub struct RangingTimestamps {
    /// When the poll left the tag's antenna (tag clock, echoed)
    pub poll_sent: Instant,
    /// When the poll arrived (anchor clock)
    pub poll_received: Instant,
    /// When the poll-ack left the antenna (anchor clock)
    pub poll_ack_sent: Instant,
    /// When the poll-ack arrived (tag clock, echoed)
    pub poll_ack_received: Instant,
    /// When the range frame left the antenna (tag clock, echoed)
    pub range_sent: Instant,
    /// When the range frame arrived (anchor clock)
    pub range_received: Instant,
}

/// Returned by [`time_of_flight`] when the captured intervals are too
/// large for the computation
///
/// During normal operation intervals are a few milliseconds and none of
/// these can occur; grossly out-of-range echoed timestamps trigger them
/// instead of wrapping silently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComputeDistanceError {
    /// Round-trip times are too large to be multiplied
    RoundTripTimesTooLarge,
    /// Reply times are too large to be multiplied
    ReplyTimesTooLarge,
    /// The sum of all four intervals is too large
    SumTooLarge,
    /// The time of flight does not fit a 40-bit timestamp
    TimeOfFlightTooLarge,
}

/// Computes the one-way time of flight from the captured timestamps
///
/// Asymmetric double-sided two-way ranging: each side measures one
/// round-trip and one reply interval, and the time of flight falls out
/// of their combination without the two clocks ever being compared
/// directly:
///
/// ```text
/// round1 = pollAckReceived - pollSent
/// reply1 = pollAckSent     - pollReceived
/// round2 = rangeReceived   - pollAckSent
/// reply2 = rangeSent       - pollAckReceived
/// tof    = (round1·round2 - reply1·reply2) / (round1 + round2 + reply1 + reply2)
/// ```
///
/// All subtractions wrap around the 40-bit clock. The function holds no
/// state: the same six timestamps always produce the same result.
pub fn time_of_flight(
    timestamps: &RangingTimestamps,
) -> Result<Duration, ComputeDistanceError> {
    let round1 = timestamps
        .poll_ack_received
        .duration_since(timestamps.poll_sent)
        .value();
    let reply1 = timestamps
        .poll_ack_sent
        .duration_since(timestamps.poll_received)
        .value();
    let round2 = timestamps
        .range_received
        .duration_since(timestamps.poll_ack_sent)
        .value();
    let reply2 = timestamps
        .range_sent
        .duration_since(timestamps.poll_ack_received)
        .value();

    let round_product = round1
        .checked_mul(round2)
        .ok_or(ComputeDistanceError::RoundTripTimesTooLarge)?;
    let reply_product = reply1
        .checked_mul(reply2)
        .ok_or(ComputeDistanceError::ReplyTimesTooLarge)?;
    let sum = round1
        .checked_add(round2)
        .and_then(|sum| sum.checked_add(reply1))
        .and_then(|sum| sum.checked_add(reply2))
        .ok_or(ComputeDistanceError::SumTooLarge)?;

    // Receiver noise can push the products past each other at very short
    // range; a negative time of flight collapses to zero. A zero sum
    // only happens when all four intervals are zero, which also means a
    // zero time of flight.
    let ticks = round_product
        .saturating_sub(reply_product)
        .checked_div(sum)
        .unwrap_or(0);

    Duration::new(ticks).ok_or(ComputeDistanceError::TimeOfFlightTooLarge)
}
