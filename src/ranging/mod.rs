//! Implementation of asymmetric double-sided two-way ranging
//!
//! This module implements the message exchange that measures the
//! distance between two nodes, and assigns the two ends of it distinct
//! roles:
//!
//! 1. Nodes are divided into anchors and tags. A tag is mobile and wants
//!    to know how far away it is from an anchor; an anchor sits still
//!    and answers.
//! 2. The tag opens an exchange by transmitting a poll
//!    ([`Message::Poll`]).
//! 3. The anchor answers with a poll-ack ([`Message::PollAck`]) after a
//!    fixed reply delay, so both sides share a known turnaround time.
//! 4. The tag echoes the three timestamps it captured (poll sent,
//!    poll-ack received, and the scheduled send time of the echo itself)
//!    in a range frame ([`Message::Range`]).
//! 5. The anchor now holds six timestamps, computes the time of flight
//!    (see [`time_of_flight`]), and reports the resulting distance back
//!    ([`Message::RangeReport`]), which hands the tag the measurement it
//!    was after.
//!
//! Both roles are driven the same way: the node's main loop calls
//! `poll(...)` continuously, and the transceiver's interrupt handlers do
//! nothing but raise the completion flags the poll drains. Lost and
//! out-of-order frames are not retransmitted; each role carries an
//! inactivity watchdog that forces it back to its initial state after a
//! period of silence, which restarts the exchange from the top.
//!
//! A completed measurement surfaces through the role's `take_range`
//! method. In this system the tag's output feeds the
//! [contact engine](crate::contacts); the anchor's is available for
//! infrastructure that wants to observe distances from the fixed side.
//!
//! [`Message::Poll`]: crate::message::Message::Poll
//! [`Message::PollAck`]: crate::message::Message::PollAck
//! [`Message::Range`]: crate::message::Message::Range
//! [`Message::RangeReport`]: crate::message::Message::RangeReport

pub use anchor::Anchor;
pub use tag::Tag;
pub use tof::{time_of_flight, ComputeDistanceError, RangingTimestamps};

mod anchor;
mod tag;
mod tof;

use crate::message::DeviceId;
use crate::time::Duration;

/// The fixed turnaround delay between receiving a frame and answering
/// it, in microseconds
///
/// Both sides schedule their reply this far into the future, so the
/// reply intervals entering the time-of-flight computation are dominated
/// by a known constant rather than by code execution time.
pub const REPLY_DELAY_US: u16 = 3000;

pub(crate) fn reply_delay() -> Duration {
    Duration::from_micros(REPLY_DELAY_US)
}

/// A completed range measurement
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeEvent {
    /// The peer the distance was measured against
    pub source: DeviceId,
    /// The measured distance in meters
    pub distance: f32,
}

/// Inactivity watchdog forcing a role back to its initial state
///
/// Fed from the wall-clock millisecond counter, which wraps; all
/// comparisons stay in unsigned arithmetic.
pub(crate) struct Watchdog {
    period_ms: u32,
    last_activity: u32,
}

impl Watchdog {
    pub fn new(period_ms: u32) -> Self {
        Watchdog {
            period_ms,
            last_activity: 0,
        }
    }

    /// Records a successful send or receive completion
    pub fn note(&mut self, now: u32) {
        self.last_activity = now;
    }

    /// Whether the period has elapsed without a completion
    pub fn expired(&self, now: u32) -> bool {
        now.wrapping_sub(self.last_activity) > self.period_ms
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeRadio;
    use super::{Anchor, Tag, Watchdog};
    use crate::contacts::ContactLedger;
    use crate::message::{DeviceId, Message, MessageKind};
    use crate::radio::InterruptFlags;
    use crate::time::TICKS_PER_MICRO;

    /// The reply delay in system time ticks.
    const REPLY: u64 = 3000 * TICKS_PER_MICRO;
    /// A one-way flight time of 213 ticks is almost exactly one meter.
    const FLIGHT: u64 = 213;

    const TAG_ID: DeviceId = DeviceId([1; 8]);
    const ANCHOR_ID: DeviceId = DeviceId([2; 8]);

    #[test]
    fn watchdog_triggers_only_after_the_period() {
        let mut watchdog = Watchdog::new(250);
        watchdog.note(1000);

        assert!(!watchdog.expired(1250));
        assert!(watchdog.expired(1251));
    }

    #[test]
    fn watchdog_survives_wall_clock_wraparound() {
        let mut watchdog = Watchdog::new(250);
        watchdog.note(u32::MAX - 10);

        assert!(!watchdog.expired(u32::MAX));
        assert!(watchdog.expired(300));
    }

    #[test]
    fn full_exchange_end_to_end() {
        let mut tag = Tag::new(TAG_ID);
        let mut anchor = Anchor::new(ANCHOR_ID);
        let mut tag_radio = FakeRadio::new();
        let mut anchor_radio = FakeRadio::new();
        let tag_flags = InterruptFlags::new();
        let anchor_flags = InterruptFlags::new();

        // Tag opens with a poll; anchor listens.
        tag.start(&mut tag_radio, 0).unwrap();
        anchor.start(&mut anchor_radio, 0).unwrap();
        assert_eq!(tag_radio.sent.len(), 1);
        assert_eq!(
            Message::decode(&tag_radio.sent[0].frame),
            Ok(Message::Poll)
        );

        // The poll leaves the tag's antenna at tick 1000.
        tag_radio.complete_send(&tag_flags, 1_000);
        tag.poll(&mut tag_radio, &tag_flags, 1).unwrap();

        // It arrives at the anchor, whose clock reads 500000. The anchor
        // schedules its poll-ack one reply delay later.
        let poll_frame = tag_radio.sent[0].frame;
        anchor_radio.deliver(&anchor_flags, poll_frame, 500_000);
        anchor.poll(&mut anchor_radio, &anchor_flags, 2).unwrap();

        assert_eq!(anchor_radio.sent.len(), 1);
        let poll_ack = &anchor_radio.sent[0];
        assert_eq!(Message::decode(&poll_ack.frame), Ok(Message::PollAck));
        assert_eq!(
            poll_ack.delayed_until.map(|t| t.value()),
            Some(500_000 + REPLY)
        );

        anchor_radio.complete_send(&anchor_flags, 500_000 + REPLY);
        anchor.poll(&mut anchor_radio, &anchor_flags, 3).unwrap();

        // The poll-ack reaches the tag one flight time after it left,
        // which in tag time is poll-sent + reply + 2·flight.
        let poll_ack_frame = anchor_radio.sent[0].frame;
        tag_radio.deliver(&tag_flags, poll_ack_frame, 1_000 + REPLY + 2 * FLIGHT);
        tag.poll(&mut tag_radio, &tag_flags, 4).unwrap();

        // The tag answers with a range frame echoing its timestamps.
        assert_eq!(tag_radio.sent.len(), 2);
        let range = &tag_radio.sent[1];
        let scheduled = 1_000 + 2 * REPLY + 2 * FLIGHT;
        assert_eq!(
            range.delayed_until.map(|t| t.value()),
            Some(scheduled)
        );
        match Message::decode(&range.frame) {
            Ok(Message::Range {
                poll_sent,
                poll_ack_received,
                range_sent,
                sender,
            }) => {
                assert_eq!(poll_sent.value(), 1_000);
                assert_eq!(poll_ack_received.value(), 1_000 + REPLY + 2 * FLIGHT);
                assert_eq!(range_sent.value(), scheduled);
                assert_eq!(sender, TAG_ID);
            }
            other => panic!("expected range frame, got {:?}", other),
        }

        tag_radio.complete_send(&tag_flags, scheduled);
        tag.poll(&mut tag_radio, &tag_flags, 5).unwrap();

        // The range frame reaches the anchor; all six timestamps are now
        // in one place and the distance falls out.
        let range_frame = tag_radio.sent[1].frame;
        anchor_radio.deliver(
            &anchor_flags,
            range_frame,
            500_000 + 2 * REPLY + 2 * FLIGHT,
        );
        anchor.poll(&mut anchor_radio, &anchor_flags, 6).unwrap();

        let event = anchor.take_range().unwrap();
        assert_eq!(event.source, TAG_ID);
        assert!(event.distance > 0.99);
        assert!(event.distance < 1.01);
        assert!(anchor.take_range().is_none());

        assert_eq!(anchor_radio.sent.len(), 2);
        let report = &anchor_radio.sent[1];
        match Message::decode(&report.frame) {
            Ok(Message::RangeReport { distance, sender }) => {
                assert_eq!(distance, event.distance);
                assert_eq!(sender, ANCHOR_ID);
            }
            other => panic!("expected range report, got {:?}", other),
        }

        // The report reaches the tag, which emits the measurement and
        // immediately opens the next exchange.
        let report_frame = anchor_radio.sent[1].frame;
        tag_radio.deliver(&tag_flags, report_frame, 2_000_000_000);
        tag.poll(&mut tag_radio, &tag_flags, 7).unwrap();

        let event = tag.take_range().unwrap();
        assert_eq!(event.source, ANCHOR_ID);
        assert!(event.distance > 0.99);
        assert!(event.distance < 1.01);

        assert_eq!(tag_radio.sent.len(), 3);
        assert_eq!(
            Message::decode(&tag_radio.sent[2].frame),
            Ok(Message::Poll)
        );

        // Three such measurements confirm the contact on the tag's side.
        let mut ledger = ContactLedger::new();
        for step in 0..3 {
            ledger.record(event.source, event.distance, 1000 + step * 10);
        }
        assert_eq!(&ledger.confirmed_ids()[..], &[ANCHOR_ID]);
    }

    #[test]
    fn out_of_sequence_frame_fails_the_exchange_without_an_event() {
        let mut anchor = Anchor::new(ANCHOR_ID);
        let mut radio = FakeRadio::new();
        let flags = InterruptFlags::new();

        anchor.start(&mut radio, 0).unwrap();

        // A clean poll puts the anchor into the middle of an exchange.
        let mut frame = [0; 24];
        Message::Poll.encode(&mut frame);
        radio.deliver(&flags, frame, 1_000);
        anchor.poll(&mut radio, &flags, 1).unwrap();
        radio.complete_send(&flags, 1_000 + REPLY);
        anchor.poll(&mut radio, &flags, 2).unwrap();

        // A stray poll-ack is not what the anchor expects now.
        Message::PollAck.encode(&mut frame);
        radio.deliver(&flags, frame, 2_000_000);
        anchor.poll(&mut radio, &flags, 3).unwrap();
        assert_eq!(radio.sent.len(), 1);

        // The range that eventually arrives is answered with a failure
        // instead of a measurement.
        Message::Range {
            poll_sent: crate::time::Instant::new(900).unwrap(),
            poll_ack_received: crate::time::Instant::new(1_000_000).unwrap(),
            range_sent: crate::time::Instant::new(1_500_000).unwrap(),
            sender: TAG_ID,
        }
        .encode(&mut frame);
        radio.deliver(&flags, frame, 3_000_000);
        anchor.poll(&mut radio, &flags, 4).unwrap();

        assert_eq!(radio.sent.len(), 2);
        assert_eq!(
            Message::decode(&radio.sent[1].frame).map(|message| message.kind()),
            Ok(MessageKind::RangeFailed)
        );
        assert!(anchor.take_range().is_none());

        // A tag that receives the failure mid-exchange starts over with
        // a fresh poll and no event.
        let mut tag = Tag::new(TAG_ID);
        let mut tag_radio = FakeRadio::new();
        let tag_flags = InterruptFlags::new();
        tag.start(&mut tag_radio, 0).unwrap();
        tag_radio.complete_send(&tag_flags, 500);
        tag.poll(&mut tag_radio, &tag_flags, 1).unwrap();
        Message::PollAck.encode(&mut frame);
        tag_radio.deliver(&tag_flags, frame, 1_000);
        tag.poll(&mut tag_radio, &tag_flags, 2).unwrap();
        assert_eq!(tag_radio.sent.len(), 2);

        Message::RangeFailed.encode(&mut frame);
        tag_radio.deliver(&tag_flags, frame, 2_000);
        tag.poll(&mut tag_radio, &tag_flags, 3).unwrap();

        assert!(tag.take_range().is_none());
        assert_eq!(tag_radio.sent.len(), 3);
        assert_eq!(
            Message::decode(&tag_radio.sent[2].frame),
            Ok(Message::Poll)
        );
    }
}
