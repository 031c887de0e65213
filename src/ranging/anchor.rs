//! The anchor role: passive responder of a ranging exchange

use crate::message::{DeviceId, Message, MessageKind, FRAME_LEN};
use crate::radio::{InterruptFlags, SendTime, Transceiver};
use crate::time::Instant;

use super::tof::{time_of_flight, RangingTimestamps};
use super::{reply_delay, RangeEvent, Watchdog};

/// How long the anchor tolerates silence before it returns to listening
/// for polls, in milliseconds
pub const RESET_PERIOD_MS: u32 = 250;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    AwaitingPoll,
    AwaitingRange,
}

/// The anchor ranging engine
///
/// The anchor never initiates anything: it answers polls, collects the
/// timestamps of one exchange at a time, and reports the computed
/// distance back to the tag. Create it once, call [`start`] after the
/// radio is configured, and then [`poll`] continuously from the node's
/// main loop.
///
/// [`start`]: Anchor::start
/// [`poll`]: Anchor::poll
pub struct Anchor {
    id: DeviceId,
    state: State,
    protocol_failed: bool,
    poll_received: Option<Instant>,
    poll_ack_sent: Option<Instant>,
    last_sent: Option<MessageKind>,
    watchdog: Watchdog,
    pending: Option<RangeEvent>,
}

impl Anchor {
    /// Creates an anchor that reports itself under the given identifier
    pub fn new(id: DeviceId) -> Self {
        Anchor {
            id,
            state: State::AwaitingPoll,
            protocol_failed: false,
            poll_received: None,
            poll_ack_sent: None,
            last_sent: None,
            watchdog: Watchdog::new(RESET_PERIOD_MS),
            pending: None,
        }
    }

    /// Starts listening for polls
    pub fn start<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        radio.start_receiving()?;
        self.watchdog.note(now);
        Ok(())
    }

    /// Runs one iteration of the polling step
    ///
    /// Drains the completion flags and runs the corresponding handlers
    /// to completion. When nothing has completed for longer than
    /// [`RESET_PERIOD_MS`], the exchange is abandoned and the anchor
    /// goes back to listening for polls.
    pub fn poll<R: Transceiver>(
        &mut self,
        radio: &mut R,
        flags: &InterruptFlags,
        now: u32,
    ) -> Result<(), R::Error> {
        let sent = flags.take_sent();
        let received = flags.take_received();

        if !sent && !received {
            if self.watchdog.expired(now) {
                self.reset(radio, now)?;
            }
            return Ok(());
        }

        if sent {
            self.handle_sent(radio, now)?;
        }
        if received {
            self.handle_received(radio, now)?;
        }

        Ok(())
    }

    /// Drains the most recent completed measurement, if any
    ///
    /// Level-triggered: the event stays pending until it is taken, and a
    /// newer measurement overwrites an untaken one. Exactly one consumer
    /// should call this.
    pub fn take_range(&mut self) -> Option<RangeEvent> {
        self.pending.take()
    }

    fn reset<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        self.state = State::AwaitingPoll;
        radio.start_receiving()?;
        self.watchdog.note(now);
        Ok(())
    }

    fn handle_sent<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        self.watchdog.note(now);

        if self.last_sent.take() == Some(MessageKind::PollAck) {
            // The poll-ack's actual departure time is one of the six
            // timestamps entering the distance computation.
            self.poll_ack_sent = Some(radio.tx_time()?);
        }

        Ok(())
    }

    fn handle_received<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        self.watchdog.note(now);

        let mut frame = [0; FRAME_LEN];
        let len = radio.read_received(&mut frame)?;
        let message = match Message::decode(&frame[..len]) {
            Ok(message) => message,
            Err(_) => {
                // An undecodable frame cannot be the expected one.
                self.protocol_failed = true;
                return Ok(());
            }
        };

        if message.kind() != self.expected_kind() {
            self.protocol_failed = true;
        }

        match message {
            Message::Poll => {
                // A poll always restarts the exchange cleanly, wiping
                // whatever the previous one left behind.
                self.protocol_failed = false;
                self.poll_received = Some(radio.rx_time()?);
                self.poll_ack_sent = None;
                self.transmit_delayed(radio, Message::PollAck)?;
                self.state = State::AwaitingRange;
            }
            Message::Range {
                poll_sent,
                poll_ack_received,
                range_sent,
                sender,
            } => {
                let range_received = radio.rx_time()?;
                self.state = State::AwaitingPoll;

                // Consume the captured timestamps so they cannot leak
                // into the next exchange.
                let captured = (self.poll_received.take(), self.poll_ack_sent.take());

                let measurement = match captured {
                    (Some(poll_received), Some(poll_ack_sent))
                        if !self.protocol_failed =>
                    {
                        let timestamps = RangingTimestamps {
                            poll_sent,
                            poll_received,
                            poll_ack_sent,
                            poll_ack_received,
                            range_sent,
                            range_received,
                        };
                        time_of_flight(&timestamps).ok()
                    }
                    _ => None,
                };

                match measurement {
                    Some(tof) => {
                        let distance = tof.as_meters();
                        self.pending = Some(RangeEvent {
                            source: sender,
                            distance,
                        });
                        self.transmit(
                            radio,
                            Message::RangeReport {
                                distance,
                                sender: self.id,
                            },
                        )?;
                    }
                    None => self.transmit(radio, Message::RangeFailed)?,
                }
            }
            // Out-of-sequence kinds were already recorded in the failure
            // flag; the next poll or range resolves the exchange.
            Message::PollAck | Message::RangeReport { .. } | Message::RangeFailed => (),
        }

        Ok(())
    }

    fn expected_kind(&self) -> MessageKind {
        match self.state {
            State::AwaitingPoll => MessageKind::Poll,
            State::AwaitingRange => MessageKind::Range,
        }
    }

    fn transmit<R: Transceiver>(
        &mut self,
        radio: &mut R,
        message: Message,
    ) -> Result<(), R::Error> {
        self.send(radio, message, SendTime::Now)
    }

    /// Transmits after the fixed reply delay, so the turnaround time is
    /// the same on both sides of the exchange.
    fn transmit_delayed<R: Transceiver>(
        &mut self,
        radio: &mut R,
        message: Message,
    ) -> Result<(), R::Error> {
        let send_time = radio.sys_time()? + reply_delay();
        self.send(radio, message, SendTime::Delayed(send_time))
    }

    fn send<R: Transceiver>(
        &mut self,
        radio: &mut R,
        message: Message,
        send_time: SendTime,
    ) -> Result<(), R::Error> {
        let mut frame = [0; FRAME_LEN];
        message.encode(&mut frame);
        self.last_sent = Some(message.kind());
        radio.start_transmit(&frame, send_time)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeRadio;
    use super::*;
    use crate::time::TICKS_PER_MICRO;

    const ANCHOR_ID: DeviceId = DeviceId([7; 8]);
    const TAG_ID: DeviceId = DeviceId([3; 8]);

    fn stamp(value: u64) -> Instant {
        Instant::new(value).unwrap()
    }

    fn frame_of(message: Message) -> [u8; FRAME_LEN] {
        let mut frame = [0; FRAME_LEN];
        message.encode(&mut frame);
        frame
    }

    /// Walks a fresh anchor through poll reception and poll-ack
    /// completion.
    fn mid_exchange(anchor: &mut Anchor, radio: &mut FakeRadio, flags: &InterruptFlags) {
        anchor.start(radio, 0).unwrap();
        radio.deliver(flags, frame_of(Message::Poll), 10_000);
        anchor.poll(radio, flags, 1).unwrap();
        radio.complete_send(flags, 10_000 + 3000 * TICKS_PER_MICRO);
        anchor.poll(radio, flags, 2).unwrap();
    }

    #[test]
    fn poll_is_answered_with_a_delayed_poll_ack() {
        let mut anchor = Anchor::new(ANCHOR_ID);
        let mut radio = FakeRadio::new();
        let flags = InterruptFlags::new();

        anchor.start(&mut radio, 0).unwrap();
        assert_eq!(radio.rx_starts, 1);

        radio.deliver(&flags, frame_of(Message::Poll), 10_000);
        anchor.poll(&mut radio, &flags, 1).unwrap();

        assert_eq!(radio.sent.len(), 1);
        let reply = &radio.sent[0];
        assert_eq!(Message::decode(&reply.frame), Ok(Message::PollAck));
        assert_eq!(
            reply.delayed_until.map(|t| t.value()),
            Some(10_000 + 3000 * TICKS_PER_MICRO)
        );
    }

    #[test]
    fn a_poll_clears_an_earlier_failure() {
        let mut anchor = Anchor::new(ANCHOR_ID);
        let mut radio = FakeRadio::new();
        let flags = InterruptFlags::new();
        mid_exchange(&mut anchor, &mut radio, &flags);

        // Fail the running exchange, then open a new one.
        radio.deliver(&flags, frame_of(Message::PollAck), 20_000);
        anchor.poll(&mut radio, &flags, 3).unwrap();
        radio.deliver(&flags, frame_of(Message::Poll), 30_000);
        anchor.poll(&mut radio, &flags, 4).unwrap();
        radio.complete_send(&flags, 30_000 + 3000 * TICKS_PER_MICRO);
        anchor.poll(&mut radio, &flags, 5).unwrap();

        // The new exchange completes with a report, not a failure.
        let range = Message::Range {
            poll_sent: stamp(1_000),
            poll_ack_received: stamp(1_000 + 3000 * TICKS_PER_MICRO + 400),
            range_sent: stamp(1_000 + 6000 * TICKS_PER_MICRO + 400),
            sender: TAG_ID,
        };
        radio.deliver(&flags, frame_of(range), 30_000 + 6000 * TICKS_PER_MICRO + 400);
        anchor.poll(&mut radio, &flags, 6).unwrap();

        let report = radio.sent.last().unwrap();
        assert!(matches!(
            Message::decode(&report.frame),
            Ok(Message::RangeReport { .. })
        ));
        assert!(anchor.take_range().is_some());
    }

    #[test]
    fn range_without_a_preceding_poll_ack_fails_the_exchange() {
        let mut anchor = Anchor::new(ANCHOR_ID);
        let mut radio = FakeRadio::new();
        let flags = InterruptFlags::new();

        anchor.start(&mut radio, 0).unwrap();
        radio.deliver(&flags, frame_of(Message::Poll), 10_000);
        anchor.poll(&mut radio, &flags, 1).unwrap();

        // The poll-ack transmission never completed, so its timestamp
        // was never captured.
        let range = Message::Range {
            poll_sent: stamp(1_000),
            poll_ack_received: stamp(2_000),
            range_sent: stamp(3_000),
            sender: TAG_ID,
        };
        radio.deliver(&flags, frame_of(range), 40_000);
        anchor.poll(&mut radio, &flags, 2).unwrap();

        assert_eq!(
            Message::decode(&radio.sent.last().unwrap().frame),
            Ok(Message::RangeFailed)
        );
        assert!(anchor.take_range().is_none());
    }

    #[test]
    fn watchdog_returns_the_anchor_to_listening() {
        let mut anchor = Anchor::new(ANCHOR_ID);
        let mut radio = FakeRadio::new();
        let flags = InterruptFlags::new();
        mid_exchange(&mut anchor, &mut radio, &flags);
        assert_eq!(radio.rx_starts, 1);

        // Quiet but within the period: nothing happens.
        anchor.poll(&mut radio, &flags, 200).unwrap();
        assert_eq!(radio.rx_starts, 1);

        // Past the period: the receiver is re-armed and the anchor
        // expects a poll again.
        anchor.poll(&mut radio, &flags, 253).unwrap();
        assert_eq!(radio.rx_starts, 2);
        assert_eq!(anchor.state, State::AwaitingPoll);

        // Repeated restarts are harmless.
        anchor.poll(&mut radio, &flags, 600).unwrap();
        assert_eq!(radio.rx_starts, 3);
    }
}
