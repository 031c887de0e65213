//! The tag role: active initiator of a ranging exchange

use crate::message::{DeviceId, Message, MessageKind, FRAME_LEN};
use crate::radio::{InterruptFlags, SendTime, Transceiver};
use crate::time::Instant;

use super::{reply_delay, RangeEvent, Watchdog};

/// How long the tag tolerates silence before it re-opens the exchange
/// with a fresh poll, in milliseconds
pub const RESET_PERIOD_MS: u32 = 500;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    AwaitingPollAck,
    AwaitingRangeReport,
}

/// The tag ranging engine
///
/// The tag drives the exchange: it polls, echoes its captured timestamps
/// back to the anchor, and ultimately learns the distance from the
/// anchor's report. Unlike the anchor it keeps no failure state: any
/// unexpected frame throws the whole exchange away and starts a new one.
///
/// Create it once, call [`start`] after the radio is configured, and
/// then [`poll`] continuously from the node's main loop.
///
/// [`start`]: Tag::start
/// [`poll`]: Tag::poll
pub struct Tag {
    id: DeviceId,
    state: State,
    poll_sent: Option<Instant>,
    last_sent: Option<MessageKind>,
    watchdog: Watchdog,
    pending: Option<RangeEvent>,
}

impl Tag {
    /// Creates a tag that identifies itself under the given identifier
    pub fn new(id: DeviceId) -> Self {
        Tag {
            id,
            state: State::AwaitingPollAck,
            poll_sent: None,
            last_sent: None,
            watchdog: Watchdog::new(RESET_PERIOD_MS),
            pending: None,
        }
    }

    /// Arms the receiver and opens the first exchange with a poll
    pub fn start<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        radio.start_receiving()?;
        self.transmit_poll(radio)?;
        self.watchdog.note(now);
        Ok(())
    }

    /// Runs one iteration of the polling step
    ///
    /// Drains the completion flags and runs the corresponding handlers
    /// to completion. When nothing has completed for longer than
    /// [`RESET_PERIOD_MS`], the exchange is abandoned and a fresh poll
    /// goes out.
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
                self.restart(radio, now)?;
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
    /// should call this; in this system it is the contact engine.
    pub fn take_range(&mut self) -> Option<RangeEvent> {
        self.pending.take()
    }

    /// Abandons the current exchange and opens a new one
    fn restart<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        self.state = State::AwaitingPollAck;
        self.poll_sent = None;
        self.transmit_poll(radio)?;
        self.watchdog.note(now);
        Ok(())
    }

    fn handle_sent<R: Transceiver>(
        &mut self,
        radio: &mut R,
        now: u32,
    ) -> Result<(), R::Error> {
        self.watchdog.note(now);

        if self.last_sent.take() == Some(MessageKind::Poll) {
            // The poll's actual departure time is echoed to the anchor
            // later, inside the range frame.
            self.poll_sent = Some(radio.tx_time()?);
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
            Err(_) => return self.restart(radio, now),
        };

        let expected = match (self.state, message.kind()) {
            (State::AwaitingPollAck, MessageKind::PollAck) => true,
            (State::AwaitingRangeReport, MessageKind::RangeReport) => true,
            (State::AwaitingRangeReport, MessageKind::RangeFailed) => true,
            _ => false,
        };
        if !expected {
            // No partial-failure state on the tag side: any mismatch
            // restarts the whole exchange.
            return self.restart(radio, now);
        }

        match message {
            Message::PollAck => {
                let poll_sent = match self.poll_sent {
                    Some(poll_sent) => poll_sent,
                    // The poll's transmit completion never arrived, so
                    // there is nothing valid to echo. Start over.
                    None => return self.restart(radio, now),
                };
                let poll_ack_received = radio.rx_time()?;

                // Schedule the range frame one reply delay out and echo
                // the scheduled departure time along with the other two
                // captures.
                let range_sent = radio.sys_time()? + reply_delay();
                let range = Message::Range {
                    poll_sent,
                    poll_ack_received,
                    range_sent,
                    sender: self.id,
                };
                self.send(radio, range, SendTime::Delayed(range_sent))?;
                self.state = State::AwaitingRangeReport;
            }
            Message::RangeReport { distance, sender } => {
                self.pending = Some(RangeEvent {
                    source: sender,
                    distance,
                });
                self.restart(radio, now)?;
            }
            Message::RangeFailed => {
                self.restart(radio, now)?;
            }
            // Filtered out by the expectation check above.
            Message::Poll | Message::Range { .. } => (),
        }

        Ok(())
    }

    fn transmit_poll<R: Transceiver>(&mut self, radio: &mut R) -> Result<(), R::Error> {
        self.send(radio, Message::Poll, SendTime::Now)
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
