//! The messages exchanged over the air during a ranging exchange
//!
//! Every message is carried in a fixed 24-byte frame. The first byte
//! names the message kind; the rest of the frame is payload whose layout
//! depends on the kind. Bytes not covered by a kind's payload are
//! undefined; the receiver must not rely on them being zero.
//!
//! Frame layout:
//!
//! | Offset | Field                        | Present in          |
//! |--------|------------------------------|---------------------|
//! | 0      | message kind                 | all                 |
//! | 1-5    | poll sent (5-byte timestamp) | Range               |
//! | 6-10   | poll-ack received            | Range               |
//! | 11-15  | range sent                   | Range               |
//! | 16-23  | sender identifier            | Range, RangeReport  |
//! | 1-4    | distance (f32, meters)       | RangeReport         |

use byte::{ctx::Bytes, BytesExt, LE};
use core::convert::TryFrom;
use num_enum::TryFromPrimitive;

use crate::time::Instant;

/// The length of every radio frame, in bytes
pub const FRAME_LEN: usize = 24;

/// The length of a device identifier, in bytes
pub const ID_LEN: usize = 8;

const STAMP_LEN: usize = 5;
const SENDER_OFFSET: usize = 16;

/// Opaque identifier of a ranging peer
///
/// Assigned to a node once at provisioning time and never changed
/// afterwards. Identifiers are compared by exact byte equality.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceId(pub [u8; ID_LEN]);

/// The raw kind byte at the start of every frame
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    /// A tag opens a new exchange
    Poll = 0,
    /// The anchor's delayed answer to a poll
    PollAck = 1,
    /// The tag's echoed timestamps, completing the measurement
    Range = 2,
    /// The anchor's computed distance
    RangeReport = 3,
    /// The anchor saw an out-of-sequence frame during the exchange
    RangeFailed = 255,
}

/// A message exchanged between anchor and tag
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    /// Opens a new exchange; carries no payload
    Poll,
    /// Answers a poll after the fixed reply delay; carries no payload
    PollAck,
    /// Echoes the timestamps the tag captured during the exchange
    Range {
        /// When the poll left the tag's antenna, in tag time
        poll_sent: Instant,
        /// When the poll-ack arrived at the tag, in tag time
        poll_ack_received: Instant,
        /// When this frame is scheduled to leave the antenna, in tag time
        range_sent: Instant,
        /// The tag's identifier
        sender: DeviceId,
    },
    /// Reports the distance the anchor computed
    RangeReport {
        /// The measured distance in meters
        distance: f32,
        /// The anchor's identifier
        sender: DeviceId,
    },
    /// Closes a failed exchange without a distance; carries no payload
    RangeFailed,
}

impl Message {
    /// Returns the kind byte this message is tagged with on the wire
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Poll => MessageKind::Poll,
            Message::PollAck => MessageKind::PollAck,
            Message::Range { .. } => MessageKind::Range,
            Message::RangeReport { .. } => MessageKind::RangeReport,
            Message::RangeFailed => MessageKind::RangeFailed,
        }
    }

    /// Writes this message into a frame buffer
    ///
    /// Only the bytes covered by this message's payload are written; the
    /// rest of the frame keeps whatever it held before.
    pub fn encode(&self, frame: &mut [u8; FRAME_LEN]) {
        frame[0] = self.kind() as u8;

        match *self {
            Message::Range {
                poll_sent,
                poll_ack_received,
                range_sent,
                sender,
            } => {
                write_stamp(&mut frame[1..6], poll_sent);
                write_stamp(&mut frame[6..11], poll_ack_received);
                write_stamp(&mut frame[11..16], range_sent);
                frame[SENDER_OFFSET..].copy_from_slice(&sender.0);
            }
            Message::RangeReport { distance, sender } => {
                frame[1..5].copy_from_slice(&distance.to_le_bytes());
                frame[SENDER_OFFSET..].copy_from_slice(&sender.0);
            }
            Message::Poll | Message::PollAck | Message::RangeFailed => (),
        }
    }

    /// Decodes a received frame
    ///
    /// Fails if the kind byte doesn't name a known message, or if the
    /// frame ends before the payload its kind requires.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        let offset = &mut 0;

        let raw_kind: u8 = frame.read_with(offset, LE)?;
        let kind = MessageKind::try_from(raw_kind)
            .map_err(|_| FrameError::UnknownKind(raw_kind))?;

        match kind {
            MessageKind::Poll => Ok(Message::Poll),
            MessageKind::PollAck => Ok(Message::PollAck),
            MessageKind::Range => {
                let poll_sent = read_stamp(frame, offset)?;
                let poll_ack_received = read_stamp(frame, offset)?;
                let range_sent = read_stamp(frame, offset)?;
                let sender = read_id(frame, offset)?;

                Ok(Message::Range {
                    poll_sent,
                    poll_ack_received,
                    range_sent,
                    sender,
                })
            }
            MessageKind::RangeReport => {
                let distance: f32 = frame.read_with(offset, LE)?;
                *offset = SENDER_OFFSET;
                let sender = read_id(frame, offset)?;

                Ok(Message::RangeReport { distance, sender })
            }
            MessageKind::RangeFailed => Ok(Message::RangeFailed),
        }
    }
}

/// An error decoding a received frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// The kind byte does not name a known message
    UnknownKind(u8),
    /// The frame ended before the payload its kind requires
    Truncated,
}

impl From<byte::Error> for FrameError {
    fn from(_: byte::Error) -> Self {
        FrameError::Truncated
    }
}

fn write_stamp(field: &mut [u8], stamp: Instant) {
    // Timestamps travel as the low 5 bytes of the 40-bit value.
    field.copy_from_slice(&stamp.value().to_le_bytes()[..STAMP_LEN]);
}

fn read_stamp(frame: &[u8], offset: &mut usize) -> Result<Instant, FrameError> {
    let raw: &[u8] = frame.read_with(offset, Bytes::Len(STAMP_LEN))?;

    let mut value = [0; 8];
    value[..STAMP_LEN].copy_from_slice(raw);

    // A 5-byte value always fits the 40-bit timestamp range, so this
    // never panics.
    Ok(Instant::new(u64::from_le_bytes(value)).unwrap())
}

fn read_id(frame: &[u8], offset: &mut usize) -> Result<DeviceId, FrameError> {
    let raw: &[u8] = frame.read_with(offset, Bytes::Len(ID_LEN))?;

    let mut id = [0; ID_LEN];
    id.copy_from_slice(raw);

    Ok(DeviceId(id))
}
