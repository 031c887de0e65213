//! The host-facing query protocol
//!
//! A host (a phone dock, a provisioning station) queries the node for
//! its confirmed contacts over a byte stream. Every outbound frame is
//! the payload followed by an additive checksum (sum of all payload
//! bytes, modulo 256) and a fixed 8-byte synchronization marker, so the
//! receiver can resynchronize after stream corruption. Requests arrive
//! framed the same way.
//!
//! A request is `[0xAA, sub-type, 4-byte LE block indices ..., checksum]`.
//! The only sub-type is `0x01`, contact data. A request for the single
//! block index 0 returns a block-count header followed by every data
//! block; any other non-empty index list returns exactly the requested
//! blocks. Malformed requests (bad checksum, unknown type or sub-type)
//! are dropped without a response; the host is expected to retry.

use heapless::Vec;

use crate::contacts::ContactLedger;
use crate::message::{DeviceId, ID_LEN};

/// Marker appended after every frame, in both directions
pub const SYNC_MARKER: [u8; 8] = [97, 98, 99, 100, 101, 102, 103, 104];

/// The request frame type byte
const REQUEST: u8 = 0xAA;
/// The only known request sub-type: contact data
const CONTACT_DATA: u8 = 0x01;

/// Kind byte of the block-count header block
const BLOCK_COUNT_KIND: u8 = 0x11;
/// Kind byte of a contact data block
const CONTACT_DATA_KIND: u8 = 0x22;

/// Identifier slots per data block
const IDS_PER_BLOCK: usize = 16;
/// Every outbound block is this long: kind, block number, 16 identifiers
const BLOCK_LEN: usize = 1 + 4 + IDS_PER_BLOCK * ID_LEN;

const RX_CAPACITY: usize = 64;

/// A stalled request is discarded after this much inter-byte silence
const RX_TIMEOUT_MS: u32 = 200;

/// Byte sink for outbound frames
///
/// The node's serial port in firmware; a capture buffer in tests.
pub trait Sink {
    /// The sink's error type
    type Error;

    /// Writes all of the given bytes
    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Parser and responder for the host's query stream
pub struct HostLink {
    id: DeviceId,
    rx: Vec<u8, RX_CAPACITY>,
    last_byte: u32,
}

impl HostLink {
    /// Creates a link that reports this node's identifier in its headers
    pub fn new(id: DeviceId) -> Self {
        HostLink {
            id,
            rx: Vec::new(),
            last_byte: 0,
        }
    }

    /// Feeds one byte received from the host
    ///
    /// Accumulates bytes until a sync marker appears, then parses the
    /// preceding bytes as a request and streams the response, if any,
    /// into `port`.
    pub fn push<S: Sink>(
        &mut self,
        byte: u8,
        now: u32,
        contacts: &ContactLedger,
        port: &mut S,
    ) -> Result<(), S::Error> {
        if now.wrapping_sub(self.last_byte) > RX_TIMEOUT_MS {
            self.rx.clear();
        }
        self.last_byte = now;

        if self.rx.push(byte).is_err() {
            // The stream overran the buffer without a sync marker in
            // sight; drop it and resynchronize from here.
            self.rx.clear();
            self.rx.push(byte).ok();
        }

        let start = match find_sync_marker(&self.rx) {
            Some(start) => start,
            None => return Ok(()),
        };

        let mut request: Vec<u8, RX_CAPACITY> = Vec::new();
        // Both vectors share a capacity, so this cannot fail.
        request.extend_from_slice(&self.rx[..start]).ok();
        self.rx.clear();

        match parse_request(&request) {
            Some(indices) => self.respond(indices, contacts, port),
            None => Ok(()),
        }
    }

    fn respond<S: Sink>(
        &self,
        indices: &[u8],
        contacts: &ContactLedger,
        port: &mut S,
    ) -> Result<(), S::Error> {
        let mut blocks: Vec<u32, 16> = Vec::new();
        for chunk in indices.chunks_exact(4) {
            let index = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            blocks.push(index).ok();
        }

        if blocks.is_empty() {
            return Ok(());
        }

        let ids = contacts.confirmed_ids();

        if blocks.len() == 1 && blocks[0] == 0 {
            // Full dump: announce how many blocks there are, then send
            // them all.
            let count = (ids.len() + IDS_PER_BLOCK - 1) / IDS_PER_BLOCK;
            self.send_block_count(count as u32, port)?;
            for number in 1..=count as u32 {
                send_data_block(number, &ids, port)?;
            }
        } else {
            for &number in &blocks {
                send_data_block(number, &ids, port)?;
            }
        }

        Ok(())
    }

    fn send_block_count<S: Sink>(
        &self,
        count: u32,
        port: &mut S,
    ) -> Result<(), S::Error> {
        let mut block = [0; BLOCK_LEN];
        block[0] = BLOCK_COUNT_KIND;
        block[1..5].copy_from_slice(&count.to_le_bytes());
        block[5..5 + ID_LEN].copy_from_slice(&self.id.0);
        send_frame(&block, port)
    }
}

fn send_data_block<S: Sink>(
    number: u32,
    ids: &[DeviceId],
    port: &mut S,
) -> Result<(), S::Error> {
    let mut block = [0; BLOCK_LEN];
    block[0] = CONTACT_DATA_KIND;
    block[1..5].copy_from_slice(&number.to_le_bytes());

    // Block numbers start at 1; slots past the confirmed count stay
    // zero-padded.
    let base = (number as usize)
        .checked_sub(1)
        .and_then(|number| number.checked_mul(IDS_PER_BLOCK));
    for (slot, field) in block[5..].chunks_exact_mut(ID_LEN).enumerate() {
        let id = base
            .and_then(|base| base.checked_add(slot))
            .and_then(|index| ids.get(index));
        if let Some(id) = id {
            field.copy_from_slice(&id.0);
        }
    }

    send_frame(&block, port)
}

fn send_frame<S: Sink>(payload: &[u8], port: &mut S) -> Result<(), S::Error> {
    port.write(payload)?;
    port.write(&[checksum(payload)])?;
    port.write(&SYNC_MARKER)
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0, |sum: u8, byte| sum.wrapping_add(*byte))
}

fn find_sync_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(SYNC_MARKER.len())
        .position(|window| window == SYNC_MARKER)
}

fn parse_request(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 3 {
        return None;
    }

    let (body, check) = bytes.split_at(bytes.len() - 1);
    if check[0] != checksum(body) {
        return None;
    }
    if body[0] != REQUEST || body[1] != CONTACT_DATA {
        return None;
    }

    Some(&body[2..])
}
