//! The capability interface between the protocol engines and the radio
//!
//! The transceiver driver itself lives outside this crate. The ranging
//! engines drive it through [`Transceiver`], and learn about completed
//! transmissions and receptions through [`InterruptFlags`]: the driver's
//! interrupt handlers do nothing but raise a flag, and the node's main
//! loop drains both flags once per iteration before running the state
//! machines. Flags are not queued: a second completion of the same kind
//! raised before the first is drained coalesces into one. The protocol
//! is strictly half-duplex with at most one exchange in flight, so this
//! is acceptable.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::time::Instant;

/// The time at which a transmission will start
pub enum SendTime {
    /// As fast as possible
    Now,
    /// At the given instant in transceiver system time
    Delayed(Instant),
}

/// The transceiver operations the ranging engines rely on
///
/// Transmit and receive are *start* calls: they return as soon as the
/// operation is under way, and the driver reports completion by raising
/// the corresponding [`InterruptFlags`] flag.
pub trait Transceiver {
    /// The driver's error type
    type Error;

    /// Reads the radio's current system time
    fn sys_time(&mut self) -> Result<Instant, Self::Error>;

    /// Begins transmitting the given frame
    ///
    /// With [`SendTime::Delayed`], the transmission is held back until
    /// the radio's clock reaches the given instant, so the caller knows
    /// the send timestamp before the frame has left the antenna.
    fn start_transmit(
        &mut self,
        frame: &[u8],
        send_time: SendTime,
    ) -> Result<(), Self::Error>;

    /// Puts the radio into permanently re-armed receive mode
    ///
    /// After a frame has been received and drained, the receiver returns
    /// to listening on its own; no further call is needed.
    fn start_receiving(&mut self) -> Result<(), Self::Error>;

    /// Reads the hardware timestamp of the most recent completed send
    fn tx_time(&mut self) -> Result<Instant, Self::Error>;

    /// Reads the hardware timestamp of the most recent completed receive
    fn rx_time(&mut self) -> Result<Instant, Self::Error>;

    /// Copies the payload of the most recently received frame into `buf`
    ///
    /// Returns the number of bytes written.
    fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Send/receive completion flags shared with the interrupt context
///
/// One producer (the driver's interrupt handlers) and one consumer (the
/// polling step) touch each flag, and every transition is a single
/// atomic bit operation, so no further locking is needed.
pub struct InterruptFlags {
    sent: AtomicBool,
    received: AtomicBool,
}

impl InterruptFlags {
    /// Creates a cleared flag pair
    ///
    /// `const`, so a flag pair can live in a `static` shared with the
    /// interrupt handlers.
    pub const fn new() -> Self {
        InterruptFlags {
            sent: AtomicBool::new(false),
            received: AtomicBool::new(false),
        }
    }

    /// Records a completed transmission
    ///
    /// The only operation the "sent" interrupt handler performs.
    pub fn note_sent(&self) {
        self.sent.store(true, Ordering::Release);
    }

    /// Records a completed reception
    ///
    /// The only operation the "received" interrupt handler performs.
    pub fn note_received(&self) {
        self.received.store(true, Ordering::Release);
    }

    /// Atomically tests and clears the "sent" flag
    pub fn take_sent(&self) -> bool {
        self.sent.swap(false, Ordering::AcqRel)
    }

    /// Atomically tests and clears the "received" flag
    pub fn take_received(&self) -> bool {
        self.received.swap(false, Ordering::AcqRel)
    }
}
