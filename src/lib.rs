//! Two-way ranging and contact confirmation for UWB transceivers
//!
//! This crate implements the protocol logic of a two-node ultra-wideband
//! ranging system: a mobile *tag* initiates message exchanges with a
//! stationary *anchor*, the anchor derives the distance between the two
//! nodes from the timestamps captured during the exchange, and a contact
//! engine on the tag debounces the resulting distance stream into a
//! stable "in contact" verdict per peer.
//!
//! The radio itself is an external collaborator: the engines drive it
//! through the [`radio::Transceiver`] trait and learn about completed
//! transmissions and receptions through [`radio::InterruptFlags`]. This
//! keeps the crate free of register-level code and lets the state
//! machines run against a scripted transceiver in tests.
//!
//! See the [`ranging`] module for a walkthrough of the message exchange
//! and the roles' state machines.

#![no_std]
#![deny(missing_docs)]

pub mod contacts;
pub mod host;
pub mod message;
pub mod radio;
pub mod ranging;
pub mod time;

pub use contacts::ContactLedger;
pub use message::{DeviceId, Message, MessageKind};
pub use radio::{InterruptFlags, SendTime, Transceiver};
pub use ranging::{Anchor, RangeEvent, Tag};

/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xffffffffff;
