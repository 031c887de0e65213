//! Hysteresis-filtered proximity contacts
//!
//! A single range measurement says little: multipath and body shadowing
//! make the distance stream noisy. The [`ContactLedger`] consumes the
//! raw stream of (peer, distance) events and only confirms a contact
//! once the last three classifications for a peer all came out as "in
//! contact". One non-contact sample within that window drops the
//! confirmation again.

use heapless::Vec;

use crate::message::DeviceId;

/// The number of peers tracked at the same time
pub const MAX_CONTACTS: usize = 2;

/// The length of a slot's rolling classification window
const WINDOW_LEN: usize = 3;

/// A slot with no activity for this long may be claimed by a new peer
const RESET_WINDOW_MS: u32 = 500;

/// The proximity threshold, in calibrated feet
const CONTACT_DISTANCE_FEET: f32 = 10.0;

const FEET_PER_METER: f32 = 3.28084;

/// One proximity classification of a single range measurement
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Classification {
    /// No measurement has rolled into this window position yet
    Unknown,
    NotInContact,
    InContact,
}

#[derive(Clone, Copy)]
struct ContactRecord {
    id: DeviceId,
    /// Most recent classification first
    window: [Classification; WINDOW_LEN],
    confirmed: bool,
    last_active: u32,
}

impl ContactRecord {
    const VACANT: ContactRecord = ContactRecord {
        id: DeviceId([0; 8]),
        window: [Classification::Unknown; WINDOW_LEN],
        confirmed: false,
        last_active: 0,
    };

    fn idle(&self, now: u32) -> bool {
        now.wrapping_sub(self.last_active) > RESET_WINDOW_MS
    }

    fn push(&mut self, classification: Classification) {
        self.window.rotate_right(1);
        self.window[0] = classification;

        // Recomputed from the full window on every push, never patched
        // incrementally.
        self.confirmed = self
            .window
            .iter()
            .all(|entry| *entry == Classification::InContact);
    }
}

/// A fixed-capacity table of hysteresis-filtered proximity verdicts
///
/// Feed it every range event one role of the node produces (in this
/// system, the tag's), and query [`confirmed_ids`] for the peers whose
/// proximity has been sustained.
///
/// [`confirmed_ids`]: ContactLedger::confirmed_ids
pub struct ContactLedger {
    slots: [ContactRecord; MAX_CONTACTS],
}

impl ContactLedger {
    /// Creates an empty ledger
    pub fn new() -> Self {
        ContactLedger {
            slots: [ContactRecord::VACANT; MAX_CONTACTS],
        }
    }

    /// Records one range measurement against a peer
    ///
    /// A peer that already owns a slot always updates that slot, no
    /// matter how stale it is. A new peer may only claim a slot that has
    /// been idle beyond the reset window and is not confirmed; if no such
    /// slot exists, the measurement is dropped.
    pub fn record(&mut self, id: DeviceId, distance_meters: f32, now: u32) {
        let feet = (distance_meters * FEET_PER_METER - 0.295) / 1.11;
        let classification = if feet < CONTACT_DISTANCE_FEET {
            Classification::InContact
        } else {
            Classification::NotInContact
        };

        let index = match self.slots.iter().position(|slot| slot.id == id) {
            Some(index) => index,
            None => {
                let claimed = self
                    .slots
                    .iter()
                    .position(|slot| slot.idle(now) && !slot.confirmed);
                match claimed {
                    Some(index) => {
                        // A claimed slot starts over; the previous peer's
                        // classifications must not count towards the new
                        // one.
                        self.slots[index].window =
                            [Classification::Unknown; WINDOW_LEN];
                        index
                    }
                    // Table saturated with active or confirmed peers.
                    None => return,
                }
            }
        };

        let slot = &mut self.slots[index];
        slot.id = id;
        slot.last_active = now;
        slot.push(classification);
    }

    /// Returns the identifiers of all confirmed contacts, in table order
    ///
    /// Confirmation is not acknowledged or cleared by querying; it
    /// persists until enough non-contact samples roll through a slot's
    /// window.
    pub fn confirmed_ids(&self) -> Vec<DeviceId, MAX_CONTACTS> {
        let mut ids = Vec::new();
        for slot in self.slots.iter().filter(|slot| slot.confirmed) {
            // The vector's capacity equals the slot count, so this
            // cannot fail.
            ids.push(slot.id).ok();
        }
        ids
    }
}

impl Default for ContactLedger {
    fn default() -> Self {
        ContactLedger::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEAR: f32 = 1.0;
    const FAR: f32 = 20.0;

    fn id(value: u8) -> DeviceId {
        DeviceId([value; 8])
    }

    #[test]
    fn three_consecutive_contacts_confirm() {
        let mut ledger = ContactLedger::new();

        ledger.record(id(1), NEAR, 1000);
        ledger.record(id(1), NEAR, 1010);
        assert!(ledger.confirmed_ids().is_empty());

        ledger.record(id(1), NEAR, 1020);
        assert_eq!(&ledger.confirmed_ids()[..], &[id(1)]);
    }

    #[test]
    fn one_non_contact_in_the_window_unconfirms() {
        let mut ledger = ContactLedger::new();

        for step in 0..3 {
            ledger.record(id(1), NEAR, 1000 + step);
        }
        assert_eq!(ledger.confirmed_ids().len(), 1);

        ledger.record(id(1), FAR, 1010);
        assert!(ledger.confirmed_ids().is_empty());

        // Two more near samples and the window is all-contact again.
        ledger.record(id(1), NEAR, 1020);
        ledger.record(id(1), NEAR, 1030);
        assert_eq!(ledger.confirmed_ids().len(), 1);
    }

    #[test]
    fn window_is_exactly_three_regardless_of_history() {
        let mut ledger = ContactLedger::new();

        // A long run of far samples doesn't widen the window.
        for step in 0..10 {
            ledger.record(id(1), FAR, 1000 + step);
        }
        ledger.record(id(1), NEAR, 1020);
        ledger.record(id(1), NEAR, 1030);
        ledger.record(id(1), NEAR, 1040);

        assert_eq!(&ledger.confirmed_ids()[..], &[id(1)]);
    }

    #[test]
    fn classification_threshold_is_ten_calibrated_feet() {
        // feet = (meters * 3.28084 - 0.295) / 1.11, in contact below 10.
        let mut ledger = ContactLedger::new();
        for step in 0..3 {
            // 3.47 m is just under the threshold.
            ledger.record(id(1), 3.47, 1000 + step);
        }
        assert_eq!(ledger.confirmed_ids().len(), 1);

        let mut ledger = ContactLedger::new();
        for step in 0..3 {
            // 3.48 m is just over.
            ledger.record(id(2), 3.48, 1000 + step);
        }
        assert!(ledger.confirmed_ids().is_empty());
    }

    #[test]
    fn known_peer_updates_its_slot_even_when_idle() {
        let mut ledger = ContactLedger::new();

        ledger.record(id(1), NEAR, 1000);
        ledger.record(id(1), NEAR, 1010);

        // Long past the reset window, but the id still matches: the
        // window keeps accumulating instead of starting over.
        ledger.record(id(1), NEAR, 5000);
        assert_eq!(&ledger.confirmed_ids()[..], &[id(1)]);
    }

    #[test]
    fn new_peer_only_claims_idle_unconfirmed_slots() {
        let mut ledger = ContactLedger::new();

        ledger.record(id(1), FAR, 1000);
        ledger.record(id(2), FAR, 1000);

        // Both slots active: a third peer is dropped.
        ledger.record(id(3), NEAR, 1100);
        ledger.record(id(3), NEAR, 1110);
        ledger.record(id(3), NEAR, 1120);
        assert!(ledger.confirmed_ids().is_empty());

        // Once a slot has idled out, the new peer may claim it, and the
        // previous occupant's samples don't carry over.
        ledger.record(id(3), NEAR, 2000);
        assert!(ledger.confirmed_ids().is_empty());
        ledger.record(id(3), NEAR, 2010);
        ledger.record(id(3), NEAR, 2020);
        assert_eq!(&ledger.confirmed_ids()[..], &[id(3)]);
    }

    #[test]
    fn confirmed_slots_are_never_reclaimed() {
        let mut ledger = ContactLedger::new();

        for step in 0..3 {
            ledger.record(id(1), NEAR, 1000 + step);
            ledger.record(id(2), NEAR, 1000 + step);
        }
        assert_eq!(ledger.confirmed_ids().len(), 2);

        // Both slots idle but confirmed; the newcomer is dropped and the
        // confirmations stand.
        ledger.record(id(3), NEAR, 9000);
        assert_eq!(&ledger.confirmed_ids()[..], &[id(1), id(2)]);
    }
}
