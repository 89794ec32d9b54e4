use std::collections::HashMap;

use crate::model::{Booking, Facility};

/// The two views of booking state: facilities by name and the reverse
/// index from confirmation id to owning facility. They mutate together
/// under the engine lock; neither is ever exposed half-updated.
#[derive(Default)]
pub struct Store {
    facilities: HashMap<String, Facility>,
    owner_of: HashMap<u32, String>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Facilities ───────────────────────────────────────────

    /// Idempotent. Returns true when the facility was newly created.
    pub fn ensure_facility(&mut self, name: &str) -> bool {
        if self.facilities.contains_key(name) {
            return false;
        }
        self.facilities.insert(name.to_string(), Facility::new());
        true
    }

    pub fn facility(&self, name: &str) -> Option<&Facility> {
        self.facilities.get(name)
    }

    pub fn facility_mut(&mut self, name: &str) -> Option<&mut Facility> {
        self.facilities.get_mut(name)
    }

    pub fn facility_names(&self) -> Vec<String> {
        self.facilities.keys().cloned().collect()
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn owner_of(&self, id: u32) -> Option<&str> {
        self.owner_of.get(&id).map(String::as_str)
    }

    /// Insert into the named facility and the reverse index. The caller
    /// has already checked that the facility exists and has no conflict.
    pub fn insert_booking(&mut self, name: &str, booking: Booking) {
        if let Some(facility) = self.facilities.get_mut(name) {
            facility.insert_booking(booking);
            self.owner_of.insert(booking.id, name.to_string());
        }
    }

    pub fn remove_booking(&mut self, id: u32) -> Option<(String, Booking)> {
        let name = self.owner_of.remove(&id)?;
        let booking = self.facilities.get_mut(&name)?.remove_booking(id)?;
        Some((name, booking))
    }
}
