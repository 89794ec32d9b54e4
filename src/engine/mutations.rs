use crate::model::{Booking, Minute, Span, WEEK_MINUTES, WallClock};

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Idempotent. Creates an empty facility when absent.
    pub async fn ensure_facility(&self, name: &str) {
        let mut store = self.store.write().await;
        if store.ensure_facility(name) {
            tracing::info!("facility created: {name}");
        }
    }

    /// Book `[start, end)` on the named facility. Returns the confirmation id.
    pub async fn book(
        &self,
        name: &str,
        start: WallClock,
        end: WallClock,
    ) -> Result<u32, EngineError> {
        let s = start
            .minute_of_week()
            .ok_or(EngineError::Invalid("invalid start day/hour/minute"))?;
        let e = end
            .minute_of_week()
            .ok_or(EngineError::Invalid("invalid end day/hour/minute"))?;
        if e <= s {
            return Err(EngineError::Invalid("end must be after start"));
        }
        let span = Span::new(s, e);
        validate_span(&span)?;

        let mut store = self.store.write().await;
        let facility = store
            .facility(name)
            .ok_or_else(|| EngineError::FacilityNotFound(name.to_string()))?;
        check_no_conflict(facility, &span, None)?;

        let id = self.alloc_id();
        store.insert_booking(name, Booking { id, span });
        Ok(id)
    }

    /// Shift both endpoints of a booking by `offset_minutes` (any sign).
    /// Returns the owning facility's name so callers can notify its watchers.
    pub async fn change(&self, id: u32, offset_minutes: i32) -> Result<String, EngineError> {
        let mut store = self.store.write().await;
        let name = store
            .owner_of(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .to_string();
        let Some(facility) = store.facility_mut(&name) else {
            return Err(EngineError::BookingNotFound(id));
        };
        let Some(current) = facility.booking(id).map(|b| b.span) else {
            return Err(EngineError::BookingNotFound(id));
        };

        let shifted = current.shifted(offset_minutes);
        if !shifted.in_week() {
            return Err(EngineError::Invalid("shift results in invalid time range"));
        }
        check_no_conflict(facility, &shifted, Some(id))?;

        facility.remove_booking(id);
        facility.insert_booking(Booking { id, span: shifted });
        Ok(name)
    }

    /// Book the earliest free minute-of-week as a 1-minute slot. Repeated
    /// calls consume further slots, which is exactly what makes this
    /// operation non-idempotent under retransmission.
    pub async fn book_first_free(&self, name: &str) -> Result<u32, EngineError> {
        let mut store = self.store.write().await;
        let facility = store
            .facility(name)
            .ok_or_else(|| EngineError::FacilityNotFound(name.to_string()))?;

        let mut cursor: Minute = 0;
        for booking in facility.bookings() {
            if booking.span.start > cursor {
                break;
            }
            cursor = cursor.max(booking.span.end);
        }
        if cursor >= WEEK_MINUTES {
            return Err(EngineError::WeekFull);
        }

        let id = self.alloc_id();
        store.insert_booking(name, Booking { id, span: Span::new(cursor, cursor + 1) });
        Ok(id)
    }

    /// Remove a booking. Not reachable from the wire protocol; kept for
    /// demos and tests.
    pub async fn cancel(&self, id: u32) -> Result<(), EngineError> {
        let mut store = self.store.write().await;
        store
            .remove_booking(id)
            .map(|_| ())
            .ok_or(EngineError::BookingNotFound(id))
    }
}
