use std::collections::BTreeMap;

use crate::model::{DAYS_PER_WEEK, MINUTES_PER_DAY, Minute, Span};

use super::{Engine, EngineError};

fn day_window(day: u8) -> Span {
    let start = day as Minute * MINUTES_PER_DAY;
    Span::new(start, start + MINUTES_PER_DAY)
}

impl Engine {
    /// Unordered list of facility names.
    pub async fn list_facilities(&self) -> Vec<String> {
        self.store.read().await.facility_names()
    }

    /// Per-day schedule for the named facility, clipped to each requested
    /// day's 1440-minute window as minute-of-day offsets. An empty `days`
    /// defaults to the whole week; duplicate days collapse. A booking
    /// spanning midnight shows up once in each day it touches.
    pub async fn query(
        &self,
        name: &str,
        days: &[u8],
    ) -> Result<BTreeMap<u8, Vec<(Minute, Minute)>>, EngineError> {
        for &day in days {
            if day >= DAYS_PER_WEEK {
                return Err(EngineError::Invalid("day index out of range"));
            }
        }
        let requested: Vec<u8> = if days.is_empty() {
            (0..DAYS_PER_WEEK).collect()
        } else {
            days.to_vec()
        };

        let store = self.store.read().await;
        let facility = store
            .facility(name)
            .ok_or_else(|| EngineError::FacilityNotFound(name.to_string()))?;

        let mut result = BTreeMap::new();
        for day in requested {
            let rows: Vec<(Minute, Minute)> = facility
                .overlapping(&day_window(day))
                .filter_map(|b| b.span.clip_to_day(day))
                .collect();
            // overlapping() iterates in start order, so rows are already
            // sorted ascending
            result.insert(day, rows);
        }
        Ok(result)
    }

    /// All bookings of a facility as day-clipped minute-of-week segments,
    /// ascending. This is the monitor-callback payload source; a booking
    /// crossing midnight contributes one segment per day it touches.
    pub async fn week_segments(&self, name: &str) -> Result<Vec<Span>, EngineError> {
        let store = self.store.read().await;
        let facility = store
            .facility(name)
            .ok_or_else(|| EngineError::FacilityNotFound(name.to_string()))?;

        let mut segments = Vec::new();
        for day in 0..DAYS_PER_WEEK {
            let base = day as Minute * MINUTES_PER_DAY;
            for booking in facility.overlapping(&day_window(day)) {
                if let Some((s, e)) = booking.span.clip_to_day(day) {
                    segments.push(Span::new(base + s, base + e));
                }
            }
        }
        Ok(segments)
    }

    /// Name of the facility owning a confirmation id.
    pub async fn facility_of(&self, id: u32) -> Option<String> {
        self.store.read().await.owner_of(id).map(str::to_string)
    }

    /// Current interval of a booking.
    pub async fn booking_span(&self, id: u32) -> Option<Span> {
        let store = self.store.read().await;
        let name = store.owner_of(id)?;
        store.facility(name)?.booking(id).map(|b| b.span)
    }

    /// Number of bookings on a facility. `None` when the facility is unknown.
    pub async fn booking_count(&self, name: &str) -> Option<usize> {
        let store = self.store.read().await;
        store.facility(name).map(|f| f.bookings().len())
    }
}
