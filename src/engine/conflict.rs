use crate::model::{Facility, Span};

use super::EngineError;

pub(super) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::Invalid("end must be after start"));
    }
    if !span.in_week() {
        return Err(EngineError::Invalid("interval outside the bookable week"));
    }
    Ok(())
}

/// Reject when `span` overlaps any booking of the facility other than
/// `exclude` (a booking never conflicts with itself on CHANGE).
pub(super) fn check_no_conflict(
    facility: &Facility,
    span: &Span,
    exclude: Option<u32>,
) -> Result<(), EngineError> {
    for booking in facility.overlapping(span) {
        if exclude == Some(booking.id) {
            continue;
        }
        return Err(EngineError::Conflict(booking.id));
    }
    Ok(())
}
