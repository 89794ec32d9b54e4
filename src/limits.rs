//! Hard limits enforced at the protocol and engine boundaries.

/// Largest datagram we receive or send. UDP payloads cannot exceed this.
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// Wire strings are length-prefixed with a u16, so this is structural.
/// Facility names share the same limit.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// QUERY may name each of the seven days at most once meaningfully; the
/// day-count byte still admits up to 255 entries, duplicates collapse.
pub const MAX_QUERY_DAYS: usize = u8::MAX as usize;
