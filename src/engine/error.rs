#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    FacilityNotFound(String),
    BookingNotFound(u32),
    Conflict(u32),
    WeekFull,
    Invalid(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::FacilityNotFound(name) => write!(f, "facility not found: {name}"),
            EngineError::BookingNotFound(id) => write!(f, "confirmation id not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with existing booking: {id}"),
            EngineError::WeekFull => write!(f, "no free slot"),
            EngineError::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
