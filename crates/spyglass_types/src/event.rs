//! Events: identified, timestamped, typed data values.

use crate::data::Data;
use crate::schema::Type;

/// A single telemetry event.
///
/// IDs are assigned at ingestion and are dense within a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The event's positional identifier.
    pub id: u64,
    /// Nanoseconds since the UNIX epoch.
    pub timestamp: i64,
    /// The event type; a (possibly named) record layout.
    pub ty: Type,
    /// The event value, conforming to `ty`.
    pub data: Data,
}

impl Event {
    /// Creates an event. The ID is assigned later by the ingest path.
    pub fn new(timestamp: i64, ty: Type, data: Data) -> Self {
        Self {
            id: 0,
            timestamp,
            ty,
            data,
        }
    }

    /// The name of the event's type, or `""` for anonymous layouts.
    pub fn type_name(&self) -> &str {
        self.ty.name().unwrap_or("")
    }
}
