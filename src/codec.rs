use crate::error::{Result, StoreError};
use crate::model::Calendar;

/// Byte-level encoding of calendar payloads.
///
/// Calendars are the one entity persisted as an opaque blob rather than a
/// field hash, so the encoding is injectable. Implementations must be
/// deterministic enough that `decode(encode(c))` reconstructs an equal
/// calendar, and must fail with a decode error on unrecognized input rather
/// than guessing.
pub trait CalendarCodec: Send + Sync {
    fn encode(&self, calendar: &Calendar) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Calendar>;
}

/// Default codec: JSON.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl CalendarCodec for JsonCodec {
    fn encode(&self, calendar: &Calendar) -> Result<Vec<u8>> {
        serde_json::to_vec(calendar)
            .map_err(|e| StoreError::Decode(format!("calendar encode failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Calendar> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Decode(format!("calendar decode failed: {e}")))
    }
}
