// crates/alertpipe-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: A single timestamp representation shared by every entity.
// Purpose: Avoid each crate picking its own time type at serialization
//          boundaries (log payloads, KV blobs, relational rows).
// Dependencies: time, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

/// Wall-clock timestamp, serialized as RFC 3339 on the wire and stored as
/// `timestamptz` in the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Builds a timestamp from an existing [`OffsetDateTime`].
    #[must_use]
    pub fn new(at: OffsetDateTime) -> Self {
        Self(at)
    }

    /// Returns the wrapped [`OffsetDateTime`].
    #[must_use]
    pub fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns the number of whole seconds since the caller-supplied
    /// timestamp, or `None` if `self` is earlier than `since`.
    #[must_use]
    pub fn seconds_since(&self, since: Timestamp) -> Option<i64> {
        let delta = self.0 - since.0;
        let secs = delta.whole_seconds();
        if secs < 0 { None } else { Some(secs) }
    }
}
