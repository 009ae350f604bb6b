// =============================================================================
// models.rs - THE PREDICTION RECORD
// =============================================================================
//
// One record per prediction: when it happened, where, which capability made
// it, the predicted value, and a small category code. Millions of these get
// written to disk and then read back so we can ask the only question that
// matters: "have I seen you before?"
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single prediction record as it travels through the record stream.
///
/// Records are immutable once read. Only `ts`, `capability_id`,
/// `location_id` and `category` feed the fingerprint; `value` is payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// When the prediction was made. Stored at full precision; the
    /// fingerprint decides how much of it matters.
    pub ts: DateTime<Utc>,

    /// Where the prediction applies.
    pub location_id: String,

    /// Which capability produced it.
    pub capability_id: String,

    /// The predicted value. Not part of the dedup key.
    pub value: f32,

    /// Category code. The generator emits 0..=5 but any i32 is accepted.
    pub category: i32,
}

impl Record {
    pub fn new(
        ts: DateTime<Utc>,
        location_id: impl Into<String>,
        capability_id: impl Into<String>,
        value: f32,
        category: i32,
    ) -> Self {
        Self {
            ts,
            location_id: location_id.into(),
            capability_id: capability_id.into(),
            value,
            category,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] capability={} location={} category={} value={:.4}",
            self.ts.to_rfc3339(),
            self.capability_id,
            self.location_id,
            self.category,
            self.value
        )
    }
}
