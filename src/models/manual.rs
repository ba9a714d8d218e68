//! Manually entered data from human review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured human-provided payload linked to an alert.
///
/// On persistence a MANUAL atomic fact is materialized alongside so
/// downstream stages treat it identically to machine-extracted facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualInput {
    pub id: i64,
    pub alert_id: Option<i64>,
    pub deal_id: Option<i64>,
    pub financing_event_id: Option<i64>,

    /// "financing", "participant", "target_name", ...
    pub input_type: String,
    pub data: serde_json::Value,

    pub entered_by: String,
    pub entered_at: DateTime<Utc>,
    pub notes: Option<String>,
}
