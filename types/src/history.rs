// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable audit record for one executed (or attempted) operation

use crate::change::Change;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Audit entry for one top-level operation
///
/// Created (with `finished` unset) immediately before the first mutating
/// procedure runs, and finalized exactly once when execution completes,
/// whether it succeeded or not.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HistoryRecord {
    pub uuid: Uuid,
    pub username: String,
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    pub changes: Vec<Change>,
    /// rendered error message when execution failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    /// True once the record has been finalized.
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}
