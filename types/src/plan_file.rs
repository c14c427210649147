// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted plan files
//!
//! Every generated plan is written out as JSON under the run directory so it
//! can be fed back in for rollback.  The file carries the normalized changes
//! (enough to re-derive procedures against current system state) plus the
//! human-readable procedure summaries that were shown at confirmation time.
//! Unknown fields are ignored on read so older tools can load files written
//! by newer ones.

use crate::change::Change;
use serde::Deserialize;
use serde::Serialize;

/// Current plan file format version
pub const PLAN_FILE_VERSION: u32 = 1;

/// Rendered description of one procedure, as shown at confirmation time
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcedureSummary {
    pub kind: String,
    pub summary: String,
}

/// JSON serialization of a generated plan
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PlanFile {
    #[serde(default = "default_version", rename = "v")]
    pub version: u32,
    pub changes: Vec<Change>,
    #[serde(default)]
    pub procs: Vec<ProcedureSummary>,
}

fn default_version() -> u32 {
    PLAN_FILE_VERSION
}

impl PlanFile {
    pub fn new(
        changes: Vec<Change>,
        procs: Vec<ProcedureSummary>,
    ) -> PlanFile {
        PlanFile { version: PLAN_FILE_VERSION, changes, procs }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::change::ChangeKind;
    use crate::change::ImageRef;
    use crate::change::ServiceRef;
    use crate::change::ServiceType;
    use uuid::Uuid;

    fn change(name: &str) -> Change {
        Change {
            kind: ChangeKind::UpdateService,
            service: ServiceRef {
                name: name.to_string(),
                uuid: Uuid::new_v4(),
                service_type: ServiceType::Vm,
            },
            image: Some(ImageRef {
                uuid: Uuid::new_v4(),
                name: name.to_string(),
                version: "release-20240601-0002".to_string(),
            }),
            prior_image: Some(ImageRef {
                uuid: Uuid::new_v4(),
                name: name.to_string(),
                version: "release-20240501-0001".to_string(),
            }),
            instance: None,
            insts: Vec::new(),
        }
    }

    fn roundtrip(file: &PlanFile) -> PlanFile {
        let json = serde_json::to_string_pretty(file).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    // Changes must survive serialization with the same service/instance/image
    // identifiers, for empty, singleton and multi-change plans.
    #[test]
    fn test_plan_file_roundtrip() {
        for n in [0usize, 1, 5] {
            let file = PlanFile::new(
                (0..n).map(|i| change(&format!("svc{}", i))).collect(),
                vec![ProcedureSummary {
                    kind: "UpdateStatelessServiceV1".to_string(),
                    summary: "update svc".to_string(),
                }],
            );
            assert_eq!(roundtrip(&file).changes, file.changes);
        }
    }

    // Plan files written by newer versions may carry fields we don't know
    // about; they must be ignored, not rejected.
    #[test]
    fn test_plan_file_ignores_unknown_fields() {
        let json = r#"{
            "v": 1,
            "changes": [],
            "procs": [],
            "generator": "sdcadm 9.99.9",
            "experimental": { "nested": true }
        }"#;
        let file: PlanFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.changes.len(), 0);
    }
}
