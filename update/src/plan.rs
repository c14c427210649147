// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plans and plan-file persistence
//!
//! A [`Plan`] is an ordered list of procedures plus the normalized changes
//! they apply.  Execution order is authoritative.  A plan with no
//! procedures means "up to date" and short-circuits confirmation, locking,
//! history, and execution.

use std::fmt;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use chrono::Utc;
use sdcadm_common::SdcadmError;
use sdcadm_types::Change;
use sdcadm_types::PlanFile;
use sdcadm_types::ProcedureSummary;
use uuid::Uuid;

use crate::procedures::Procedure;

/// Ordered list of procedures representing one administrative operation
pub struct Plan {
    pub procs: Vec<Box<dyn Procedure>>,
    pub changes: Vec<Change>,
}

impl Plan {
    /// An empty plan: nothing to do, the system is already at the target.
    pub fn empty() -> Plan {
        Plan { procs: Vec::new(), changes: Vec::new() }
    }

    pub fn is_noop(&self) -> bool {
        self.procs.is_empty()
    }

    /// Renders the confirmation-time summary: one numbered entry per
    /// procedure.
    pub fn summarize(&self) -> String {
        self.procs
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.summarize()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The serializable form of this plan.
    pub fn to_plan_file(&self) -> PlanFile {
        PlanFile::new(
            self.changes.clone(),
            self.procs
                .iter()
                .map(|p| ProcedureSummary {
                    kind: p.kind().to_string(),
                    summary: p.summarize(),
                })
                .collect(),
        )
    }

    /// Persists the plan under a fresh per-run directory beneath
    /// `updates_dir`, returning the path of the written plan file.
    pub fn save(
        &self,
        updates_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, SdcadmError> {
        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            Uuid::new_v4()
        );
        let run_dir = updates_dir.join(run_id);
        std::fs::create_dir_all(&run_dir).map_err(|e| {
            SdcadmError::internal(format!(
                "creating plan directory {}: {}",
                run_dir, e
            ))
        })?;
        let path = run_dir.join("plan.json");
        let contents = serde_json::to_string_pretty(&self.to_plan_file())
            .map_err(|e| {
                SdcadmError::internal(format!("serializing plan: {}", e))
            })?;
        std::fs::write(&path, contents).map_err(|e| {
            SdcadmError::internal(format!("writing {}: {}", path, e))
        })?;
        // The changes alone, for tooling that wants them without the
        // procedure summaries.
        let changes_path = run_dir.join("changes.json");
        let changes = serde_json::to_string_pretty(&self.changes)
            .map_err(|e| {
                SdcadmError::internal(format!("serializing changes: {}", e))
            })?;
        std::fs::write(&changes_path, changes).map_err(|e| {
            SdcadmError::internal(format!("writing {}: {}", changes_path, e))
        })?;
        Ok(path)
    }

    /// Reads a previously persisted plan file.
    pub fn load_file(path: &Utf8Path) -> Result<PlanFile, SdcadmError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SdcadmError::usage(format!("reading plan file {}: {}", path, e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            SdcadmError::usage(format!("parsing plan file {}: {}", path, e))
        })
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field(
                "procs",
                &self.procs.iter().map(|p| p.kind()).collect::<Vec<_>>(),
            )
            .field("changes", &self.changes.len())
            .finish()
    }
}
