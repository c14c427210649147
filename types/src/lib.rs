// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data model for sdcadm update plans
//!
//! These are the serde types shared by the plan engine, the history store,
//! and the CLI: normalized [`Change`] records, the persisted plan file
//! consumed by rollback, and the durable [`HistoryRecord`] audit entry.
//! They carry identifiers only — live service/instance objects are
//! re-resolved against current system state whenever a persisted record is
//! fed back in.

pub mod change;
pub mod history;
pub mod plan_file;

pub use change::Change;
pub use change::ChangeKind;
pub use change::ImageRef;
pub use change::InstanceAssignment;
pub use change::InstanceRef;
pub use change::ServiceRef;
pub use change::ServiceType;
pub use history::HistoryRecord;
pub use plan_file::PlanFile;
pub use plan_file::ProcedureSummary;
