// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The sdcadm update/rollback plan engine
//!
//! The pipeline is: CLI change descriptors go through the change resolver
//! ([`resolve`]) to become normalized [`sdcadm_types::Change`] records, the
//! plan generator ([`generate`]) turns those into an ordered [`plan::Plan`]
//! of [`procedures::Procedure`]s, and the execution coordinator
//! ([`coordinator`]) runs the procedures in order under the process-wide
//! advisory [`lock`], recording the run in [`history`].  Rollback
//! ([`rollback`]) reads a persisted plan file back in and drives the same
//! coordinator.
//!
//! Between procedures execution is strictly sequential; parallelism only
//! happens inside a single procedure's own fan-out (bounded, see
//! [`procedures::agent`]).

pub mod config;
pub mod coordinator;
pub mod generate;
pub mod history;
pub mod lock;
pub mod plan;
pub mod procedures;
pub mod resolve;
pub mod rollback;
pub mod steps;
pub mod topology;

pub use config::SdcadmConfig;
pub use plan::Plan;
pub use procedures::ExecContext;
pub use procedures::Procedure;
