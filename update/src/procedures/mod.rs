// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Procedure library
//!
//! A [`Procedure`] is one self-contained unit of change: it can describe
//! itself without side effects (`summarize`) and apply itself against the
//! live system (`execute`).  A procedure owns one logical unit of work
//! ("bring every instance of service X to image Y") and may cover many
//! underlying changes.  Retries are the operator's job: there is no paused
//! state, and a failed procedure is re-attempted by re-running the whole
//! command.

use async_trait::async_trait;
use sdc_clients::SdcClients;
use sdcadm_common::SdcadmError;
use slog::Logger;

use crate::config::SdcadmConfig;

pub mod agent;
pub mod create;
pub mod download;
pub mod remove;
pub mod stateless;

pub use agent::UpdateAgentV1;
pub use create::CreateInstanceProcedure;
pub use download::DownloadImages;
pub use remove::DeleteInstanceProcedure;
pub use remove::RemoveServicesProcedure;
pub use stateless::UpdateStatelessServiceV1;

/// Everything a procedure needs to act on the live system
///
/// One context value is built per top-level operation and passed by
/// reference through every stage; workers that need ownership clone it.
#[derive(Clone)]
pub struct ExecContext {
    pub clients: SdcClients,
    pub config: SdcadmConfig,
    pub log: Logger,
}

/// One executable unit of a plan
#[async_trait]
pub trait Procedure: Send + Sync {
    /// Stable name of the procedure variant, recorded in plan files.
    fn kind(&self) -> &'static str;

    /// Human-readable description of what `execute` will do.  Side-effect
    /// free.
    fn summarize(&self) -> String;

    /// Applies the change against the live system.  Idempotent on retry
    /// where the underlying backends allow it.
    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError>;
}
