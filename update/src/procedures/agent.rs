// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update procedure for host-resident agents
//!
//! Agents live on physical servers rather than in VMs, so one update fans
//! out across many servers.  Installs run through a bounded worker pool
//! (tokio semaphore + `JoinSet`); per-server failures are collected into a
//! [`MultiError`] and never abort the rest of the batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sdcadm_common::MultiError;
use sdcadm_common::SdcadmError;
use sdcadm_types::ImageRef;
use sdcadm_types::ServiceRef;
use slog::debug;
use slog::info;
use slog::o;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::procedures::ExecContext;
use crate::procedures::Procedure;
use crate::steps;

/// Installs one agent image across a set of servers with bounded
/// concurrency
#[derive(Debug)]
pub struct UpdateAgentV1 {
    pub service: ServiceRef,
    pub image: ImageRef,
    pub servers: Vec<Uuid>,
    pub concurrency: usize,
}

async fn install_one(
    ctx: ExecContext,
    agent: String,
    image: Uuid,
    server: Uuid,
) -> Result<(), SdcadmError> {
    let task_id =
        ctx.clients.cnapi.install_agent(server, &agent, image).await?;
    debug!(ctx.log, "agent install started";
        "server" => %server,
        "task" => &task_id,
    );
    steps::wait_for_task(&ctx, &task_id).await
}

#[async_trait]
impl Procedure for UpdateAgentV1 {
    fn kind(&self) -> &'static str {
        "UpdateAgentV1"
    }

    fn summarize(&self) -> String {
        format!(
            "update \"{}\" agent to image {} ({}@{}) on {} server{}",
            self.service.name,
            self.image.uuid,
            self.image.name,
            self.image.version,
            self.servers.len(),
            if self.servers.len() == 1 { "" } else { "s" },
        )
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError> {
        // Record the new image on the service record up front, like the
        // stateless update does.
        ctx.clients
            .sapi
            .update_service_image(self.service.uuid, self.image.uuid)
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut set: JoinSet<(Uuid, Result<(), SdcadmError>)> =
            JoinSet::new();
        for &server in &self.servers {
            let semaphore = Arc::clone(&semaphore);
            let ctx = ExecContext {
                clients: ctx.clients.clone(),
                config: ctx.config.clone(),
                log: ctx.log.new(o!("server" => server.to_string())),
            };
            let agent = self.service.name.clone();
            let image = self.image.uuid;
            set.spawn(async move {
                // Hold the permit for the whole install so at most
                // `concurrency` servers are in flight at once.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                (server, install_one(ctx, agent, image, server).await)
            });
        }

        let mut failures = Vec::new();
        let mut updated = BTreeSet::new();
        while let Some(joined) = set.join_next().await {
            let (server, result) = joined.map_err(|e| {
                SdcadmError::internal(format!(
                    "agent install worker panicked: {}",
                    e
                ))
            })?;
            match result {
                Ok(()) => {
                    updated.insert(server);
                }
                Err(error) => failures.push((server.to_string(), error)),
            }
        }

        // One sysinfo refresh per updated server, regardless of how many
        // agent services were touched there.
        for server in &updated {
            if let Err(error) =
                ctx.clients.cnapi.refresh_sysinfo(*server).await
            {
                failures.push((server.to_string(), error));
            }
        }

        info!(ctx.log, "agent update finished";
            "agent" => &self.service.name,
            "updated" => updated.len(),
            "failed" => failures.len(),
        );
        MultiError::new(failures).into_result()
    }
}
