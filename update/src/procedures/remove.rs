// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service and instance removal procedures

use async_trait::async_trait;
use sdcadm_common::MultiError;
use sdcadm_common::SdcadmError;
use sdcadm_types::InstanceRef;
use sdcadm_types::ServiceRef;
use sdcadm_types::ServiceType;
use slog::info;
use uuid::Uuid;

use crate::procedures::ExecContext;
use crate::procedures::Procedure;

/// Deletes service records and their running instances/agents across a
/// selected server set
///
/// The server selection (after include/exclude filtering by the caller)
/// must be non-empty for agent services unless `allow_empty_servers` was
/// explicitly requested.
#[derive(Debug)]
pub struct RemoveServicesProcedure {
    pub services: Vec<ServiceRef>,
    pub servers: Vec<Uuid>,
    pub allow_empty_servers: bool,
}

#[async_trait]
impl Procedure for RemoveServicesProcedure {
    fn kind(&self) -> &'static str {
        "RemoveServicesProcedure"
    }

    fn summarize(&self) -> String {
        let names: Vec<&str> =
            self.services.iter().map(|s| s.name.as_str()).collect();
        format!(
            "remove service{} {} (instances included) across {} server{}",
            if names.len() == 1 { "" } else { "s" },
            names.join(", "),
            self.servers.len(),
            if self.servers.len() == 1 { "" } else { "s" },
        )
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError> {
        let removing_agents = self
            .services
            .iter()
            .any(|s| s.service_type == ServiceType::Agent);
        if removing_agents
            && self.servers.is_empty()
            && !self.allow_empty_servers
        {
            return Err(SdcadmError::validation(
                "server selection is empty; pass the explicit \
                 allow-empty option to remove agents from no servers",
            ));
        }

        let mut failures = Vec::new();
        for service in &self.services {
            match service.service_type {
                ServiceType::Vm => {
                    let instances =
                        ctx.clients.sapi.list_instances().await?;
                    for instance in instances
                        .iter()
                        .filter(|i| i.service_uuid == service.uuid)
                    {
                        if let Err(error) = ctx
                            .clients
                            .sapi
                            .delete_instance(instance.uuid)
                            .await
                        {
                            failures
                                .push((instance.uuid.to_string(), error));
                        }
                    }
                }
                ServiceType::Agent => {
                    for &server in &self.servers {
                        if let Err(error) = ctx
                            .clients
                            .cnapi
                            .delete_server_agent(server, &service.name)
                            .await
                        {
                            failures.push((server.to_string(), error));
                        }
                    }
                }
            }

            if let Err(error) =
                ctx.clients.sapi.delete_service(service.uuid).await
            {
                failures.push((service.name.clone(), error));
            } else {
                info!(ctx.log, "service removed";
                    "service" => &service.name);
            }
        }
        MultiError::new(failures).into_result()
    }
}

/// Deletes a single service instance
#[derive(Debug)]
pub struct DeleteInstanceProcedure {
    pub service: ServiceRef,
    pub instance: InstanceRef,
}

#[async_trait]
impl Procedure for DeleteInstanceProcedure {
    fn kind(&self) -> &'static str {
        "DeleteInstanceProcedure"
    }

    fn summarize(&self) -> String {
        format!(
            "delete instance {} of service \"{}\"",
            self.instance.uuid, self.service.name
        )
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError> {
        ctx.clients.sapi.delete_instance(self.instance.uuid).await?;
        info!(ctx.log, "instance deleted";
            "service" => &self.service.name,
            "instance" => %self.instance.uuid,
        );
        Ok(())
    }
}
