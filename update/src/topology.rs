// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only snapshot of the live deployment
//!
//! Change resolution and plan generation work against one consistent
//! [`Topology`] loaded up front, rather than querying the backends
//! piecemeal.  Nothing here mutates the system.

use std::collections::BTreeMap;

use sdc_clients::Instance;
use sdc_clients::SdcClients;
use sdc_clients::Server;
use sdc_clients::Service;
use sdcadm_common::SdcadmError;
use sdcadm_types::ServiceRef;
use slog::debug;
use slog::Logger;
use uuid::Uuid;

/// Snapshot of services, instances and servers at plan time
#[derive(Clone, Debug, Default)]
pub struct Topology {
    services: BTreeMap<Uuid, Service>,
    instances: BTreeMap<Uuid, Instance>,
    servers: BTreeMap<Uuid, Server>,
}

impl Topology {
    /// Loads a fresh snapshot from the service directory and compute-node
    /// manager.
    pub async fn load(
        log: &Logger,
        clients: &SdcClients,
    ) -> Result<Topology, SdcadmError> {
        let services = clients.sapi.list_services().await?;
        let instances = clients.sapi.list_instances().await?;
        let servers = clients.cnapi.list_servers().await?;
        debug!(log, "loaded topology";
            "services" => services.len(),
            "instances" => instances.len(),
            "servers" => servers.len(),
        );
        Ok(Topology {
            services: services.into_iter().map(|s| (s.uuid, s)).collect(),
            instances: instances.into_iter().map(|i| (i.uuid, i)).collect(),
            servers: servers.into_iter().map(|s| (s.uuid, s)).collect(),
        })
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service_by_name(&self, name: &str) -> Option<&Service> {
        self.services.values().find(|s| s.name == name)
    }

    pub fn service(&self, uuid: Uuid) -> Option<&Service> {
        self.services.get(&uuid)
    }

    pub fn instance(&self, uuid: Uuid) -> Option<&Instance> {
        self.instances.get(&uuid)
    }

    /// Finds an instance by UUID string or alias.
    pub fn instance_by_token(&self, token: &str) -> Option<&Instance> {
        if let Ok(uuid) = token.parse::<Uuid>() {
            return self.instances.get(&uuid);
        }
        self.instances
            .values()
            .find(|i| i.alias.as_deref() == Some(token))
    }

    pub fn instances_of(&self, service: Uuid) -> Vec<&Instance> {
        self.instances
            .values()
            .filter(|i| i.service_uuid == service)
            .collect()
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    pub fn server(&self, uuid: Uuid) -> Option<&Server> {
        self.servers.get(&uuid)
    }

    /// Setup servers carrying the named agent, the target set for an agent
    /// update.
    pub fn servers_with_agent(&self, agent: &str) -> Vec<&Server> {
        self.servers
            .values()
            .filter(|s| s.setup && s.agents.iter().any(|a| a.name == agent))
            .collect()
    }

    /// Builds a [`ServiceRef`] for a known service.
    pub fn service_ref(&self, service: &Service) -> ServiceRef {
        ServiceRef {
            name: service.name.clone(),
            uuid: service.uuid,
            service_type: service.service_type,
        }
    }
}
