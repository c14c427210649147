// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backend collaborator clients for sdcadm
//!
//! The plan engine talks to four backends: the service directory (SAPI), the
//! compute-node manager (CNAPI), the VM manager (VMAPI), and the image
//! registry (IMGAPI).  Each is consumed through a trait with plain
//! list/get/create/update/delete semantics over UUID identifiers, plus a
//! task/job abstraction pollable by id.  Transport-level failures are
//! normalized into [`SdcadmError::SdcClient`] here so raw backend error
//! shapes never reach plan or procedure logic.

use std::sync::Arc;

use async_trait::async_trait;
use sdcadm_common::SdcadmError;
use uuid::Uuid;

mod http;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod types;

pub use http::HttpClients;
#[cfg(any(test, feature = "testing"))]
pub use mock::MockSdc;
pub use types::AgentInfo;
pub use types::Image;
pub use types::Instance;
pub use types::Job;
pub use types::Server;
pub use types::Service;
pub use types::Task;
pub use types::TaskStatus;
pub use types::Vm;

/// Service directory (SAPI): service and instance CRUD
#[async_trait]
pub trait SapiClient: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, SdcadmError>;

    async fn get_service(&self, uuid: Uuid) -> Result<Service, SdcadmError>;

    /// Sets the service's `image_uuid` parameter so future provisions use
    /// the new image.
    async fn update_service_image(
        &self,
        service: Uuid,
        image: Uuid,
    ) -> Result<(), SdcadmError>;

    async fn delete_service(&self, uuid: Uuid) -> Result<(), SdcadmError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, SdcadmError>;

    async fn create_instance(
        &self,
        service: Uuid,
        server: Uuid,
        image: Uuid,
        alias: &str,
    ) -> Result<Instance, SdcadmError>;

    async fn delete_instance(&self, uuid: Uuid) -> Result<(), SdcadmError>;
}

/// Compute-node manager (CNAPI): server listing, agent installs, task polls
#[async_trait]
pub trait CnapiClient: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<Server>, SdcadmError>;

    async fn get_server(&self, uuid: Uuid) -> Result<Server, SdcadmError>;

    /// Kicks off an agent install on one server; returns the task id to
    /// poll.
    async fn install_agent(
        &self,
        server: Uuid,
        agent: &str,
        image: Uuid,
    ) -> Result<String, SdcadmError>;

    async fn get_task(&self, task_id: &str) -> Result<Task, SdcadmError>;

    /// Asks the server to re-report its sysinfo, including installed agent
    /// versions.  Expensive; callers deduplicate per server.
    async fn refresh_sysinfo(&self, server: Uuid) -> Result<(), SdcadmError>;

    async fn delete_server_agent(
        &self,
        server: Uuid,
        agent: &str,
    ) -> Result<(), SdcadmError>;
}

/// VM manager (VMAPI): instance lifecycle and job polls
#[async_trait]
pub trait VmapiClient: Send + Sync {
    async fn get_vm(&self, uuid: Uuid) -> Result<Vm, SdcadmError>;

    /// Reprovisions a VM in place onto a new image; returns the job uuid to
    /// poll.
    async fn reprovision_vm(
        &self,
        vm: Uuid,
        image: Uuid,
    ) -> Result<Uuid, SdcadmError>;

    async fn delete_vm(&self, vm: Uuid) -> Result<Uuid, SdcadmError>;

    async fn get_job(&self, job: Uuid) -> Result<Job, SdcadmError>;
}

/// Image registry (IMGAPI): local image store plus remote import
#[async_trait]
pub trait ImgapiClient: Send + Sync {
    /// Lists images by service name on the configured update channel,
    /// newest last.
    async fn list_images(
        &self,
        name: &str,
        channel: Option<&str>,
    ) -> Result<Vec<Image>, SdcadmError>;

    /// Returns the image if present in the local store.
    async fn get_image(
        &self,
        uuid: Uuid,
    ) -> Result<Option<Image>, SdcadmError>;

    /// Imports an image from the remote update source into the local store.
    async fn import_image(
        &self,
        uuid: Uuid,
        channel: Option<&str>,
    ) -> Result<(), SdcadmError>;
}

/// Bundle of the four backend clients threaded through the plan engine
#[derive(Clone)]
pub struct SdcClients {
    pub sapi: Arc<dyn SapiClient>,
    pub cnapi: Arc<dyn CnapiClient>,
    pub vmapi: Arc<dyn VmapiClient>,
    pub imgapi: Arc<dyn ImgapiClient>,
}
