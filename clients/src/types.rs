// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resource shapes returned by the backend clients
//!
//! These mirror the subset of each backend's wire objects that the plan
//! engine needs.  Unknown fields from the backends are ignored.

use sdcadm_types::ServiceType;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// A service record from the service directory
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Service {
    pub uuid: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// image currently configured for new provisions of this service
    #[serde(default)]
    pub image_uuid: Option<Uuid>,
}

/// A service instance record from the service directory
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instance {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    #[serde(default)]
    pub image_uuid: Option<Uuid>,
    #[serde(default)]
    pub server_uuid: Option<Uuid>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// An image record from the image registry
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Image {
    pub uuid: Uuid,
    pub name: String,
    pub version: String,
}

/// An agent installed on a physical server, as reported by sysinfo
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default)]
    pub image_uuid: Option<Uuid>,
}

/// A physical server record from the compute-node manager
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Server {
    pub uuid: Uuid,
    pub hostname: String,
    #[serde(default)]
    pub setup: bool,
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
}

/// Status of an asynchronous backend task or job
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failure,
}

impl TaskStatus {
    /// True once the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failure)
    }
}

/// A compute-node manager task, polled by id
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// A VM manager workflow job, polled by uuid
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Job {
    pub uuid: Uuid,
    pub name: String,
    #[serde(rename = "execution")]
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// A VM record from the VM manager
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Vm {
    pub uuid: Uuid,
    pub state: String,
    #[serde(default)]
    pub image_uuid: Option<Uuid>,
}

impl Vm {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}
