// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory mock backends for tests
//!
//! One [`MockSdc`] holds the whole simulated datacenter: services,
//! instances, images, servers, plus asynchronous tasks and jobs that
//! complete after a configurable number of polls.  All four client traits
//! are implemented against the same shared state, so engine tests observe a
//! consistent world.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use sdcadm_common::SdcadmError;
use sdcadm_types::ServiceType;
use uuid::Uuid;

use crate::types::AgentInfo;
use crate::types::Image;
use crate::types::Instance;
use crate::types::Job;
use crate::types::Server;
use crate::types::Service;
use crate::types::Task;
use crate::types::TaskStatus;
use crate::types::Vm;
use crate::CnapiClient;
use crate::ImgapiClient;
use crate::SapiClient;
use crate::SdcClients;
use crate::VmapiClient;

/// Number of polls before a mock task or job reports a terminal status
const POLLS_TO_COMPLETE: u32 = 2;

#[derive(Default)]
struct State {
    services: BTreeMap<Uuid, Service>,
    instances: BTreeMap<Uuid, Instance>,
    vms: BTreeMap<Uuid, Vm>,
    servers: BTreeMap<Uuid, Server>,
    local_images: BTreeMap<Uuid, Image>,
    remote_images: BTreeMap<Uuid, Image>,

    tasks: BTreeMap<String, PendingTask>,
    jobs: BTreeMap<Uuid, PendingJob>,
    next_task_id: u64,

    // failure injection
    fail_install_on: BTreeSet<Uuid>,
    fail_reprovision_on: BTreeSet<Uuid>,

    // observability for assertions
    imports: Vec<Uuid>,
    sysinfo_refreshes: Vec<Uuid>,
    created_aliases: Vec<String>,
    list_calls: usize,
    inflight_installs: usize,
    max_inflight_installs: usize,
}

struct PendingTask {
    server: Uuid,
    agent: String,
    image: Uuid,
    polls: u32,
    fail: bool,
}

#[derive(Clone, Copy)]
enum JobKind {
    Reprovision { vm: Uuid, image: Uuid },
    Delete { vm: Uuid },
}

struct PendingJob {
    kind: JobKind,
    polls: u32,
    fail: bool,
}

/// Handle to the simulated datacenter
#[derive(Clone, Default)]
pub struct MockSdc {
    state: Arc<Mutex<State>>,
}

impl MockSdc {
    pub fn new() -> MockSdc {
        MockSdc::default()
    }

    /// Returns a client bundle backed by this mock.
    pub fn clients(&self) -> SdcClients {
        SdcClients {
            sapi: Arc::new(self.clone()),
            cnapi: Arc::new(self.clone()),
            vmapi: Arc::new(self.clone()),
            imgapi: Arc::new(self.clone()),
        }
    }

    pub fn add_remote_image(&self, name: &str, version: &str) -> Image {
        let image = Image {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            version: version.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.remote_images.insert(image.uuid, image.clone());
        image
    }

    pub fn add_local_image(&self, name: &str, version: &str) -> Image {
        let image = self.add_remote_image(name, version);
        let mut state = self.state.lock().unwrap();
        state.local_images.insert(image.uuid, image.clone());
        image
    }

    pub fn add_service(
        &self,
        name: &str,
        service_type: ServiceType,
        image: Option<Uuid>,
    ) -> Service {
        let service = Service {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            service_type,
            image_uuid: image,
        };
        let mut state = self.state.lock().unwrap();
        state.services.insert(service.uuid, service.clone());
        service
    }

    pub fn add_server(&self, hostname: &str) -> Server {
        let server = Server {
            uuid: Uuid::new_v4(),
            hostname: hostname.to_string(),
            setup: true,
            agents: Vec::new(),
        };
        let mut state = self.state.lock().unwrap();
        state.servers.insert(server.uuid, server.clone());
        server
    }

    pub fn add_server_agent(&self, server: Uuid, agent: &str, image: Uuid) {
        let mut state = self.state.lock().unwrap();
        let server = state.servers.get_mut(&server).expect("unknown server");
        server.agents.push(AgentInfo {
            name: agent.to_string(),
            image_uuid: Some(image),
        });
    }

    pub fn add_instance(
        &self,
        service: Uuid,
        server: Uuid,
        image: Uuid,
    ) -> Instance {
        let instance = Instance {
            uuid: Uuid::new_v4(),
            service_uuid: service,
            image_uuid: Some(image),
            server_uuid: Some(server),
            alias: None,
        };
        let mut state = self.state.lock().unwrap();
        state.instances.insert(instance.uuid, instance.clone());
        state.vms.insert(
            instance.uuid,
            Vm {
                uuid: instance.uuid,
                state: "running".to_string(),
                image_uuid: Some(image),
            },
        );
        instance
    }

    /// Agent-install tasks targeting this server will report failure.
    pub fn fail_installs_on(&self, server: Uuid) {
        self.state.lock().unwrap().fail_install_on.insert(server);
    }

    /// Reprovision jobs targeting this VM will report failure.
    pub fn fail_reprovision_on(&self, vm: Uuid) {
        self.state.lock().unwrap().fail_reprovision_on.insert(vm);
    }

    /// Image uuids imported so far, in order.
    pub fn imports(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().imports.clone()
    }

    /// Servers whose sysinfo was refreshed, in order.
    pub fn sysinfo_refreshes(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().sysinfo_refreshes.clone()
    }

    /// Aliases of instances created so far, in order.
    pub fn created_aliases(&self) -> Vec<String> {
        self.state.lock().unwrap().created_aliases.clone()
    }

    /// Number of list requests (services, instances, servers) served so
    /// far.  Zero means nothing has read the topology.
    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// High-water mark of concurrently in-flight agent installs.
    pub fn max_inflight_installs(&self) -> usize {
        self.state.lock().unwrap().max_inflight_installs
    }

    pub fn instance_image(&self, instance: Uuid) -> Option<Uuid> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(&instance)
            .and_then(|i| i.image_uuid)
    }

    pub fn server_agent_image(
        &self,
        server: Uuid,
        agent: &str,
    ) -> Option<Uuid> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .get(&server)?
            .agents
            .iter()
            .find(|a| a.name == agent)
            .and_then(|a| a.image_uuid)
    }
}

fn not_found(client: &'static str, what: &str, id: &str) -> SdcadmError {
    SdcadmError::SdcClient {
        client,
        message: format!("{} {} not found", what, id),
    }
}

#[async_trait]
impl SapiClient for MockSdc {
    async fn list_services(&self) -> Result<Vec<Service>, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state.services.values().cloned().collect())
    }

    async fn get_service(&self, uuid: Uuid) -> Result<Service, SdcadmError> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(&uuid)
            .cloned()
            .ok_or_else(|| not_found("sapi", "service", &uuid.to_string()))
    }

    async fn update_service_image(
        &self,
        service: Uuid,
        image: Uuid,
    ) -> Result<(), SdcadmError> {
        let mut state = self.state.lock().unwrap();
        let service = state
            .services
            .get_mut(&service)
            .ok_or_else(|| not_found("sapi", "service", &service.to_string()))?;
        service.image_uuid = Some(image);
        Ok(())
    }

    async fn delete_service(&self, uuid: Uuid) -> Result<(), SdcadmError> {
        let mut state = self.state.lock().unwrap();
        state
            .services
            .remove(&uuid)
            .ok_or_else(|| not_found("sapi", "service", &uuid.to_string()))?;
        state.instances.retain(|_, i| i.service_uuid != uuid);
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state.instances.values().cloned().collect())
    }

    async fn create_instance(
        &self,
        service: Uuid,
        server: Uuid,
        image: Uuid,
        alias: &str,
    ) -> Result<Instance, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        if !state.services.contains_key(&service) {
            return Err(not_found("sapi", "service", &service.to_string()));
        }
        let instance = Instance {
            uuid: Uuid::new_v4(),
            service_uuid: service,
            image_uuid: Some(image),
            server_uuid: Some(server),
            alias: Some(alias.to_string()),
        };
        state.instances.insert(instance.uuid, instance.clone());
        state.vms.insert(
            instance.uuid,
            Vm {
                uuid: instance.uuid,
                state: "running".to_string(),
                image_uuid: Some(image),
            },
        );
        state.created_aliases.push(alias.to_string());
        Ok(instance)
    }

    async fn delete_instance(&self, uuid: Uuid) -> Result<(), SdcadmError> {
        let mut state = self.state.lock().unwrap();
        state
            .instances
            .remove(&uuid)
            .ok_or_else(|| not_found("sapi", "instance", &uuid.to_string()))?;
        state.vms.remove(&uuid);
        Ok(())
    }
}

#[async_trait]
impl CnapiClient for MockSdc {
    async fn list_servers(&self) -> Result<Vec<Server>, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state.servers.values().cloned().collect())
    }

    async fn get_server(&self, uuid: Uuid) -> Result<Server, SdcadmError> {
        self.state
            .lock()
            .unwrap()
            .servers
            .get(&uuid)
            .cloned()
            .ok_or_else(|| not_found("cnapi", "server", &uuid.to_string()))
    }

    async fn install_agent(
        &self,
        server: Uuid,
        agent: &str,
        image: Uuid,
    ) -> Result<String, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        if !state.servers.contains_key(&server) {
            return Err(not_found("cnapi", "server", &server.to_string()));
        }
        state.next_task_id += 1;
        let id = format!("task-{}", state.next_task_id);
        let fail = state.fail_install_on.contains(&server);
        state.tasks.insert(
            id.clone(),
            PendingTask {
                server,
                agent: agent.to_string(),
                image,
                polls: 0,
                fail,
            },
        );
        state.inflight_installs += 1;
        state.max_inflight_installs =
            state.max_inflight_installs.max(state.inflight_installs);
        Ok(id)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        let (polls, server, agent, image, fail) = {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| not_found("cnapi", "task", task_id))?;
            task.polls += 1;
            (task.polls, task.server, task.agent.clone(), task.image, task.fail)
        };
        if polls < POLLS_TO_COMPLETE {
            return Ok(Task {
                id: task_id.to_string(),
                status: TaskStatus::Running,
                error: None,
            });
        }

        // terminal transition: settle the install and drop it from the
        // in-flight gauge exactly once
        if polls == POLLS_TO_COMPLETE {
            state.inflight_installs -= 1;
            if !fail {
                if let Some(server) = state.servers.get_mut(&server) {
                    match server.agents.iter_mut().find(|a| a.name == agent) {
                        Some(info) => info.image_uuid = Some(image),
                        None => server.agents.push(AgentInfo {
                            name: agent.clone(),
                            image_uuid: Some(image),
                        }),
                    }
                }
            }
        }
        Ok(Task {
            id: task_id.to_string(),
            status: if fail {
                TaskStatus::Failure
            } else {
                TaskStatus::Complete
            },
            error: fail.then(|| "agent install failed".to_string()),
        })
    }

    async fn refresh_sysinfo(&self, server: Uuid) -> Result<(), SdcadmError> {
        let mut state = self.state.lock().unwrap();
        if !state.servers.contains_key(&server) {
            return Err(not_found("cnapi", "server", &server.to_string()));
        }
        state.sysinfo_refreshes.push(server);
        Ok(())
    }

    async fn delete_server_agent(
        &self,
        server: Uuid,
        agent: &str,
    ) -> Result<(), SdcadmError> {
        let mut state = self.state.lock().unwrap();
        let server = state
            .servers
            .get_mut(&server)
            .ok_or_else(|| not_found("cnapi", "server", &server.to_string()))?;
        server.agents.retain(|a| a.name != agent);
        Ok(())
    }
}

#[async_trait]
impl VmapiClient for MockSdc {
    async fn get_vm(&self, uuid: Uuid) -> Result<Vm, SdcadmError> {
        self.state
            .lock()
            .unwrap()
            .vms
            .get(&uuid)
            .cloned()
            .ok_or_else(|| not_found("vmapi", "vm", &uuid.to_string()))
    }

    async fn reprovision_vm(
        &self,
        vm: Uuid,
        image: Uuid,
    ) -> Result<Uuid, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        if !state.vms.contains_key(&vm) {
            return Err(not_found("vmapi", "vm", &vm.to_string()));
        }
        let fail = state.fail_reprovision_on.contains(&vm);
        let job = Uuid::new_v4();
        state.jobs.insert(
            job,
            PendingJob {
                kind: JobKind::Reprovision { vm, image },
                polls: 0,
                fail,
            },
        );
        Ok(job)
    }

    async fn delete_vm(&self, vm: Uuid) -> Result<Uuid, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        if !state.vms.contains_key(&vm) {
            return Err(not_found("vmapi", "vm", &vm.to_string()));
        }
        let job = Uuid::new_v4();
        state.jobs.insert(
            job,
            PendingJob { kind: JobKind::Delete { vm }, polls: 0, fail: false },
        );
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job, SdcadmError> {
        let mut state = self.state.lock().unwrap();
        let (polls, kind, fail) = {
            let job = state.jobs.get_mut(&job_id).ok_or_else(|| {
                not_found("vmapi", "job", &job_id.to_string())
            })?;
            job.polls += 1;
            (job.polls, job.kind, job.fail)
        };
        if polls < POLLS_TO_COMPLETE {
            return Ok(Job {
                uuid: job_id,
                name: "mock-job".to_string(),
                status: TaskStatus::Running,
                error: None,
            });
        }

        if polls == POLLS_TO_COMPLETE && !fail {
            match kind {
                JobKind::Reprovision { vm, image } => {
                    if let Some(vm) = state.vms.get_mut(&vm) {
                        vm.image_uuid = Some(image);
                        vm.state = "running".to_string();
                    }
                    if let Some(instance) = state.instances.get_mut(&vm) {
                        instance.image_uuid = Some(image);
                    }
                }
                JobKind::Delete { vm } => {
                    state.vms.remove(&vm);
                    state.instances.remove(&vm);
                }
            }
        }
        Ok(Job {
            uuid: job_id,
            name: "mock-job".to_string(),
            status: if fail {
                TaskStatus::Failure
            } else {
                TaskStatus::Complete
            },
            error: fail.then(|| "reprovision failed".to_string()),
        })
    }
}

#[async_trait]
impl ImgapiClient for MockSdc {
    async fn list_images(
        &self,
        name: &str,
        _channel: Option<&str>,
    ) -> Result<Vec<Image>, SdcadmError> {
        let state = self.state.lock().unwrap();
        let mut images: Vec<Image> = state
            .remote_images
            .values()
            .filter(|i| i.name == name)
            .cloned()
            .collect();
        images.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(images)
    }

    async fn get_image(
        &self,
        uuid: Uuid,
    ) -> Result<Option<Image>, SdcadmError> {
        Ok(self.state.lock().unwrap().local_images.get(&uuid).cloned())
    }

    async fn import_image(
        &self,
        uuid: Uuid,
        _channel: Option<&str>,
    ) -> Result<(), SdcadmError> {
        let mut state = self.state.lock().unwrap();
        let image = state
            .remote_images
            .get(&uuid)
            .cloned()
            .ok_or_else(|| not_found("imgapi", "image", &uuid.to_string()))?;
        state.local_images.insert(uuid, image);
        state.imports.push(uuid);
        Ok(())
    }
}
