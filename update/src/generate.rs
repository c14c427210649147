// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plan generation
//!
//! Expands normalized changes into per-instance work items against the
//! topology snapshot, applies the policy gates, groups compatible changes
//! into single procedures, and orders the result by the fixed
//! service-priority table.  Generation is pure: it mutates nothing and
//! returns either a complete plan or a validation error, never a partial
//! plan.

use sdcadm_common::SdcadmError;
use sdcadm_types::Change;
use sdcadm_types::ChangeKind;
use sdcadm_types::ImageRef;
use sdcadm_types::InstanceAssignment;
use sdcadm_types::ServiceRef;
use sdcadm_types::ServiceType;
use slog::debug;
use slog::Logger;
use uuid::Uuid;

use crate::config::DEFAULT_AGENT_CONCURRENCY;
use crate::plan::Plan;
use crate::procedures::CreateInstanceProcedure;
use crate::procedures::DeleteInstanceProcedure;
use crate::procedures::DownloadImages;
use crate::procedures::Procedure;
use crate::procedures::UpdateAgentV1;
use crate::procedures::UpdateStatelessServiceV1;
use crate::topology::Topology;

/// Policy flags gating which plans may be generated
#[derive(Clone, Debug)]
pub struct Policy {
    /// include instances already running the target image
    pub force_same_image: bool,
    /// allow updating the rabbitmq service
    pub force_rabbitmq: bool,
    /// allow updating data-path services
    pub force_data_path: bool,
    /// skip the minimum-image-version requirement
    pub force_bypass_min_image: bool,
    /// generate a download-only plan, touching no instances
    pub just_images: bool,
    /// abort a procedure on its first per-instance failure
    pub fail_fast: bool,
    /// update channel recorded on download procedures
    pub channel: Option<String>,
    /// bounded parallelism for agent installs
    pub agent_concurrency: usize,
    /// services gated behind `force_rabbitmq`
    pub rabbitmq_services: Vec<String>,
    /// services gated behind `force_data_path`
    pub data_path_services: Vec<String>,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            force_same_image: false,
            force_rabbitmq: false,
            force_data_path: false,
            force_bypass_min_image: false,
            just_images: false,
            fail_fast: false,
            channel: None,
            agent_concurrency: DEFAULT_AGENT_CONCURRENCY,
            rabbitmq_services: vec!["rabbitmq".to_string()],
            data_path_services: vec!["portolan".to_string()],
        }
    }
}

impl Policy {
    /// The policy used for rollback plans: the sensitive-service and
    /// minimum-version gates were already crossed by the forward update, so
    /// they are not applied a second time on the way back.
    pub fn forced() -> Policy {
        Policy {
            force_rabbitmq: true,
            force_data_path: true,
            force_bypass_min_image: true,
            ..Policy::default()
        }
    }
}

/// Oldest image versions this tool knows how to update onward from.
const MIN_IMAGE_VERSION: &[(&str, &str)] = &[
    ("sapi", "release-20140703-0001"),
    ("manatee", "release-20141030-0001"),
    ("binder", "release-20150320-0001"),
];

/// Fixed update ordering: foundational services (naming, database-shard
/// coordination) move before the services that depend on them.  This is a
/// policy table, not a computed dependency graph.
const SVC_UPDATE_PRIORITY: &[(&str, u8)] = &[
    ("binder", 0),
    ("zookeeper", 0),
    ("manatee", 10),
    ("moray", 20),
    ("ufds", 30),
    ("sapi", 40),
    ("workflow", 50),
    ("imgapi", 60),
];

const DEFAULT_PRIORITY: u8 = 100;

fn update_priority(service: &str) -> u8 {
    SVC_UPDATE_PRIORITY
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, priority)| *priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

// One procedure-to-be: all work items for a (service, image) pair.
struct Group {
    service: ServiceRef,
    image: ImageRef,
    insts: Vec<InstanceAssignment>,
}

/// Generates an ordered plan from resolved changes.  Returns a validation
/// error (and no partial plan) if any change cannot be safely expanded.
pub fn gen_plan(
    log: &Logger,
    changes: Vec<Change>,
    topology: &Topology,
    policy: &Policy,
) -> Result<Plan, SdcadmError> {
    for change in &changes {
        check_policy_gates(change, policy)?;
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut extra_procs: Vec<(u8, Box<dyn Procedure>)> = Vec::new();
    let mut kept_changes: Vec<Change> = Vec::new();

    for change in changes {
        match change.kind {
            ChangeKind::UpdateService
            | ChangeKind::UpdateInstance
            | ChangeKind::UpdateInstances => {
                let image = require_image(&change)?;
                let insts = expand_update(&change, &image, topology, policy)?;
                if insts.is_empty() {
                    // already at the target image; dropped silently
                    debug!(log, "service already up to date";
                        "service" => &change.service.name);
                    continue;
                }
                merge_group(&mut groups, &change.service, &image, insts.clone());
                kept_changes.push(Change { insts, ..change });
            }
            ChangeKind::CreateInstances | ChangeKind::AddInstance => {
                let image = require_image(&change)?;
                if change.insts.is_empty() {
                    return Err(SdcadmError::validation(format!(
                        "create-instances change for \"{}\" names no \
                         target servers",
                        change.service.name
                    )));
                }
                let existing =
                    topology.instances_of(change.service.uuid).len();
                for (i, inst) in change.insts.iter().enumerate() {
                    let server = inst.server.ok_or_else(|| {
                        SdcadmError::validation(format!(
                            "creating an instance of \"{}\" requires a \
                             target server",
                            change.service.name
                        ))
                    })?;
                    extra_procs.push((
                        update_priority(&change.service.name),
                        Box::new(CreateInstanceProcedure {
                            service: change.service.clone(),
                            image: image.clone(),
                            server,
                            alias: format!(
                                "{}{}",
                                change.service.name,
                                existing + i
                            ),
                        }),
                    ));
                }
                kept_changes.push(change);
            }
            ChangeKind::DeleteInstance => {
                let instance = change.instance.clone().ok_or_else(|| {
                    SdcadmError::validation(format!(
                        "delete-instance change for \"{}\" names no \
                         instance",
                        change.service.name
                    ))
                })?;
                if topology.instance(instance.uuid).is_none() {
                    return Err(SdcadmError::validation(format!(
                        "instance {} of \"{}\" does not exist",
                        instance.uuid, change.service.name
                    )));
                }
                extra_procs.push((
                    update_priority(&change.service.name),
                    Box::new(DeleteInstanceProcedure {
                        service: change.service.clone(),
                        instance,
                    }),
                ));
                kept_changes.push(change);
            }
        }
    }

    // Dedup the images every kept change needs.
    let mut images: Vec<ImageRef> = Vec::new();
    for change in &kept_changes {
        if let Some(image) = &change.image {
            if !images.iter().any(|i| i.uuid == image.uuid) {
                images.push(image.clone());
            }
        }
    }

    if policy.just_images {
        if images.is_empty() {
            return Ok(Plan::empty());
        }
        return Ok(Plan {
            procs: vec![Box::new(DownloadImages {
                images,
                channel: policy.channel.clone(),
            })],
            changes: kept_changes,
        });
    }

    let mut ordered: Vec<(u8, Box<dyn Procedure>)> = Vec::new();
    for group in groups {
        let priority = update_priority(&group.service.name);
        let proc: Box<dyn Procedure> = match group.service.service_type {
            ServiceType::Vm => Box::new(UpdateStatelessServiceV1 {
                service: group.service,
                image: group.image,
                insts: group.insts,
                fail_fast: policy.fail_fast,
            }),
            ServiceType::Agent => Box::new(UpdateAgentV1 {
                servers: group
                    .insts
                    .iter()
                    .filter_map(|a| a.server)
                    .collect(),
                service: group.service,
                image: group.image,
                concurrency: policy.agent_concurrency,
            }),
        };
        ordered.push((priority, proc));
    }
    ordered.extend(extra_procs);

    if ordered.is_empty() {
        return Ok(Plan::empty());
    }

    // Stable: ties keep their resolution order.
    ordered.sort_by_key(|(priority, _)| *priority);

    let mut procs: Vec<Box<dyn Procedure>> = Vec::with_capacity(
        ordered.len() + 1,
    );
    if !images.is_empty() {
        procs.push(Box::new(DownloadImages {
            images,
            channel: policy.channel.clone(),
        }));
    }
    procs.extend(ordered.into_iter().map(|(_, proc)| proc));

    Ok(Plan { procs, changes: kept_changes })
}

fn check_policy_gates(
    change: &Change,
    policy: &Policy,
) -> Result<(), SdcadmError> {
    let name = change.service.name.as_str();
    if policy.rabbitmq_services.iter().any(|s| s == name)
        && !policy.force_rabbitmq
    {
        return Err(SdcadmError::validation(format!(
            "updating \"{}\" will interrupt message routing; \
             pass --force-rabbitmq to proceed",
            name
        )));
    }
    if policy.data_path_services.iter().any(|s| s == name)
        && !policy.force_data_path
    {
        return Err(SdcadmError::validation(format!(
            "updating \"{}\" will interrupt the data path; \
             pass --force-data-path to proceed",
            name
        )));
    }
    if let Some(image) = &change.image {
        if let Some((_, min_version)) = MIN_IMAGE_VERSION
            .iter()
            .find(|(svc, _)| *svc == name)
        {
            let min = ImageRef {
                uuid: Uuid::nil(),
                name: name.to_string(),
                version: min_version.to_string(),
            };
            // A target version in a different format than the minimum
            // (e.g. semver against a build stamp) carries no ordering and
            // does not trip the gate.
            if image.try_cmp_version(&min) == Some(std::cmp::Ordering::Less)
                && !policy.force_bypass_min_image
            {
                return Err(SdcadmError::validation(format!(
                    "image {} ({}@{}) is older than the minimum supported \
                     version {} for \"{}\"; pass --force-bypass-min-image \
                     to proceed",
                    image.uuid, image.name, image.version, min_version, name
                )));
            }
        }
    }
    Ok(())
}

fn require_image(change: &Change) -> Result<ImageRef, SdcadmError> {
    change.image.clone().ok_or_else(|| {
        SdcadmError::validation(format!(
            "change for \"{}\" lacks a target image",
            change.service.name
        ))
    })
}

fn needs_update(
    current: Option<Uuid>,
    target: Uuid,
    policy: &Policy,
) -> bool {
    policy.force_same_image || current != Some(target)
}

fn expand_update(
    change: &Change,
    image: &ImageRef,
    topology: &Topology,
    policy: &Policy,
) -> Result<Vec<InstanceAssignment>, SdcadmError> {
    let service = &change.service;
    let mut insts = Vec::new();
    match change.kind {
        ChangeKind::UpdateService => match service.service_type {
            ServiceType::Vm => {
                for instance in topology.instances_of(service.uuid) {
                    if needs_update(instance.image_uuid, image.uuid, policy) {
                        insts.push(InstanceAssignment {
                            server: instance.server_uuid,
                            service: service.name.clone(),
                            image: image.uuid,
                            instance: Some(instance.uuid),
                        });
                    }
                }
            }
            ServiceType::Agent => {
                for server in topology.servers_with_agent(&service.name) {
                    let current = server
                        .agents
                        .iter()
                        .find(|a| a.name == service.name)
                        .and_then(|a| a.image_uuid);
                    if needs_update(current, image.uuid, policy) {
                        insts.push(InstanceAssignment {
                            server: Some(server.uuid),
                            service: service.name.clone(),
                            image: image.uuid,
                            instance: None,
                        });
                    }
                }
            }
        },
        ChangeKind::UpdateInstance => {
            let instance_ref = change.instance.as_ref().ok_or_else(|| {
                SdcadmError::validation(format!(
                    "update-instance change for \"{}\" names no instance",
                    service.name
                ))
            })?;
            let instance =
                topology.instance(instance_ref.uuid).ok_or_else(|| {
                    SdcadmError::validation(format!(
                        "instance {} of \"{}\" does not exist",
                        instance_ref.uuid, service.name
                    ))
                })?;
            if needs_update(instance.image_uuid, image.uuid, policy) {
                insts.push(InstanceAssignment {
                    server: instance.server_uuid,
                    service: service.name.clone(),
                    image: image.uuid,
                    instance: Some(instance.uuid),
                });
            }
        }
        ChangeKind::UpdateInstances => {
            for assignment in &change.insts {
                let Some(instance_uuid) = assignment.instance else {
                    continue;
                };
                let current = topology
                    .instance(instance_uuid)
                    .and_then(|i| i.image_uuid);
                if needs_update(current, image.uuid, policy) {
                    insts.push(InstanceAssignment {
                        image: image.uuid,
                        ..assignment.clone()
                    });
                }
            }
        }
        _ => {
            return Err(SdcadmError::internal(format!(
                "expand_update called for {} change",
                change.kind
            )));
        }
    }
    Ok(insts)
}

fn merge_group(
    groups: &mut Vec<Group>,
    service: &ServiceRef,
    image: &ImageRef,
    insts: Vec<InstanceAssignment>,
) {
    if let Some(group) = groups.iter_mut().find(|g| {
        g.service.uuid == service.uuid && g.image.uuid == image.uuid
    }) {
        // at most one change per instance: drop duplicates, keep the rest
        for inst in insts {
            if !group.insts.iter().any(|existing| {
                existing.instance == inst.instance
                    && existing.server == inst.server
            }) {
                group.insts.push(inst);
            }
        }
    } else {
        groups.push(Group {
            service: service.clone(),
            image: image.clone(),
            insts,
        });
    }
}
