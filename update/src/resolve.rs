// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Change resolution
//!
//! Turns CLI-level change descriptors (`svc`, `svc@image`, `svc@version`,
//! `inst`, `--all`, or a JSON array from stdin) into normalized [`Change`]
//! records with resolved service/instance/image references.  Resolution is
//! read-only: it queries the topology snapshot and the image registry but
//! mutates nothing.

use sdc_clients::Image;
use sdc_clients::SdcClients;
use sdc_clients::Service;
use sdcadm_common::SdcadmError;
use sdcadm_types::Change;
use sdcadm_types::ChangeKind;
use sdcadm_types::ImageRef;
use sdcadm_types::InstanceRef;
use serde::Deserialize;
use slog::debug;
use slog::Logger;
use uuid::Uuid;

use crate::topology::Topology;

/// Options controlling change resolution
#[derive(Clone, Debug, Default)]
pub struct ResolveOptions {
    /// resolve a change for every known service
    pub all: bool,
    /// services to skip when `all` is set
    pub exclude: Vec<String>,
    /// update channel for image lookups
    pub channel: Option<String>,
}

/// A change descriptor supplied as JSON on stdin
#[derive(Clone, Debug, Deserialize)]
pub struct RawChange {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// What the `@`-suffix of a change token asked for
enum ImageSelector {
    Latest,
    Uuid(Uuid),
    Version(String),
}

impl ImageSelector {
    fn parse(spec: Option<&str>) -> ImageSelector {
        match spec {
            None => ImageSelector::Latest,
            Some(s) => match s.parse::<Uuid>() {
                Ok(uuid) => ImageSelector::Uuid(uuid),
                Err(_) => ImageSelector::Version(s.to_string()),
            },
        }
    }
}

/// Resolves CLI args into normalized changes.  `args` and `opts.all` are
/// mutually exclusive; passing neither is a usage error (the CLI handles the
/// stdin case before calling this).
pub async fn resolve_changes(
    log: &Logger,
    args: &[String],
    opts: &ResolveOptions,
    topology: &Topology,
    clients: &SdcClients,
) -> Result<Vec<Change>, SdcadmError> {
    if opts.all && !args.is_empty() {
        return Err(SdcadmError::usage(
            "cannot specify both --all and explicit services",
        ));
    }
    if !opts.all && args.is_empty() {
        return Err(SdcadmError::usage(
            "no services given: specify names, --all, or changes on stdin",
        ));
    }

    let mut changes = Vec::new();
    if opts.all {
        for service in topology_services_sorted(topology) {
            if opts.exclude.iter().any(|x| x == &service.name) {
                debug!(log, "excluding service"; "service" => &service.name);
                continue;
            }
            match resolve_service_change(
                log,
                &service,
                ImageSelector::Latest,
                opts,
                topology,
                clients,
            )
            .await?
            {
                Some(change) => changes.push(change),
                // "--all" tolerates services with no published images
                None => {
                    debug!(log, "no images for service, skipping";
                        "service" => &service.name);
                }
            }
        }
    } else {
        for arg in args {
            changes.push(
                resolve_token(log, arg, opts, topology, clients).await?,
            );
        }
    }
    Ok(changes)
}

/// Resolves a JSON change list (the stdin form) into normalized changes.
pub async fn resolve_raw_changes(
    log: &Logger,
    raw: &[RawChange],
    opts: &ResolveOptions,
    topology: &Topology,
    clients: &SdcClients,
) -> Result<Vec<Change>, SdcadmError> {
    let mut tokens = Vec::new();
    for entry in raw {
        let base = match (&entry.service, &entry.instance) {
            (Some(service), None) => service.clone(),
            (None, Some(instance)) => instance.clone(),
            _ => {
                return Err(SdcadmError::usage(
                    "each change must name exactly one \
                     \"service\" or \"instance\"",
                ));
            }
        };
        let token = match (&entry.image, &entry.version) {
            (Some(image), _) => format!("{}@{}", base, image),
            (None, Some(version)) => format!("{}@{}", base, version),
            (None, None) => base,
        };
        tokens.push(token);
    }
    resolve_changes(log, &tokens, opts, topology, clients).await
}

fn topology_services_sorted(topology: &Topology) -> Vec<Service> {
    // stable name order so "--all" output is deterministic
    let mut services: Vec<Service> =
        topology.services().cloned().collect();
    services.sort_by(|a, b| a.name.cmp(&b.name));
    services
}

async fn resolve_token(
    log: &Logger,
    token: &str,
    opts: &ResolveOptions,
    topology: &Topology,
    clients: &SdcClients,
) -> Result<Change, SdcadmError> {
    let (base, spec) = match token.split_once('@') {
        Some((base, spec)) => (base, Some(spec)),
        None => (token, None),
    };
    let selector = ImageSelector::parse(spec);

    if let Some(service) = topology.service_by_name(base) {
        let service = service.clone();
        return resolve_service_change(
            log, &service, selector, opts, topology, clients,
        )
        .await?
        .ok_or_else(|| {
            SdcadmError::validation(format!(
                "no images available for service \"{}\"",
                base
            ))
        });
    }

    if let Some(instance) = topology.instance_by_token(base) {
        let instance = instance.clone();
        let Some(service) = topology.service(instance.service_uuid).cloned()
        else {
            return Err(SdcadmError::internal(format!(
                "instance {} references unknown service {}",
                instance.uuid, instance.service_uuid
            )));
        };
        let image = select_image(&service, &selector, opts, clients)
            .await?
            .ok_or_else(|| {
                SdcadmError::validation(format!(
                    "no images available for service \"{}\"",
                    service.name
                ))
            })?;
        let prior_image =
            current_image(&service, clients, opts.channel.as_deref()).await;
        return Ok(Change {
            kind: ChangeKind::UpdateInstance,
            service: topology.service_ref(&service),
            image: Some(image),
            prior_image,
            instance: Some(InstanceRef {
                uuid: instance.uuid,
                service: service.name.clone(),
                server: instance.server_uuid,
            }),
            insts: Vec::new(),
        });
    }

    Err(SdcadmError::usage(format!(
        "unknown service or instance: \"{}\"",
        base
    )))
}

async fn resolve_service_change(
    log: &Logger,
    service: &Service,
    selector: ImageSelector,
    opts: &ResolveOptions,
    topology: &Topology,
    clients: &SdcClients,
) -> Result<Option<Change>, SdcadmError> {
    let Some(image) =
        select_image(service, &selector, opts, clients).await?
    else {
        return Ok(None);
    };
    debug!(log, "resolved service change";
        "service" => &service.name,
        "image" => %image.uuid,
        "version" => &image.version,
    );
    let prior_image =
        current_image(service, clients, opts.channel.as_deref()).await;
    Ok(Some(Change {
        kind: ChangeKind::UpdateService,
        service: topology.service_ref(service),
        image: Some(image),
        prior_image,
        instance: None,
        insts: Vec::new(),
    }))
}

/// Picks the image a selector refers to.  Ambiguous version strings resolve
/// "latest wins": the highest-ordered image among the matches.
async fn select_image(
    service: &Service,
    selector: &ImageSelector,
    opts: &ResolveOptions,
    clients: &SdcClients,
) -> Result<Option<ImageRef>, SdcadmError> {
    let channel = opts.channel.as_deref();
    let candidates =
        clients.imgapi.list_images(&service.name, channel).await?;

    let chosen: Option<Image> = match selector {
        ImageSelector::Latest => {
            pick_latest(candidates.iter().collect())
        }
        ImageSelector::Uuid(uuid) => {
            match candidates.iter().find(|i| i.uuid == *uuid) {
                Some(image) => Some(image.clone()),
                // Not on the channel listing; accept a locally-imported
                // image with that uuid.
                None => clients.imgapi.get_image(*uuid).await?,
            }
        }
        ImageSelector::Version(version) => pick_latest(
            candidates.iter().filter(|i| &i.version == version).collect(),
        ),
    };

    Ok(chosen.map(|image| ImageRef {
        uuid: image.uuid,
        name: image.name,
        version: image.version,
    }))
}

fn pick_latest(mut candidates: Vec<&Image>) -> Option<Image> {
    candidates.sort_by(|a, b| {
        let a = ImageRef {
            uuid: a.uuid,
            name: a.name.clone(),
            version: a.version.clone(),
        };
        let b = ImageRef {
            uuid: b.uuid,
            name: b.name.clone(),
            version: b.version.clone(),
        };
        a.cmp_version(&b)
    });
    candidates.last().map(|i| (*i).clone())
}

/// Best-effort lookup of the image a service is currently configured with.
/// Used only to record `prior_image` for rollback; absence is not an error.
async fn current_image(
    service: &Service,
    clients: &SdcClients,
    channel: Option<&str>,
) -> Option<ImageRef> {
    let uuid = service.image_uuid?;
    if let Ok(Some(image)) = clients.imgapi.get_image(uuid).await {
        return Some(ImageRef {
            uuid: image.uuid,
            name: image.name,
            version: image.version,
        });
    }
    if let Ok(candidates) =
        clients.imgapi.list_images(&service.name, channel).await
    {
        if let Some(image) = candidates.into_iter().find(|i| i.uuid == uuid) {
            return Some(ImageRef {
                uuid: image.uuid,
                name: image.name,
                version: image.version,
            });
        }
    }
    // The image has been removed from the registry; keep the identifier.
    Some(ImageRef {
        uuid,
        name: service.name.clone(),
        version: "unknown".to_string(),
    })
}
