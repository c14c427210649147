// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rollback plan generation
//!
//! Rollback is best-effort reinstallation of the images a previous plan
//! replaced: each update change is inverted (target image and prior image
//! swap places) and re-resolved against the live topology, then fed
//! through the ordinary plan generator.  It is always gated behind an
//! explicit force flag because image-level rollback cannot undo data
//! migrations or account for inter-service version dependencies.

use sdc_clients::SdcClients;
use sdcadm_common::SdcadmError;
use sdcadm_types::Change;
use sdcadm_types::ChangeKind;
use sdcadm_types::PlanFile;
use slog::info;
use slog::Logger;

use crate::generate;
use crate::generate::Policy;
use crate::plan::Plan;
use crate::topology::Topology;

/// Builds a rollback plan for a previously persisted plan file.
///
/// `force` must be true; without it this returns a usage error explaining
/// why rollback needs an explicit acknowledgement.  The check comes before
/// any backend traffic: a refused rollback contacts nothing.
pub async fn gen_rollback_plan(
    log: &Logger,
    plan_file: &PlanFile,
    clients: &SdcClients,
    force: bool,
) -> Result<Plan, SdcadmError> {
    if !force {
        return Err(SdcadmError::usage(
            "rollback reinstalls prior images only: it does not undo data \
             migrations and does not check version dependencies between \
             services; pass --force to acknowledge this and proceed",
        ));
    }

    let topology = Topology::load(log, clients).await?;
    let mut inverted = Vec::with_capacity(plan_file.changes.len());
    for change in &plan_file.changes {
        inverted.push(invert_change(change, &topology)?);
    }

    info!(log, "generating rollback plan";
        "changes" => inverted.len(),
    );

    // The forward update already crossed the sensitive-service and
    // minimum-version gates, so the rollback policy waives them.
    generate::gen_plan(log, inverted, &topology, &Policy::forced())
}

fn invert_change(
    change: &Change,
    topology: &Topology,
) -> Result<Change, SdcadmError> {
    match change.kind {
        ChangeKind::UpdateService
        | ChangeKind::UpdateInstance
        | ChangeKind::UpdateInstances => {}
        ChangeKind::CreateInstances
        | ChangeKind::AddInstance
        | ChangeKind::DeleteInstance => {
            return Err(SdcadmError::validation(format!(
                "{} change for \"{}\" cannot be rolled back automatically; \
                 undo it with an explicit forward operation",
                change.kind, change.service.name
            )));
        }
    }

    let prior = change.prior_image.clone().ok_or_else(|| {
        SdcadmError::validation(format!(
            "plan records no prior image for \"{}\"; there is nothing to \
             roll back to",
            change.service.name
        ))
    })?;

    // The references recorded in the plan must still resolve against the
    // live system; a vanished service or instance fails the whole rollback
    // before anything runs.
    if topology.service(change.service.uuid).is_none() {
        return Err(SdcadmError::client(
            "sapi",
            format!(
                "service \"{}\" ({}) no longer exists",
                change.service.name, change.service.uuid
            ),
        ));
    }
    if let Some(instance) = &change.instance {
        if topology.instance(instance.uuid).is_none() {
            return Err(SdcadmError::client(
                "sapi",
                format!(
                    "instance {} of \"{}\" no longer exists",
                    instance.uuid, change.service.name
                ),
            ));
        }
    }

    Ok(Change {
        image: Some(prior),
        prior_image: change.image.clone(),
        ..change.clone()
    })
}
