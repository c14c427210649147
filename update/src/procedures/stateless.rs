// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update procedure for stateless services with replaceable instances

use async_trait::async_trait;
use sdcadm_common::MultiError;
use sdcadm_common::SdcadmError;
use sdcadm_types::ImageRef;
use sdcadm_types::InstanceAssignment;
use sdcadm_types::ServiceRef;
use slog::info;
use slog::warn;
use uuid::Uuid;

use crate::procedures::ExecContext;
use crate::procedures::Procedure;
use crate::steps;

/// Brings every listed instance of one service to a new image
///
/// Instances are swapped one at a time.  Each swap first provisions a
/// temporary instance on the target image and waits for it to come up, so
/// the service keeps its capacity throughout.  The original instance is
/// then reprovisioned in place and the temporary instance is destroyed.
/// A failed swap is recorded and the remaining instances still get their
/// turn, unless `fail_fast` is set.
#[derive(Debug)]
pub struct UpdateStatelessServiceV1 {
    pub service: ServiceRef,
    pub image: ImageRef,
    pub insts: Vec<InstanceAssignment>,
    pub fail_fast: bool,
}

impl UpdateStatelessServiceV1 {
    async fn update_one(
        &self,
        ctx: &ExecContext,
        instance: Uuid,
        server: Option<Uuid>,
        seq: usize,
    ) -> Result<(), SdcadmError> {
        let server = server.ok_or_else(|| {
            SdcadmError::update(format!(
                "instance {} of \"{}\" has no known server",
                instance, self.service.name
            ))
        })?;

        let tmp_alias = format!("{}-tmp{}", self.service.name, seq);
        let tmp = ctx
            .clients
            .sapi
            .create_instance(
                self.service.uuid,
                server,
                self.image.uuid,
                &tmp_alias,
            )
            .await?;
        steps::wait_for_vm_running(ctx, tmp.uuid).await?;

        let swapped = self.swap_in_place(ctx, instance).await;

        // The temporary instance comes down whether or not the swap worked.
        match (swapped, ctx.clients.sapi.delete_instance(tmp.uuid).await) {
            (Ok(()), Ok(())) => {
                info!(ctx.log, "instance updated";
                    "service" => &self.service.name,
                    "instance" => %instance,
                    "image" => %self.image.uuid,
                );
                Ok(())
            }
            (Ok(()), Err(teardown_error)) => Err(teardown_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(teardown_error)) => {
                warn!(ctx.log, "failed to destroy temporary instance";
                    "instance" => %tmp.uuid,
                    "error" => %teardown_error,
                );
                Err(error)
            }
        }
    }

    async fn swap_in_place(
        &self,
        ctx: &ExecContext,
        instance: Uuid,
    ) -> Result<(), SdcadmError> {
        let job = ctx
            .clients
            .vmapi
            .reprovision_vm(instance, self.image.uuid)
            .await?;
        steps::wait_for_job(ctx, job).await?;
        steps::wait_for_vm_running(ctx, instance).await
    }
}

#[async_trait]
impl Procedure for UpdateStatelessServiceV1 {
    fn kind(&self) -> &'static str {
        "UpdateStatelessServiceV1"
    }

    fn summarize(&self) -> String {
        let mut lines = vec![format!(
            "update \"{}\" service ({} instance{}) to image {} ({}@{})",
            self.service.name,
            self.insts.len(),
            if self.insts.len() == 1 { "" } else { "s" },
            self.image.uuid,
            self.image.name,
            self.image.version
        )];
        for inst in &self.insts {
            match inst.instance {
                Some(uuid) => {
                    lines.push(format!("    reprovision instance {}", uuid))
                }
                None => lines.push("    (no instance)".to_string()),
            }
        }
        lines.join("\n")
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError> {
        // Record the new image on the service first so any provisions that
        // race with this update come up on the target image.
        ctx.clients
            .sapi
            .update_service_image(self.service.uuid, self.image.uuid)
            .await?;

        let mut failures = Vec::new();
        for (seq, inst) in self.insts.iter().enumerate() {
            let Some(instance) = inst.instance else {
                // creation assignments are handled by CreateInstanceProcedure
                continue;
            };
            match self.update_one(ctx, instance, inst.server, seq).await {
                Ok(()) => (),
                Err(error) if self.fail_fast => return Err(error),
                Err(error) => {
                    warn!(ctx.log, "instance update failed, continuing";
                        "service" => &self.service.name,
                        "instance" => %instance,
                        "error" => %error,
                    );
                    failures.push((instance.to_string(), error));
                }
            }
        }
        MultiError::new(failures).into_result()
    }
}
