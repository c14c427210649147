// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instance creation procedure

use async_trait::async_trait;
use sdcadm_common::SdcadmError;
use sdcadm_types::ImageRef;
use sdcadm_types::ServiceRef;
use slog::info;
use uuid::Uuid;

use crate::procedures::ExecContext;
use crate::procedures::Procedure;
use crate::steps;

/// Provisions one new instance of a service on a chosen server
#[derive(Debug)]
pub struct CreateInstanceProcedure {
    pub service: ServiceRef,
    pub image: ImageRef,
    pub server: Uuid,
    pub alias: String,
}

#[async_trait]
impl Procedure for CreateInstanceProcedure {
    fn kind(&self) -> &'static str {
        "CreateInstanceProcedure"
    }

    fn summarize(&self) -> String {
        format!(
            "create \"{}\" instance \"{}\" on server {} with image {} ({}@{})",
            self.service.name,
            self.alias,
            self.server,
            self.image.uuid,
            self.image.name,
            self.image.version,
        )
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError> {
        let instance = ctx
            .clients
            .sapi
            .create_instance(
                self.service.uuid,
                self.server,
                self.image.uuid,
                &self.alias,
            )
            .await?;
        steps::wait_for_vm_running(ctx, instance.uuid).await?;
        info!(ctx.log, "instance created";
            "service" => &self.service.name,
            "instance" => %instance.uuid,
            "server" => %self.server,
        );
        Ok(())
    }
}
