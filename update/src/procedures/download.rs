// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image download procedure

use async_trait::async_trait;
use sdcadm_common::MultiError;
use sdcadm_common::SdcadmError;
use sdcadm_types::ImageRef;
use slog::debug;
use slog::info;

use crate::procedures::ExecContext;
use crate::procedures::Procedure;

/// Fetches images into the local image store before any instance operation
/// references them
///
/// Idempotent: images already present locally are skipped.
#[derive(Debug)]
pub struct DownloadImages {
    pub images: Vec<ImageRef>,
    pub channel: Option<String>,
}

#[async_trait]
impl Procedure for DownloadImages {
    fn kind(&self) -> &'static str {
        "DownloadImages"
    }

    fn summarize(&self) -> String {
        let mut lines = vec![format!(
            "download {} image{}{}",
            self.images.len(),
            if self.images.len() == 1 { "" } else { "s" },
            match &self.channel {
                Some(channel) => format!(" (channel \"{}\")", channel),
                None => String::new(),
            },
        )];
        for image in &self.images {
            lines.push(format!(
                "    image {} ({}@{})",
                image.uuid, image.name, image.version
            ));
        }
        lines.join("\n")
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<(), SdcadmError> {
        let mut failures = Vec::new();
        for image in &self.images {
            match ctx.clients.imgapi.get_image(image.uuid).await {
                Ok(Some(_)) => {
                    debug!(ctx.log, "image already present, skipping";
                        "image" => %image.uuid);
                    continue;
                }
                Ok(None) => (),
                Err(error) => {
                    failures.push((image.uuid.to_string(), error));
                    continue;
                }
            }
            info!(ctx.log, "importing image";
                "image" => %image.uuid,
                "name" => &image.name,
                "version" => &image.version,
            );
            if let Err(error) = ctx
                .clients
                .imgapi
                .import_image(image.uuid, self.channel.as_deref())
                .await
            {
                failures.push((image.uuid.to_string(), error));
            }
        }
        MultiError::new(failures).into_result()
    }
}
