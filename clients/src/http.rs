// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! reqwest-backed implementations of the backend client traits
//!
//! Each backend gets a thin JSON client.  Error normalization happens here:
//! a failed request or a non-2xx response becomes
//! [`SdcadmError::SdcClient`] carrying the collaborator name and never
//! anything transport-specific.

use std::sync::Arc;

use async_trait::async_trait;
use sdcadm_common::SdcadmError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::debug;
use slog::o;
use slog::Logger;
use uuid::Uuid;

use crate::types::Image;
use crate::types::Instance;
use crate::types::Job;
use crate::types::Server;
use crate::types::Service;
use crate::types::Task;
use crate::types::Vm;
use crate::CnapiClient;
use crate::ImgapiClient;
use crate::SapiClient;
use crate::SdcClients;
use crate::VmapiClient;

/// One backend's JSON-over-HTTP endpoint
#[derive(Clone)]
struct JsonClient {
    name: &'static str,
    base_url: String,
    client: reqwest::Client,
    log: Logger,
}

impl JsonClient {
    fn new(name: &'static str, base_url: &str, log: &Logger) -> JsonClient {
        JsonClient {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            log: log.new(o!("client" => name)),
        }
    }

    fn err(&self, message: String) -> SdcadmError {
        SdcadmError::SdcClient { client: self.name, message }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, SdcadmError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(self.log, "client request";
            "method" => %method,
            "uri" => %url,
        );
        let mut builder = self.client.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| self.err(format!("request to {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.err(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| self.err(format!("parsing response from {}: {}", url, e)))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, SdcadmError> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SdcadmError> {
        let body = serde_json::to_value(body)
            .map_err(|e| self.err(format!("serializing request body: {}", e)))?;
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn put<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), SdcadmError> {
        let body = serde_json::to_value(body)
            .map_err(|e| self.err(format!("serializing request body: {}", e)))?;
        let _: serde_json::Value =
            self.request(reqwest::Method::PUT, path, Some(body)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), SdcadmError> {
        let _: serde_json::Value =
            self.request(reqwest::Method::DELETE, path, None).await?;
        Ok(())
    }
}

pub struct HttpSapi(JsonClient);

#[async_trait]
impl SapiClient for HttpSapi {
    async fn list_services(&self) -> Result<Vec<Service>, SdcadmError> {
        self.0.get("/services").await
    }

    async fn get_service(&self, uuid: Uuid) -> Result<Service, SdcadmError> {
        self.0.get(&format!("/services/{}", uuid)).await
    }

    async fn update_service_image(
        &self,
        service: Uuid,
        image: Uuid,
    ) -> Result<(), SdcadmError> {
        self.0
            .put(
                &format!("/services/{}", service),
                &serde_json::json!({ "params": { "image_uuid": image } }),
            )
            .await
    }

    async fn delete_service(&self, uuid: Uuid) -> Result<(), SdcadmError> {
        self.0.delete(&format!("/services/{}", uuid)).await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, SdcadmError> {
        self.0.get("/instances").await
    }

    async fn create_instance(
        &self,
        service: Uuid,
        server: Uuid,
        image: Uuid,
        alias: &str,
    ) -> Result<Instance, SdcadmError> {
        self.0
            .post(
                "/instances",
                &serde_json::json!({
                    "service_uuid": service,
                    "params": {
                        "server_uuid": server,
                        "image_uuid": image,
                        "alias": alias,
                    },
                }),
            )
            .await
    }

    async fn delete_instance(&self, uuid: Uuid) -> Result<(), SdcadmError> {
        self.0.delete(&format!("/instances/{}", uuid)).await
    }
}

pub struct HttpCnapi(JsonClient);

#[async_trait]
impl CnapiClient for HttpCnapi {
    async fn list_servers(&self) -> Result<Vec<Server>, SdcadmError> {
        self.0.get("/servers?setup=true").await
    }

    async fn get_server(&self, uuid: Uuid) -> Result<Server, SdcadmError> {
        self.0.get(&format!("/servers/{}", uuid)).await
    }

    async fn install_agent(
        &self,
        server: Uuid,
        agent: &str,
        image: Uuid,
    ) -> Result<String, SdcadmError> {
        #[derive(serde::Deserialize)]
        struct TaskRef {
            id: String,
        }
        let task: TaskRef = self
            .0
            .post(
                &format!("/servers/{}/install-agent", server),
                &serde_json::json!({ "agent": agent, "image_uuid": image }),
            )
            .await?;
        Ok(task.id)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, SdcadmError> {
        self.0.get(&format!("/tasks/{}", task_id)).await
    }

    async fn refresh_sysinfo(&self, server: Uuid) -> Result<(), SdcadmError> {
        let _: serde_json::Value = self
            .0
            .post(
                &format!("/servers/{}/sysinfo-refresh", server),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn delete_server_agent(
        &self,
        server: Uuid,
        agent: &str,
    ) -> Result<(), SdcadmError> {
        self.0.delete(&format!("/servers/{}/agents/{}", server, agent)).await
    }
}

pub struct HttpVmapi(JsonClient);

#[async_trait]
impl VmapiClient for HttpVmapi {
    async fn get_vm(&self, uuid: Uuid) -> Result<Vm, SdcadmError> {
        self.0.get(&format!("/vms/{}", uuid)).await
    }

    async fn reprovision_vm(
        &self,
        vm: Uuid,
        image: Uuid,
    ) -> Result<Uuid, SdcadmError> {
        #[derive(serde::Deserialize)]
        struct JobRef {
            job_uuid: Uuid,
        }
        let job: JobRef = self
            .0
            .post(
                &format!("/vms/{}?action=reprovision", vm),
                &serde_json::json!({ "image_uuid": image }),
            )
            .await?;
        Ok(job.job_uuid)
    }

    async fn delete_vm(&self, vm: Uuid) -> Result<Uuid, SdcadmError> {
        #[derive(serde::Deserialize)]
        struct JobRef {
            job_uuid: Uuid,
        }
        let job: JobRef = self
            .0
            .request(
                reqwest::Method::DELETE,
                &format!("/vms/{}", vm),
                None,
            )
            .await?;
        Ok(job.job_uuid)
    }

    async fn get_job(&self, job: Uuid) -> Result<Job, SdcadmError> {
        self.0.get(&format!("/jobs/{}", job)).await
    }
}

pub struct HttpImgapi(JsonClient);

#[async_trait]
impl ImgapiClient for HttpImgapi {
    async fn list_images(
        &self,
        name: &str,
        channel: Option<&str>,
    ) -> Result<Vec<Image>, SdcadmError> {
        let mut path = format!("/images?name={}", name);
        if let Some(channel) = channel {
            path.push_str(&format!("&channel={}", channel));
        }
        self.0.get(&path).await
    }

    async fn get_image(
        &self,
        uuid: Uuid,
    ) -> Result<Option<Image>, SdcadmError> {
        match self.0.get(&format!("/images/{}", uuid)).await {
            Ok(image) => Ok(Some(image)),
            // The local store reports absence as a 404; anything else is a
            // real client error.
            Err(SdcadmError::SdcClient { message, .. })
                if message.contains("404") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn import_image(
        &self,
        uuid: Uuid,
        channel: Option<&str>,
    ) -> Result<(), SdcadmError> {
        let mut path = format!("/images/{}?action=import-remote", uuid);
        if let Some(channel) = channel {
            path.push_str(&format!("&channel={}", channel));
        }
        let _: serde_json::Value =
            self.0.post(&path, &serde_json::json!({})).await?;
        Ok(())
    }
}

/// Builds the standard client bundle from the configured backend URLs.
pub struct HttpClients;

impl HttpClients {
    pub fn new(
        sapi_url: &str,
        cnapi_url: &str,
        vmapi_url: &str,
        imgapi_url: &str,
        log: &Logger,
    ) -> SdcClients {
        SdcClients {
            sapi: Arc::new(HttpSapi(JsonClient::new("sapi", sapi_url, log))),
            cnapi: Arc::new(HttpCnapi(JsonClient::new(
                "cnapi", cnapi_url, log,
            ))),
            vmapi: Arc::new(HttpVmapi(JsonClient::new(
                "vmapi", vmapi_url, log,
            ))),
            imgapi: Arc::new(HttpImgapi(JsonClient::new(
                "imgapi", imgapi_url, log,
            ))),
        }
    }
}
