// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! sdcadm configuration
//!
//! Compiled-in defaults, optionally overridden by a JSON config file.  The
//! CLI applies its own flag overrides (channel, concurrency) on top.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use sdcadm_common::SdcadmError;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Default number of concurrent per-server agent installs
pub const DEFAULT_AGENT_CONCURRENCY: usize = 5;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SdcadmConfig {
    pub datacenter_name: String,
    pub sapi_url: String,
    pub cnapi_url: String,
    pub vmapi_url: String,
    pub imgapi_url: String,

    /// directory holding the lock file, history records and persisted plans
    pub run_dir: Utf8PathBuf,

    /// update channel passed to the image registry
    pub channel: Option<String>,

    /// bounded parallelism for per-server agent installs
    pub agent_install_concurrency: usize,

    /// services whose update interrupts message routing (force-gated)
    pub rabbitmq_services: Vec<String>,

    /// services whose update interrupts the data path (force-gated)
    pub data_path_services: Vec<String>,

    // Polling knobs.  The defaults match production expectations (5s
    // interval, bounded totals in the tens of minutes); tests shrink them.
    pub poll_interval_ms: u64,
    pub task_timeout_ms: u64,
    pub job_timeout_ms: u64,
    pub vm_timeout_ms: u64,
}

impl Default for SdcadmConfig {
    fn default() -> SdcadmConfig {
        SdcadmConfig {
            datacenter_name: "coal".to_string(),
            sapi_url: "http://sapi.coal.joyent.us".to_string(),
            cnapi_url: "http://cnapi.coal.joyent.us".to_string(),
            vmapi_url: "http://vmapi.coal.joyent.us".to_string(),
            imgapi_url: "http://imgapi.coal.joyent.us".to_string(),
            run_dir: Utf8PathBuf::from("/var/sdcadm"),
            channel: None,
            agent_install_concurrency: DEFAULT_AGENT_CONCURRENCY,
            rabbitmq_services: vec!["rabbitmq".to_string()],
            data_path_services: vec!["portolan".to_string()],
            poll_interval_ms: 5_000,
            task_timeout_ms: 20 * 60 * 1_000,
            job_timeout_ms: 10 * 60 * 1_000,
            vm_timeout_ms: 10 * 60 * 1_000,
        }
    }
}

impl SdcadmConfig {
    /// Loads configuration from `path` when given, falling back to the
    /// compiled-in defaults otherwise.
    pub fn load(path: Option<&Utf8Path>) -> Result<SdcadmConfig, SdcadmError> {
        let Some(path) = path else {
            return Ok(SdcadmConfig::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SdcadmError::usage(format!("reading config {}: {}", path, e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            SdcadmError::usage(format!("parsing config {}: {}", path, e))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn vm_timeout(&self) -> Duration {
        Duration::from_millis(self.vm_timeout_ms)
    }

    /// Directory where per-run plan files are written.
    pub fn updates_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("updates")
    }

    /// Directory holding one JSON file per history record.
    pub fn history_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("history")
    }

    /// Path of the process-wide advisory lock file.
    pub fn lock_path(&self) -> Utf8PathBuf {
        self.run_dir.join("sdcadm.lock")
    }
}
