// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared wait/poll steps used by procedures
//!
//! Every asynchronous backend operation (compute-node tasks, VM-manager
//! jobs, instance state) is awaited through these helpers, which layer the
//! error taxonomy on top of [`sdcadm_common::poll::wait_for_condition`].
//! Intervals and bounds come from the configuration so tests can shrink
//! them.

use sdc_clients::TaskStatus;
use sdcadm_common::poll;
use sdcadm_common::poll::CondCheckError;
use sdcadm_common::SdcadmError;
use uuid::Uuid;

use crate::procedures::ExecContext;

/// Polls a compute-node manager task until it completes.
pub async fn wait_for_task(
    ctx: &ExecContext,
    task_id: &str,
) -> Result<(), SdcadmError> {
    let result = poll::wait_for_condition::<(), SdcadmError, _, _>(
        || async {
            let task = ctx.clients.cnapi.get_task(task_id).await?;
            match task.status {
                TaskStatus::Complete => Ok(()),
                TaskStatus::Failure => {
                    Err(CondCheckError::Failed(SdcadmError::update(format!(
                        "task {} failed: {}",
                        task_id,
                        task.error.unwrap_or_else(|| "unknown error".into())
                    ))))
                }
                TaskStatus::Pending | TaskStatus::Running => {
                    Err(CondCheckError::NotYet)
                }
            }
        },
        &ctx.config.poll_interval(),
        &ctx.config.task_timeout(),
    )
    .await;
    flatten_poll(result, &format!("task {}", task_id))
}

/// Polls a VM manager job until it completes.
pub async fn wait_for_job(
    ctx: &ExecContext,
    job: Uuid,
) -> Result<(), SdcadmError> {
    let result = poll::wait_for_condition::<(), SdcadmError, _, _>(
        || async {
            let job = ctx.clients.vmapi.get_job(job).await?;
            match job.status {
                TaskStatus::Complete => Ok(()),
                TaskStatus::Failure => {
                    Err(CondCheckError::Failed(SdcadmError::update(format!(
                        "job {} ({}) failed: {}",
                        job.uuid,
                        job.name,
                        job.error.unwrap_or_else(|| "unknown error".into())
                    ))))
                }
                TaskStatus::Pending | TaskStatus::Running => {
                    Err(CondCheckError::NotYet)
                }
            }
        },
        &ctx.config.poll_interval(),
        &ctx.config.job_timeout(),
    )
    .await;
    flatten_poll(result, &format!("job {}", job))
}

/// Polls a VM until it reports the "running" state.
pub async fn wait_for_vm_running(
    ctx: &ExecContext,
    vm: Uuid,
) -> Result<(), SdcadmError> {
    let result = poll::wait_for_condition::<(), SdcadmError, _, _>(
        || async {
            let vm = ctx.clients.vmapi.get_vm(vm).await?;
            if vm.is_running() {
                Ok(())
            } else {
                Err(CondCheckError::NotYet)
            }
        },
        &ctx.config.poll_interval(),
        &ctx.config.vm_timeout(),
    )
    .await;
    flatten_poll(result, &format!("vm {}", vm))
}

fn flatten_poll(
    result: Result<(), poll::Error<SdcadmError>>,
    what: &str,
) -> Result<(), SdcadmError> {
    match result {
        Ok(()) => Ok(()),
        Err(poll::Error::TimedOut(elapsed)) => Err(SdcadmError::update(
            format!("timed out after {:?} waiting for {}", elapsed, what),
        )),
        Err(poll::Error::PermanentError(error)) => Err(error),
    }
}
