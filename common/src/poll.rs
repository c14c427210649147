// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-interval polling for asynchronous conditions
//!
//! Every "wait for a task/job/instance/shard to reach a target state" site in
//! the procedures goes through [`wait_for_condition`] rather than hand-rolling
//! a counter loop.  The condition closure distinguishes "not yet" from a
//! permanent failure; exceeding the bound surfaces a timeout, never an
//! indefinite block.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a failed [`wait_for_condition`] call
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed before timeout: {0}")]
    PermanentError(E),
}

/// Result of one check of a polled condition
#[derive(Debug)]
pub enum CondCheckError<E> {
    /// the condition we're waiting for is not true
    NotYet,
    /// the condition will never be true and polling should stop
    Failed(E),
}

impl<E> From<E> for CondCheckError<E> {
    fn from(error: E) -> Self {
        CondCheckError::Failed(error)
    }
}

/// Poll `cond` every `poll_interval` until it returns success or a permanent
/// failure, or until `poll_max` has elapsed
///
/// The condition is always checked at least once, immediately.
pub async fn wait_for_condition<T, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<T, Error<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError<E>>>,
{
    let poll_start = Instant::now();
    loop {
        let duration = Instant::now().duration_since(poll_start);
        if duration > *poll_max {
            return Err(Error::TimedOut(duration));
        }

        match cond().await {
            Ok(result) => return Ok(result),
            Err(CondCheckError::NotYet) => (),
            Err(CondCheckError::Failed(error)) => {
                return Err(Error::PermanentError(error));
            }
        }

        tokio::time::sleep(*poll_interval).await;
    }
}
