// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for the sdcadm control-plane tooling
//!
//! Every error that crosses a crate boundary is one of these variants.  Raw
//! backend error shapes are normalized into [`SdcadmError::SdcClient`] at the
//! client boundary and never leak into plan or procedure logic.

use std::fmt;

/// An error generated anywhere in change resolution, plan generation, or
/// plan execution
///
/// Where possible we reuse existing variants rather than inventing new ones
/// to distinguish cases that no programmatic consumer needs to distinguish.
#[derive(Debug, thiserror::Error)]
pub enum SdcadmError {
    /// Bad CLI input.  Never retried; reported to the user verbatim.
    #[error("{0}")]
    Usage(String),

    /// A plan-generation policy violation.  No execution is attempted.
    #[error("{0}")]
    Validation(String),

    /// A backend collaborator call failed.  Carries the collaborator name so
    /// the operator knows which service to look at.
    #[error("{client} client error: {message}")]
    SdcClient { client: &'static str, message: String },

    /// A domain-specific failure mid-execution (e.g. a task that reported
    /// failure, or a timeout waiting for one).
    #[error("{0}")]
    Update(String),

    /// Several per-item failures from a bounded worker queue.
    #[error(transparent)]
    Multi(#[from] MultiError),

    /// An unexpected invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SdcadmError {
    pub fn usage<S: Into<String>>(message: S) -> SdcadmError {
        SdcadmError::Usage(message.into())
    }

    pub fn validation<S: Into<String>>(message: S) -> SdcadmError {
        SdcadmError::Validation(message.into())
    }

    pub fn client<S: Into<String>>(
        client: &'static str,
        message: S,
    ) -> SdcadmError {
        SdcadmError::SdcClient { client, message: message.into() }
    }

    pub fn update<S: Into<String>>(message: S) -> SdcadmError {
        SdcadmError::Update(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> SdcadmError {
        SdcadmError::Internal(message.into())
    }

    /// Returns true for errors caused by bad operator input, which exit with
    /// a distinct code and skip the "see the log file" hint.
    pub fn is_usage(&self) -> bool {
        matches!(self, SdcadmError::Usage(_))
    }
}

/// An aggregation of per-item failures from a fan-out operation
///
/// Each failure is labeled with the item it came from (a server or instance
/// UUID).  Display reports every failure, not just the first.
#[derive(Debug)]
pub struct MultiError {
    errors: Vec<(String, SdcadmError)>,
}

impl MultiError {
    pub fn new(errors: Vec<(String, SdcadmError)>) -> MultiError {
        MultiError { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over `(item label, error)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = &(String, SdcadmError)> {
        self.errors.iter()
    }

    /// Collapses to `Ok(())` when no failures were recorded.
    pub fn into_result(self) -> Result<(), SdcadmError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SdcadmError::Multi(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) encountered:", self.errors.len())?;
        for (item, error) in &self.errors {
            write!(f, "\n    {}: {}", item, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_multi_error_reports_all_failures() {
        let multi = MultiError::new(vec![
            (
                "server-1".to_string(),
                SdcadmError::update("task 77 failed"),
            ),
            (
                "server-3".to_string(),
                SdcadmError::client("cnapi", "connection refused"),
            ),
        ]);
        let message = multi.to_string();
        assert!(message.contains("2 error(s)"));
        assert!(message.contains("server-1: task 77 failed"));
        assert!(message
            .contains("server-3: cnapi client error: connection refused"));
    }

    #[test]
    fn test_empty_multi_error_is_ok() {
        assert!(MultiError::new(Vec::new()).into_result().is_ok());
    }
}
