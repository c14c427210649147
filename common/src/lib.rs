// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common facilities shared by the sdcadm crates
//!
//! This crate holds the pieces every other crate needs: the error taxonomy
//! used throughout plan generation and execution, and the polling combinator
//! used by every "wait for an async backend task to finish" site.  It
//! deliberately knows nothing about the data model or the backends.

pub mod errors;
pub mod poll;

pub use errors::MultiError;
pub use errors::SdcadmError;

/// A type that allows adding file and line numbers to log messages
/// automatically.  Instantiate it at the root logger of the executable:
/// ```ignore
///     slog::Logger::root(drain, o!(FileKv))
/// ```
pub struct FileKv;

impl slog::KV for FileKv {
    fn serialize(
        &self,
        record: &slog::Record,
        serializer: &mut dyn slog::Serializer,
    ) -> slog::Result {
        // Only log file information when severity is at least debug level
        if record.level() > slog::Level::Debug {
            return Ok(());
        }
        serializer.emit_arguments(
            "file".into(),
            &format_args!("{}:{}", record.file(), record.line()),
        )
    }
}
