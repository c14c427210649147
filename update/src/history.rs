// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! History persistence
//!
//! One JSON file per record, named `<uuid>.json` under the history
//! directory.  Records are written before execution starts and rewritten in
//! place when it finishes, so a record with no `finished` timestamp marks
//! an operation that was interrupted (or is still running).  Listing skips
//! unreadable files rather than failing the whole query.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Utc;
use sdcadm_common::SdcadmError;
use sdcadm_types::HistoryRecord;
use slog::warn;
use slog::Logger;
use uuid::Uuid;

/// Filter applied when listing history records
#[derive(Clone, Debug, Default)]
pub struct HistoryFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(since) = self.since {
            if record.started < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.started > until {
                return false;
            }
        }
        true
    }
}

/// File-backed store of [`HistoryRecord`]s
pub struct HistoryStore {
    dir: Utf8PathBuf,
    log: Logger,
}

impl HistoryStore {
    pub fn new(dir: Utf8PathBuf, log: &Logger) -> HistoryStore {
        HistoryStore { dir, log: log.clone() }
    }

    fn record_path(&self, uuid: Uuid) -> Utf8PathBuf {
        self.dir.join(format!("{}.json", uuid))
    }

    /// Persists `record`, assigning a fresh UUID if the caller left it nil.
    /// Returns the record's UUID.
    pub fn save(
        &self,
        record: &mut HistoryRecord,
    ) -> Result<Uuid, SdcadmError> {
        if record.uuid.is_nil() {
            record.uuid = Uuid::new_v4();
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            SdcadmError::internal(format!(
                "creating history directory {}: {}",
                self.dir, e
            ))
        })?;
        self.write_record(record)?;
        Ok(record.uuid)
    }

    /// Rewrites an existing record in place (used to finalize it).
    pub fn update(&self, record: &HistoryRecord) -> Result<(), SdcadmError> {
        if record.uuid.is_nil() {
            return Err(SdcadmError::internal(
                "cannot update a history record with no uuid",
            ));
        }
        self.write_record(record)
    }

    fn write_record(&self, record: &HistoryRecord) -> Result<(), SdcadmError> {
        let path = self.record_path(record.uuid);
        let contents =
            serde_json::to_string_pretty(record).map_err(|e| {
                SdcadmError::internal(format!(
                    "serializing history record {}: {}",
                    record.uuid, e
                ))
            })?;
        std::fs::write(&path, contents).map_err(|e| {
            SdcadmError::internal(format!("writing {}: {}", path, e))
        })
    }

    /// Fetches one record by UUID.
    pub fn get(&self, uuid: Uuid) -> Result<HistoryRecord, SdcadmError> {
        let path = self.record_path(uuid);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            SdcadmError::usage(format!(
                "no history record {}: {}",
                uuid, e
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            SdcadmError::internal(format!("parsing {}: {}", path, e))
        })
    }

    /// Lists records matching `filter`, newest first.  Files that cannot be
    /// read or parsed are skipped with a warning; one corrupt record must
    /// not hide the rest of the audit trail.
    pub fn list(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryRecord>, SdcadmError> {
        let mut records = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(records);
            }
            Err(e) => {
                return Err(SdcadmError::internal(format!(
                    "reading history directory {}: {}",
                    self.dir, e
                )));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| {
                SdcadmError::internal(format!(
                    "reading history directory {}: {}",
                    self.dir, e
                ))
            })?;
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => {
                    if filter.matches(&record) {
                        records.push(record);
                    }
                }
                Err(error) => {
                    warn!(self.log, "skipping unreadable history record";
                        "path" => %path.display(),
                        "error" => %error,
                    );
                }
            }
        }
        records.sort_by(|a, b| b.started.cmp(&a.started));
        Ok(records)
    }
}

fn read_record(
    path: &std::path::Path,
) -> Result<HistoryRecord, SdcadmError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        SdcadmError::internal(format!("{}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        SdcadmError::internal(format!("{}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use chrono::TimeZone;

    fn test_logger() -> Logger {
        use slog::Drain;
        let decorator =
            slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
        let drain =
            std::sync::Mutex::new(slog_term::FullFormat::new(decorator).build())
                .fuse();
        Logger::root(drain, slog::o!())
    }

    fn record_at(hour: u32) -> HistoryRecord {
        HistoryRecord {
            uuid: Uuid::nil(),
            username: "root".to_string(),
            started: Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap(),
            finished: None,
            changes: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_save_assigns_uuid_and_roundtrips() {
        let dir = Utf8TempDir::new().unwrap();
        let store =
            HistoryStore::new(dir.path().to_path_buf(), &test_logger());

        let mut record = record_at(9);
        let uuid = store.save(&mut record).unwrap();
        assert!(!uuid.is_nil());
        assert_eq!(record.uuid, uuid);

        let fetched = store.get(uuid).unwrap();
        assert_eq!(fetched, record);
        assert!(!fetched.is_finished());

        record.finished = Some(Utc::now());
        record.error = Some("task 12 failed".to_string());
        store.update(&record).unwrap();
        let fetched = store.get(uuid).unwrap();
        assert!(fetched.is_finished());
        assert_eq!(fetched.error.as_deref(), Some("task 12 failed"));
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let dir = Utf8TempDir::new().unwrap();
        let store =
            HistoryStore::new(dir.path().to_path_buf(), &test_logger());

        let mut first = record_at(9);
        let mut second = record_at(11);
        store.save(&mut first).unwrap();
        store.save(&mut second).unwrap();
        std::fs::write(
            dir.path().join(format!("{}.json", Uuid::new_v4())),
            "{ not json",
        )
        .unwrap();

        let records = store.list(&HistoryFilter::default()).unwrap();
        assert_eq!(records.len(), 2);
        // newest first
        assert_eq!(records[0].uuid, second.uuid);
        assert_eq!(records[1].uuid, first.uuid);
    }

    #[test]
    fn test_list_applies_time_filter() {
        let dir = Utf8TempDir::new().unwrap();
        let store =
            HistoryStore::new(dir.path().to_path_buf(), &test_logger());

        let mut early = record_at(6);
        let mut late = record_at(18);
        store.save(&mut early).unwrap();
        store.save(&mut late).unwrap();

        let filter = HistoryFilter {
            since: Some(Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()),
            until: None,
        };
        let records = store.list(&filter).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uuid, late.uuid);
    }

    #[test]
    fn test_list_on_missing_directory_is_empty() {
        let dir = Utf8TempDir::new().unwrap();
        let store = HistoryStore::new(
            dir.path().join("nonexistent"),
            &test_logger(),
        );
        assert!(store.list(&HistoryFilter::default()).unwrap().is_empty());
    }
}
