// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `sdcadm history`

use chrono::DateTime;
use chrono::Utc;
use clap::Args;
use sdcadm_common::SdcadmError;
use sdcadm_types::HistoryRecord;
use sdcadm_update::history::HistoryFilter;
use sdcadm_update::history::HistoryStore;
use sdcadm_update::SdcadmConfig;
use slog::Logger;
use uuid::Uuid;

const DEFAULT_COLUMNS: &str = "uuid,username,started,finished,status";

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// show this record in full (JSON) instead of the listing
    #[arg(value_name = "UUID")]
    uuid: Option<Uuid>,

    /// columns to show, comma-separated: uuid, username, started,
    /// finished, status, changes, error
    #[arg(
        long,
        short = 'o',
        value_name = "COLS",
        value_delimiter = ',',
        default_value = DEFAULT_COLUMNS
    )]
    output: Vec<String>,

    /// column to sort by (ascending)
    #[arg(long, short = 's', value_name = "COL", default_value = "started")]
    sort: String,

    /// omit the header row
    #[arg(short = 'H')]
    no_header: bool,

    /// emit the listing as JSON
    #[arg(long)]
    json: bool,

    /// only records started at or after this time (RFC 3339)
    #[arg(long, value_name = "TIME")]
    since: Option<DateTime<Utc>>,

    /// only records started at or before this time (RFC 3339)
    #[arg(long, value_name = "TIME")]
    until: Option<DateTime<Utc>>,
}

pub fn run(
    args: &HistoryArgs,
    config: SdcadmConfig,
    log: &Logger,
) -> anyhow::Result<()> {
    let store = HistoryStore::new(config.history_dir(), log);

    if let Some(uuid) = args.uuid {
        let record = store.get(uuid)?;
        let rendered =
            serde_json::to_string_pretty(&record).map_err(|e| {
                SdcadmError::internal(format!(
                    "serializing history record: {}",
                    e
                ))
            })?;
        println!("{}", rendered);
        return Ok(());
    }

    let filter = HistoryFilter { since: args.since, until: args.until };
    let mut records = store.list(&filter)?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&records).map_err(|e| {
                SdcadmError::internal(format!(
                    "serializing history records: {}",
                    e
                ))
            })?;
        println!("{}", rendered);
        return Ok(());
    }

    // validate column names up front so a typo fails before any output
    for column in &args.output {
        field(&placeholder_record(), column)?;
    }
    field(&placeholder_record(), &args.sort)?;

    sort_records(&mut records, &args.sort);

    let mut builder = tabled::builder::Builder::default();
    if !args.no_header {
        builder
            .push_record(args.output.iter().map(|c| c.to_uppercase()));
    }
    for record in &records {
        let row: Result<Vec<String>, SdcadmError> =
            args.output.iter().map(|c| field(record, c)).collect();
        builder.push_record(row?);
    }
    let mut table = builder.build();
    table
        .with(tabled::settings::Style::empty())
        .with(tabled::settings::Padding::new(0, 2, 0, 0));
    println!("{}", table);
    Ok(())
}

fn sort_records(records: &mut [HistoryRecord], column: &str) {
    match column {
        // numeric column: "10" must not sort before "9"
        "changes" => records.sort_by_key(|record| record.changes.len()),
        _ => records.sort_by_cached_key(|record| {
            // columns were validated by the caller
            field(record, column).unwrap_or_default()
        }),
    }
}

fn field(
    record: &HistoryRecord,
    column: &str,
) -> Result<String, SdcadmError> {
    Ok(match column {
        "uuid" => record.uuid.to_string(),
        "username" => record.username.clone(),
        "started" => format_time(record.started),
        "finished" => match record.finished {
            Some(finished) => format_time(finished),
            None => "-".to_string(),
        },
        "status" => match (&record.finished, &record.error) {
            (Some(_), None) => "ok".to_string(),
            (Some(_), Some(_)) => "failed".to_string(),
            // never finalized: interrupted, or still running
            (None, _) => "incomplete".to_string(),
        },
        "changes" => record.changes.len().to_string(),
        "error" => record.error.clone().unwrap_or_else(|| "-".to_string()),
        _ => {
            return Err(SdcadmError::usage(format!(
                "unknown column \"{}\" (expected one of: uuid, username, \
                 started, finished, status, changes, error)",
                column
            )));
        }
    })
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn placeholder_record() -> HistoryRecord {
    HistoryRecord {
        uuid: Uuid::nil(),
        username: String::new(),
        started: Utc::now(),
        finished: None,
        changes: Vec::new(),
        error: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sdcadm_types::Change;
    use sdcadm_types::ChangeKind;
    use sdcadm_types::ServiceRef;
    use sdcadm_types::ServiceType;

    fn record_with_changes(n: usize) -> HistoryRecord {
        let change = Change {
            kind: ChangeKind::UpdateService,
            service: ServiceRef {
                name: "myapp".to_string(),
                uuid: Uuid::new_v4(),
                service_type: ServiceType::Vm,
            },
            image: None,
            prior_image: None,
            instance: None,
            insts: Vec::new(),
        };
        HistoryRecord {
            uuid: Uuid::new_v4(),
            username: "test".to_string(),
            started: Utc::now(),
            finished: None,
            changes: vec![change; n],
            error: None,
        }
    }

    #[test]
    fn test_changes_column_sorts_numerically() {
        let mut records = vec![
            record_with_changes(10),
            record_with_changes(2),
            record_with_changes(9),
        ];
        sort_records(&mut records, "changes");
        let counts: Vec<usize> =
            records.iter().map(|r| r.changes.len()).collect();
        assert_eq!(counts, vec![2, 9, 10]);
    }

    #[test]
    fn test_unknown_column_is_a_usage_error() {
        let error = field(&placeholder_record(), "bogus").unwrap_err();
        assert!(error.is_usage());
        assert!(error.to_string().contains("unknown column"));
    }
}
