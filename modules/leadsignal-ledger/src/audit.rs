//! Human-auditable, append-only CSV log of every recorded attempt.
//!
//! The column layout is `username,title,url,subreddit,time,status`, the same
//! layout older `_dmed.csv` files use, so those files import unchanged.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use leadsignal_common::{normalize_handle, Outcome};

use crate::snapshot::{RecordEntry, RecordSnapshot};

pub const AUDIT_HEADER: [&str; 6] = ["username", "title", "url", "subreddit", "time", "status"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    pub username: String,
    pub title: String,
    pub url: String,
    pub subreddit: String,
    pub time: String,
    pub status: String,
}

/// `SENT`, `SKIPPED: reason` or `ERROR: reason`.
pub fn status_for(outcome: Outcome, reason: Option<&str>) -> String {
    let label = match outcome {
        Outcome::Contacted => "SENT",
        Outcome::PermanentlySkipped => "SKIPPED",
        Outcome::Error => "ERROR",
    };
    match reason {
        Some(r) if !r.is_empty() => format!("{label}: {r}"),
        _ => label.to_string(),
    }
}

fn outcome_from_status(status: &str) -> Option<Outcome> {
    let status = status.trim().to_ascii_uppercase();
    if status.starts_with("SENT") {
        Some(Outcome::Contacted)
    } else if status.starts_with("SKIPPED") {
        Some(Outcome::PermanentlySkipped)
    } else if status.starts_with("ERROR") {
        Some(Outcome::Error)
    } else {
        None
    }
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and sync it to disk. Writes the header first when the
    /// file is new or empty.
    pub fn append(&self, row: &AuditRow) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open audit log {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(AUDIT_HEADER)?;
        }
        writer.serialize(row)?;
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("failed to finish audit row: {}", e.error()))?;
        file.sync_data()
            .with_context(|| format!("failed to sync audit log {}", self.path.display()))?;
        Ok(())
    }

    /// Read the log back as a store fragment. A missing file is empty.
    pub fn read_fragment(&self) -> Result<RecordSnapshot> {
        if !self.path.exists() {
            return Ok(RecordSnapshot::new());
        }
        read_csv_fragment(&self.path)
    }
}

/// Column positions in a history CSV. Older files were written without a
/// header; those use the positional layout of [`AUDIT_HEADER`].
struct Columns {
    username: usize,
    url: Option<usize>,
    time: Option<usize>,
    status: Option<usize>,
}

impl Columns {
    fn positional() -> Self {
        Self {
            username: 0,
            url: Some(2),
            time: Some(4),
            status: Some(5),
        }
    }

    fn from_header(record: &csv::StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            record
                .iter()
                .position(|field| names.contains(&field.trim().to_ascii_lowercase().as_str()))
        };
        let username = find(&["username", "user", "author"])?;
        Some(Self {
            username,
            url: find(&["url", "post url", "permalink"]),
            time: find(&["time", "timestamp"]),
            status: find(&["status"]),
        })
    }
}

/// Usernames in hand-edited history files sometimes carry stray quoting or
/// punctuation; keep only characters a handle can contain.
fn sanitize_handle(raw: &str) -> String {
    normalize_handle(raw)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Import any history CSV (audit logs, lead exports, merged blocklists).
/// Malformed rows are skipped with a warning.
pub fn read_csv_fragment(path: &Path) -> Result<RecordSnapshot> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut snapshot = RecordSnapshot::new();
    let mut columns = Columns::positional();

    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), row = index, error = %e, "Skipping unreadable CSV row");
                continue;
            }
        };

        if index == 0 {
            if let Some(header) = Columns::from_header(&record) {
                columns = header;
                continue;
            }
        }

        let field = |i: Option<usize>| i.and_then(|i| record.get(i)).unwrap_or("").trim();
        let handle = sanitize_handle(field(Some(columns.username)));
        let locator = field(columns.url);

        if handle.is_empty() && locator.is_empty() {
            continue;
        }

        let outcome = columns.status.map(|_| field(columns.status)).and_then(outcome_from_status);
        let recorded_at = DateTime::parse_from_rfc3339(field(columns.time))
            .ok()
            .map(|dt| dt.with_timezone(&Utc));

        match (outcome, recorded_at) {
            (Some(outcome), Some(recorded_at)) if !handle.is_empty() => {
                snapshot.insert_entry(RecordEntry {
                    handle,
                    locator: locator.to_string(),
                    outcome,
                    recorded_at,
                });
            }
            _ => {
                snapshot.insert_handle(&handle);
                snapshot.insert_locator(locator);
            }
        }
    }

    Ok(snapshot)
}
