use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use leadsignal_common::{IdentityKey, Outcome};

use crate::atomic::write_text_atomic;
use crate::audit::{status_for, AuditLog, AuditRow};
use crate::snapshot::{RecordEntry, RecordSnapshot};

/// Where a store keeps its two representations.
#[derive(Debug, Clone)]
pub struct StorePaths {
    /// JSON snapshot (handles, locators, entries).
    pub snapshot: PathBuf,
    /// Append-only CSV audit log. Optional for stores that only need the snapshot.
    pub audit_log: Option<PathBuf>,
}

/// Everything needed to record one attempt.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub key: IdentityKey,
    /// Handle as the platform displayed it, for the audit log.
    pub display_handle: String,
    pub title: String,
    pub channel: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
}

/// Durable record of every identity that must never be contacted again.
///
/// The store is monotonic: identities are only ever added. It has a single
/// owner; running two processes against the same files is not supported.
pub struct RecordStore {
    snapshot_path: PathBuf,
    audit: Option<AuditLog>,
    snapshot: RecordSnapshot,
}

impl RecordStore {
    /// Load both representations and union them.
    ///
    /// Never fails for data reasons: a corrupt snapshot is quarantined and the
    /// store continues from whatever the audit log still holds. That trades a
    /// risk of contacting someone twice for staying available.
    pub fn open(paths: StorePaths) -> Self {
        let mut snapshot = load_snapshot_file(&paths.snapshot);
        let audit = paths.audit_log.map(AuditLog::new);

        if let Some(log) = &audit {
            match log.read_fragment() {
                Ok(fragment) => snapshot.merge(&fragment),
                Err(e) => warn!(
                    path = %log.path().display(),
                    error = %e,
                    "Failed to read audit log, continuing with snapshot only"
                ),
            }
        }

        info!(
            path = %paths.snapshot.display(),
            handles = snapshot.handle_count(),
            locators = snapshot.locator_count(),
            entries = snapshot.entry_count(),
            "Record store loaded"
        );

        Self {
            snapshot_path: paths.snapshot,
            audit,
            snapshot,
        }
    }

    /// True if the handle OR the locator was ever recorded.
    pub fn contains(&self, handle: Option<&str>, locator: Option<&str>) -> bool {
        self.snapshot.contains(handle, locator)
    }

    pub fn contains_key(&self, key: &IdentityKey) -> bool {
        self.snapshot.contains_key(key)
    }

    /// Record an identity. Returns `Ok(true)` when a new entry was created and
    /// `Ok(false)` when this exact identity was already present (the existing
    /// entry is left untouched).
    ///
    /// The in-memory record is updated before anything touches disk, so even a
    /// failed write keeps this process from retrying the identity. `Ok` means
    /// the snapshot is synced and the audit row appended.
    pub fn record(&mut self, request: RecordRequest) -> Result<bool> {
        let key = request.key.clone();
        if key.handle.is_empty() && key.locator.is_empty() {
            bail!("cannot record an identity with neither handle nor locator");
        }
        if self.snapshot.has_entry(&key) {
            return Ok(false);
        }

        let now = Utc::now();
        self.snapshot
            .insert_entry(RecordEntry::new(&key, request.outcome, now));

        self.flush()?;

        if let Some(log) = &self.audit {
            let row = AuditRow {
                username: request.display_handle,
                title: request.title,
                url: key.locator.clone(),
                subreddit: request.channel,
                time: now.to_rfc3339(),
                status: status_for(request.outcome, request.reason.as_deref()),
            };
            log.append(&row)?;
        }

        Ok(true)
    }

    /// Write the snapshot atomically.
    pub fn flush(&self) -> Result<()> {
        let json = self
            .snapshot
            .to_json()
            .context("failed to serialize record store")?;
        write_text_atomic(&self.snapshot_path, &json)
    }

    pub fn snapshot(&self) -> &RecordSnapshot {
        &self.snapshot
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }
}

/// Read a snapshot file, falling back to an empty store on any problem.
fn load_snapshot_file(path: &Path) -> RecordSnapshot {
    if !path.exists() {
        info!(path = %path.display(), "No record store file yet, starting empty");
        return RecordSnapshot::new();
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "Record store unreadable, starting empty. Previously contacted identities may be contacted again"
            );
            return RecordSnapshot::new();
        }
    };

    match RecordSnapshot::from_json(&raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let quarantined = quarantine(path);
            warn!(
                path = %path.display(),
                quarantined = ?quarantined.as_ref().map(|p| p.display().to_string()),
                error = %e,
                "Record store corrupt, starting empty. Previously contacted identities may be contacted again"
            );
            RecordSnapshot::new()
        }
    }
}

/// Move a corrupt file aside so the next flush does not destroy it.
fn quarantine(path: &Path) -> Option<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let target = PathBuf::from(target);
    match std::fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to quarantine corrupt record store");
            None
        }
    }
}
