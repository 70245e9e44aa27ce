//! Rebuild one canonical record store from every historical fragment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::atomic::write_text_atomic;
use crate::audit::read_csv_fragment;
use crate::snapshot::RecordSnapshot;

/// A store fragment read from one file.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub origin: PathBuf,
    pub snapshot: RecordSnapshot,
}

/// Union every fragment into one snapshot. Order of fragments never matters,
/// and reconciling an already reconciled snapshot is a no-op.
pub fn reconcile<'a, I>(fragments: I) -> RecordSnapshot
where
    I: IntoIterator<Item = &'a RecordSnapshot>,
{
    let mut canonical = RecordSnapshot::new();
    for fragment in fragments {
        canonical.merge(fragment);
    }
    canonical
}

/// Merge imported history with the live stores it is written back to.
///
/// `handles_only` strips locators from `history` alone. Live stores are
/// merged in full, so nothing a target already records is ever removed.
pub fn rebuild(history: &[Fragment], live: &[Fragment], handles_only: bool) -> RecordSnapshot {
    let mut canonical = reconcile(history.iter().map(|f| &f.snapshot));
    if handles_only {
        canonical = canonical.without_locators();
    }
    for fragment in live {
        canonical.merge(&fragment.snapshot);
    }
    canonical
}

/// True when both paths name the same file, or the same path when either does
/// not exist yet.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Read one history file. CSV files go through the CSV importer; everything
/// else is parsed as one of the JSON store shapes.
///
/// Returns `Ok(None)` for files that cannot be parsed, after logging them.
pub fn load_fragment(path: &Path) -> Result<Option<Fragment>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    let snapshot = if is_csv {
        match read_csv_fragment(path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable CSV fragment");
                return Ok(None);
            }
        }
    } else {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match RecordSnapshot::from_json(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unparsable JSON fragment");
                return Ok(None);
            }
        }
    };

    info!(
        path = %path.display(),
        handles = snapshot.handle_count(),
        locators = snapshot.locator_count(),
        "Loaded fragment"
    );

    Ok(Some(Fragment {
        origin: path.to_path_buf(),
        snapshot,
    }))
}

/// Every `*.json` / `*.csv` file directly inside `dir`, in name order.
/// Hidden files (including in-flight temp files) are ignored.
pub fn collect_fragments(dir: &Path) -> Result<Vec<Fragment>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !name.starts_with('.')
        })
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
                Some("json") | Some("csv")
            )
        })
        .collect();
    paths.sort();

    let mut fragments = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(fragment) = load_fragment(&path)? {
            fragments.push(fragment);
        }
    }
    Ok(fragments)
}

/// Overwrite every target with the canonical snapshot, each atomically.
pub fn write_canonical(snapshot: &RecordSnapshot, targets: &[PathBuf]) -> Result<()> {
    let json = snapshot
        .to_json()
        .context("failed to serialize canonical snapshot")?;
    for target in targets {
        write_text_atomic(target, &json)?;
        info!(path = %target.display(), "Canonical record store written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(list: &[&str]) -> RecordSnapshot {
        let mut snap = RecordSnapshot::new();
        for h in list {
            snap.insert_handle(h);
        }
        snap
    }

    #[test]
    fn union_of_two_fragments() {
        let a = handles(&["a", "b"]);
        let b = handles(&["b", "c"]);

        let merged = reconcile([&a, &b]);
        let names: Vec<&str> = merged.handles().collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let again = reconcile([&merged]);
        assert_eq!(again, merged);
    }

    #[test]
    fn order_independent() {
        let a = handles(&["x", "y"]);
        let b = handles(&["y", "z"]);
        let c = handles(&["w"]);
        assert_eq!(reconcile([&a, &b, &c]), reconcile([&c, &b, &a]));
    }

    fn fragment(snapshot: RecordSnapshot) -> Fragment {
        Fragment {
            origin: PathBuf::from("mem"),
            snapshot,
        }
    }

    #[test]
    fn handles_only_keeps_locators_of_live_stores() {
        let mut history = handles(&["ann"]);
        history.insert_locator("https://reddit.com/r/x/comments/from_history/");
        let mut live = RecordSnapshot::new();
        live.insert_locator("https://reddit.com/r/x/comments/only_url/");

        let merged = rebuild(&[fragment(history)], &[fragment(live)], true);

        let locators: Vec<&str> = merged.locators().collect();
        assert_eq!(locators, vec!["https://reddit.com/r/x/comments/only_url/"]);
        assert!(merged.contains(Some("ann"), None));
    }

    #[test]
    fn same_file_sees_through_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("live.json");
        std::fs::write(&file, "[]").unwrap();
        assert!(same_file(&file, &dir.path().join(".").join("live.json")));
        assert!(!same_file(&file, &dir.path().join("other.json")));
    }

    #[test]
    fn unparsable_json_fragment_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{nope").unwrap();
        std::fs::write(dir.path().join("good.json"), r#"{"usernames": ["ann"]}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join(".hidden.json"), r#"["ghost"]"#).unwrap();

        let fragments = collect_fragments(dir.path()).unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].snapshot.contains(Some("ann"), None));
    }
}
