use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use leadsignal_common::{normalize_handle, normalize_locator, IdentityKey, Outcome};

/// One processed identity with its terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub handle: String,
    pub locator: String,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

impl RecordEntry {
    pub fn new(key: &IdentityKey, outcome: Outcome, recorded_at: DateTime<Utc>) -> Self {
        Self {
            handle: key.handle.clone(),
            locator: key.locator.clone(),
            outcome,
            recorded_at,
        }
    }

    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(&self.handle, &self.locator)
    }

    /// Total order used to pick a survivor when two fragments disagree:
    /// earliest record wins, then outcome precedence.
    fn precedes(&self, other: &RecordEntry) -> bool {
        (self.recorded_at, self.outcome) < (other.recorded_at, other.outcome)
    }
}

/// Canonical in-memory form of the record store. Every legacy on-disk shape
/// normalizes into this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSnapshot {
    handles: BTreeSet<String>,
    locators: BTreeSet<String>,
    entries: BTreeMap<IdentityKey, RecordEntry>,
}

/// On-disk shape written by this crate.
#[derive(Serialize)]
struct CanonicalShape<'a> {
    handles: Vec<&'a str>,
    locators: Vec<&'a str>,
    entries: Vec<&'a RecordEntry>,
}

/// Every shape the store file has had over time:
/// - a bare array of strings
/// - `{ "urls": [...], "usernames": [...] }`
/// - `{ "handles": [...], "locators": [...], "entries": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredShape {
    Bare(Vec<Value>),
    Object(ObjectShape),
}

#[derive(Deserialize)]
struct ObjectShape {
    #[serde(default, alias = "usernames")]
    handles: Vec<Value>,
    #[serde(default, alias = "urls")]
    locators: Vec<Value>,
    #[serde(default)]
    entries: Vec<RecordEntry>,
}

impl RecordSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse any known on-disk shape.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let shape: StoredShape = serde_json::from_str(raw)?;
        let mut snapshot = Self::new();

        match shape {
            StoredShape::Bare(values) => {
                for value in values.iter().filter_map(value_as_string) {
                    if looks_like_locator(&value) {
                        snapshot.insert_locator(&value);
                    } else {
                        snapshot.insert_handle(&value);
                    }
                }
            }
            StoredShape::Object(object) => {
                for handle in object.handles.iter().filter_map(value_as_string) {
                    snapshot.insert_handle(&handle);
                }
                for locator in object.locators.iter().filter_map(value_as_string) {
                    snapshot.insert_locator(&locator);
                }
                for entry in object.entries {
                    snapshot.insert_entry(entry);
                }
            }
        }

        Ok(snapshot)
    }

    /// Serialize in the canonical shape. Output is sorted, so equal snapshots
    /// produce identical bytes.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let shape = CanonicalShape {
            handles: self.handles.iter().map(String::as_str).collect(),
            locators: self.locators.iter().map(String::as_str).collect(),
            entries: self.entries.values().collect(),
        };
        serde_json::to_string_pretty(&shape)
    }

    pub fn insert_handle(&mut self, raw: &str) -> bool {
        let handle = normalize_handle(raw);
        !handle.is_empty() && self.handles.insert(handle)
    }

    pub fn insert_locator(&mut self, raw: &str) -> bool {
        let locator = normalize_locator(raw);
        !locator.is_empty() && self.locators.insert(locator)
    }

    /// Insert an entry unless its identity already has one. Both halves of the
    /// identity are added to the lookup sets either way.
    pub fn insert_entry(&mut self, entry: RecordEntry) -> bool {
        let key = entry.key();
        self.insert_handle(&key.handle);
        self.insert_locator(&key.locator);
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// True if the handle OR the locator was ever recorded. Blank parts never match.
    pub fn contains(&self, handle: Option<&str>, locator: Option<&str>) -> bool {
        let handle_hit = handle
            .map(normalize_handle)
            .is_some_and(|h| !h.is_empty() && self.handles.contains(&h));
        let locator_hit = locator
            .map(normalize_locator)
            .is_some_and(|l| !l.is_empty() && self.locators.contains(&l));
        handle_hit || locator_hit
    }

    pub fn contains_key(&self, key: &IdentityKey) -> bool {
        self.contains(Some(&key.handle), Some(&key.locator))
    }

    pub fn has_entry(&self, key: &IdentityKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry(&self, key: &IdentityKey) -> Option<&RecordEntry> {
        self.entries.get(key)
    }

    /// Union `other` into `self`. Commutative, associative and idempotent:
    /// conflicting entries resolve by [`RecordEntry::precedes`].
    pub fn merge(&mut self, other: &RecordSnapshot) {
        self.handles.extend(other.handles.iter().cloned());
        self.locators.extend(other.locators.iter().cloned());
        for entry in other.entries.values() {
            keep_preceding(&mut self.entries, entry.clone());
        }
    }

    /// Drop every locator, keeping only handles. Entries lose their locator
    /// too, so a reload cannot bring the locators back.
    pub fn without_locators(self) -> Self {
        let mut out = Self {
            handles: self.handles,
            ..Self::default()
        };
        for entry in self.entries.into_values() {
            keep_preceding(
                &mut out.entries,
                RecordEntry {
                    locator: String::new(),
                    ..entry
                },
            );
        }
        out
    }

    pub fn handles(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(String::as_str)
    }

    pub fn locators(&self) -> impl Iterator<Item = &str> {
        self.locators.iter().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RecordEntry> {
        self.entries.values()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn locator_count(&self) -> usize {
        self.locators.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty() && self.locators.is_empty()
    }
}

fn keep_preceding(entries: &mut BTreeMap<IdentityKey, RecordEntry>, entry: RecordEntry) {
    match entries.entry(entry.key()) {
        Entry::Vacant(slot) => {
            slot.insert(entry);
        }
        Entry::Occupied(mut slot) => {
            if entry.precedes(slot.get()) {
                slot.insert(entry);
            }
        }
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Bare legacy arrays mixed permalinks and usernames. Usernames never contain
/// `/` or `:`, permalinks always do.
fn looks_like_locator(value: &str) -> bool {
    let v = value.trim();
    v.contains("://") || v.starts_with("/r/") || v.starts_with("www.") || v.contains(".com/")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn bare_array_routes_urls_and_handles() {
        let snap = RecordSnapshot::from_json(
            r#"["https://reddit.com/r/a/comments/1/", "SomeUser", " /r/b/comments/2/ "]"#,
        )
        .unwrap();
        assert!(snap.contains(None, Some("https://reddit.com/r/a/comments/1/")));
        assert!(snap.contains(None, Some("/r/b/comments/2/")));
        assert!(snap.contains(Some("someuser"), None));
        assert_eq!(snap.handle_count(), 1);
        assert_eq!(snap.locator_count(), 2);
    }

    #[test]
    fn legacy_object_shape_normalizes_handles() {
        let snap = RecordSnapshot::from_json(
            r#"{"urls": [" https://reddit.com/x "], "usernames": ["  Bob ", "ALICE"]}"#,
        )
        .unwrap();
        assert!(snap.contains(Some("bob"), None));
        assert!(snap.contains(Some("Alice"), None));
        assert!(snap.contains(None, Some("https://reddit.com/x")));
    }

    #[test]
    fn legacy_object_with_one_key_is_accepted() {
        let snap = RecordSnapshot::from_json(r#"{"usernames": ["carol"]}"#).unwrap();
        assert_eq!(snap.handle_count(), 1);
        assert_eq!(snap.locator_count(), 0);
    }

    #[test]
    fn canonical_shape_round_trips() {
        let mut snap = RecordSnapshot::new();
        snap.insert_entry(RecordEntry::new(
            &IdentityKey::new("Alice", "https://reddit.com/1"),
            Outcome::Contacted,
            at(1_700_000_000),
        ));
        snap.insert_handle("legacy_user");

        let reloaded = RecordSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, snap);
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(RecordSnapshot::from_json("{\"urls\": [\"trunc").is_err());
        assert!(RecordSnapshot::from_json("42").is_err());
    }

    #[test]
    fn locator_comparison_is_exact() {
        let mut snap = RecordSnapshot::new();
        snap.insert_locator("https://reddit.com/r/A/comments/x");
        assert!(!snap.contains(None, Some("https://reddit.com/r/a/comments/x")));
        assert!(snap.contains(None, Some("  https://reddit.com/r/A/comments/x")));
    }

    #[test]
    fn blank_parts_never_match() {
        let mut snap = RecordSnapshot::new();
        snap.insert_handle("alice");
        assert!(!snap.contains(Some("  "), Some("")));
        assert!(!snap.contains(None, None));
    }

    #[test]
    fn merge_keeps_earliest_entry_regardless_of_order() {
        let key = IdentityKey::new("dave", "https://reddit.com/d");
        let mut early = RecordSnapshot::new();
        early.insert_entry(RecordEntry::new(&key, Outcome::Error, at(100)));
        let mut late = RecordSnapshot::new();
        late.insert_entry(RecordEntry::new(&key, Outcome::Contacted, at(200)));

        let mut a = early.clone();
        a.merge(&late);
        let mut b = late.clone();
        b.merge(&early);

        assert_eq!(a, b);
        assert_eq!(a.entry(&key).unwrap().outcome, Outcome::Error);
    }

    #[test]
    fn handles_only_survives_reload() {
        let mut snap = RecordSnapshot::new();
        snap.insert_entry(RecordEntry::new(
            &IdentityKey::new("erin", "https://reddit.com/e"),
            Outcome::Contacted,
            at(5),
        ));
        let stripped = snap.without_locators();
        let reloaded = RecordSnapshot::from_json(&stripped.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.locator_count(), 0);
        assert!(reloaded.contains(Some("erin"), None));
        assert_eq!(reloaded.entry_count(), 1);
    }
}
