//! Durable "already processed" record for outreach identities.
//!
//! - [`RecordStore`]: single-owner store consulted and updated by the scheduler.
//! - [`RecordSnapshot`]: canonical in-memory schema every on-disk shape normalizes into.
//! - [`reconcile`]: offline union of historical fragments into one snapshot.

pub mod atomic;
pub mod audit;
pub mod reconcile;
pub mod snapshot;
pub mod store;

pub use audit::{AuditLog, AuditRow};
pub use reconcile::{
    collect_fragments, load_fragment, rebuild, reconcile, same_file, write_canonical, Fragment,
};
pub use snapshot::{RecordEntry, RecordSnapshot};
pub use store::{RecordRequest, RecordStore, StorePaths};
