//! Working-copy core for Subversion clients.
//!
//! This crate implements two parts of a working copy that sit between the
//! metadata store and the client commands:
//!
//! - commit harvesting: [`harvest_committables`] walks commit targets and
//!   produces the [`CommitItem`]s (and lock tokens) a commit must send;
//!   [`condense_commit_items`] orders them and rewrites their URLs relative
//!   to a common base;
//! - moved-away tree-conflict resolution: when an update edits a node that
//!   was moved locally, [`update_moved_away_conflict_victim`] carries the
//!   incoming change over to the move destination, merging texts and
//!   recording text conflicts where they overlap.
//!
//! Both work against [`WcDb`], an op-depth layered store of the working
//! copy's nodes kept in SQLite (`.svn/wc.db`), with a content-addressed
//! pristine text store beside it.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use svn_wc::{Context, HarvestOptions, WcDb, condense_commit_items, harvest_committables};
//!
//! fn main() -> svn_wc::Result<()> {
//!     let db = WcDb::open("/tmp/wc")?;
//!     let mut found = harvest_committables(&db, &[], &HarvestOptions::default(), &Context::new())?;
//!     if !found.is_empty() {
//!         let base_url = condense_commit_items(&mut found.items)?;
//!         println!("committing {} items below {base_url}", found.items.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Serialization
//!
//! The public data types implement `serde::Serialize` and
//! `serde::Deserialize`. The store itself keeps properties and conflict
//! records as JSON.
//!
//! ## Logging
//!
//! Diagnostics are emitted with `tracing`; the crate never installs a
//! subscriber.

#![deny(unsafe_code)]

mod commit;
mod conflict;
mod editor;
mod error;
mod harvest;
mod merge;
mod notify;
mod options;
mod path;
mod types;
mod update_move;
mod url;
mod wc_db;
mod workqueue;

pub use commit::{CommitItem, CommitItemFlags, Committables, condense_commit_items};
pub use conflict::{
    ConflictAction, ConflictMarker, ConflictOperation, ConflictReason, ConflictSkel,
    ConflictVersion, Operation, TreeConflictInfo, read_conflict_info,
};
pub use editor::{EditKind, TreeConflictEditor, TreeEdit};
pub use error::WcError;
/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, WcError>;
pub use harvest::{harvest_committables, harvest_copy_committables};
pub use merge::{Diff3Merger, MergeLabels, MergeOutcome, MergeResult, TextMerger};
pub use notify::{Notification, NotifyAction, NotifyState};
pub use options::{CancelToken, Context, HarvestOptions, Notifier};
pub use path::compare_paths;
pub use types::{
    Checksum, ChecksumKind, Depth, NodeKind, NodeStatus, PROP_SPECIAL, Presence, PropertyList,
};
pub use update_move::{resolve_moved_away_conflict, update_moved_away_conflict_victim};
pub use url::{canonicalize_url, compare_urls, url_dirname, url_join, url_longest_ancestor};
pub use wc_db::{BaseNode, DeletionInfo, Entry, NodeInfo, Schedule, WcDb};
pub use workqueue::{WorkItem, run_work_items};
