//! Conflict records ("conflict skels") and tree-conflict inspection.
//!
//! A node is conflicted iff a [`ConflictSkel`] is stored for it. The skel
//! records the operation that raised the conflict together with the tree
//! locations involved, and one marker per conflict kind (text, properties,
//! tree).

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::path::validate_relpath;
use crate::wc_db::WcDb;
use crate::{NodeKind, WcError};

/// The operation that raised a conflict.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// No operation recorded.
    None,
    /// `update`.
    Update,
    /// `switch`.
    Switch,
    /// `merge`.
    Merge,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Update => "update",
            Self::Switch => "switch",
            Self::Merge => "merge",
        })
    }
}

/// The local change that collides with an incoming change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConflictReason {
    /// Local edits.
    Edited,
    /// Obstructed by an unversioned item.
    Obstructed,
    /// Locally deleted.
    Deleted,
    /// Missing from disk.
    Missing,
    /// Not versioned.
    Unversioned,
    /// Locally added.
    Added,
    /// Locally replaced.
    Replaced,
    /// Locally moved away.
    MovedAway,
    /// Locally moved here.
    MovedHere,
}

/// The incoming change that collides with a local change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConflictAction {
    /// Incoming edit.
    Edited,
    /// Incoming add.
    Added,
    /// Incoming delete.
    Deleted,
    /// Incoming replace.
    Replaced,
}

/// A snapshot of one tree location involved in a conflict.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConflictVersion {
    /// Repository root URL.
    pub repos_root_url: String,
    /// Repository UUID.
    pub repos_uuid: String,
    /// Repository-relative path of the node.
    pub path_in_repos: String,
    /// Peg revision.
    pub revision: u64,
    /// Node kind at that location.
    pub node_kind: NodeKind,
}

impl ConflictVersion {
    /// Creates a conflict version.
    pub fn new(
        repos_root_url: impl Into<String>,
        repos_uuid: impl Into<String>,
        path_in_repos: impl Into<String>,
        revision: u64,
        node_kind: NodeKind,
    ) -> Self {
        Self {
            repos_root_url: repos_root_url.into(),
            repos_uuid: repos_uuid.into(),
            path_in_repos: path_in_repos.into(),
            revision,
            node_kind,
        }
    }
}

/// The operation part of a conflict skel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConflictOperation {
    /// Operation kind.
    pub operation: Operation,
    /// Tree locations, oldest first (`[old]` or `[old, new]`).
    pub locations: Vec<ConflictVersion>,
}

/// One conflict kind recorded in a skel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConflictMarker {
    /// Text conflict with optional marker files (working-copy relpaths).
    Text {
        /// Marker holding the common ancestor text.
        old: Option<String>,
        /// Marker holding the local text.
        mine: Option<String>,
        /// Marker holding the incoming text.
        theirs: Option<String>,
    },
    /// Property conflict.
    Prop {
        /// Reject file listing the conflicting properties.
        reject_file: Option<String>,
        /// Names of the conflicted properties.
        names: Vec<String>,
    },
    /// Tree conflict.
    Tree {
        /// Local change.
        reason: ConflictReason,
        /// Incoming change.
        action: ConflictAction,
        /// Op-root of the local move, when `reason` is a move.
        move_src_op_root: Option<String>,
    },
}

/// A conflict record for one node.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConflictSkel {
    /// The operation that raised the conflict, once known.
    pub operation: Option<ConflictOperation>,
    /// Recorded conflicts, at most one per kind.
    pub markers: Vec<ConflictMarker>,
}

impl ConflictSkel {
    /// Creates an empty skel.
    pub fn new() -> Self {
        Self::default()
    }

    fn set_operation(&mut self, operation: Operation, old: ConflictVersion, new: Option<ConflictVersion>) {
        let mut locations = vec![old];
        locations.extend(new);
        self.operation = Some(ConflictOperation {
            operation,
            locations,
        });
    }

    /// Records `update` as the conflicting operation.
    pub fn set_op_update(&mut self, old: ConflictVersion, new: Option<ConflictVersion>) -> &mut Self {
        self.set_operation(Operation::Update, old, new);
        self
    }

    /// Records `switch` as the conflicting operation.
    pub fn set_op_switch(&mut self, old: ConflictVersion, new: Option<ConflictVersion>) -> &mut Self {
        self.set_operation(Operation::Switch, old, new);
        self
    }

    /// Records `merge` as the conflicting operation.
    pub fn set_op_merge(&mut self, left: ConflictVersion, right: Option<ConflictVersion>) -> &mut Self {
        self.set_operation(Operation::Merge, left, right);
        self
    }

    /// Adds (or replaces) the text conflict marker.
    pub fn add_text_conflict(
        &mut self,
        old: Option<String>,
        mine: Option<String>,
        theirs: Option<String>,
    ) -> &mut Self {
        self.markers.retain(|m| !matches!(m, ConflictMarker::Text { .. }));
        self.markers.push(ConflictMarker::Text { old, mine, theirs });
        self
    }

    /// Adds (or replaces) the property conflict marker.
    pub fn add_prop_conflict(&mut self, reject_file: Option<String>, names: Vec<String>) -> &mut Self {
        self.markers.retain(|m| !matches!(m, ConflictMarker::Prop { .. }));
        self.markers.push(ConflictMarker::Prop { reject_file, names });
        self
    }

    /// Adds (or replaces) the tree conflict marker.
    pub fn add_tree_conflict(
        &mut self,
        reason: ConflictReason,
        action: ConflictAction,
        move_src_op_root: Option<String>,
    ) -> &mut Self {
        self.markers.retain(|m| !matches!(m, ConflictMarker::Tree { .. }));
        self.markers.push(ConflictMarker::Tree {
            reason,
            action,
            move_src_op_root,
        });
        self
    }

    /// Merges the markers (and the operation, if this skel has none) of
    /// `other` into `self`.
    pub fn merge_from(&mut self, other: ConflictSkel) {
        if self.operation.is_none() {
            self.operation = other.operation;
        }
        for marker in other.markers {
            self.markers
                .retain(|m| std::mem::discriminant(m) != std::mem::discriminant(&marker));
            self.markers.push(marker);
        }
    }

    /// Returns `true` when an operation and at least one marker are recorded.
    pub fn is_complete(&self) -> bool {
        self.operation.is_some() && !self.markers.is_empty()
    }

    /// Returns whether text, property and tree conflicts are recorded.
    pub fn conflicted(&self) -> (bool, bool, bool) {
        let mut out = (false, false, false);
        for marker in &self.markers {
            match marker {
                ConflictMarker::Text { .. } => out.0 = true,
                ConflictMarker::Prop { .. } => out.1 = true,
                ConflictMarker::Tree { .. } => out.2 = true,
            }
        }
        out
    }

    /// Returns the tree conflict's `(reason, action)`, if one is recorded.
    pub fn tree_conflict(&self) -> Option<(ConflictReason, ConflictAction)> {
        self.markers.iter().find_map(|m| match m {
            ConflictMarker::Tree { reason, action, .. } => Some((*reason, *action)),
            _ => None,
        })
    }

    /// Returns the working-copy marker files recorded by this skel.
    pub fn marker_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        for marker in &self.markers {
            match marker {
                ConflictMarker::Text { old, mine, theirs } => {
                    out.extend([old, mine, theirs].into_iter().flatten().cloned());
                }
                ConflictMarker::Prop { reject_file, .. } => out.extend(reject_file.iter().cloned()),
                ConflictMarker::Tree { .. } => {}
            }
        }
        out
    }
}

/// Tree-conflict details of one victim.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TreeConflictInfo {
    /// The operation that raised the conflict.
    pub operation: Operation,
    /// The local change.
    pub local_change: ConflictReason,
    /// The incoming change.
    pub incoming_change: ConflictAction,
    /// The tree before the incoming change, if recorded.
    pub old_version: Option<ConflictVersion>,
    /// The tree after the incoming change.
    pub new_version: ConflictVersion,
}

/// Reads the tree conflict recorded for `victim`.
///
/// When the record only stores the old location, the new location is
/// synthesized from the victim's BASE node.
pub fn read_conflict_info(db: &WcDb, victim: &str) -> Result<TreeConflictInfo, WcError> {
    let victim = validate_relpath(victim)?;
    let skel = db
        .read_conflict(&victim)?
        .ok_or_else(|| WcError::NotInConflict(victim.clone()))?;
    let (local_change, incoming_change) = skel
        .tree_conflict()
        .ok_or_else(|| WcError::NotATreeConflict(victim.clone()))?;

    let (operation, mut locations) = match skel.operation {
        Some(op) => (op.operation, op.locations),
        None => (Operation::None, Vec::new()),
    };

    let new_version = if locations.len() >= 2 {
        locations.remove(1)
    } else {
        trace!(victim = %victim, "conflict has no new location; using BASE");
        let base = db.base_get_info(&victim)?;
        ConflictVersion::new(
            base.repos_root_url,
            base.repos_uuid,
            base.repos_relpath.unwrap_or_default(),
            base.revision.unwrap_or_default(),
            base.kind,
        )
    };
    let old_version = locations.into_iter().next();

    Ok(TreeConflictInfo {
        operation,
        local_change,
        incoming_change,
        old_version,
        new_version,
    })
}
