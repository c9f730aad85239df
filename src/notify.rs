//! Progress notifications emitted while resolving conflicts.

use crate::NodeKind;

/// What happened to a path.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyAction {
    /// A node was updated in place.
    UpdateUpdate,
    /// An update (or a move-update) finished for a tree.
    UpdateCompleted,
    /// A tree conflict was marked resolved.
    ResolvedTree,
}

/// Outcome of an update on a node's content or properties.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyState {
    /// Not applicable to this notification.
    Inapplicable,
    /// Not computed.
    Unknown,
    /// Nothing changed.
    Unchanged,
    /// Changed cleanly; there were no local modifications.
    Changed,
    /// Changed cleanly and merged with local modifications.
    Merged,
    /// Merged with conflicts.
    Conflicted,
}

/// A single notification.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    /// Working-copy relpath of the node.
    pub path: String,
    /// What happened.
    pub action: NotifyAction,
    /// Node kind.
    pub kind: NodeKind,
    /// Content outcome.
    pub content_state: NotifyState,
    /// Property outcome.
    pub prop_state: NotifyState,
    /// Revision before the change, if known.
    pub old_revision: Option<u64>,
    /// Revision after the change, if known.
    pub revision: Option<u64>,
}

impl Notification {
    /// Creates a notification with inapplicable states and no revisions.
    pub fn new(path: impl Into<String>, action: NotifyAction) -> Self {
        Self {
            path: path.into(),
            action,
            kind: NodeKind::Unknown,
            content_state: NotifyState::Inapplicable,
            prop_state: NotifyState::Inapplicable,
            old_revision: None,
            revision: None,
        }
    }
}
