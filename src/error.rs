use thiserror::Error;

use crate::editor::EditKind;

#[derive(Debug, Error)]
#[non_exhaustive]
/// Errors returned by this crate.
pub enum WcError {
    /// The provided working-copy relative path is invalid or unsafe.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// The provided repository URL is invalid or has no usable ancestor.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// An I/O error occurred while reading or writing working-copy files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The working-copy database failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored property list or conflict record could not be encoded or
    /// decoded.
    #[error("malformed working-copy record: {0}")]
    Record(#[from] serde_json::Error),
    /// A working copy already exists where a new one was requested.
    #[error("'{0}' is already a working copy")]
    WorkingCopyExists(String),
    /// The path has no (visible) node in the working copy.
    #[error("'{0}' is not under version control")]
    NotUnderVersionControl(String),
    /// A node or file that must exist was not found.
    #[error("the node '{0}' was not found")]
    PathNotFound(String),
    /// A node already exists where a new one was requested.
    #[error("the node '{0}' already exists")]
    NodeExists(String),
    /// The recorded or on-disk kind of a node is not a file or directory.
    #[error("unknown entry kind for '{0}'")]
    UnknownNodeKind(String),
    /// The special (symlink) status on disk disagrees with the recorded state.
    #[error("entry '{0}' has unexpectedly changed special status")]
    UnexpectedKind(String),
    /// A text or property conflict blocks the operation.
    #[error("aborting commit: '{0}' remains in conflict")]
    Conflict(String),
    /// A tree conflict blocks the operation.
    #[error("aborting commit: '{0}' remains in tree-conflict")]
    TreeConflict(String),
    /// A move source spans more than one BASE revision.
    #[error("cannot move mixed-revision subtree '{0}' [{1}:{2}]; try updating it first")]
    MixedRevisionMove(String, u64, u64),
    /// A commit target cannot be committed on its own.
    #[error("illegal target: {0}")]
    IllegalTarget(String),
    /// Two commit items resolve to the same repository URL.
    #[error("cannot commit both '{0}' and '{1}' as they refer to the same URL")]
    DuplicateCommitUrl(String, String),
    /// The commit batch is empty.
    #[error("commit has no items")]
    NoCommitItems,
    /// The path has no recorded conflict.
    #[error("the node '{0}' is not in conflict")]
    NotInConflict(String),
    /// The path is conflicted, but not tree-conflicted.
    #[error("the node '{0}' is not in a tree conflict")]
    NotATreeConflict(String),
    /// The tree conflict cannot be resolved automatically.
    #[error("cannot auto-resolve tree-conflict: {0}")]
    ResolverFailure(String),
    /// The tree-conflict editor does not implement this edit.
    #[error("unsupported tree edit: {0}")]
    Unsupported(EditKind),
    /// Working-copy metadata diverged from what the operation expected.
    #[error("working copy corrupt: {0}")]
    Corrupt(String),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl WcError {
    /// Returns `true` if the operation was interrupted by cancellation rather
    /// than by a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
