//! The tree-conflict editor: applies an incoming update to the destination
//! of a local move.
//!
//! Edits arrive as [`TreeEdit`] values. Only content changes to files that
//! already exist at the destination are merged ([`TreeEdit::AlterFile`]);
//! directories are checked but left alone ([`TreeEdit::AlterDirectory`]).
//! Structural edits fail with [`WcError::Unsupported`] so that a person
//! resolves them by hand.

use std::fmt;
use std::fs;
use std::io::Read;

use tracing::{debug, trace};

use crate::conflict::{ConflictSkel, ConflictVersion, Operation};
use crate::harvest::read_working_text;
use crate::merge::{MergeLabels, MergeOutcome};
use crate::path::relpath_depth;
use crate::wc_db::WcDb;
use crate::workqueue::WorkItem;
use crate::{
    Checksum, Context, NodeKind, Notification, NotifyAction, NotifyState, PropertyList, WcError,
};

/// Kind of a [`TreeEdit`].
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EditKind {
    AddDirectory,
    AddFile,
    AddSymlink,
    AddAbsent,
    AlterDirectory,
    AlterFile,
    AlterSymlink,
    Delete,
    Copy,
    Move,
    Rotate,
    Complete,
    Abort,
}

impl EditKind {
    /// Returns the edit's name as used in messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddDirectory => "add-directory",
            Self::AddFile => "add-file",
            Self::AddSymlink => "add-symlink",
            Self::AddAbsent => "add-absent",
            Self::AlterDirectory => "alter-directory",
            Self::AlterFile => "alter-file",
            Self::AlterSymlink => "alter-symlink",
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Rotate => "rotate",
            Self::Complete => "complete",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One edit of a tree. Relpaths are working-copy relpaths of the
/// destination tree.
pub enum TreeEdit<'a> {
    /// Adds a directory.
    AddDirectory {
        relpath: String,
        children: Vec<String>,
        props: PropertyList,
        replaces_rev: Option<u64>,
    },
    /// Adds a file.
    AddFile {
        relpath: String,
        checksum: Checksum,
        contents: Box<dyn Read + 'a>,
        props: PropertyList,
        replaces_rev: Option<u64>,
    },
    /// Adds a symlink.
    AddSymlink {
        relpath: String,
        target: String,
        props: PropertyList,
        replaces_rev: Option<u64>,
    },
    /// Adds a node the server does not let us see.
    AddAbsent {
        relpath: String,
        kind: NodeKind,
        replaces_rev: Option<u64>,
    },
    /// Changes a directory's children list or properties.
    AlterDirectory {
        relpath: String,
        revision: u64,
        children: Vec<String>,
        props: PropertyList,
    },
    /// Changes a file's text or properties.
    AlterFile {
        relpath: String,
        /// Revision the destination row is expected to be at.
        revision: u64,
        props: PropertyList,
        /// Checksum of the new text.
        checksum: Checksum,
        /// The new text.
        contents: Box<dyn Read + 'a>,
    },
    /// Changes a symlink's target or properties.
    AlterSymlink {
        relpath: String,
        revision: u64,
        props: PropertyList,
        target: String,
    },
    /// Deletes a node.
    Delete { relpath: String, revision: u64 },
    /// Copies a node.
    Copy {
        src_relpath: String,
        src_revision: u64,
        dst_relpath: String,
        replaces_rev: Option<u64>,
    },
    /// Moves a node.
    Move {
        src_relpath: String,
        src_revision: u64,
        dst_relpath: String,
        replaces_rev: Option<u64>,
    },
    /// Rotates nodes among the given paths.
    Rotate {
        relpaths: Vec<String>,
        revisions: Vec<u64>,
    },
    /// Ends the edit.
    Complete,
    /// Abandons the edit.
    Abort,
}

impl TreeEdit<'_> {
    /// Returns the kind of this edit.
    pub fn kind(&self) -> EditKind {
        match self {
            Self::AddDirectory { .. } => EditKind::AddDirectory,
            Self::AddFile { .. } => EditKind::AddFile,
            Self::AddSymlink { .. } => EditKind::AddSymlink,
            Self::AddAbsent { .. } => EditKind::AddAbsent,
            Self::AlterDirectory { .. } => EditKind::AlterDirectory,
            Self::AlterFile { .. } => EditKind::AlterFile,
            Self::AlterSymlink { .. } => EditKind::AlterSymlink,
            Self::Delete { .. } => EditKind::Delete,
            Self::Copy { .. } => EditKind::Copy,
            Self::Move { .. } => EditKind::Move,
            Self::Rotate { .. } => EditKind::Rotate,
            Self::Complete => EditKind::Complete,
            Self::Abort => EditKind::Abort,
        }
    }
}

impl fmt::Debug for TreeEdit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeEdit")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Applies edits to the moved-here tree rooted at `move_root_dst_relpath`.
///
/// The editor writes conflicts to the store directly; file changes are
/// queued as [`WorkItem`]s which the caller runs once the surrounding
/// transaction has committed.
pub struct TreeConflictEditor<'a> {
    db: &'a mut WcDb,
    ctx: &'a Context,
    move_root_dst_relpath: String,
    operation: Operation,
    old_version: ConflictVersion,
    new_version: ConflictVersion,
    work_items: Vec<WorkItem>,
}

impl<'a> TreeConflictEditor<'a> {
    /// Creates an editor for the move destination `move_root_dst_relpath`;
    /// `old_version` and `new_version` describe the update that raised the
    /// tree conflict.
    pub fn new(
        db: &'a mut WcDb,
        ctx: &'a Context,
        move_root_dst_relpath: impl Into<String>,
        operation: Operation,
        old_version: ConflictVersion,
        new_version: ConflictVersion,
    ) -> Self {
        Self {
            db,
            ctx,
            move_root_dst_relpath: move_root_dst_relpath.into(),
            operation,
            old_version,
            new_version,
            work_items: Vec::new(),
        }
    }

    /// Gives the driver access to the store between edits.
    pub(crate) fn db(&mut self) -> &mut WcDb {
        &mut *self.db
    }

    /// Returns the work items queued so far.
    pub fn work_items(&self) -> &[WorkItem] {
        &self.work_items
    }

    /// Consumes the editor and returns its queued work items.
    pub fn into_work_items(self) -> Vec<WorkItem> {
        self.work_items
    }

    /// Applies one edit.
    pub fn drive(&mut self, edit: TreeEdit<'_>) -> Result<(), WcError> {
        self.ctx.check_cancelled()?;
        match edit {
            TreeEdit::AlterDirectory {
                relpath, revision, ..
            } => self.alter_directory(&relpath, revision),
            TreeEdit::AlterFile {
                relpath,
                revision,
                props,
                checksum,
                contents,
            } => self.alter_file(&relpath, revision, &props, &checksum, contents),
            TreeEdit::Complete => self.complete(),
            other => Err(WcError::Unsupported(other.kind())),
        }
    }

    fn move_op_depth(&self) -> u32 {
        relpath_depth(&self.move_root_dst_relpath)
    }

    fn check_revision(relpath: &str, found: Option<u64>, expected: u64) -> Result<(), WcError> {
        if found != Some(expected) {
            return Err(WcError::Corrupt(format!(
                "'{relpath}' is at revision {found:?} but revision {expected} was expected"
            )));
        }
        Ok(())
    }

    fn alter_directory(&mut self, dst_relpath: &str, expected_revision: u64) -> Result<(), WcError> {
        let info = self.db.depth_get_info(dst_relpath, self.move_op_depth())?;
        Self::check_revision(dst_relpath, info.revision, expected_revision)?;
        if info.kind != NodeKind::Dir {
            return Err(WcError::Corrupt(format!(
                "'{dst_relpath}' is a {} where a directory was moved",
                info.kind
            )));
        }
        trace!(path = %dst_relpath, "directory needs no merge");
        Ok(())
    }

    fn alter_file(
        &mut self,
        dst_relpath: &str,
        expected_revision: u64,
        props: &PropertyList,
        new_checksum: &Checksum,
        mut contents: Box<dyn Read + '_>,
    ) -> Result<(), WcError> {
        let info = self.db.depth_get_info(dst_relpath, self.move_op_depth())?;
        Self::check_revision(dst_relpath, info.revision, expected_revision)?;
        if info.kind != NodeKind::File {
            return Ok(());
        }
        let old_checksum = info
            .checksum
            .clone()
            .ok_or_else(|| WcError::Corrupt(format!("'{dst_relpath}' has no pristine text")))?;
        let old_checksum = self.db.pristine_sha1(&old_checksum)?;
        let new_checksum = self.db.pristine_sha1(new_checksum)?;
        if old_checksum == new_checksum {
            trace!(path = %dst_relpath, "text unchanged by the update");
            return Ok(());
        }
        trace!(path = %dst_relpath, props = props.len(), "merging incoming text");

        let mut base = Vec::new();
        self.db.pristine_read(&old_checksum)?.read_to_end(&mut base)?;
        let mut left = Vec::new();
        contents.read_to_end(&mut left)?;
        let working = read_working_text(self.db, dst_relpath)?;
        let locally_modified = working.as_ref().is_some_and(|text| *text != base);
        let right = working.clone().unwrap_or_else(|| base.clone());

        let old_marker = format!("{dst_relpath}.r{}", self.old_version.revision);
        let new_marker = format!("{dst_relpath}.r{}", self.new_version.revision);
        let mine_marker = format!("{dst_relpath}.mine");
        let labels = MergeLabels {
            base: format!(".r{}", self.old_version.revision),
            left: format!(".r{}", self.new_version.revision),
            right: ".mine".to_string(),
        };
        let result = self.ctx.merger().merge3(&base, &left, &right, &labels)?;

        let tmp = self.db.tmp_relpath();
        fs::write(self.db.abspath(&tmp), &result.merged)?;

        let content_state = match result.outcome {
            MergeOutcome::Conflict => {
                let original = ConflictVersion {
                    path_in_repos: info.repos_relpath.clone().unwrap_or_default(),
                    node_kind: NodeKind::File,
                    ..self.old_version.clone()
                };
                // Recorded as an update even when a switch raised the move
                // conflict; resolving the text conflict works the same way.
                let mut skel = ConflictSkel::new();
                skel.set_op_update(original, Some(self.new_version.clone()))
                    .add_text_conflict(
                        Some(old_marker.clone()),
                        Some(mine_marker.clone()),
                        Some(new_marker.clone()),
                    );
                self.db.mark_conflict(dst_relpath, skel)?;

                if working.is_some() {
                    self.work_items.push(WorkItem::FileCopy {
                        src: dst_relpath.to_string(),
                        dst: mine_marker,
                    });
                }
                self.work_items.push(WorkItem::FileInstallPristine {
                    checksum: old_checksum,
                    dst: old_marker,
                });
                self.work_items.push(WorkItem::FileInstallPristine {
                    checksum: new_checksum,
                    dst: new_marker,
                });
                NotifyState::Conflicted
            }
            MergeOutcome::Merged | MergeOutcome::Unchanged if locally_modified => NotifyState::Merged,
            MergeOutcome::Merged | MergeOutcome::Unchanged => NotifyState::Changed,
        };
        self.work_items.push(WorkItem::FileMove {
            src: tmp,
            dst: dst_relpath.to_string(),
        });
        debug!(
            path = %dst_relpath,
            operation = %self.operation,
            state = ?content_state,
            "merged incoming text into moved file"
        );

        let mut notification = Notification::new(dst_relpath, NotifyAction::UpdateUpdate);
        notification.kind = NodeKind::File;
        notification.content_state = content_state;
        notification.prop_state = NotifyState::Unknown;
        notification.old_revision = Some(self.old_version.revision);
        notification.revision = Some(self.new_version.revision);
        self.ctx.notify(&notification);
        Ok(())
    }

    fn complete(&mut self) -> Result<(), WcError> {
        let kind = self
            .db
            .depth_get_info(&self.move_root_dst_relpath, self.move_op_depth())
            .map_or(NodeKind::Unknown, |info| info.kind);
        let mut notification =
            Notification::new(self.move_root_dst_relpath.clone(), NotifyAction::UpdateCompleted);
        notification.kind = kind;
        notification.revision = Some(self.new_version.revision);
        self.ctx.notify(&notification);
        Ok(())
    }
}
