//! Carrying an update into a locally moved tree.
//!
//! When an update edits a node that was moved away locally, the update
//! lands on the move source (whose BASE now holds the new revision) and a
//! tree conflict is raised there. The functions here replay that update
//! onto the move destination through a [`TreeConflictEditor`].

use tracing::{debug, trace};

use crate::conflict::{Operation, read_conflict_info};
use crate::editor::{TreeConflictEditor, TreeEdit};
use crate::path::{relpath_depth, relpath_join, validate_relpath};
use crate::wc_db::WcDb;
use crate::workqueue::{WorkItem, run_work_items};
use crate::{Context, NodeKind, Notification, NotifyAction, WcError};

/// Replays the update recorded in the tree conflict on `victim` (a move
/// source) onto the move destination.
///
/// Runs in one store transaction. The returned work items install merged
/// texts and conflict markers; run them with [`run_work_items`] after this
/// call returns.
///
/// # Errors
///
/// - [`WcError::NotInConflict`] / [`WcError::NotATreeConflict`] if `victim`
///   has no tree conflict.
/// - [`WcError::ResolverFailure`] if the conflict was not raised by an update
///   or switch, or `victim` was not moved away.
/// - [`WcError::Unsupported`] if the update needs structural changes.
pub fn update_moved_away_conflict_victim(
    db: &mut WcDb,
    victim: &str,
    ctx: &Context,
) -> Result<Vec<WorkItem>, WcError> {
    let victim = validate_relpath(victim)?;
    db.with_txn(|db| drive_tree_conflict_editor(db, &victim, ctx))
}

/// Resolves the tree conflict on the moved-away `victim` by replaying the
/// update onto the move destination, marking the conflict resolved and
/// running the queued work items.
pub fn resolve_moved_away_conflict(
    db: &mut WcDb,
    victim: &str,
    ctx: &Context,
) -> Result<(), WcError> {
    let victim = validate_relpath(victim)?;
    let work_items = db.with_txn(|db| {
        let mut items = drive_tree_conflict_editor(db, &victim, ctx)?;
        items.extend(db.mark_resolved(&victim, false, false, true)?);
        Ok(items)
    })?;
    run_work_items(db, &work_items, ctx)?;

    ctx.notify(&Notification::new(victim, NotifyAction::ResolvedTree));
    Ok(())
}

fn drive_tree_conflict_editor(
    db: &mut WcDb,
    victim: &str,
    ctx: &Context,
) -> Result<Vec<WorkItem>, WcError> {
    let conflict = read_conflict_info(db, victim)?;
    if !matches!(conflict.operation, Operation::Update | Operation::Switch) {
        return Err(WcError::ResolverFailure(format!(
            "cannot auto-resolve a tree conflict on '{victim}' raised by {}",
            conflict.operation
        )));
    }
    let old_version = conflict.old_version.ok_or_else(|| {
        WcError::ResolverFailure(format!("the conflict on '{victim}' records no old version"))
    })?;

    let deletion = db.scan_deletion(victim)?;
    let (Some(dst_relpath), Some(dst_op_root)) =
        (deletion.moved_to_relpath, deletion.moved_to_op_root_relpath)
    else {
        return Err(WcError::ResolverFailure(format!(
            "'{victim}' was not moved away"
        )));
    };

    let op_depth = relpath_depth(&dst_op_root);
    let root_revision = db
        .depth_get_info(&dst_op_root, op_depth)?
        .revision
        .ok_or_else(|| WcError::Corrupt(format!("'{dst_op_root}' has no revision")))?;
    debug!(
        victim = %victim,
        dst = %dst_relpath,
        op_root = %dst_op_root,
        operation = %conflict.operation,
        "updating moved-away tree"
    );

    let node_kind = old_version.node_kind;
    let mut editor = TreeConflictEditor::new(
        db,
        ctx,
        dst_op_root.clone(),
        conflict.operation,
        old_version,
        conflict.new_version,
    );
    let walk = MoveWalk {
        move_root_dst_relpath: &dst_op_root,
        op_depth,
        revision: root_revision,
    };
    match node_kind {
        NodeKind::File | NodeKind::Symlink => {
            walk.update_file(&mut editor, victim, &dst_relpath)?;
        }
        NodeKind::Dir => walk.update_subtree(&mut editor, victim, &dst_relpath)?,
        _ => {}
    }
    editor.drive(TreeEdit::Complete)?;
    Ok(editor.into_work_items())
}

/// Fixed parameters of one move-update traversal.
struct MoveWalk<'a> {
    move_root_dst_relpath: &'a str,
    op_depth: u32,
    revision: u64,
}

impl MoveWalk<'_> {
    fn update_file(
        &self,
        editor: &mut TreeConflictEditor<'_>,
        src_relpath: &str,
        dst_relpath: &str,
    ) -> Result<(), WcError> {
        let base = editor.db().base_get_info(src_relpath)?;
        let checksum = base
            .checksum
            .ok_or_else(|| WcError::Corrupt(format!("'{src_relpath}' has no pristine text")))?;
        let contents = editor.db().pristine_read(&checksum)?;
        editor.drive(TreeEdit::AlterFile {
            relpath: dst_relpath.to_string(),
            revision: self.revision,
            props: base.props.unwrap_or_default(),
            checksum,
            contents: Box::new(contents),
        })?;
        editor
            .db()
            .replace_moved_here_row(src_relpath, dst_relpath, self.op_depth)
    }

    fn update_subtree(
        &self,
        editor: &mut TreeConflictEditor<'_>,
        src_relpath: &str,
        dst_relpath: &str,
    ) -> Result<(), WcError> {
        let base = editor.db().base_get_info(src_relpath)?;
        let children = editor.db().base_get_children(src_relpath)?;
        editor.drive(TreeEdit::AlterDirectory {
            relpath: dst_relpath.to_string(),
            revision: self.revision,
            children: children.clone(),
            props: base.props.unwrap_or_default(),
        })?;

        for name in children {
            let child_src = relpath_join(src_relpath, &name);
            let deletion = editor.db().scan_deletion(&child_src)?;
            if deletion.moved_to_op_root_relpath.as_deref() != Some(self.move_root_dst_relpath) {
                // Not part of this move: moved separately, or added by the update.
                trace!(path = %child_src, "skipping child outside the move");
                continue;
            }
            let Some(child_dst) = deletion.moved_to_relpath else {
                continue;
            };
            match editor.db().base_get_info(&child_src)?.kind {
                NodeKind::File | NodeKind::Symlink => {
                    self.update_file(editor, &child_src, &child_dst)?;
                }
                NodeKind::Dir => self.update_subtree(editor, &child_src, &child_dst)?,
                _ => {}
            }
        }

        editor
            .db()
            .replace_moved_here_row(src_relpath, dst_relpath, self.op_depth)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::conflict::{ConflictAction, ConflictReason, ConflictSkel, ConflictVersion};
    use crate::wc_db::BaseNode;

    fn conflicted_move(operation: Operation) -> (tempfile::TempDir, WcDb) {
        let temp = tempfile::tempdir().unwrap();
        let mut db = WcDb::create(temp.path(), "svn://h/repo", "u", "trunk", 1).unwrap();
        let sum = db.pristine_install(b"x\n").unwrap();
        db.base_add_node("f", BaseNode::file("trunk/f", 1, sum)).unwrap();
        db.op_move("f", "g").unwrap();

        let old = ConflictVersion::new("svn://h/repo", "u", "trunk/f", 1, NodeKind::File);
        let new = ConflictVersion::new("svn://h/repo", "u", "trunk/f", 2, NodeKind::File);
        let mut skel = ConflictSkel::new();
        match operation {
            Operation::Merge => skel.set_op_merge(old, Some(new)),
            _ => skel.set_op_update(old, Some(new)),
        };
        skel.add_tree_conflict(ConflictReason::MovedAway, ConflictAction::Edited, Some("f".into()));
        db.mark_conflict("f", skel).unwrap();
        (temp, db)
    }

    #[test]
    fn merge_conflicts_are_not_auto_resolved() {
        let (_temp, mut db) = conflicted_move(Operation::Merge);
        let err = update_moved_away_conflict_victim(&mut db, "f", &Context::new()).unwrap_err();
        assert!(matches!(err, WcError::ResolverFailure(_)));
    }

    #[test]
    fn victim_that_was_not_moved_is_rejected() {
        let (_temp, mut db) = conflicted_move(Operation::Update);
        let old = ConflictVersion::new("svn://h/repo", "u", "trunk", 1, NodeKind::Dir);
        let mut skel = ConflictSkel::new();
        skel.set_op_update(old, None)
            .add_tree_conflict(ConflictReason::Edited, ConflictAction::Edited, None);
        db.mark_conflict("", skel).unwrap();

        let err = update_moved_away_conflict_victim(&mut db, "", &Context::new()).unwrap_err();
        assert!(matches!(err, WcError::ResolverFailure(_)));
    }

    #[test]
    fn victim_without_conflict_is_rejected() {
        let (_temp, mut db) = conflicted_move(Operation::Update);
        let err = update_moved_away_conflict_victim(&mut db, "g", &Context::new()).unwrap_err();
        assert!(matches!(err, WcError::NotInConflict(_)));
    }
}
