//! The per-node "entry" view: schedule, copied and deleted flags derived
//! from the op-depth layers.

use super::{Layers, WcDb};
use crate::path::{
    relpath_basename, relpath_depth, relpath_dirname, relpath_join, validate_relpath,
};
use crate::url::url_join;
use crate::{Context, Depth, NodeKind, Presence, WcError};

/// Pending operation on a node.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Schedule {
    /// No pending operation.
    Normal,
    /// Scheduled for addition (possibly with history).
    Add,
    /// Scheduled for deletion.
    Delete,
    /// Deleted and re-added in one commit.
    Replace,
}

/// Legacy view of one node.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub kind: NodeKind,
    pub schedule: Schedule,
    /// Part of a copied subtree (or the root of a copy).
    pub copied: bool,
    /// The node is a not-present tombstone.
    pub deleted: bool,
    /// The server denied access to the node.
    pub absent: bool,
    pub depth: Depth,
    pub revision: Option<u64>,
    pub url: Option<String>,
    pub copyfrom_url: Option<String>,
    pub copyfrom_rev: Option<u64>,
    pub lock_token: Option<String>,
    pub changelist: Option<String>,
    pub text_conflicted: bool,
    pub prop_conflicted: bool,
    pub tree_conflicted: bool,
}

impl Entry {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            schedule: Schedule::Normal,
            copied: false,
            deleted: false,
            absent: false,
            depth: Depth::Unknown,
            revision: None,
            url: None,
            copyfrom_url: None,
            copyfrom_rev: None,
            lock_token: None,
            changelist: None,
            text_conflicted: false,
            prop_conflicted: false,
            tree_conflicted: false,
        }
    }

    /// Returns `true` for nodes that are not really there: not-present
    /// tombstones that are not being re-added, absent and excluded nodes.
    pub fn is_hidden(&self) -> bool {
        (self.deleted && !matches!(self.schedule, Schedule::Add | Schedule::Replace))
            || self.absent
            || self.depth == Depth::Exclude
    }

    /// Returns `true` when any conflict is recorded.
    pub fn is_conflicted(&self) -> bool {
        self.text_conflicted || self.prop_conflicted || self.tree_conflicted
    }
}

impl WcDb {
    fn entry_url(&self, relpath: &str) -> Result<Option<String>, WcError> {
        if let Some(repos_relpath) = self.base_row(relpath)?.and_then(|row| row.repos_relpath) {
            return Ok(Some(url_join(&self.repos_root_url, &repos_relpath)));
        }
        if relpath.is_empty() {
            return Ok(None);
        }
        Ok(self
            .entry_url(relpath_dirname(relpath))?
            .map(|parent| url_join(&parent, relpath_basename(relpath))))
    }

    fn entry_from_layers(&self, relpath: &str, layers: &Layers) -> Result<Option<Entry>, WcError> {
        let Some((&top_depth, top)) = layers.last_key_value() else {
            return Ok(None);
        };
        let mut entry = Entry::new(top.kind);
        entry.revision = top.revision;
        entry.depth = top.depth;

        if top_depth == 0 {
            match top.presence {
                Presence::NotPresent => entry.deleted = true,
                Presence::Absent => entry.absent = true,
                Presence::Excluded => entry.depth = Depth::Exclude,
                _ => {}
            }
        } else {
            let lower_real = layers
                .range(..top_depth)
                .rev()
                .find(|(_, row)| row.presence.is_real());
            match top.presence {
                Presence::BaseDeleted => {
                    entry.schedule = Schedule::Delete;
                    if let Some((&depth, lower)) = lower_real {
                        entry.kind = lower.kind;
                        entry.revision = lower.revision;
                        entry.depth = lower.depth;
                        entry.copied = depth > 0 && lower.repos_relpath.is_some();
                    }
                }
                Presence::NotPresent | Presence::Absent | Presence::Excluded => {
                    entry.copied = true;
                    match top.presence {
                        Presence::Absent => entry.absent = true,
                        Presence::Excluded => entry.depth = Depth::Exclude,
                        _ => entry.deleted = true,
                    }
                }
                Presence::Normal | Presence::Incomplete => {
                    if top_depth == relpath_depth(relpath) {
                        entry.schedule = if lower_real.is_some() {
                            Schedule::Replace
                        } else {
                            Schedule::Add
                        };
                        if let Some(repos_relpath) = &top.repos_relpath {
                            entry.copied = true;
                            entry.copyfrom_url = Some(url_join(&self.repos_root_url, repos_relpath));
                            entry.copyfrom_rev = top.revision;
                        }
                    } else {
                        entry.copied = top.repos_relpath.is_some();
                        if !entry.copied {
                            entry.schedule = Schedule::Add;
                        }
                    }
                }
            }
        }

        entry.url = self.entry_url(relpath)?;
        entry.lock_token = self.base_lock_token(relpath)?;
        if let Some(actual) = self.read_actual(relpath)? {
            entry.changelist = actual.changelist;
            if let Some(conflict) = &actual.conflict {
                (
                    entry.text_conflicted,
                    entry.prop_conflicted,
                    entry.tree_conflicted,
                ) = conflict.conflicted();
            }
        }
        Ok(Some(entry))
    }

    /// Returns the entry of `relpath`, or `None` when it is unversioned.
    pub fn read_entry(&self, relpath: &str) -> Result<Option<Entry>, WcError> {
        let relpath = validate_relpath(relpath)?;
        match self.layers(&relpath)? {
            Some(layers) => self.entry_from_layers(&relpath, &layers),
            None => Ok(None),
        }
    }

    /// Returns the entries of all children of `relpath` (hidden ones
    /// included) as `(relpath, entry)` pairs in path order.
    pub fn read_entry_children(&self, relpath: &str) -> Result<Vec<(String, Entry)>, WcError> {
        let relpath = validate_relpath(relpath)?;
        let mut entries = Vec::new();
        for child in self.node_children(&relpath)? {
            let Some(layers) = self.layers(&child)? else {
                continue;
            };
            if let Some(entry) = self.entry_from_layers(&child, &layers)? {
                entries.push((child, entry));
            }
        }
        Ok(entries)
    }

    /// Walks the entries of `relpath` and the nodes below it to `depth`.
    ///
    /// `visit` sees the root first and children in path order. Hidden nodes
    /// are skipped unless `show_hidden` is set. The walk checks `ctx` for
    /// cancellation at every node.
    pub fn walk_entries(
        &self,
        relpath: &str,
        depth: Depth,
        show_hidden: bool,
        ctx: &Context,
        visit: &mut dyn FnMut(&str, &Entry) -> Result<(), WcError>,
    ) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        let entry = self
            .read_entry(&relpath)?
            .ok_or_else(|| WcError::NotUnderVersionControl(relpath.clone()))?;
        self.walk_entry(&relpath, &entry, depth, show_hidden, ctx, visit)
    }

    fn walk_entry(
        &self,
        relpath: &str,
        entry: &Entry,
        depth: Depth,
        show_hidden: bool,
        ctx: &Context,
        visit: &mut dyn FnMut(&str, &Entry) -> Result<(), WcError>,
    ) -> Result<(), WcError> {
        ctx.check_cancelled()?;
        visit(relpath, entry)?;
        if entry.kind != NodeKind::Dir || depth <= Depth::Empty {
            return Ok(());
        }
        for (child, child_entry) in self.read_entry_children(relpath)? {
            if child_entry.is_hidden() && !show_hidden {
                continue;
            }
            if child_entry.kind == NodeKind::Dir && depth == Depth::Files {
                continue;
            }
            let child = relpath_join(relpath, relpath_basename(&child));
            self.walk_entry(&child, &child_entry, depth.below(), show_hidden, ctx, visit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::wc_db::BaseNode;
    use crate::wc_db::tests::new_wc;

    fn populate(db: &mut WcDb) {
        let sum = db.pristine_install(b"x\n").unwrap();
        db.base_add_node("A", BaseNode::dir("trunk/A", 1)).unwrap();
        db.base_add_node("A/f", BaseNode::file("trunk/A/f", 1, sum.clone()))
            .unwrap();
        db.base_add_node("A/D", BaseNode::dir("trunk/A/D", 1)).unwrap();
        db.base_add_node("A/D/g", BaseNode::file("trunk/A/D/g", 1, sum))
            .unwrap();
        db.base_add_node("gone", BaseNode::not_present(NodeKind::File, "trunk/gone", 1))
            .unwrap();
    }

    #[test]
    fn schedules_follow_layers() {
        let (_temp, mut db) = new_wc();
        populate(&mut db);

        let entry = db.read_entry("A/f").unwrap().unwrap();
        assert_eq!(entry.schedule, Schedule::Normal);
        assert_eq!(entry.url.as_deref(), Some("svn://h/repo/trunk/A/f"));

        db.op_delete("A/D").unwrap();
        let entry = db.read_entry("A/D/g").unwrap().unwrap();
        assert_eq!(entry.schedule, Schedule::Delete);
        assert_eq!(entry.kind, NodeKind::File);
        assert_eq!(entry.revision, Some(1));

        db.op_add_directory("A/D").unwrap();
        assert_eq!(
            db.read_entry("A/D").unwrap().unwrap().schedule,
            Schedule::Replace
        );

        db.op_add_file("A/new").unwrap();
        let entry = db.read_entry("A/new").unwrap().unwrap();
        assert_eq!(entry.schedule, Schedule::Add);
        assert!(!entry.copied);
        assert_eq!(entry.url.as_deref(), Some("svn://h/repo/trunk/A/new"));

        assert!(db.read_entry("gone").unwrap().unwrap().is_hidden());
        assert!(db.read_entry("nope").unwrap().is_none());
    }

    #[test]
    fn copies_report_copyfrom_and_copied_children() {
        let (_temp, mut db) = new_wc();
        populate(&mut db);
        db.op_copy("A", "C").unwrap();

        let root = db.read_entry("C").unwrap().unwrap();
        assert_eq!(root.schedule, Schedule::Add);
        assert!(root.copied);
        assert_eq!(root.copyfrom_url.as_deref(), Some("svn://h/repo/trunk/A"));
        assert_eq!(root.copyfrom_rev, Some(1));
        assert_eq!(root.url.as_deref(), Some("svn://h/repo/trunk/C"));

        let child = db.read_entry("C/D/g").unwrap().unwrap();
        assert_eq!(child.schedule, Schedule::Normal);
        assert!(child.copied);
    }

    #[test]
    fn entries_carry_actual_state() {
        let (_temp, mut db) = new_wc();
        populate(&mut db);
        db.set_changelist("A/f", Some("fix")).unwrap();
        db.lock_add("A/f", "opaquelocktoken:f").unwrap();

        let entry = db.read_entry("A/f").unwrap().unwrap();
        assert_eq!(entry.changelist.as_deref(), Some("fix"));
        assert_eq!(entry.lock_token.as_deref(), Some("opaquelocktoken:f"));
        assert!(!entry.is_conflicted());

        let children: Vec<String> = db
            .read_entry_children("A")
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(children, vec!["A/D", "A/f"]);
    }

    #[test]
    fn walk_respects_depth_and_hidden_nodes() {
        let (_temp, mut db) = new_wc();
        populate(&mut db);
        let ctx = Context::new();

        let mut seen = Vec::new();
        db.walk_entries("", Depth::Infinity, false, &ctx, &mut |path, _| {
            seen.push(path.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["", "A", "A/D", "A/D/g", "A/f"]);

        seen.clear();
        db.walk_entries("A", Depth::Files, false, &ctx, &mut |path, _| {
            seen.push(path.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["A", "A/f"]);

        seen.clear();
        db.walk_entries("", Depth::Immediates, true, &ctx, &mut |path, _| {
            seen.push(path.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["", "A", "gone"]);
    }
}
