use std::collections::BTreeMap;

use rusqlite::params;
use tracing::debug;

use super::{Layers, NodeRow, SUBTREE_CLAUSE, WcDb, revnum_from_sql};
use crate::path::{
    relpath_basename, relpath_depth, relpath_dirname, relpath_join, relpath_prefix,
    relpath_skip_ancestor, validate_child_relpath, validate_relpath,
};
use crate::{Checksum, Depth, NodeKind, NodeStatus, Presence, PropertyList, WcError};

/// A BASE node as delivered by checkout or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseNode {
    /// Node kind.
    pub kind: NodeKind,
    /// Presence of the row.
    pub presence: Presence,
    /// Repository-relative path.
    pub repos_relpath: String,
    /// Revision the node is at.
    pub revision: u64,
    /// Pristine text checksum, for files and symlinks.
    pub checksum: Option<Checksum>,
    /// Pristine properties.
    pub props: PropertyList,
    /// Ambient depth, for directories.
    pub depth: Depth,
    /// Last-changed revision.
    pub changed_rev: Option<u64>,
    /// Last-changed date.
    pub changed_date: Option<String>,
    /// Last-changed author.
    pub changed_author: Option<String>,
}

impl BaseNode {
    fn new(kind: NodeKind, repos_relpath: impl Into<String>, revision: u64) -> Self {
        Self {
            kind,
            presence: Presence::Normal,
            repos_relpath: repos_relpath.into(),
            revision,
            checksum: None,
            props: PropertyList::new(),
            depth: if kind == NodeKind::Dir {
                Depth::Infinity
            } else {
                Depth::Unknown
            },
            changed_rev: Some(revision),
            changed_date: None,
            changed_author: None,
        }
    }

    /// A present directory.
    pub fn dir(repos_relpath: impl Into<String>, revision: u64) -> Self {
        Self::new(NodeKind::Dir, repos_relpath, revision)
    }

    /// A present file with the given pristine text.
    pub fn file(repos_relpath: impl Into<String>, revision: u64, checksum: Checksum) -> Self {
        let mut node = Self::new(NodeKind::File, repos_relpath, revision);
        node.checksum = Some(checksum);
        node
    }

    /// A present symlink; the pristine text is the link target.
    pub fn symlink(repos_relpath: impl Into<String>, revision: u64, checksum: Checksum) -> Self {
        let mut node = Self::file(repos_relpath, revision, checksum);
        node.kind = NodeKind::Symlink;
        node
    }

    /// A node known not to exist at `revision`.
    pub fn not_present(kind: NodeKind, repos_relpath: impl Into<String>, revision: u64) -> Self {
        let mut node = Self::new(kind, repos_relpath, revision);
        node.presence = Presence::NotPresent;
        node
    }

    /// Sets the presence.
    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }

    /// Sets the pristine properties.
    pub fn with_props(mut self, props: PropertyList) -> Self {
        self.props = props;
        self
    }

    /// Sets the ambient depth.
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Sets the last-changed information.
    pub fn with_changed(mut self, rev: u64, date: Option<&str>, author: Option<&str>) -> Self {
        self.changed_rev = Some(rev);
        self.changed_date = date.map(str::to_string);
        self.changed_author = author.map(str::to_string);
        self
    }

    fn into_row(self) -> NodeRow {
        NodeRow {
            presence: self.presence,
            kind: self.kind,
            revision: Some(self.revision),
            repos_relpath: Some(self.repos_relpath),
            checksum: self.checksum,
            changed_rev: self.changed_rev,
            changed_date: self.changed_date,
            changed_author: self.changed_author,
            depth: self.depth,
            props: Some(self.props),
            moved_here: false,
            moved_to: None,
        }
    }
}

/// One node row as seen by callers.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    /// Status derived from presence and op-depth.
    pub status: NodeStatus,
    /// Node kind.
    pub kind: NodeKind,
    /// Op-depth of the row.
    pub op_depth: u32,
    /// Revision of the row (BASE revision or copy-from revision).
    pub revision: Option<u64>,
    /// Repository relpath (BASE location or copy-from location).
    pub repos_relpath: Option<String>,
    /// Repository root URL.
    pub repos_root_url: String,
    /// Repository UUID.
    pub repos_uuid: String,
    /// Pristine text checksum.
    pub checksum: Option<Checksum>,
    /// Last-changed revision.
    pub changed_rev: Option<u64>,
    /// Last-changed date.
    pub changed_date: Option<String>,
    /// Last-changed author.
    pub changed_author: Option<String>,
    /// Ambient depth.
    pub depth: Depth,
    /// Pristine properties of the row.
    pub props: Option<PropertyList>,
    /// The row was created by a move.
    pub moved_here: bool,
    /// Destination of a move rooted at this row.
    pub moved_to: Option<String>,
    /// A BASE row exists for the path.
    pub have_base: bool,
    /// Working rows exist below this one.
    pub have_more_work: bool,
    /// A conflict is recorded for the path.
    pub conflicted: bool,
    /// Changelist of the node.
    pub changelist: Option<String>,
    /// Lock token of the BASE node.
    pub lock_token: Option<String>,
}

/// Result of [`WcDb::scan_deletion`].
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionInfo {
    /// Root of the deletion that shadows BASE, if BASE is deleted.
    pub base_del_relpath: Option<String>,
    /// Root of the deletion that shadows a lower working layer.
    pub work_del_relpath: Option<String>,
    /// Where the node itself was moved to.
    pub moved_to_relpath: Option<String>,
    /// Destination of the move's op-root.
    pub moved_to_op_root_relpath: Option<String>,
}

fn status_of(op_depth: u32, presence: Presence) -> NodeStatus {
    match presence {
        Presence::Normal if op_depth > 0 => NodeStatus::Added,
        Presence::Normal => NodeStatus::Normal,
        Presence::Incomplete => NodeStatus::Incomplete,
        Presence::BaseDeleted => NodeStatus::Deleted,
        Presence::NotPresent if op_depth > 0 => NodeStatus::Deleted,
        Presence::NotPresent => NodeStatus::NotPresent,
        Presence::Excluded => NodeStatus::Excluded,
        Presence::Absent => NodeStatus::Absent,
    }
}

fn highest_real_below(layers: &Layers, op_depth: u32) -> Option<(u32, &NodeRow)> {
    layers
        .range(..op_depth)
        .rev()
        .find(|(_, row)| row.presence.is_real())
        .map(|(depth, row)| (*depth, row))
}

impl WcDb {
    fn node_info(
        &self,
        relpath: &str,
        layers: &Layers,
        op_depth: u32,
        row: &NodeRow,
    ) -> Result<NodeInfo, WcError> {
        let actual = self.read_actual(relpath)?;
        Ok(NodeInfo {
            status: status_of(op_depth, row.presence),
            kind: row.kind,
            op_depth,
            revision: row.revision,
            repos_relpath: row.repos_relpath.clone(),
            repos_root_url: self.repos_root_url.clone(),
            repos_uuid: self.repos_uuid.clone(),
            checksum: row.checksum.clone(),
            changed_rev: row.changed_rev,
            changed_date: row.changed_date.clone(),
            changed_author: row.changed_author.clone(),
            depth: row.depth,
            props: row.props.clone(),
            moved_here: row.moved_here,
            moved_to: row.moved_to.clone(),
            have_base: layers.contains_key(&0),
            have_more_work: op_depth > 1 && layers.range(1..op_depth).next().is_some(),
            conflicted: actual.as_ref().is_some_and(|a| a.conflict.is_some()),
            changelist: actual.and_then(|a| a.changelist),
            lock_token: self.base_lock_token(relpath)?,
        })
    }

    // ---- BASE ----

    /// Inserts or replaces the BASE row of `relpath`.
    ///
    /// Replacing an existing BASE row is how an update lands new content.
    pub fn base_add_node(&mut self, relpath: &str, node: BaseNode) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        if !relpath.is_empty() {
            let parent = relpath_dirname(&relpath);
            let parent_is_dir = self
                .base_row(parent)?
                .is_some_and(|row| row.kind == NodeKind::Dir);
            if !parent_is_dir {
                return Err(WcError::PathNotFound(parent.to_string()));
            }
        }
        let row = node.into_row();
        debug!(path = %relpath, kind = %row.kind, revision = ?row.revision, "writing BASE node");
        self.write_row(&relpath, 0, &row)
    }

    /// Removes the BASE rows of `relpath` and everything below it.
    pub fn base_remove(&mut self, relpath: &str) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        let mut paths = vec![relpath.clone()];
        paths.extend(self.node_descendants(&relpath)?);
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM nodes WHERE local_relpath = ?1 AND op_depth = 0")?;
        for path in paths {
            stmt.execute(params![path])?;
        }
        Ok(())
    }

    /// Returns the BASE row of `relpath`.
    pub fn base_get_info(&self, relpath: &str) -> Result<NodeInfo, WcError> {
        let relpath = validate_relpath(relpath)?;
        let layers = self
            .layers(&relpath)?
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        let row = layers
            .get(&0)
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        self.node_info(&relpath, &layers, 0, row)
    }

    /// Returns the names of the BASE children of `relpath`.
    pub fn base_get_children(&self, relpath: &str) -> Result<Vec<String>, WcError> {
        let relpath = validate_relpath(relpath)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT local_relpath FROM nodes WHERE parent_relpath = ?1 AND op_depth = 0 \
             ORDER BY local_relpath",
        )?;
        let children = stmt
            .query_map(params![relpath], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children
            .iter()
            .map(|k| relpath_basename(k).to_string())
            .collect())
    }

    // ---- WORKING ----

    fn require_dir_parent(&self, relpath: &str) -> Result<(), WcError> {
        let parent = relpath_dirname(relpath);
        match self.effective_row(parent)? {
            Some((_, row)) if row.presence.is_real() && row.kind == NodeKind::Dir => Ok(()),
            _ => Err(WcError::NotUnderVersionControl(parent.to_string())),
        }
    }

    fn op_add(&mut self, relpath: &str, kind: NodeKind) -> Result<(), WcError> {
        let relpath = validate_child_relpath(relpath)?;
        if self
            .effective_row(&relpath)?
            .is_some_and(|(_, row)| row.presence.is_real())
        {
            return Err(WcError::NodeExists(relpath));
        }
        self.require_dir_parent(&relpath)?;

        let op_depth = relpath_depth(&relpath);
        debug!(path = %relpath, %kind, op_depth, "scheduling add");
        self.write_row(&relpath, op_depth, &NodeRow::new(Presence::Normal, kind))
    }

    /// Schedules a new directory for addition (without history).
    pub fn op_add_directory(&mut self, relpath: &str) -> Result<(), WcError> {
        self.op_add(relpath, NodeKind::Dir)
    }

    /// Schedules a new file for addition (without history).
    pub fn op_add_file(&mut self, relpath: &str) -> Result<(), WcError> {
        self.op_add(relpath, NodeKind::File)
    }

    /// Schedules a new symlink for addition (without history).
    pub fn op_add_symlink(&mut self, relpath: &str) -> Result<(), WcError> {
        self.op_add(relpath, NodeKind::Symlink)
    }

    /// Copies the versioned subtree at `src` to `dst` with history.
    pub fn op_copy(&mut self, src: &str, dst: &str) -> Result<(), WcError> {
        let src = validate_child_relpath(src)?;
        let dst = validate_child_relpath(dst)?;
        self.copy_tree(&src, &dst, false)
    }

    /// Moves the versioned subtree at `src` to `dst`: a copy marked
    /// moved-here plus a delete of `src` that records where it went.
    ///
    /// # Errors
    ///
    /// [`WcError::MixedRevisionMove`] if the BASE nodes of `src` are not all
    /// at one revision; a move-update could not describe such a tree.
    pub fn op_move(&mut self, src: &str, dst: &str) -> Result<(), WcError> {
        let src = validate_child_relpath(src)?;
        let dst = validate_child_relpath(dst)?;
        self.require_single_revision(&src)?;
        self.copy_tree(&src, &dst, true)?;

        let op_depth = relpath_depth(&src);
        self.delete_layers(&src, op_depth)?;
        if let Some(mut layers) = self.layers(&src)? {
            if let Some(row) = layers.get_mut(&op_depth) {
                row.moved_to = Some(dst.clone());
                self.write_row(&src, op_depth, row)?;
            }
        }
        debug!(src = %src, dst = %dst, "recorded move");
        Ok(())
    }

    fn require_single_revision(&self, relpath: &str) -> Result<(), WcError> {
        let (min, max) = self
            .conn
            .prepare_cached(&format!(
                "SELECT MIN(revision), MAX(revision) FROM nodes \
                 WHERE op_depth = 0 AND presence IN ('normal', 'incomplete') AND {SUBTREE_CLAUSE}"
            ))?
            .query_row(params![relpath], |row| {
                Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?))
            })?;
        if let (Some(min), Some(max)) = (revnum_from_sql(min)?, revnum_from_sql(max)?) {
            if min != max {
                return Err(WcError::MixedRevisionMove(relpath.to_string(), min, max));
            }
        }
        Ok(())
    }

    /// Schedules `relpath` and its subtree for deletion.
    pub fn op_delete(&mut self, relpath: &str) -> Result<(), WcError> {
        let relpath = validate_child_relpath(relpath)?;
        self.require_real(&relpath)?;
        let op_depth = relpath_depth(&relpath);
        debug!(path = %relpath, op_depth, "scheduling delete");
        self.delete_layers(&relpath, op_depth)
    }

    fn copy_tree(&mut self, src: &str, dst: &str, moved_here: bool) -> Result<(), WcError> {
        if relpath_skip_ancestor(src, dst).is_some() {
            return Err(WcError::IllegalTarget(format!(
                "cannot copy '{src}' into its own subtree '{dst}'"
            )));
        }
        self.require_real(src)?;
        if self
            .effective_row(dst)?
            .is_some_and(|(_, row)| row.presence.is_real())
        {
            return Err(WcError::NodeExists(dst.to_string()));
        }
        self.require_dir_parent(dst)?;

        let op_depth = relpath_depth(dst);
        let mut sources = vec![src.to_string()];
        sources.extend(self.node_descendants(src)?);

        let mut new_rows = Vec::new();
        let mut hidden_root: Option<String> = None;
        for path in &sources {
            if hidden_root
                .as_deref()
                .is_some_and(|root| relpath_skip_ancestor(root, path).is_some())
            {
                continue;
            }
            let Some(mut layers) = self.layers(path)? else {
                continue;
            };
            let Some((top_depth, top)) = layers.pop_last() else {
                continue;
            };
            let target = relpath_join(dst, relpath_skip_ancestor(src, path).unwrap_or_default());

            if top.presence.is_real() {
                let mut row = top;
                row.moved_here = moved_here;
                row.moved_to = None;
                let depth = if row.repos_relpath.is_some() {
                    op_depth
                } else {
                    relpath_depth(&target)
                };
                new_rows.push((target, depth, row));
            } else {
                let below = highest_real_below(&layers, top_depth)
                    .map(|(_, row)| row)
                    .filter(|_| top.presence == Presence::BaseDeleted);
                let source = below.unwrap_or(&top);
                let mut row = NodeRow::new(Presence::NotPresent, source.kind);
                row.revision = source.revision;
                row.repos_relpath = source.repos_relpath.clone();
                new_rows.push((target, op_depth, row));
                hidden_root = Some(path.clone());
            }
        }

        // Layers at or above `op_depth` under `dst` are replaced by the copy.
        let mut existing = vec![dst.to_string()];
        existing.extend(self.node_descendants(dst)?);
        let mut touched: BTreeMap<String, Layers> = BTreeMap::new();
        let mut carried_moved_to = None;
        for path in existing {
            let mut layers = self.layers(&path)?.unwrap_or_default();
            let removed = layers.split_off(&op_depth);
            if path == dst {
                carried_moved_to = removed.get(&op_depth).and_then(|r| r.moved_to.clone());
            }
            touched.insert(path, layers);
        }

        for (target, depth, mut row) in new_rows {
            if target == dst {
                row.moved_to = carried_moved_to.take();
            }
            touched.entry(target).or_default().insert(depth, row);
        }

        for (path, layers) in &mut touched {
            if !layers.contains_key(&op_depth) {
                let shadowed = highest_real_below(layers, op_depth).map(|(_, row)| row.kind);
                if let Some(kind) = shadowed {
                    layers.insert(op_depth, NodeRow::new(Presence::BaseDeleted, kind));
                }
            }
            self.store_layers(path, layers)?;
        }

        debug!(src = %src, dst = %dst, op_depth, moved_here, "copied subtree");
        Ok(())
    }

    fn delete_layers(&mut self, relpath: &str, op_depth: u32) -> Result<(), WcError> {
        let mut paths = vec![relpath.to_string()];
        paths.extend(self.node_descendants(relpath)?);
        for path in paths {
            let Some(mut layers) = self.layers(&path)? else {
                continue;
            };
            let removed = layers.split_off(&op_depth);
            let moved_to = removed.values().find_map(|row| row.moved_to.clone());
            let shadowed = layers
                .last_key_value()
                .filter(|(_, row)| row.presence.is_real())
                .map(|(_, row)| row.kind);
            if let Some(kind) = shadowed {
                let mut row = NodeRow::new(Presence::BaseDeleted, kind);
                row.moved_to = moved_to;
                layers.insert(op_depth, row);
            }
            self.store_layers(&path, &layers)?;

            if layers.is_empty() {
                if let Some(mut actual) = self.read_actual(&path)? {
                    actual.props = None;
                    actual.changelist = None;
                    self.write_actual(&path, &actual)?;
                }
            }
        }
        Ok(())
    }

    /// Returns the effective row of `relpath`.
    pub fn read_info(&self, relpath: &str) -> Result<NodeInfo, WcError> {
        let relpath = validate_relpath(relpath)?;
        let layers = self
            .layers(&relpath)?
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        let (op_depth, row) = layers
            .last_key_value()
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        self.node_info(&relpath, &layers, *op_depth, row)
    }

    /// Returns the row of `relpath` in exactly the `op_depth` layer.
    pub fn depth_get_info(&self, relpath: &str, op_depth: u32) -> Result<NodeInfo, WcError> {
        let relpath = validate_relpath(relpath)?;
        let layers = self
            .layers(&relpath)?
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        let row = layers.get(&op_depth).ok_or_else(|| {
            WcError::PathNotFound(format!("{relpath} (op-depth {op_depth})"))
        })?;
        self.node_info(&relpath, &layers, op_depth, row)
    }

    /// Describes the deletion that hides `relpath`.
    ///
    /// All fields are `None` when the node is not deleted.
    pub fn scan_deletion(&self, relpath: &str) -> Result<DeletionInfo, WcError> {
        let relpath = validate_relpath(relpath)?;
        let layers = self
            .layers(&relpath)?
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        let Some((&del_depth, top)) = layers.last_key_value() else {
            return Ok(DeletionInfo::default());
        };
        if del_depth == 0 || top.presence != Presence::BaseDeleted {
            return Ok(DeletionInfo::default());
        }

        let op_root = relpath_prefix(&relpath, del_depth).to_string();
        let mut info = DeletionInfo::default();
        if layers.contains_key(&0) {
            info.base_del_relpath = Some(op_root.clone());
        }
        if highest_real_below(&layers, del_depth).is_some_and(|(depth, _)| depth > 0) {
            info.work_del_relpath = Some(op_root.clone());
        }

        let mut current = relpath.clone();
        loop {
            let moved_to = self
                .layers(&current)?
                .and_then(|mut l| l.remove(&del_depth))
                .and_then(|row| row.moved_to);
            if let Some(dst_root) = moved_to {
                let below = relpath_skip_ancestor(&current, &relpath).unwrap_or_default();
                info.moved_to_relpath = Some(relpath_join(&dst_root, below));
                info.moved_to_op_root_relpath = Some(dst_root);
                break;
            }
            if current == op_root || current.is_empty() {
                break;
            }
            current = relpath_dirname(&current).to_string();
        }
        Ok(info)
    }

    /// Refreshes the moved-here row of `dst` at `op_depth` from the current
    /// BASE row of its move source `src`.
    pub fn replace_moved_here_row(&mut self, src: &str, dst: &str, op_depth: u32) -> Result<(), WcError> {
        let src = validate_relpath(src)?;
        let dst = validate_relpath(dst)?;
        let base = self
            .base_row(&src)?
            .ok_or_else(|| WcError::PathNotFound(src.clone()))?;
        let mut row = self
            .layers(&dst)?
            .and_then(|mut layers| layers.remove(&op_depth))
            .ok_or_else(|| WcError::PathNotFound(dst.clone()))?;
        row.revision = base.revision;
        row.repos_relpath = base.repos_relpath;
        row.checksum = base.checksum;
        row.props = base.props;
        row.changed_rev = base.changed_rev;
        row.changed_date = base.changed_date;
        row.changed_author = base.changed_author;
        self.write_row(&dst, op_depth, &row)
    }
}
