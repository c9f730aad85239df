//! The versioned tree store.
//!
//! Node state lives in a SQLite database at `.svn/wc.db`. Each relpath has
//! one row per op-depth layer in `nodes`: layer 0 is BASE (what the
//! repository holds at the checked-out revision), higher layers are pending
//! local operations (adds, copies, moves, deletes) rooted at a path with that
//! many components. The effective node at a path is its highest layer.
//!
//! Alongside the nodes the database keeps ACTUAL rows (local property edits,
//! changelists, conflicts), lock tokens and the index of the
//! content-addressed pristine text store under `.svn/pristine`.

mod entries;
mod nodes;
mod pristine;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, warn};

use crate::conflict::ConflictSkel;
use crate::path::{relpath_basename, relpath_dirname, validate_relpath};
use crate::url::canonicalize_url;
use crate::workqueue::WorkItem;
use crate::{Checksum, Depth, NodeKind, Presence, PropertyList, WcError};

pub use entries::{Entry, Schedule};
pub use nodes::{BaseNode, DeletionInfo, NodeInfo};

const ADM_DIR: &str = ".svn";
const DB_FILE: &str = "wc.db";
/// Schema version kept in `PRAGMA user_version`.
const FORMAT: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE wcroot (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    repos_root_url TEXT NOT NULL,
    repos_uuid TEXT NOT NULL
);

CREATE TABLE nodes (
    local_relpath TEXT NOT NULL,
    op_depth INTEGER NOT NULL,
    parent_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    revision INTEGER,
    repos_path TEXT,
    checksum TEXT,
    changed_revision INTEGER,
    changed_date TEXT,
    changed_author TEXT,
    depth TEXT NOT NULL,
    properties TEXT,
    moved_here INTEGER NOT NULL DEFAULT 0,
    moved_to TEXT,
    PRIMARY KEY (local_relpath, op_depth)
) WITHOUT ROWID;
CREATE INDEX nodes_parent ON nodes (parent_relpath, local_relpath, op_depth);

CREATE TABLE actual_node (
    local_relpath TEXT PRIMARY KEY,
    parent_relpath TEXT,
    properties TEXT,
    changelist TEXT,
    conflict_data TEXT
) WITHOUT ROWID;
CREATE INDEX actual_parent ON actual_node (parent_relpath, local_relpath);

CREATE TABLE lock (
    repos_relpath TEXT PRIMARY KEY,
    lock_token TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE pristine (
    checksum TEXT PRIMARY KEY,
    md5_checksum TEXT NOT NULL,
    size INTEGER NOT NULL
) WITHOUT ROWID;
CREATE INDEX pristine_md5 ON pristine (md5_checksum);
";

const SELECT_LAYERS: &str = "SELECT op_depth, presence, kind, revision, repos_path, checksum, \
     changed_revision, changed_date, changed_author, depth, properties, moved_here, moved_to \
     FROM nodes WHERE local_relpath = ?1 ORDER BY op_depth";

const INSERT_NODE: &str = "INSERT OR REPLACE INTO nodes (local_relpath, op_depth, parent_relpath, \
     presence, kind, revision, repos_path, checksum, changed_revision, changed_date, \
     changed_author, depth, properties, moved_here, moved_to) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

/// Matches `?1` and every relpath below it; `?1` must not be the root.
const SUBTREE_CLAUSE: &str =
    "(local_relpath = ?1 OR (local_relpath > ?1 || '/' AND local_relpath < ?1 || '0'))";

static NEXT_TMP_ID: AtomicU64 = AtomicU64::new(0);

/// One node row in one op-depth layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NodeRow {
    pub(crate) presence: Presence,
    pub(crate) kind: NodeKind,
    pub(crate) revision: Option<u64>,
    pub(crate) repos_relpath: Option<String>,
    pub(crate) checksum: Option<Checksum>,
    pub(crate) changed_rev: Option<u64>,
    pub(crate) changed_date: Option<String>,
    pub(crate) changed_author: Option<String>,
    pub(crate) depth: Depth,
    pub(crate) props: Option<PropertyList>,
    pub(crate) moved_here: bool,
    pub(crate) moved_to: Option<String>,
}

impl NodeRow {
    fn new(presence: Presence, kind: NodeKind) -> Self {
        Self {
            presence,
            kind,
            revision: None,
            repos_relpath: None,
            checksum: None,
            changed_rev: None,
            changed_date: None,
            changed_author: None,
            depth: if kind == NodeKind::Dir {
                Depth::Infinity
            } else {
                Depth::Unknown
            },
            props: None,
            moved_here: false,
            moved_to: None,
        }
    }
}

/// Layers of one relpath, keyed by op-depth.
pub(crate) type Layers = BTreeMap<u32, NodeRow>;

/// A `nodes` row as stored, before its words and JSON are decoded.
struct StoredNode {
    op_depth: u32,
    presence: String,
    kind: String,
    revision: Option<i64>,
    repos_path: Option<String>,
    checksum: Option<String>,
    changed_rev: Option<i64>,
    changed_date: Option<String>,
    changed_author: Option<String>,
    depth: String,
    props: Option<String>,
    moved_here: bool,
    moved_to: Option<String>,
}

impl StoredNode {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            op_depth: row.get(0)?,
            presence: row.get(1)?,
            kind: row.get(2)?,
            revision: row.get(3)?,
            repos_path: row.get(4)?,
            checksum: row.get(5)?,
            changed_rev: row.get(6)?,
            changed_date: row.get(7)?,
            changed_author: row.get(8)?,
            depth: row.get(9)?,
            props: row.get(10)?,
            moved_here: row.get(11)?,
            moved_to: row.get(12)?,
        })
    }

    fn decode(self, relpath: &str) -> Result<(u32, NodeRow), WcError> {
        let corrupt =
            |column: &str, value: &str| WcError::Corrupt(format!("'{relpath}' has {column} '{value}'"));
        let presence =
            Presence::from_word(&self.presence).ok_or_else(|| corrupt("presence", &self.presence))?;
        let kind = NodeKind::from_word(&self.kind).ok_or_else(|| corrupt("kind", &self.kind))?;
        let depth = Depth::from_word(&self.depth).ok_or_else(|| corrupt("depth", &self.depth))?;
        let row = NodeRow {
            presence,
            kind,
            revision: revnum_from_sql(self.revision)?,
            repos_relpath: self.repos_path,
            checksum: self.checksum.as_deref().map(Checksum::parse).transpose()?,
            changed_rev: revnum_from_sql(self.changed_rev)?,
            changed_date: self.changed_date,
            changed_author: self.changed_author,
            depth,
            props: props_from_sql(self.props)?,
            moved_here: self.moved_here,
            moved_to: self.moved_to,
        };
        Ok((self.op_depth, row))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ActualRow {
    props: Option<PropertyList>,
    changelist: Option<String>,
    conflict: Option<ConflictSkel>,
}

impl ActualRow {
    fn is_empty(&self) -> bool {
        self.props.is_none() && self.changelist.is_none() && self.conflict.is_none()
    }
}

fn revnum_to_sql(revision: Option<u64>) -> Result<Option<i64>, WcError> {
    revision
        .map(|rev| {
            i64::try_from(rev).map_err(|_| WcError::Corrupt(format!("revision {rev} out of range")))
        })
        .transpose()
}

fn revnum_from_sql(revision: Option<i64>) -> Result<Option<u64>, WcError> {
    revision
        .map(|rev| u64::try_from(rev).map_err(|_| WcError::Corrupt(format!("negative revision {rev}"))))
        .transpose()
}

fn props_to_sql(props: Option<&PropertyList>) -> Result<Option<String>, WcError> {
    Ok(props.map(serde_json::to_string).transpose()?)
}

fn props_from_sql(text: Option<String>) -> Result<Option<PropertyList>, WcError> {
    Ok(text.as_deref().map(serde_json::from_str).transpose()?)
}

fn parent_relpath(relpath: &str) -> Option<&str> {
    (!relpath.is_empty()).then(|| relpath_dirname(relpath))
}

fn open_connection(path: &Path) -> Result<Connection, WcError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// A working copy's metadata store.
///
/// All mutating operations take `&mut self`; holding the store mutably is
/// the working-copy write lock. Use [`WcDb::with_txn`] to group changes so
/// that a failure leaves the database untouched.
#[derive(Debug)]
pub struct WcDb {
    root: PathBuf,
    repos_root_url: String,
    repos_uuid: String,
    conn: Connection,
}

impl WcDb {
    /// Creates the administrative area of a new working copy at `root`,
    /// checked out from `repos_root_url/repos_relpath@revision`.
    ///
    /// # Errors
    ///
    /// [`WcError::WorkingCopyExists`] if `root` already holds a working-copy
    /// database.
    pub fn create(
        root: impl Into<PathBuf>,
        repos_root_url: &str,
        repos_uuid: &str,
        repos_relpath: &str,
        revision: u64,
    ) -> Result<Self, WcError> {
        let root = root.into();
        let repos_root_url = canonicalize_url(repos_root_url)?;
        let repos_relpath = validate_relpath(repos_relpath)?;

        let adm = root.join(ADM_DIR);
        let db_path = adm.join(DB_FILE);
        if db_path.exists() {
            return Err(WcError::WorkingCopyExists(root.display().to_string()));
        }
        std::fs::create_dir_all(adm.join("pristine"))?;
        std::fs::create_dir_all(adm.join("tmp"))?;

        let mut db = Self {
            conn: open_connection(&db_path)?,
            root,
            repos_root_url,
            repos_uuid: repos_uuid.to_string(),
        };
        db.with_txn(|db| {
            db.conn.execute_batch(SCHEMA)?;
            db.conn.pragma_update(None, "user_version", FORMAT)?;
            db.conn.execute(
                "INSERT INTO wcroot (id, repos_root_url, repos_uuid) VALUES (1, ?1, ?2)",
                params![db.repos_root_url, db.repos_uuid],
            )?;
            db.base_add_node("", BaseNode::dir(repos_relpath, revision))
        })?;
        debug!(root = %db.root.display(), url = %db.repos_root_url, revision, "created working copy");
        Ok(db)
    }

    /// Opens the working copy whose root is `root`.
    ///
    /// # Errors
    ///
    /// - [`WcError::NotUnderVersionControl`] if `root` has no working-copy
    ///   database.
    /// - [`WcError::Corrupt`] if the database has an unknown format.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WcError> {
        let root = root.into();
        let db_path = root.join(ADM_DIR).join(DB_FILE);
        if !db_path.is_file() {
            return Err(WcError::NotUnderVersionControl(root.display().to_string()));
        }

        let conn = open_connection(&db_path)?;
        let format: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if format != FORMAT {
            return Err(WcError::Corrupt(format!(
                "'{}' has unsupported format {format}",
                db_path.display()
            )));
        }
        let (repos_root_url, repos_uuid) = conn
            .query_row(
                "SELECT repos_root_url, repos_uuid FROM wcroot WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .ok_or_else(|| {
                WcError::Corrupt(format!("'{}' records no repository", db_path.display()))
            })?;
        debug!(root = %root.display(), url = %repos_root_url, "opened working copy");

        Ok(Self {
            root,
            repos_root_url,
            repos_uuid,
            conn,
        })
    }

    /// Returns the working-copy root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the repository root URL.
    pub fn repos_root_url(&self) -> &str {
        &self.repos_root_url
    }

    /// Returns the repository UUID.
    pub fn repos_uuid(&self) -> &str {
        &self.repos_uuid
    }

    /// Returns the on-disk path of `relpath`.
    pub fn abspath(&self, relpath: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in relpath.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    /// Converts an on-disk path below the root into a relpath.
    pub fn to_relpath(&self, abspath: &Path) -> Result<String, WcError> {
        let rel = abspath.strip_prefix(&self.root).map_err(|_| {
            WcError::InvalidPath(format!(
                "'{}' is not inside the working copy",
                abspath.display()
            ))
        })?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                std::path::Component::Normal(part) => {
                    parts.push(part.to_string_lossy().into_owned());
                }
                std::path::Component::CurDir => {}
                _ => {
                    return Err(WcError::InvalidPath(format!(
                        "unsafe path: {}",
                        abspath.display()
                    )));
                }
            }
        }
        validate_relpath(&parts.join("/"))
    }

    /// Runs `f` as one transaction: if it fails, every node, actual, lock
    /// and pristine-index change it made is rolled back.
    ///
    /// Transactions nest. Files written to disk by `f` are not rolled back;
    /// defer those with [`WorkItem`]s and run them after the transaction
    /// commits.
    pub fn with_txn<T, F>(&mut self, f: F) -> Result<T, WcError>
    where
        F: FnOnce(&mut Self) -> Result<T, WcError>,
    {
        self.conn.execute_batch("SAVEPOINT wc_txn")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE wc_txn")?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back working-copy transaction");
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK TO wc_txn; RELEASE wc_txn") {
                    warn!(error = %rollback, "working-copy rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Returns a fresh relpath for a temporary file under the admin area.
    pub(crate) fn tmp_relpath(&self) -> String {
        let id = NEXT_TMP_ID.fetch_add(1, Ordering::Relaxed);
        format!("{ADM_DIR}/tmp/tmp-{}-{id}", std::process::id())
    }

    // ---- NODES rows ----

    fn layers(&self, relpath: &str) -> Result<Option<Layers>, WcError> {
        let mut stmt = self.conn.prepare_cached(SELECT_LAYERS)?;
        let stored = stmt
            .query_map(params![relpath], StoredNode::read)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut layers = Layers::new();
        for node in stored {
            let (op_depth, row) = node.decode(relpath)?;
            layers.insert(op_depth, row);
        }
        Ok((!layers.is_empty()).then_some(layers))
    }

    fn effective_row(&self, relpath: &str) -> Result<Option<(u32, NodeRow)>, WcError> {
        Ok(self.layers(relpath)?.and_then(|mut layers| layers.pop_last()))
    }

    fn base_row(&self, relpath: &str) -> Result<Option<NodeRow>, WcError> {
        Ok(self.layers(relpath)?.and_then(|mut layers| layers.remove(&0)))
    }

    fn write_row(&self, relpath: &str, op_depth: u32, row: &NodeRow) -> Result<(), WcError> {
        self.conn.prepare_cached(INSERT_NODE)?.execute(params![
            relpath,
            op_depth,
            parent_relpath(relpath),
            row.presence.as_str(),
            row.kind.as_str(),
            revnum_to_sql(row.revision)?,
            row.repos_relpath,
            row.checksum.as_ref().map(ToString::to_string),
            revnum_to_sql(row.changed_rev)?,
            row.changed_date,
            row.changed_author,
            row.depth.as_word(),
            props_to_sql(row.props.as_ref())?,
            row.moved_here,
            row.moved_to,
        ])?;
        Ok(())
    }

    /// Replaces every row of `relpath` with `layers`.
    fn store_layers(&self, relpath: &str, layers: &Layers) -> Result<(), WcError> {
        self.conn
            .prepare_cached("DELETE FROM nodes WHERE local_relpath = ?1")?
            .execute(params![relpath])?;
        for (op_depth, row) in layers {
            self.write_row(relpath, *op_depth, row)?;
        }
        Ok(())
    }

    /// Returns the relpaths with node rows strictly below `relpath`, in
    /// path order.
    fn node_descendants(&self, relpath: &str) -> Result<Vec<String>, WcError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT local_relpath FROM nodes \
             WHERE (?1 = '' AND local_relpath <> '') \
                OR (local_relpath > ?1 || '/' AND local_relpath < ?1 || '0') \
             ORDER BY local_relpath",
        )?;
        let paths = stmt
            .query_map(params![relpath], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    fn node_children(&self, relpath: &str) -> Result<Vec<String>, WcError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT local_relpath FROM nodes WHERE parent_relpath = ?1 \
             ORDER BY local_relpath",
        )?;
        let paths = stmt
            .query_map(params![relpath], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    /// Returns the names of all children with any node layer.
    pub fn read_children(&self, relpath: &str) -> Result<Vec<String>, WcError> {
        let relpath = validate_relpath(relpath)?;
        Ok(self
            .node_children(&relpath)?
            .iter()
            .map(|k| relpath_basename(k).to_string())
            .collect())
    }

    // ---- ACTUAL ----

    fn read_actual(&self, relpath: &str) -> Result<Option<ActualRow>, WcError> {
        let stored = self
            .conn
            .prepare_cached(
                "SELECT properties, changelist, conflict_data FROM actual_node \
                 WHERE local_relpath = ?1",
            )?
            .query_row(params![relpath], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .optional()?;
        let Some((props, changelist, conflict)) = stored else {
            return Ok(None);
        };
        Ok(Some(ActualRow {
            props: props_from_sql(props)?,
            changelist,
            conflict: conflict.as_deref().map(serde_json::from_str).transpose()?,
        }))
    }

    /// Stores `actual`, dropping the row once it holds nothing.
    fn write_actual(&self, relpath: &str, actual: &ActualRow) -> Result<(), WcError> {
        if actual.is_empty() {
            self.conn
                .prepare_cached("DELETE FROM actual_node WHERE local_relpath = ?1")?
                .execute(params![relpath])?;
            return Ok(());
        }
        let conflict = actual
            .conflict
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO actual_node \
                 (local_relpath, parent_relpath, properties, changelist, conflict_data) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                relpath,
                parent_relpath(relpath),
                props_to_sql(actual.props.as_ref())?,
                actual.changelist,
                conflict,
            ])?;
        Ok(())
    }

    fn require_real(&self, relpath: &str) -> Result<(u32, NodeRow), WcError> {
        match self.effective_row(relpath)? {
            Some((depth, row)) if row.presence.is_real() => Ok((depth, row)),
            _ => Err(WcError::NotUnderVersionControl(relpath.to_string())),
        }
    }

    /// Returns the pristine properties of the effective node.
    pub fn read_pristine_props(&self, relpath: &str) -> Result<PropertyList, WcError> {
        let relpath = validate_relpath(relpath)?;
        let (_, row) = self.require_real(&relpath)?;
        Ok(row.props.unwrap_or_default())
    }

    /// Returns the actual (possibly locally modified) properties.
    pub fn read_props(&self, relpath: &str) -> Result<PropertyList, WcError> {
        let relpath = validate_relpath(relpath)?;
        if let Some(props) = self.read_actual(&relpath)?.and_then(|a| a.props) {
            return Ok(props);
        }
        self.read_pristine_props(&relpath)
    }

    /// Sets the actual properties of a node.
    pub fn set_props(&mut self, relpath: &str, props: PropertyList) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        let pristine = self.read_pristine_props(&relpath)?;
        let mut actual = self.read_actual(&relpath)?.unwrap_or_default();
        actual.props = (props != pristine).then_some(props);
        self.write_actual(&relpath, &actual)
    }

    /// Returns `true` when the actual properties differ from the pristine
    /// ones.
    pub fn props_modified(&self, relpath: &str) -> Result<bool, WcError> {
        let relpath = validate_relpath(relpath)?;
        let Some(actual) = self.read_actual(&relpath)?.and_then(|a| a.props) else {
            return Ok(false);
        };
        Ok(actual != self.read_pristine_props(&relpath)?)
    }

    /// Adds a node to (or, with `None`, removes it from) a changelist.
    pub fn set_changelist(&mut self, relpath: &str, changelist: Option<&str>) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        self.require_real(&relpath)?;
        let mut actual = self.read_actual(&relpath)?.unwrap_or_default();
        actual.changelist = changelist.map(str::to_string);
        self.write_actual(&relpath, &actual)
    }

    /// Returns the node's changelist, if any.
    pub fn changelist(&self, relpath: &str) -> Result<Option<String>, WcError> {
        let relpath = validate_relpath(relpath)?;
        Ok(self.read_actual(&relpath)?.and_then(|a| a.changelist))
    }

    /// Records a conflict on `relpath`, merging it into an existing record.
    ///
    /// The victim does not need to be versioned, but its parent must be.
    pub fn mark_conflict(&mut self, relpath: &str, skel: ConflictSkel) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        if !relpath.is_empty() && self.layers(relpath_dirname(&relpath))?.is_none() {
            return Err(WcError::NotUnderVersionControl(
                relpath_dirname(&relpath).to_string(),
            ));
        }
        debug!(path = %relpath, "recording conflict");
        let mut actual = self.read_actual(&relpath)?.unwrap_or_default();
        match &mut actual.conflict {
            Some(existing) => existing.merge_from(skel),
            None => actual.conflict = Some(skel),
        }
        self.write_actual(&relpath, &actual)
    }

    /// Returns the conflict recorded for `relpath`, if any.
    pub fn read_conflict(&self, relpath: &str) -> Result<Option<ConflictSkel>, WcError> {
        let relpath = validate_relpath(relpath)?;
        Ok(self.read_actual(&relpath)?.and_then(|a| a.conflict))
    }

    /// Returns the relpaths of tree-conflict victims directly below `relpath`.
    pub fn tree_conflicted_children(&self, relpath: &str) -> Result<Vec<String>, WcError> {
        let relpath = validate_relpath(relpath)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT local_relpath, conflict_data FROM actual_node \
             WHERE parent_relpath = ?1 AND conflict_data IS NOT NULL \
             ORDER BY local_relpath",
        )?;
        let stored = stmt
            .query_map(params![relpath], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut victims = Vec::new();
        for (child, conflict) in stored {
            let skel: ConflictSkel = serde_json::from_str(&conflict)?;
            if skel.tree_conflict().is_some() {
                victims.push(child);
            }
        }
        Ok(victims)
    }

    /// Removes the selected conflict kinds from `relpath`.
    ///
    /// Returns work items that delete the marker files of the removed
    /// conflicts. Once no marker is left the conflict record is dropped.
    pub fn mark_resolved(
        &mut self,
        relpath: &str,
        text: bool,
        props: bool,
        tree: bool,
    ) -> Result<Vec<WorkItem>, WcError> {
        use crate::conflict::ConflictMarker;

        let relpath = validate_relpath(relpath)?;
        let Some(mut actual) = self.read_actual(&relpath)? else {
            return Ok(Vec::new());
        };
        let Some(skel) = actual.conflict.as_mut() else {
            return Ok(Vec::new());
        };

        let mut removed = ConflictSkel::new();
        skel.markers.retain(|marker| {
            let resolve = match marker {
                ConflictMarker::Text { .. } => text,
                ConflictMarker::Prop { .. } => props,
                ConflictMarker::Tree { .. } => tree,
            };
            if resolve {
                removed.markers.push(marker.clone());
            }
            !resolve
        });
        if skel.markers.is_empty() {
            actual.conflict = None;
        }
        self.write_actual(&relpath, &actual)?;

        debug!(path = %relpath, resolved = removed.markers.len(), "marked conflict resolved");
        Ok(removed
            .marker_files()
            .into_iter()
            .map(|path| WorkItem::FileRemove { path })
            .collect())
    }

    // ---- locks ----

    /// Records a lock token for the BASE node at `relpath`.
    pub fn lock_add(&mut self, relpath: &str, token: &str) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        let repos_relpath = self
            .base_row(&relpath)?
            .and_then(|row| row.repos_relpath)
            .ok_or_else(|| WcError::PathNotFound(relpath.clone()))?;
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO lock (repos_relpath, lock_token) VALUES (?1, ?2)")?
            .execute(params![repos_relpath, token])?;
        Ok(())
    }

    /// Removes the lock token recorded for the BASE node at `relpath`.
    pub fn lock_remove(&mut self, relpath: &str) -> Result<(), WcError> {
        let relpath = validate_relpath(relpath)?;
        if let Some(repos_relpath) = self.base_row(&relpath)?.and_then(|row| row.repos_relpath) {
            self.conn
                .prepare_cached("DELETE FROM lock WHERE repos_relpath = ?1")?
                .execute(params![repos_relpath])?;
        }
        Ok(())
    }

    /// Returns the lock token of the BASE node at `relpath`, if any.
    pub fn lock_token(&self, relpath: &str) -> Result<Option<String>, WcError> {
        let relpath = validate_relpath(relpath)?;
        self.base_lock_token(&relpath)
    }

    fn base_lock_token(&self, relpath: &str) -> Result<Option<String>, WcError> {
        let Some(repos_relpath) = self.base_row(relpath)?.and_then(|row| row.repos_relpath) else {
            return Ok(None);
        };
        Ok(self
            .conn
            .prepare_cached("SELECT lock_token FROM lock WHERE repos_relpath = ?1")?
            .query_row(params![repos_relpath], |row| row.get(0))
            .optional()?)
    }
}
