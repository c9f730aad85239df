//! Commit-candidate harvesting.
//!
//! The harvester walks commit targets through the entry view of the store
//! and produces one [`CommitItem`] per node that has something to commit.
//! It refuses to commit through conflicts, detects nested copies that need
//! an explicit add-with-history, and collects the lock tokens a commit must
//! carry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Read};

use tracing::{debug, trace};

use crate::commit::{CommitItem, CommitItemFlags, Committables};
use crate::path::{relpath_basename, relpath_dirname, validate_relpath};
use crate::url::{canonicalize_url, url_join};
use crate::wc_db::{Entry, Schedule, WcDb};
use crate::{Context, Depth, HarvestOptions, NodeKind, PROP_SPECIAL, PropertyList, WcError};

/// Collects the commit items for `targets`.
///
/// An empty target list harvests the whole working copy.
///
/// # Errors
///
/// - [`WcError::NotUnderVersionControl`] if a target has no entry.
/// - [`WcError::TreeConflict`] / [`WcError::Conflict`] if a target, an
///   in-scope descendant or an ancestor is conflicted.
/// - [`WcError::UnknownNodeKind`] / [`WcError::UnexpectedKind`] if the
///   working file no longer matches its recorded kind.
/// - [`WcError::IllegalTarget`] if a target is part of an added tree whose
///   root is not committed with it.
pub fn harvest_committables(
    db: &WcDb,
    targets: &[&str],
    opts: &HarvestOptions,
    ctx: &Context,
) -> Result<Committables, WcError> {
    let targets: Vec<String> = if targets.is_empty() {
        vec![String::new()]
    } else {
        targets
            .iter()
            .map(|t| validate_relpath(t))
            .collect::<Result<_, _>>()?
    };

    let mut harvester = Harvester::new(db, opts, ctx, true);
    let mut danglers: BTreeMap<String, String> = BTreeMap::new();

    for target in &targets {
        bail_on_tree_conflicted_ancestor(db, target)?;

        let entry = db
            .read_entry(target)?
            .ok_or_else(|| WcError::NotUnderVersionControl(target.clone()))?;
        let url = entry
            .url
            .clone()
            .ok_or_else(|| WcError::Corrupt(format!("entry for '{target}' has no URL")))?;

        if matches!(entry.schedule, Schedule::Add | Schedule::Replace) && !target.is_empty() {
            let parent = relpath_dirname(target);
            let parent_entry = db.read_entry(parent)?.ok_or_else(|| {
                WcError::NotUnderVersionControl(format!(
                    "'{target}' is scheduled for addition within unversioned parent"
                ))
            })?;
            if matches!(parent_entry.schedule, Schedule::Add | Schedule::Replace) {
                danglers.insert(parent.to_string(), target.clone());
            }
        }

        if entry.copied && entry.schedule == Schedule::Normal {
            return Err(WcError::IllegalTarget(format!(
                "entry for '{target}' is marked as copied but is not itself scheduled for \
                 addition; is the target inside an unversioned directory?"
            )));
        }

        harvester.visit(Visit {
            relpath: target,
            entry: &entry,
            parent: None,
            url,
            copyfrom_url: None,
            adds_only: false,
            copy_mode: false,
            depth: opts.depth,
        })?;
    }

    for (parent, child) in &danglers {
        if !harvester.harvested.contains(parent) {
            return Err(WcError::IllegalTarget(format!(
                "'{parent}' is not under version control and is not part of the commit, \
                 yet its child '{child}' is part of the commit"
            )));
        }
    }

    debug!(
        items = harvester.committables.items.len(),
        lock_tokens = harvester.committables.lock_tokens.len(),
        "harvested committables"
    );
    Ok(harvester.committables)
}

/// Collects the commit items that copy the working-copy subtree `src` to
/// the repository URL `dst_url`.
///
/// The root becomes an add with history from its own URL. Children at a
/// different revision than their parent become explicit adds with history;
/// not-present children become deletes.
pub fn harvest_copy_committables(
    db: &WcDb,
    src: &str,
    dst_url: &str,
    ctx: &Context,
) -> Result<Committables, WcError> {
    let src = validate_relpath(src)?;
    let dst_url = canonicalize_url(dst_url)?;
    let entry = db
        .read_entry(&src)?
        .ok_or_else(|| WcError::NotUnderVersionControl(src.clone()))?;

    let opts = HarvestOptions::new(Depth::Infinity);
    let mut harvester = Harvester::new(db, &opts, ctx, false);
    harvester.visit(Visit {
        relpath: &src,
        entry: &entry,
        parent: None,
        url: dst_url,
        copyfrom_url: entry.url.clone(),
        adds_only: false,
        copy_mode: true,
        depth: Depth::Infinity,
    })?;
    Ok(harvester.committables)
}

/// Fails if a proper ancestor of `target` is a tree-conflict victim.
fn bail_on_tree_conflicted_ancestor(db: &WcDb, target: &str) -> Result<(), WcError> {
    let mut current = target;
    while !current.is_empty() {
        current = relpath_dirname(current);
        let tree_conflicted = db
            .read_conflict(current)?
            .is_some_and(|skel| skel.tree_conflict().is_some());
        if tree_conflicted {
            return Err(WcError::TreeConflict(format!(
                "'{target}' is inside tree-conflicted '{current}'"
            )));
        }
    }
    Ok(())
}

/// Per-node walk state.
struct Visit<'e> {
    relpath: &'e str,
    entry: &'e Entry,
    parent: Option<&'e Entry>,
    /// URL the node will have after the commit.
    url: String,
    /// Copy source URL telescoped down from the nearest copied ancestor.
    copyfrom_url: Option<String>,
    adds_only: bool,
    copy_mode: bool,
    depth: Depth,
}

struct Harvester<'a> {
    db: &'a WcDb,
    opts: &'a HarvestOptions,
    ctx: &'a Context,
    collect_locks: bool,
    committables: Committables,
    harvested: BTreeSet<String>,
}

impl<'a> Harvester<'a> {
    fn new(db: &'a WcDb, opts: &'a HarvestOptions, ctx: &'a Context, collect_locks: bool) -> Self {
        Self {
            db,
            opts,
            ctx,
            collect_locks,
            committables: Committables::default(),
            harvested: BTreeSet::new(),
        }
    }

    fn add_committable(&mut self, item: CommitItem) {
        debug!(path = %item.path, url = %item.url, flags = ?item.state_flags, "commit item");
        self.harvested.insert(item.path.clone());
        self.committables.items.push(item);
    }

    fn visit(&mut self, visit: Visit<'_>) -> Result<(), WcError> {
        let Visit {
            relpath,
            entry,
            parent,
            mut url,
            copyfrom_url,
            mut adds_only,
            copy_mode,
            depth,
        } = visit;

        if self.harvested.contains(relpath) {
            return Ok(());
        }
        self.ctx.check_cancelled()?;

        let in_changelist = self.opts.changelist_matches(entry.changelist.as_deref());
        if entry.tree_conflicted && in_changelist {
            return Err(WcError::TreeConflict(relpath.to_string()));
        }
        if (entry.text_conflicted || entry.prop_conflicted) && in_changelist {
            return Err(WcError::Conflict(relpath.to_string()));
        }

        if !matches!(entry.kind, NodeKind::File | NodeKind::Dir | NodeKind::Symlink) {
            return Err(WcError::UnknownNodeKind(relpath.to_string()));
        }
        let (disk_kind, is_special) = disk_kind(self.db, relpath)?;
        if disk_kind == NodeKind::Unknown {
            return Err(WcError::UnknownNodeKind(relpath.to_string()));
        }
        let entry_special = entry.kind == NodeKind::Symlink
            || self.working_props(relpath)?.contains_key(PROP_SPECIAL);
        let special_changed =
            (!entry_special && is_special) || (cfg!(unix) && entry_special && !is_special);
        if special_changed && disk_kind != NodeKind::None {
            return Err(WcError::UnexpectedKind(relpath.to_string()));
        }

        if !copy_mode {
            if let Some(own_url) = &entry.url {
                url.clone_from(own_url);
            }
        }

        let mut flags = CommitItemFlags::empty();
        let mut cf_url = None;
        let mut cf_rev = None;

        let tombstone = entry.deleted && entry.schedule == Schedule::Normal;
        if !adds_only
            && (tombstone || matches!(entry.schedule, Schedule::Delete | Schedule::Replace))
        {
            flags |= CommitItemFlags::DELETE;
        }

        if matches!(entry.schedule, Schedule::Add | Schedule::Replace) {
            flags |= CommitItemFlags::ADD;
            if let Some(from) = &entry.copyfrom_url {
                flags |= CommitItemFlags::IS_COPY;
                cf_url = Some(from.clone());
                cf_rev = entry.copyfrom_rev;
                adds_only = false;
            } else {
                adds_only = true;
            }
        }

        if (entry.copied || copy_mode) && !entry.deleted && entry.schedule == Schedule::Normal {
            let revision_differs = match parent {
                Some(parent) => entry.revision != parent.revision,
                None if copy_mode => true,
                None => {
                    return Err(WcError::Corrupt(format!(
                        "did not expect '{relpath}' to be a working copy root"
                    )));
                }
            };
            if revision_differs {
                flags |= CommitItemFlags::ADD | CommitItemFlags::IS_COPY;
                adds_only = false;
                cf_rev = entry.revision;
                cf_url = if copy_mode {
                    entry.url.clone()
                } else {
                    copyfrom_url.clone()
                };
                if cf_url.is_none() {
                    return Err(WcError::InvalidUrl(format!(
                        "commit item '{relpath}' has copy flag but no copyfrom URL"
                    )));
                }
            }
        }

        let mut text_mod = false;
        let mut prop_mod = false;
        if flags.contains(CommitItemFlags::ADD) {
            if disk_kind == NodeKind::None {
                return Err(WcError::PathNotFound(format!(
                    "'{relpath}' is scheduled for addition, but is missing"
                )));
            }
            if entry.kind.is_file_like() {
                text_mod = !flags.contains(CommitItemFlags::IS_COPY)
                    || self.text_modified(relpath)?;
            }
            prop_mod = self.db.props_modified(relpath)?;
        } else if !flags.contains(CommitItemFlags::DELETE) {
            if entry.kind.is_file_like() {
                text_mod = self.text_modified(relpath)?;
            }
            prop_mod = self.db.props_modified(relpath)?;
        }
        if text_mod {
            flags |= CommitItemFlags::TEXT_MODS;
        }
        if prop_mod {
            flags |= CommitItemFlags::PROP_MODS;
        }

        let lock_token = if self.collect_locks {
            entry.lock_token.clone()
        } else {
            None
        };
        if lock_token.is_some() && (!flags.is_empty() || self.opts.just_locked) {
            flags |= CommitItemFlags::LOCK_TOKEN;
        }

        trace!(path = %relpath, flags = ?flags, in_changelist, "classified node");
        if !flags.is_empty() && in_changelist {
            let revision = if tombstone { None } else { entry.revision };
            if let Some(token) = lock_token.filter(|_| flags.contains(CommitItemFlags::LOCK_TOKEN)) {
                self.committables.lock_tokens.insert(url.clone(), token);
            }
            self.add_committable(CommitItem {
                path: relpath.to_string(),
                kind: entry.kind,
                url: url.clone(),
                revision,
                copyfrom_url: cf_url.clone(),
                copyfrom_rev: cf_rev,
                state_flags: flags,
            });
        }

        let recurse = entry.kind == NodeKind::Dir
            && depth > Depth::Empty
            && (!flags.contains(CommitItemFlags::DELETE) || flags.contains(CommitItemFlags::ADD));
        if recurse {
            self.bail_on_tree_conflicted_children(relpath, depth)?;
            let telescoped = cf_url.or(copyfrom_url);
            self.visit_children(
                relpath,
                entry,
                &url,
                telescoped.as_deref(),
                adds_only,
                copy_mode,
                depth,
            )?;
        }

        if self.collect_locks
            && entry.kind == NodeKind::Dir
            && flags.contains(CommitItemFlags::DELETE)
        {
            self.collect_lock_tokens_below(relpath)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_children(
        &mut self,
        relpath: &str,
        entry: &Entry,
        url: &str,
        copyfrom_url: Option<&str>,
        adds_only: bool,
        copy_mode: bool,
        depth: Depth,
    ) -> Result<(), WcError> {
        let show_hidden = copy_mode || entry.copied;
        for (child_relpath, child) in self.db.read_entry_children(relpath)? {
            if child.depth == Depth::Exclude || (child.is_hidden() && !show_hidden) {
                continue;
            }
            let name = relpath_basename(&child_relpath);
            let child_cf_url = copyfrom_url.map(|cf| url_join(cf, name));
            let used_url = match (&child.url, copy_mode) {
                (Some(own), false) => own.clone(),
                _ => url_join(url, name),
            };

            if child.kind == NodeKind::Dir {
                if depth <= Depth::Files {
                    continue;
                }
                let (child_disk, _) = disk_kind(self.db, &child_relpath)?;
                if child_disk == NodeKind::None && child.schedule == Schedule::Delete {
                    if self.opts.changelist_matches(entry.changelist.as_deref())
                        && !self.harvested.contains(&child_relpath)
                    {
                        self.add_committable(CommitItem {
                            path: child_relpath.clone(),
                            kind: child.kind,
                            url: used_url,
                            revision: None,
                            copyfrom_url: None,
                            copyfrom_rev: None,
                            state_flags: CommitItemFlags::DELETE,
                        });
                    }
                    continue;
                }
            }

            self.visit(Visit {
                relpath: &child_relpath,
                entry: &child,
                parent: Some(entry),
                url: used_url,
                copyfrom_url: child_cf_url,
                adds_only,
                copy_mode,
                depth: depth.below(),
            })?;
        }
        Ok(())
    }

    /// Fails if a tree-conflict victim directly below `relpath` is within
    /// `depth` and the changelist filter.
    fn bail_on_tree_conflicted_children(&self, relpath: &str, depth: Depth) -> Result<(), WcError> {
        for victim in self.db.tree_conflicted_children(relpath)? {
            let entry = self.db.read_entry(&victim)?;
            let kind = match &entry {
                Some(entry) => entry.kind,
                None => self
                    .db
                    .read_conflict(&victim)?
                    .and_then(|skel| skel.operation)
                    .and_then(|op| op.locations.into_iter().next())
                    .map_or(NodeKind::Unknown, |loc| loc.node_kind),
            };
            if kind == NodeKind::Dir && depth == Depth::Files {
                continue;
            }
            let changelist = entry.as_ref().and_then(|e| e.changelist.as_deref());
            if !self.opts.changelist_matches(changelist) {
                continue;
            }
            return Err(WcError::TreeConflict(victim));
        }
        Ok(())
    }

    fn collect_lock_tokens_below(&mut self, relpath: &str) -> Result<(), WcError> {
        let lock_tokens = &mut self.committables.lock_tokens;
        self.db
            .walk_entries(relpath, Depth::Infinity, false, self.ctx, &mut |path, entry| {
                if let (Some(token), Some(url)) = (&entry.lock_token, &entry.url) {
                    trace!(path = %path, "lock token below deleted directory");
                    lock_tokens.insert(url.clone(), token.clone());
                }
                Ok(())
            })
    }

    fn working_props(&self, relpath: &str) -> Result<PropertyList, WcError> {
        match self.db.read_props(relpath) {
            Ok(props) => Ok(props),
            Err(WcError::NotUnderVersionControl(_)) => Ok(PropertyList::new()),
            Err(err) => Err(err),
        }
    }

    /// Compares the working file byte-for-byte with its pristine text.
    fn text_modified(&self, relpath: &str) -> Result<bool, WcError> {
        let info = self.db.read_info(relpath)?;
        let Some(checksum) = info.checksum else {
            return Ok(true);
        };
        let Some(working) = read_working_text(self.db, relpath)? else {
            return Ok(false);
        };
        let mut pristine = Vec::new();
        self.db.pristine_read(&checksum)?.read_to_end(&mut pristine)?;
        Ok(working != pristine)
    }
}

/// Returns the on-disk kind of `relpath` and whether it is a symlink.
/// Symlinks report [`NodeKind::File`].
fn disk_kind(db: &WcDb, relpath: &str) -> Result<(NodeKind, bool), WcError> {
    match fs::symlink_metadata(db.abspath(relpath)) {
        Ok(meta) => {
            let file_type = meta.file_type();
            Ok(if file_type.is_symlink() {
                (NodeKind::File, true)
            } else if file_type.is_file() {
                (NodeKind::File, false)
            } else if file_type.is_dir() {
                (NodeKind::Dir, false)
            } else {
                (NodeKind::Unknown, false)
            })
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok((NodeKind::None, false)),
        Err(err) => Err(err.into()),
    }
}

/// Reads the working text of a file; a symlink reads as `link <target>`.
pub(crate) fn read_working_text(db: &WcDb, relpath: &str) -> Result<Option<Vec<u8>>, WcError> {
    let path = db.abspath(relpath);
    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if meta.file_type().is_symlink() {
        let target = fs::read_link(&path)?;
        return Ok(Some(
            format!("link {}", target.to_string_lossy()).into_bytes(),
        ));
    }
    Ok(Some(fs::read(&path)?))
}
