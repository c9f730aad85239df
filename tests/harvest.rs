#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::Path;

use svn_wc::{
    BaseNode, CommitItemFlags, ConflictAction, ConflictReason, ConflictSkel, ConflictVersion,
    Context, Depth, HarvestOptions, NodeKind, PropertyList, WcDb, WcError, condense_commit_items,
    harvest_committables, harvest_copy_committables,
};

const ROOT_URL: &str = "svn://example.com/repo";

struct Wc {
    temp: tempfile::TempDir,
    db: WcDb,
}

impl Wc {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let db = WcDb::create(temp.path(), ROOT_URL, "uuid", "trunk", 1).unwrap();
        Self { temp, db }
    }

    fn path(&self, relpath: &str) -> std::path::PathBuf {
        self.temp.path().join(relpath)
    }

    fn dir(&mut self, relpath: &str, revision: u64) {
        self.db
            .base_add_node(relpath, BaseNode::dir(format!("trunk/{relpath}"), revision))
            .unwrap();
        fs::create_dir_all(self.path(relpath)).unwrap();
    }

    fn file(&mut self, relpath: &str, revision: u64, text: &str) {
        let sum = self.db.pristine_install(text.as_bytes()).unwrap();
        self.db
            .base_add_node(relpath, BaseNode::file(format!("trunk/{relpath}"), revision, sum))
            .unwrap();
        write(&self.path(relpath), text);
    }

    fn harvest(&self, targets: &[&str], opts: &HarvestOptions) -> Result<svn_wc::Committables, WcError> {
        harvest_committables(&self.db, targets, opts, &Context::new())
    }
}

fn write(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

fn tree_conflict(kind: NodeKind) -> ConflictSkel {
    let mut skel = ConflictSkel::new();
    skel.set_op_update(ConflictVersion::new(ROOT_URL, "uuid", "trunk/x", 1, kind), None)
        .add_tree_conflict(ConflictReason::Edited, ConflictAction::Deleted, None);
    skel
}

#[test]
fn added_child_without_its_added_parent_is_an_illegal_target() {
    let mut wc = Wc::new();
    wc.db.op_add_directory("N").unwrap();
    wc.db.op_add_file("N/f").unwrap();
    write(&wc.path("N/f"), "new\n");

    let err = wc.harvest(&["N/f"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::IllegalTarget(_)));

    let found = wc.harvest(&["N", "N/f"], &HarvestOptions::default()).unwrap();
    assert_eq!(found.items.len(), 2);
    assert_eq!(found.get("N").unwrap().state_flags, CommitItemFlags::ADD);
    assert_eq!(
        found.get("N/f").unwrap().state_flags,
        CommitItemFlags::ADD | CommitItemFlags::TEXT_MODS
    );
    assert_eq!(found.get("N/f").unwrap().revision, None);
}

#[test]
fn tree_conflicted_child_blocks_commit_unless_excluded() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.file("A/x", 1, "x\n");
    wc.dir("A/D", 1);
    wc.db.mark_conflict("A/x", tree_conflict(NodeKind::File)).unwrap();

    let err = wc.harvest(&["A"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::TreeConflict(victim) if victim == "A/x"));

    wc.harvest(&["A"], &HarvestOptions::new(Depth::Empty)).unwrap();
    wc.harvest(&["A"], &HarvestOptions::default().with_changelist("other"))
        .unwrap();

    wc.db.set_changelist("A/x", Some("fix")).unwrap();
    let err = wc
        .harvest(&["A"], &HarvestOptions::default().with_changelist("fix"))
        .unwrap_err();
    assert!(matches!(err, WcError::TreeConflict(_)));
}

#[test]
fn tree_conflicted_subdirectory_is_outside_files_depth() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.dir("A/D", 1);
    wc.db.mark_conflict("A/D", tree_conflict(NodeKind::Dir)).unwrap();

    wc.harvest(&["A"], &HarvestOptions::new(Depth::Files)).unwrap();
    let err = wc
        .harvest(&["A"], &HarvestOptions::new(Depth::Immediates))
        .unwrap_err();
    assert!(matches!(err, WcError::TreeConflict(_)));
}

#[test]
fn target_inside_tree_conflicted_ancestor_is_rejected() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.file("A/f", 1, "f\n");
    wc.db.mark_conflict("A", tree_conflict(NodeKind::Dir)).unwrap();

    let err = wc.harvest(&["A/f"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::TreeConflict(_)));
}

#[test]
fn text_conflict_blocks_commit() {
    let mut wc = Wc::new();
    wc.file("f", 1, "f\n");
    let mut skel = ConflictSkel::new();
    skel.set_op_update(ConflictVersion::new(ROOT_URL, "uuid", "trunk/f", 1, NodeKind::File), None)
        .add_text_conflict(Some("f.r1".into()), Some("f.mine".into()), None);
    wc.db.mark_conflict("f", skel).unwrap();

    let err = wc.harvest(&["f"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::Conflict(_)));
}

#[test]
fn mixed_revision_child_of_copy_is_added_with_history() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.dir("A/B", 2);
    wc.file("A/f", 1, "f\n");
    wc.db.op_copy("A", "C").unwrap();
    write(&wc.path("C/f"), "f\n");
    fs::create_dir_all(wc.path("C/B")).unwrap();

    let found = wc.harvest(&["C"], &HarvestOptions::default()).unwrap();

    let root = found.get("C").unwrap();
    assert_eq!(root.state_flags, CommitItemFlags::ADD | CommitItemFlags::IS_COPY);
    assert_eq!(root.copyfrom_url.as_deref(), Some("svn://example.com/repo/trunk/A"));
    assert_eq!(root.copyfrom_rev, Some(1));

    let child = found.get("C/B").unwrap();
    assert_eq!(child.state_flags, CommitItemFlags::ADD | CommitItemFlags::IS_COPY);
    assert_eq!(child.copyfrom_rev, Some(2));
    assert_eq!(
        child.copyfrom_url.as_deref(),
        Some("svn://example.com/repo/trunk/A/B")
    );
    assert!(found.get("C/f").is_none());
}

#[test]
fn copied_child_is_not_a_target_of_its_own() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.file("A/f", 1, "f\n");
    wc.db.op_copy("A", "C").unwrap();
    write(&wc.path("C/f"), "f\n");

    let err = wc.harvest(&["C/f"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::IllegalTarget(_)));
}

#[test]
fn copy_mode_turns_not_present_children_into_deletes() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.file("A/f", 1, "f\n");
    wc.db
        .base_add_node("A/gone", BaseNode::not_present(NodeKind::File, "trunk/A/gone", 1))
        .unwrap();

    let found = harvest_copy_committables(
        &wc.db,
        "A",
        "svn://example.com/repo/branches/A",
        &Context::new(),
    )
    .unwrap();

    let root = found.get("A").unwrap();
    assert_eq!(root.state_flags, CommitItemFlags::ADD | CommitItemFlags::IS_COPY);
    assert_eq!(root.url, "svn://example.com/repo/branches/A");
    assert_eq!(root.copyfrom_url.as_deref(), Some("svn://example.com/repo/trunk/A"));

    let tomb = found.get("A/gone").unwrap();
    assert_eq!(tomb.state_flags, CommitItemFlags::DELETE);
    assert_eq!(tomb.revision, None);
    assert_eq!(tomb.url, "svn://example.com/repo/branches/A/gone");
    assert!(found.get("A/f").is_none());
    assert!(found.lock_tokens.is_empty());
}

#[test]
fn deleted_directory_releases_every_lock_below_it() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.dir("A/B", 1);
    wc.file("A/B/f", 1, "f\n");
    wc.db.lock_add("A/B/f", "opaquelocktoken:f").unwrap();
    wc.db.op_delete("A/B").unwrap();

    let found = wc.harvest(&["A"], &HarvestOptions::default()).unwrap();
    assert_eq!(found.items.len(), 1);
    let item = found.get("A/B").unwrap();
    assert_eq!(item.state_flags, CommitItemFlags::DELETE);
    assert_eq!(item.revision, Some(1));
    assert_eq!(
        found
            .lock_tokens
            .get("svn://example.com/repo/trunk/A/B/f")
            .map(String::as_str),
        Some("opaquelocktoken:f")
    );
}

#[test]
fn missing_deleted_directory_gets_a_delete_without_recursion() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.dir("A/B", 1);
    wc.file("A/B/f", 1, "f\n");
    wc.db.op_delete("A/B").unwrap();
    fs::remove_dir_all(wc.path("A/B")).unwrap();

    let found = wc.harvest(&["A"], &HarvestOptions::default()).unwrap();
    assert_eq!(found.items.len(), 1);
    let item = found.get("A/B").unwrap();
    assert_eq!(item.state_flags, CommitItemFlags::DELETE);
    assert_eq!(item.revision, None);
}

#[test]
fn locked_files_follow_just_locked() {
    let mut wc = Wc::new();
    wc.file("f", 1, "f\n");
    wc.db.lock_add("f", "opaquelocktoken:1").unwrap();

    let found = wc.harvest(&["f"], &HarvestOptions::default()).unwrap();
    assert!(found.is_empty());

    let found = wc
        .harvest(&["f"], &HarvestOptions::default().with_just_locked())
        .unwrap();
    assert_eq!(found.get("f").unwrap().state_flags, CommitItemFlags::LOCK_TOKEN);
    assert_eq!(found.lock_tokens.len(), 1);

    write(&wc.path("f"), "changed\n");
    let found = wc.harvest(&["f"], &HarvestOptions::default()).unwrap();
    assert_eq!(
        found.get("f").unwrap().state_flags,
        CommitItemFlags::TEXT_MODS | CommitItemFlags::LOCK_TOKEN
    );
}

#[test]
fn changelist_filter_selects_members() {
    let mut wc = Wc::new();
    wc.file("f", 1, "f\n");
    wc.file("g", 1, "g\n");
    write(&wc.path("f"), "f2\n");
    write(&wc.path("g"), "g2\n");
    wc.db.set_changelist("g", Some("fix")).unwrap();

    let found = wc
        .harvest(&[], &HarvestOptions::default().with_changelist("fix"))
        .unwrap();
    assert_eq!(found.items.len(), 1);
    assert!(found.get("g").is_some());
}

#[test]
fn property_edits_and_depth_limits() {
    let mut wc = Wc::new();
    wc.dir("A", 1);
    wc.dir("A/B", 1);
    wc.file("A/B/f", 1, "f\n");
    write(&wc.path("A/B/f"), "changed\n");
    let mut props = PropertyList::new();
    props.insert("color".into(), b"blue".to_vec());
    wc.db.set_props("A", props).unwrap();

    let found = wc.harvest(&["A"], &HarvestOptions::new(Depth::Immediates)).unwrap();
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.get("A").unwrap().state_flags, CommitItemFlags::PROP_MODS);

    let mut found = wc.harvest(&["A"], &HarvestOptions::default()).unwrap();
    assert_eq!(found.items.len(), 2);
    let base_url = condense_commit_items(&mut found.items).unwrap();
    assert_eq!(base_url, "svn://example.com/repo/trunk/A");
    let urls: Vec<_> = found.items.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(urls, vec!["", "B/f"]);
}

#[cfg(unix)]
#[test]
fn special_status_change_is_detected() {
    let mut wc = Wc::new();
    wc.file("link", 1, "link target\n");
    let mut props = PropertyList::new();
    props.insert(svn_wc::PROP_SPECIAL.into(), b"*".to_vec());
    wc.db.set_props("link", props).unwrap();

    let err = wc.harvest(&["link"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::UnexpectedKind(_)));

    wc.file("plain", 1, "plain\n");
    fs::remove_file(wc.path("plain")).unwrap();
    std::os::unix::fs::symlink("elsewhere", wc.path("plain")).unwrap();
    let err = wc.harvest(&["plain"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::UnexpectedKind(_)));
}

#[cfg(unix)]
#[test]
fn conflicts_are_reported_before_kind_mismatches() {
    let mut wc = Wc::new();
    wc.file("plain", 1, "plain\n");
    let mut skel = ConflictSkel::new();
    skel.set_op_update(
        ConflictVersion::new(ROOT_URL, "uuid", "trunk/plain", 1, NodeKind::File),
        None,
    )
    .add_text_conflict(Some("plain.r1".into()), Some("plain.mine".into()), None);
    wc.db.mark_conflict("plain", skel).unwrap();
    fs::remove_file(wc.path("plain")).unwrap();
    std::os::unix::fs::symlink("elsewhere", wc.path("plain")).unwrap();

    let err = wc.harvest(&["plain"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::Conflict(p) if p == "plain"));

    wc.file("victim", 1, "victim\n");
    wc.db.mark_conflict("victim", tree_conflict(NodeKind::File)).unwrap();
    fs::remove_file(wc.path("victim")).unwrap();
    std::os::unix::fs::symlink("elsewhere", wc.path("victim")).unwrap();

    let err = wc.harvest(&["victim"], &HarvestOptions::default()).unwrap_err();
    assert!(matches!(err, WcError::TreeConflict(p) if p == "victim"));
}
