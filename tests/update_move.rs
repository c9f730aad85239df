#![allow(clippy::unwrap_used)]

use std::fs;
use std::sync::{Arc, Mutex};

use svn_wc::{
    BaseNode, CancelToken, ConflictAction, ConflictReason, ConflictSkel, ConflictVersion, Context,
    NodeKind, Notification, NotifyAction, NotifyState, Operation, WcDb, WcError, WorkItem,
    resolve_moved_away_conflict, run_work_items, update_moved_away_conflict_victim,
};

const ROOT_URL: &str = "svn://example.com/repo";

fn new_wc() -> (tempfile::TempDir, WcDb) {
    let temp = tempfile::tempdir().unwrap();
    let db = WcDb::create(temp.path(), ROOT_URL, "uuid", "trunk", 1).unwrap();
    (temp, db)
}

fn add_file(db: &mut WcDb, relpath: &str, revision: u64, text: &str) {
    let sum = db.pristine_install(text.as_bytes()).unwrap();
    db.base_add_node(relpath, BaseNode::file(format!("trunk/{relpath}"), revision, sum))
        .unwrap();
}

fn raise_conflict(db: &mut WcDb, victim: &str, kind: NodeKind) {
    let repos_relpath = format!("trunk/{victim}");
    let mut skel = ConflictSkel::new();
    skel.set_op_update(
        ConflictVersion::new(ROOT_URL, "uuid", repos_relpath.clone(), 1, kind),
        Some(ConflictVersion::new(ROOT_URL, "uuid", repos_relpath, 2, kind)),
    )
    .add_tree_conflict(ConflictReason::MovedAway, ConflictAction::Edited, Some(victim.into()));
    db.mark_conflict(victim, skel).unwrap();
}

fn recording_context() -> (Context, Arc<Mutex<Vec<Notification>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let ctx = Context::new().with_notify(move |n: &Notification| sink.lock().unwrap().push(n.clone()));
    (ctx, seen)
}

/// `f` moved to `g`, then updated from `base` to `incoming`; `g` holds
/// `working`.
fn moved_and_updated_file(base: &str, incoming: &str, working: &str) -> (tempfile::TempDir, WcDb) {
    let (temp, mut db) = new_wc();
    add_file(&mut db, "f", 1, base);
    db.op_move("f", "g").unwrap();
    fs::write(temp.path().join("g"), working).unwrap();

    add_file(&mut db, "f", 2, incoming);
    raise_conflict(&mut db, "f", NodeKind::File);
    (temp, db)
}

#[test]
fn incoming_edit_lands_on_unmodified_move_destination() {
    let (temp, mut db) = moved_and_updated_file("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n");
    let (ctx, seen) = recording_context();

    resolve_moved_away_conflict(&mut db, "f", &ctx).unwrap();

    assert_eq!(fs::read_to_string(temp.path().join("g")).unwrap(), "a\nB\nc\n");
    assert!(db.read_conflict("f").unwrap().is_none());
    assert!(db.read_conflict("g").unwrap().is_none());

    let info = db.depth_get_info("g", 1).unwrap();
    assert_eq!(info.revision, Some(2));
    assert!(info.moved_here);

    let seen = seen.lock().unwrap();
    let actions: Vec<_> = seen.iter().map(|n| (n.path.as_str(), n.action)).collect();
    assert_eq!(
        actions,
        vec![
            ("g", NotifyAction::UpdateUpdate),
            ("g", NotifyAction::UpdateCompleted),
            ("f", NotifyAction::ResolvedTree),
        ]
    );
    assert_eq!(seen[0].content_state, NotifyState::Changed);
    assert_eq!(seen[0].old_revision, Some(1));
    assert_eq!(seen[0].revision, Some(2));

    let err = resolve_moved_away_conflict(&mut db, "f", &ctx).unwrap_err();
    assert!(matches!(err, WcError::NotInConflict(_)));
}

#[test]
fn incoming_edit_merges_with_local_edit() {
    let (temp, mut db) = moved_and_updated_file("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\nd\n");
    let (ctx, seen) = recording_context();

    resolve_moved_away_conflict(&mut db, "f", &ctx).unwrap();

    assert_eq!(fs::read_to_string(temp.path().join("g")).unwrap(), "a\nB\nc\nd\n");
    assert_eq!(seen.lock().unwrap()[0].content_state, NotifyState::Merged);
    assert!(!temp.path().join("g.mine").exists());
}

#[test]
fn overlapping_edits_leave_a_text_conflict_with_markers() {
    let (temp, mut db) = moved_and_updated_file("a\nb\nc\n", "a\nB\nc\n", "a\nX\nc\n");
    let ctx = Context::new();

    let items = update_moved_away_conflict_victim(&mut db, "f", &ctx).unwrap();
    assert!(matches!(items.last(), Some(WorkItem::FileMove { dst, .. }) if dst == "g"));
    run_work_items(&db, &items, &ctx).unwrap();

    let merged = fs::read_to_string(temp.path().join("g")).unwrap();
    assert!(merged.contains("<<<<<<<"));
    assert!(merged.contains(">>>>>>>"));
    assert_eq!(fs::read_to_string(temp.path().join("g.mine")).unwrap(), "a\nX\nc\n");
    assert_eq!(fs::read_to_string(temp.path().join("g.r1")).unwrap(), "a\nb\nc\n");
    assert_eq!(fs::read_to_string(temp.path().join("g.r2")).unwrap(), "a\nB\nc\n");

    let skel = db.read_conflict("g").unwrap().unwrap();
    let (text, props, tree) = skel.conflicted();
    assert!(text && !props && !tree);
    assert_eq!(skel.marker_files(), vec!["g.r1", "g.mine", "g.r2"]);
}

#[test]
fn replaying_an_applied_update_changes_nothing() {
    let (_temp, mut db) = moved_and_updated_file("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n");
    let ctx = Context::new();

    let items = update_moved_away_conflict_victim(&mut db, "f", &ctx).unwrap();
    assert_eq!(items.len(), 1);
    run_work_items(&db, &items, &ctx).unwrap();

    let again = update_moved_away_conflict_victim(&mut db, "f", &ctx).unwrap();
    assert!(again.is_empty());
    assert_eq!(db.depth_get_info("g", 1).unwrap().revision, Some(2));
    assert!(db.read_conflict("f").unwrap().is_some());
}

#[test]
fn cancelled_resolve_rolls_back_the_store() {
    let (temp, mut db) = moved_and_updated_file("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n");
    let token = CancelToken::new();
    token.cancel();
    let ctx = Context::new().with_cancel(token);

    let err = resolve_moved_away_conflict(&mut db, "f", &ctx).unwrap_err();
    assert!(err.is_cancelled());
    assert!(db.read_conflict("f").unwrap().is_some());
    assert_eq!(db.depth_get_info("g", 1).unwrap().revision, Some(1));
    assert_eq!(fs::read_to_string(temp.path().join("g")).unwrap(), "a\nb\nc\n");
}

#[test]
fn moved_directory_follows_the_update() {
    let (temp, mut db) = new_wc();
    db.base_add_node("A", BaseNode::dir("trunk/A", 1)).unwrap();
    add_file(&mut db, "A/f", 1, "f1\n");
    db.base_add_node("A/B", BaseNode::dir("trunk/A/B", 1)).unwrap();
    add_file(&mut db, "A/B/g", 1, "g\n");
    add_file(&mut db, "A/h", 1, "h1\n");

    db.op_move("A/h", "H").unwrap();
    db.op_move("A", "A2").unwrap();
    fs::create_dir_all(temp.path().join("A2/B")).unwrap();
    fs::write(temp.path().join("A2/f"), "f1\n").unwrap();
    fs::write(temp.path().join("A2/B/g"), "g\n").unwrap();
    fs::write(temp.path().join("H"), "h1\n").unwrap();

    db.base_add_node("A", BaseNode::dir("trunk/A", 2)).unwrap();
    add_file(&mut db, "A/f", 2, "f2\n");
    db.base_add_node("A/B", BaseNode::dir("trunk/A/B", 2)).unwrap();
    add_file(&mut db, "A/B/g", 2, "g\n");
    add_file(&mut db, "A/h", 2, "h2\n");
    add_file(&mut db, "A/new", 2, "new\n");
    raise_conflict(&mut db, "A", NodeKind::Dir);

    let (ctx, seen) = recording_context();
    resolve_moved_away_conflict(&mut db, "A", &ctx).unwrap();

    assert_eq!(fs::read_to_string(temp.path().join("A2/f")).unwrap(), "f2\n");
    assert_eq!(fs::read_to_string(temp.path().join("A2/B/g")).unwrap(), "g\n");
    assert_eq!(fs::read_to_string(temp.path().join("H")).unwrap(), "h1\n");
    assert!(!temp.path().join("A2/new").exists());

    for path in ["A2", "A2/f", "A2/B", "A2/B/g"] {
        assert_eq!(db.depth_get_info(path, 1).unwrap().revision, Some(2), "{path}");
    }
    assert_eq!(db.depth_get_info("H", 1).unwrap().revision, Some(1));

    let seen = seen.lock().unwrap();
    let updated: Vec<_> = seen
        .iter()
        .filter(|n| n.action == NotifyAction::UpdateUpdate)
        .map(|n| n.path.as_str())
        .collect();
    assert_eq!(updated, vec!["A2/f"]);
    assert_eq!(seen.last().unwrap().action, NotifyAction::ResolvedTree);
}

#[test]
fn switch_conflict_is_resolved_like_an_update() {
    let (temp, mut db) = new_wc();
    add_file(&mut db, "f", 1, "a\nb\nc\n");
    db.op_move("f", "g").unwrap();
    fs::write(temp.path().join("g"), "a\nX\nc\n").unwrap();

    let sum = db.pristine_install(b"a\nB\nc\n").unwrap();
    db.base_add_node("f", BaseNode::file("branches/b/f", 2, sum))
        .unwrap();
    let mut skel = ConflictSkel::new();
    skel.set_op_switch(
        ConflictVersion::new(ROOT_URL, "uuid", "trunk/f", 1, NodeKind::File),
        Some(ConflictVersion::new(ROOT_URL, "uuid", "branches/b/f", 2, NodeKind::File)),
    )
    .add_tree_conflict(ConflictReason::MovedAway, ConflictAction::Edited, Some("f".into()));
    db.mark_conflict("f", skel).unwrap();

    let (ctx, seen) = recording_context();
    resolve_moved_away_conflict(&mut db, "f", &ctx).unwrap();

    assert!(db.read_conflict("f").unwrap().is_none());
    let info = db.depth_get_info("g", 1).unwrap();
    assert_eq!(info.repos_relpath.as_deref(), Some("branches/b/f"));
    assert_eq!(info.revision, Some(2));

    let text = db.read_conflict("g").unwrap().unwrap();
    assert_eq!(text.conflicted(), (true, false, false));
    assert_eq!(text.operation.unwrap().operation, Operation::Update);
    assert_eq!(fs::read_to_string(temp.path().join("g.r2")).unwrap(), "a\nB\nc\n");
    assert_eq!(fs::read_to_string(temp.path().join("g.mine")).unwrap(), "a\nX\nc\n");
    assert_eq!(seen.lock().unwrap()[0].content_state, NotifyState::Conflicted);
}

#[test]
fn mixed_revision_tree_cannot_be_moved() {
    let (_temp, mut db) = new_wc();
    db.base_add_node("A", BaseNode::dir("trunk/A", 1)).unwrap();
    add_file(&mut db, "A/f", 2, "f2\n");

    let err = db.op_move("A", "A2").unwrap_err();
    assert!(matches!(err, WcError::MixedRevisionMove(..)));
    assert!(err.to_string().contains("try updating"));
    assert!(db.read_info("A2").is_err());

    db.base_add_node("A", BaseNode::dir("trunk/A", 2)).unwrap();
    db.op_move("A", "A2").unwrap();
    assert_eq!(db.depth_get_info("A2/f", 1).unwrap().revision, Some(2));
}

#[test]
fn conflict_recorded_before_reopening_is_resolved_after() {
    let (temp, db) = moved_and_updated_file("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n");
    drop(db);

    let mut db = WcDb::open(temp.path()).unwrap();
    assert_eq!(db.repos_root_url(), ROOT_URL);
    resolve_moved_away_conflict(&mut db, "f", &Context::new()).unwrap();
    drop(db);

    let db = WcDb::open(temp.path()).unwrap();
    assert!(db.read_conflict("f").unwrap().is_none());
    assert_eq!(db.depth_get_info("g", 1).unwrap().revision, Some(2));
    assert_eq!(db.scan_deletion("f").unwrap().moved_to_relpath.as_deref(), Some("g"));
    assert_eq!(fs::read_to_string(temp.path().join("g")).unwrap(), "a\nB\nc\n");
}
