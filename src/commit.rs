//! Commit items and the condense step that prepares them for a commit
//! driver.

use std::collections::BTreeMap;

use bitflags::bitflags;
use tracing::debug;

use crate::url::{compare_urls, url_dirname, url_longest_ancestor, url_skip_ancestor};
use crate::{NodeKind, WcError};

bitflags! {
    /// What a [`CommitItem`] changes.
    #[derive(serde::Serialize, serde::Deserialize)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CommitItemFlags: u8 {
        /// The node is added (possibly with history).
        const ADD = 0x01;
        /// The node is deleted.
        const DELETE = 0x02;
        /// The node's text changed.
        const TEXT_MODS = 0x04;
        /// The node's properties changed.
        const PROP_MODS = 0x08;
        /// The add carries copy-from information.
        const IS_COPY = 0x10;
        /// A lock token must accompany the change.
        const LOCK_TOKEN = 0x20;
    }
}

/// One pending change to send to the repository.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitItem {
    /// Working-copy relpath of the node.
    pub path: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Target URL; relative to the base URL after [`condense_commit_items`].
    pub url: String,
    /// BASE revision being changed; `None` for new nodes and tombstones.
    pub revision: Option<u64>,
    /// Copy source URL, set iff the item is an add with history.
    pub copyfrom_url: Option<String>,
    /// Copy source revision.
    pub copyfrom_rev: Option<u64>,
    /// What the item changes.
    pub state_flags: CommitItemFlags,
}

impl CommitItem {
    /// Returns `true` when the item is an add with history.
    pub fn is_copy(&self) -> bool {
        self.state_flags.contains(CommitItemFlags::IS_COPY)
    }
}

/// Output of the harvester.
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Committables {
    /// Commit items, in discovery order.
    pub items: Vec<CommitItem>,
    /// Lock tokens to send with the commit, keyed by URL.
    pub lock_tokens: BTreeMap<String, String>,
}

impl Committables {
    /// Returns the item harvested for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&CommitItem> {
        self.items.iter().find(|item| item.path == path)
    }

    /// Returns `true` when nothing was harvested.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Sorts `items` by URL, checks that no two items share a URL, and rewrites
/// every URL relative to their longest common ancestor, which is returned.
///
/// The base URL is never an item that needs its parent opened first: when
/// the ancestor equals an item's URL it is moved up one level, unless that
/// item is a directory with only property modifications. An item exactly at
/// the base gets the empty URL.
pub fn condense_commit_items(items: &mut [CommitItem]) -> Result<String, WcError> {
    if items.is_empty() {
        return Err(WcError::NoCommitItems);
    }
    items.sort_by(|a, b| compare_urls(&a.url, &b.url));

    let mut base_url: Option<String> = None;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 && items[idx - 1].url == item.url {
            return Err(WcError::DuplicateCommitUrl(
                items[idx - 1].path.clone(),
                item.path.clone(),
            ));
        }

        let mut base = match base_url.take() {
            None => item.url.clone(),
            Some(base) => url_longest_ancestor(&base, &item.url),
        };
        if base.is_empty() {
            return Err(WcError::InvalidUrl(format!(
                "'{}' shares no ancestor with the other commit targets",
                item.url
            )));
        }
        let dir_prop_mods_only =
            item.kind == NodeKind::Dir && item.state_flags == CommitItemFlags::PROP_MODS;
        if base.len() == item.url.len() && !dir_prop_mods_only {
            base = url_dirname(&base);
        }
        base_url = Some(base);
    }

    let base_url = base_url.ok_or(WcError::NoCommitItems)?;
    for item in items.iter_mut() {
        let relative = url_skip_ancestor(&base_url, &item.url)
            .ok_or_else(|| WcError::InvalidUrl(item.url.clone()))?
            .to_string();
        item.url = relative;
    }
    debug!(base_url = %base_url, count = items.len(), "condensed commit items");
    Ok(base_url)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn item(path: &str, url: &str, kind: NodeKind, flags: CommitItemFlags) -> CommitItem {
        CommitItem {
            path: path.to_string(),
            kind,
            url: url.to_string(),
            revision: Some(1),
            copyfrom_url: None,
            copyfrom_rev: None,
            state_flags: flags,
        }
    }

    #[test]
    fn base_is_common_parent_of_sibling_files() {
        let mut items = vec![
            item("A/g", "svn://h/r/A/g", NodeKind::File, CommitItemFlags::TEXT_MODS),
            item("A/f", "svn://h/r/A/f", NodeKind::File, CommitItemFlags::TEXT_MODS),
        ];
        let base = condense_commit_items(&mut items).unwrap();
        assert_eq!(base, "svn://h/r/A");
        assert_eq!(items[0].url, "f");
        assert_eq!(items[1].url, "g");
        assert_eq!(items[0].path, "A/f");
    }

    #[test]
    fn single_item_base_is_its_parent() {
        let mut items = vec![item("f", "svn://h/r/f", NodeKind::File, CommitItemFlags::TEXT_MODS)];
        assert_eq!(condense_commit_items(&mut items).unwrap(), "svn://h/r");
        assert_eq!(items[0].url, "f");
    }

    #[test]
    fn dir_with_prop_mods_only_stays_the_base() {
        let mut items = vec![
            item("A", "svn://h/r/A", NodeKind::Dir, CommitItemFlags::PROP_MODS),
            item("A/f", "svn://h/r/A/f", NodeKind::File, CommitItemFlags::TEXT_MODS),
        ];
        assert_eq!(condense_commit_items(&mut items).unwrap(), "svn://h/r/A");
        assert_eq!(items[0].url, "");
        assert_eq!(items[1].url, "f");
    }

    #[test]
    fn added_dir_forces_base_above_it() {
        let mut items = vec![
            item("A/f", "svn://h/r/A/f", NodeKind::File, CommitItemFlags::ADD),
            item("A", "svn://h/r/A", NodeKind::Dir, CommitItemFlags::ADD),
        ];
        assert_eq!(condense_commit_items(&mut items).unwrap(), "svn://h/r");
        assert_eq!(items[0].url, "A");
        assert_eq!(items[1].url, "A/f");
    }

    #[test]
    fn duplicate_urls_are_rejected() {
        let mut items = vec![
            item("x", "svn://h/r/A", NodeKind::File, CommitItemFlags::TEXT_MODS),
            item("y", "svn://h/r/A", NodeKind::File, CommitItemFlags::PROP_MODS),
        ];
        let err = condense_commit_items(&mut items).unwrap_err();
        assert!(matches!(err, WcError::DuplicateCommitUrl(a, b) if a == "x" && b == "y"));
    }

    #[test]
    fn empty_batch_is_an_error() {
        assert!(matches!(
            condense_commit_items(&mut []).unwrap_err(),
            WcError::NoCommitItems
        ));
    }

    #[test]
    fn sorting_keeps_parents_before_children() {
        let mut items = vec![
            item("A-x", "svn://h/r/A-x", NodeKind::File, CommitItemFlags::TEXT_MODS),
            item("A/f", "svn://h/r/A/f", NodeKind::File, CommitItemFlags::TEXT_MODS),
            item("A", "svn://h/r/A", NodeKind::Dir, CommitItemFlags::PROP_MODS),
        ];
        condense_commit_items(&mut items).unwrap();
        let urls: Vec<_> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["A", "A/f", "A-x"]);
    }

    fn arb_relpath() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-c]{1,2}", 1..4).prop_map(|parts| parts.join("/"))
    }

    fn arb_items() -> impl Strategy<Value = Vec<CommitItem>> {
        prop::collection::btree_set(arb_relpath(), 1..8).prop_flat_map(|paths| {
            let paths: Vec<String> = paths.into_iter().collect();
            let len = paths.len();
            (
                Just(paths),
                prop::collection::vec((any::<bool>(), 0u8..0x40), len),
            )
                .prop_map(|(paths, attrs)| {
                    paths
                        .into_iter()
                        .zip(attrs)
                        .map(|(path, (is_dir, bits))| {
                            let url = format!("svn://h/r/{path}");
                            let kind = if is_dir { NodeKind::Dir } else { NodeKind::File };
                            item(&path, &url, kind, CommitItemFlags::from_bits_truncate(bits))
                        })
                        .collect()
                })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            .. ProptestConfig::default()
        })]

        #[test]
        fn condensed_items_are_sorted_unique_and_relative(mut items in arb_items()) {
            let originals: BTreeMap<String, String> =
                items.iter().map(|i| (i.path.clone(), i.url.clone())).collect();
            let base = condense_commit_items(&mut items).unwrap();

            for pair in items.windows(2) {
                let a = format!("{base}/{}", pair[0].url);
                let b = format!("{base}/{}", pair[1].url);
                prop_assert_eq!(compare_urls(&a, &b), std::cmp::Ordering::Less);
            }
            for item in &items {
                let original = &originals[&item.path];
                prop_assert!(url_skip_ancestor(&base, original).is_some());
                prop_assert!(!item.url.starts_with('/'));
                if item.url.is_empty() {
                    prop_assert_eq!(original, &base);
                } else {
                    prop_assert_eq!(original, &format!("{base}/{}", item.url));
                }
            }
        }
    }
}
