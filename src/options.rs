//! Builder-style option types shared by the harvester and the resolver.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::merge::{Diff3Merger, TextMerger};
use crate::{Depth, Notification, WcError};

/// Callback receiving [`Notification`]s.
pub type Notifier = Arc<dyn Fn(&Notification) + Send + Sync>;

/// A cloneable cancellation flag.
///
/// Long walks check the flag at every recursion step and stop with
/// [`WcError::Cancelled`] once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-operation context: cancellation, notification and the text merger.
///
/// The context is immutable while an operation runs; only paths and
/// per-call state vary between recursive steps.
#[derive(Clone)]
pub struct Context {
    cancel: Option<CancelToken>,
    notify: Option<Notifier>,
    merger: Arc<dyn TextMerger>,
}

impl Context {
    /// Creates a context without cancellation or notifications that merges
    /// text with [`Diff3Merger`].
    pub fn new() -> Self {
        Self {
            cancel: None,
            notify: None,
            merger: Arc::new(Diff3Merger::new()),
        }
    }

    /// Sets the cancellation token checked during walks.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets the notification callback.
    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.notify = Some(Arc::new(notify));
        self
    }

    /// Replaces the three-way text merger.
    pub fn with_merger(mut self, merger: Arc<dyn TextMerger>) -> Self {
        self.merger = merger;
        self
    }

    /// Returns [`WcError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), WcError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(WcError::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn notify(&self, notification: &Notification) {
        if let Some(notify) = &self.notify {
            notify(notification);
        }
    }

    pub(crate) fn merger(&self) -> &dyn TextMerger {
        self.merger.as_ref()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancel", &self.cancel)
            .field("notify", &self.notify.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
/// Options for [`crate::harvest_committables`].
pub struct HarvestOptions {
    /// How far below each target to look for changes.
    pub depth: Depth,
    /// Only harvest nodes in one of these changelists (empty: no filter).
    pub changelists: BTreeSet<String>,
    /// Treat unmodified locked nodes as commit candidates.
    pub just_locked: bool,
}

impl HarvestOptions {
    /// Creates options with the given depth, no changelist filter and
    /// `just_locked = false`.
    pub fn new(depth: Depth) -> Self {
        Self {
            depth,
            changelists: BTreeSet::new(),
            just_locked: false,
        }
    }

    /// Adds a changelist to the filter.
    pub fn with_changelist(mut self, name: impl Into<String>) -> Self {
        self.changelists.insert(name.into());
        self
    }

    /// Harvests locked nodes even without local modifications.
    pub fn with_just_locked(mut self) -> Self {
        self.just_locked = true;
        self
    }

    pub(crate) fn changelist_matches(&self, changelist: Option<&str>) -> bool {
        self.changelists.is_empty()
            || changelist.is_some_and(|name| self.changelists.contains(name))
    }
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self::new(Depth::Infinity)
    }
}
