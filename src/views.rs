//! The View Graph: an immutable DAG of views, each carrying a change-set
//! layered over its parent (spec §3.3, §4.3).
//!
//! Views are arena-indexed rather than pointer-linked — they live in a
//! flat `Vec` and reference each other by id, which is how this crate
//! avoids the cycle/ownership problems a pointer graph would raise and
//! keeps save/load a matter of serializing one vector (spec §9 design
//! notes: "arena + index").

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::namespace::Entry;

/// Monotonically increasing view identifier.
pub type ViewId = u64;

/// What changed at a path, relative to the parent it was layered over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PathChange {
    /// The path was added or its entry was replaced.
    Upsert(Entry),
    /// The path was hidden.
    Hide,
}

/// The three kinds of change `view-diff` reports (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The path did not exist in the base view.
    Added,
    /// The path existed in the base view with a different blob identity.
    Modified,
    /// The path was hidden relative to the base view.
    Hidden,
}

/// An immutable snapshot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    /// Monotonic view id.
    pub id: ViewId,
    /// Primary parent, used for ancestry walks and diffs. `None` only for
    /// the root view.
    pub parent: Option<ViewId>,
    /// Secondary parent contributed by a merge, if any (spec §4.4: "the
    /// merge produces a new head view whose parents include both the
    /// prior current head and the source head").
    pub merge_parent: Option<ViewId>,
    /// Caller-supplied label (e.g. from `snapshot(label)`).
    pub label: String,
    /// Creation time, Unix epoch seconds.
    pub created_ts: u64,
    /// Whether this view has been frozen by a later snapshot/commit. A
    /// frozen view's change-set must not grow further (spec §3.3
    /// invariant a).
    pub frozen: bool,
    /// Additions, modifications, and hides layered over `parent`.
    pub changes: std::collections::BTreeMap<String, PathChange>,
}

/// The DAG of views, rooted at view 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewGraph {
    views: Vec<View>,
    cursor: ViewId,
}

impl ViewGraph {
    /// Creates a fresh graph with a single root view (id 0, no parent, an
    /// empty change-set) as the working head.
    pub fn new(now: u64) -> Self {
        let root = View {
            id: 0,
            parent: None,
            merge_parent: None,
            label: "root".to_string(),
            created_ts: now,
            frozen: true,
            changes: std::collections::BTreeMap::new(),
        };
        Self {
            views: vec![root],
            cursor: 0,
        }
    }

    /// Ensures the cursor points at a writable (unfrozen) view, creating a
    /// child view if needed — "a view is created ... by the first write on
    /// an unbranched head" (spec §3.3 Lifecycle). Returns the writable
    /// view id. Callers that track a branch head separately (the
    /// Operations API) must update that pointer to match the return
    /// value.
    pub fn ensure_writable(&mut self, now: u64) -> ViewId {
        if self.view(self.cursor).map(|v| v.frozen).unwrap_or(true) {
            let new_id = self.create_child(self.cursor, String::new(), now);
            self.cursor = new_id;
        }
        self.cursor
    }

    /// The view the cursor currently points at — where new mutations land.
    pub fn head(&self) -> ViewId {
        self.cursor
    }

    /// Read-only repositioning of the cursor (spec §4.3 `switch`).
    /// Subsequent mutations create a new head descending from `id`.
    pub fn switch(&mut self, id: ViewId) -> Result<()> {
        self.view(id)?;
        self.cursor = id;
        Ok(())
    }

    /// Returns a reference to the view with id `id`.
    pub fn view(&self, id: ViewId) -> Result<&View> {
        self.views
            .get(id as usize)
            .ok_or_else(|| EngineError::NotFound(format!("view {id}")))
    }

    /// Every view currently in the graph, in id order.
    pub fn list(&self) -> &[View] {
        &self.views
    }

    /// `snapshot(label)`: freezes the current head under `label` and
    /// returns its id; the cursor moves on to a fresh, unlabeled working
    /// child descending from it, so that the snapshot's own id stays
    /// immutable forever while work continues (spec §4.3, §3.3 invariant
    /// a).
    pub fn snapshot(&mut self, label: &str, now: u64) -> ViewId {
        let frozen_id = self.cursor;
        if let Some(v) = self.views.get_mut(frozen_id as usize) {
            v.frozen = true;
            v.label = label.to_string();
        }
        let new_id = self.create_child(frozen_id, String::new(), now);
        self.cursor = new_id;
        frozen_id
    }

    /// Creates a new view descending from `parent` without touching the
    /// cursor. Used internally by `snapshot`, `branch-create`, and
    /// `branch-merge`.
    pub fn create_child(&mut self, parent: ViewId, label: String, now: u64) -> ViewId {
        let id = self.views.len() as ViewId;
        self.views.push(View {
            id,
            parent: Some(parent),
            merge_parent: None,
            label,
            created_ts: now,
            frozen: false,
            changes: std::collections::BTreeMap::new(),
        });
        id
    }

    /// Creates a merge view with two parents.
    pub fn create_merge_child(
        &mut self,
        parent: ViewId,
        merge_parent: ViewId,
        label: String,
        now: u64,
    ) -> ViewId {
        let id = self.create_child(parent, label, now);
        self.views[id as usize].merge_parent = Some(merge_parent);
        id
    }

    /// Records a change at `path` in `view`'s change-set. Does not itself
    /// check whether `view` is frozen — callers that must respect the
    /// "published views are frozen" invariant call [`Self::ensure_writable`]
    /// first (the Operations API layer does this before every mutation).
    pub fn set_change(&mut self, view: ViewId, path: String, change: PathChange, _now: u64) {
        if let Some(v) = self.views.get_mut(view as usize) {
            v.changes.insert(path, change);
        }
    }

    /// Walks from `view` toward the root, returning the first change found
    /// for `path` (the closest override wins).
    pub fn resolve_change(&self, view: ViewId, path: &str) -> Option<&PathChange> {
        let mut current = Some(view);
        while let Some(id) = current {
            let v = self.views.get(id as usize)?;
            if let Some(change) = v.changes.get(path) {
                return Some(change);
            }
            current = v.parent;
        }
        None
    }

    /// Every path ever mentioned in `view`'s own change-set or any
    /// ancestor's — the candidate set `list`/`find`/`grep` scan before
    /// filtering to what's currently visible.
    pub fn known_paths(&self, view: ViewId) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut current = Some(view);
        while let Some(id) = current {
            let Some(v) = self.views.get(id as usize) else {
                break;
            };
            out.extend(v.changes.keys().cloned());
            current = v.parent;
        }
        out
    }

    /// Ancestors of `view`, starting with `view` itself and walking to the
    /// root via the primary parent link.
    pub fn ancestors(&self, view: ViewId) -> Vec<ViewId> {
        let mut out = Vec::new();
        let mut current = Some(view);
        while let Some(id) = current {
            out.push(id);
            current = self.views.get(id as usize).and_then(|v| v.parent);
        }
        out
    }

    /// The lowest common ancestor of `a` and `b` along primary parent
    /// links, used by three-way merge.
    pub fn lowest_common_ancestor(&self, a: ViewId, b: ViewId) -> ViewId {
        let ancestors_a: BTreeSet<ViewId> = self.ancestors(a).into_iter().collect();
        for candidate in self.ancestors(b) {
            if ancestors_a.contains(&candidate) {
                return candidate;
            }
        }
        0
    }

    /// `diff(a, b)`: every path whose resolved state differs between views
    /// `a` and `b`, in lexicographic path order (spec §4.3).
    pub fn diff(&self, a: ViewId, b: ViewId) -> Vec<(String, ChangeKind)> {
        let mut touched = BTreeSet::new();
        let ancestors_a: BTreeSet<ViewId> = self.ancestors(a).into_iter().collect();
        for id in self.ancestors(b) {
            if ancestors_a.contains(&id) {
                break;
            }
            if let Ok(v) = self.view(id) {
                touched.extend(v.changes.keys().cloned());
            }
        }
        // `b` is not necessarily a descendant of `a` — also walk the other
        // direction so non-ancestor pairs still produce a meaningful diff.
        let ancestors_b: BTreeSet<ViewId> = self.ancestors(b).into_iter().collect();
        for id in self.ancestors(a) {
            if ancestors_b.contains(&id) {
                break;
            }
            if let Ok(v) = self.view(id) {
                touched.extend(v.changes.keys().cloned());
            }
        }

        let mut out = Vec::new();
        for path in touched {
            let before = self.resolve_change(a, &path);
            let after = self.resolve_change(b, &path);
            let kind = match (before, after) {
                (_, Some(PathChange::Hide)) => Some(ChangeKind::Hidden),
                (None, Some(PathChange::Upsert(_))) => Some(ChangeKind::Added),
                (Some(PathChange::Hide), Some(PathChange::Upsert(_))) => Some(ChangeKind::Added),
                (Some(PathChange::Upsert(before_entry)), Some(PathChange::Upsert(after_entry))) => {
                    if blob_identity(&before_entry) != blob_identity(&after_entry)
                        || before_entry.perms != after_entry.perms
                        || before_entry.owner != after_entry.owner
                    {
                        Some(ChangeKind::Modified)
                    } else {
                        None
                    }
                }
                (None, None) | (Some(PathChange::Hide), None) | (Some(PathChange::Hide), Some(PathChange::Hide)) => {
                    None
                }
                (Some(PathChange::Upsert(_)), None) => None,
            };
            if let Some(kind) = kind {
                out.push((path, kind));
            }
        }
        out.sort();
        out
    }
}

fn blob_identity(entry: &Entry) -> Option<crate::pool::Hash> {
    match &entry.kind {
        crate::namespace::EntryKind::File { blob } => Some(*blob),
        crate::namespace::EntryKind::HardLink { blob } => Some(*blob),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace;
    use crate::pool::BlobPool;

    #[test]
    fn snapshot_diff_reports_single_modification() {
        let mut graph = ViewGraph::new(0);
        let mut pool = BlobPool::new();
        let head = graph.head();
        namespace::write_file(&mut graph, &mut pool, head, "/f", b"v1", 1, 1, 0, namespace::SYMLINK_DEPTH_LIMIT).unwrap();
        let v1 = graph.snapshot("s1", 1);
        let head2 = graph.head();
        namespace::append(&mut graph, &mut pool, head2, "/f", b"v2", 2, namespace::SYMLINK_DEPTH_LIMIT).unwrap();
        let diff = graph.diff(v1, graph.head());
        assert_eq!(diff, vec![("/f".to_string(), ChangeKind::Modified)]);
    }

    #[test]
    fn view_ids_are_monotonic_and_unique() {
        let mut graph = ViewGraph::new(0);
        let a = graph.snapshot("a", 1);
        let b = graph.snapshot("b", 2);
        assert!(a < b);
    }
}
