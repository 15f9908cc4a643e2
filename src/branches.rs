//! Branch Registry: named, movable pointers into the view graph, plus
//! three-way merge (spec §3.4, §4.4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::namespace::{self, EntryKind};
use crate::pool::Hash;
use crate::views::{ChangeKind, PathChange, ViewGraph, ViewId};

/// Monotonically increasing branch identifier.
pub type BranchId = u64;

/// A named head pointer into the view graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Monotonic branch id.
    pub id: BranchId,
    /// Caller-chosen, unique name.
    pub name: String,
    /// The view this branch pointed at when it was created, kept for
    /// ancestry/merge bookkeeping.
    pub base_view: ViewId,
    /// The view this branch currently points at.
    pub head_view: ViewId,
    /// Creation time, Unix epoch seconds.
    pub created_ts: u64,
}

/// The set of branches known to the Engine, plus which one is current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRegistry {
    branches: Vec<Branch>,
    by_name: HashMap<String, BranchId>,
    current: BranchId,
}

impl BranchRegistry {
    /// Creates a registry with a single `main` branch pointing at `root`.
    pub fn new(root: ViewId, now: u64) -> Self {
        let main = Branch {
            id: 0,
            name: "main".to_string(),
            base_view: root,
            head_view: root,
            created_ts: now,
        };
        let mut by_name = HashMap::new();
        by_name.insert(main.name.clone(), main.id);
        Self {
            branches: vec![main],
            by_name,
            current: 0,
        }
    }

    /// The branch currently checked out.
    pub fn current(&self) -> &Branch {
        self.branches
            .iter()
            .find(|b| b.id == self.current)
            .expect("current branch always exists")
    }

    /// Mutable access to the branch currently checked out.
    fn current_mut(&mut self) -> &mut Branch {
        let id = self.current;
        self.branches
            .iter_mut()
            .find(|b| b.id == id)
            .expect("current branch always exists")
    }

    /// Looks up a branch by name.
    pub fn by_name(&self, name: &str) -> Result<&Branch> {
        let id = self
            .by_name
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("branch {name}")))?;
        Ok(self.branches.iter().find(|b| b.id == *id).unwrap())
    }

    /// Every branch, in creation order.
    pub fn list(&self) -> &[Branch] {
        &self.branches
    }

    /// `branch-create(name)`: a new branch pointing at the current head.
    pub fn create(&mut self, name: &str, now: u64) -> Result<BranchId> {
        if self.by_name.contains_key(name) {
            return Err(EngineError::Exists(format!("branch {name}")));
        }
        let head = self.current().head_view;
        let id = self.branches.len() as BranchId;
        self.branches.push(Branch {
            id,
            name: name.to_string(),
            base_view: head,
            head_view: head,
            created_ts: now,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// `branch-switch(name)`: makes `name` the current branch. Does not
    /// itself touch the view graph's cursor — the Operations API syncs
    /// `graph.switch(branch.head_view)` after calling this.
    pub fn switch(&mut self, name: &str) -> Result<ViewId> {
        let id = self.by_name(name)?.id;
        self.current = id;
        Ok(self.current().head_view)
    }

    /// Updates the current branch's head pointer, used after every
    /// mutation that advances the view graph's cursor.
    pub fn set_current_head(&mut self, view: ViewId) {
        self.current_mut().head_view = view;
    }

    /// Updates the head pointer of a specific branch by id, used by merge.
    fn set_head(&mut self, id: BranchId, view: ViewId) {
        if let Some(b) = self.branches.iter_mut().find(|b| b.id == id) {
            b.head_view = view;
        }
    }
}

/// Outcome of a `branch-merge` call.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The new head view produced by the merge, if it committed.
    pub new_head: ViewId,
    /// Paths that both sides changed since the common ancestor, relative
    /// to which side's change was kept. Empty when the merge was clean.
    pub conflicts: Vec<String>,
}

/// The blob identity a path resolves to in `view`, or `None` for anything
/// that isn't a `File`/`HardLink` (directories, symlinks, hidden/absent
/// paths never collide on content).
fn resolved_blob(graph: &ViewGraph, view: ViewId, path: &str) -> Option<Hash> {
    match graph.resolve_change(view, path)? {
        PathChange::Upsert(entry) => match &entry.kind {
            EntryKind::File { blob } | EntryKind::HardLink { blob } => Some(*blob),
            _ => None,
        },
        PathChange::Hide => None,
    }
}

/// `branch-merge(source, label)`: three-way merges `source`'s head into the
/// current branch's head, using their lowest common ancestor as the base
/// (spec §4.4).
///
/// Conflict rule: if both sides touched the same path, a `Hide` on either
/// side wins over any `Upsert` on the other ("hide wins over modify"). If
/// both sides modified the path, it is a conflict only when they resolved
/// to *different* blob identities (spec §4.4); both sides landing on the
/// same content — e.g. both writing identical bytes — is not a conflict.
/// Non-overlapping changes from both sides are layered onto the merge view.
pub fn merge(
    graph: &mut ViewGraph,
    registry: &mut BranchRegistry,
    source_name: &str,
    label: &str,
    now: u64,
) -> Result<MergeOutcome> {
    let source_head = registry.by_name(source_name)?.head_view;
    let current_id = registry.current().id;
    let current_head = registry.current().head_view;

    let base = graph.lowest_common_ancestor(current_head, source_head);
    let ours = graph.diff(base, current_head);
    let theirs = graph.diff(base, source_head);

    let ours_paths: std::collections::BTreeMap<&str, ChangeKind> =
        ours.iter().map(|(p, k)| (p.as_str(), *k)).collect();

    let merge_view = graph.create_merge_child(current_head, source_head, label.to_string(), now);

    let mut conflicts = Vec::new();
    for (path, their_kind) in &theirs {
        let our_kind = ours_paths.get(path.as_str()).copied();
        let resolved = match (our_kind, their_kind) {
            (None, _) => {
                // Only the source side touched this path: take its change.
                graph.resolve_change(source_head, path).cloned()
            }
            (Some(_), ChangeKind::Hidden) => {
                // Their hide wins over our modify.
                graph.resolve_change(source_head, path).cloned()
            }
            (Some(ChangeKind::Hidden), _) => {
                // Our hide wins over their modify; nothing to layer.
                None
            }
            (Some(_), _) => {
                // Both sides modified the same path: only a real conflict
                // if they landed on different blob identities.
                let our_blob = resolved_blob(graph, current_head, path);
                let their_blob = resolved_blob(graph, source_head, path);
                if our_blob.is_some() && our_blob == their_blob {
                    None
                } else {
                    conflicts.push(path.clone());
                    None
                }
            }
        };
        if let Some(change) = resolved {
            graph.set_change(merge_view, path.clone(), change, now);
        }
    }

    registry.set_current_head(merge_view);
    registry.set_head(current_id, merge_view);

    Ok(MergeOutcome {
        new_head: merge_view,
        conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BlobPool;

    const LIMIT: u32 = namespace::SYMLINK_DEPTH_LIMIT;

    #[test]
    fn non_overlapping_merge_layers_both_sides() {
        let mut graph = ViewGraph::new(0);
        let mut pool = BlobPool::new();
        let mut registry = BranchRegistry::new(graph.head(), 0);

        let head0 = graph.head();
        namespace::write_file(&mut graph, &mut pool, head0, "/base", b"x", 1, 1, 0, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.create("feature", 1).unwrap();
        registry.switch("feature").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let fview = graph.ensure_writable(1);
        namespace::write_file(&mut graph, &mut pool, fview, "/feature", b"f", 1, 1, 1, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.switch("main").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let mview = graph.ensure_writable(2);
        namespace::write_file(&mut graph, &mut pool, mview, "/main", b"m", 1, 1, 2, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        let outcome = merge(&mut graph, &mut registry, "feature", "merge1", 3).unwrap();
        assert!(outcome.conflicts.is_empty());
        assert!(namespace::stat(&graph, &pool, outcome.new_head, "/feature", LIMIT).is_ok());
        assert!(namespace::stat(&graph, &pool, outcome.new_head, "/main", LIMIT).is_ok());
        assert!(namespace::stat(&graph, &pool, outcome.new_head, "/base", LIMIT).is_ok());
    }

    #[test]
    fn conflicting_modify_is_reported() {
        let mut graph = ViewGraph::new(0);
        let mut pool = BlobPool::new();
        let mut registry = BranchRegistry::new(graph.head(), 0);
        let head0 = graph.head();
        namespace::write_file(&mut graph, &mut pool, head0, "/f", b"base", 1, 1, 0, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.create("feature", 1).unwrap();
        registry.switch("feature").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let fview = graph.ensure_writable(1);
        namespace::write_file(&mut graph, &mut pool, fview, "/f", b"from-feature", 1, 1, 1, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.switch("main").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let mview = graph.ensure_writable(2);
        namespace::write_file(&mut graph, &mut pool, mview, "/f", b"from-main", 1, 1, 2, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        let outcome = merge(&mut graph, &mut registry, "feature", "merge1", 3).unwrap();
        assert_eq!(outcome.conflicts, vec!["/f".to_string()]);
        let s = namespace::stat(&graph, &pool, outcome.new_head, "/f", LIMIT).unwrap();
        assert_eq!(s.length, Some("from-main".len() as u64));
    }

    #[test]
    fn hide_wins_over_modify() {
        let mut graph = ViewGraph::new(0);
        let mut pool = BlobPool::new();
        let mut registry = BranchRegistry::new(graph.head(), 0);
        let head0 = graph.head();
        namespace::write_file(&mut graph, &mut pool, head0, "/f", b"base", 1, 1, 0, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.create("feature", 1).unwrap();
        registry.switch("feature").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let fview = graph.ensure_writable(1);
        namespace::hide(&mut graph, fview, "/f", 1, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.switch("main").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let mview = graph.ensure_writable(2);
        namespace::write_file(&mut graph, &mut pool, mview, "/f", b"from-main", 1, 1, 2, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        let outcome = merge(&mut graph, &mut registry, "feature", "merge1", 3).unwrap();
        assert!(outcome.conflicts.is_empty());
        assert!(namespace::stat(&graph, &pool, outcome.new_head, "/f", LIMIT).is_err());
    }

    #[test]
    fn identical_writes_on_both_sides_are_not_a_conflict() {
        let mut graph = ViewGraph::new(0);
        let mut pool = BlobPool::new();
        let mut registry = BranchRegistry::new(graph.head(), 0);
        let head0 = graph.head();
        namespace::write_file(&mut graph, &mut pool, head0, "/f", b"base", 1, 1, 0, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.create("feature", 1).unwrap();
        registry.switch("feature").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let fview = graph.ensure_writable(1);
        namespace::write_file(&mut graph, &mut pool, fview, "/f", b"same", 1, 1, 1, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        registry.switch("main").unwrap();
        graph.switch(registry.current().head_view).unwrap();
        let mview = graph.ensure_writable(2);
        namespace::write_file(&mut graph, &mut pool, mview, "/f", b"same", 1, 1, 2, LIMIT).unwrap();
        registry.set_current_head(graph.head());

        let outcome = merge(&mut graph, &mut registry, "feature", "merge1", 3).unwrap();
        assert!(outcome.conflicts.is_empty());
        let s = namespace::stat(&graph, &pool, outcome.new_head, "/f", LIMIT).unwrap();
        assert_eq!(s.length, Some("same".len() as u64));
    }
}
