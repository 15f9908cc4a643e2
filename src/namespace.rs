//! The Namespace Tree: named entries inside a view, resolved against the
//! view's change-set chain (spec §3.2, §4.2).
//!
//! Entries live logically inside [`crate::views::View`] change-sets rather
//! than in a separate physical tree — a view's change-set *is* the
//! copy-on-write namespace layered over its parent, exactly as spec §3.3
//! describes it. This module owns the `Entry` model, path utilities, and
//! the resolution/mutation algorithms; [`crate::views::ViewGraph`] owns
//! the per-view storage they operate on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::pool::{BlobPool, Hash};
use crate::views::{PathChange, ViewGraph, ViewId};

/// Maximum symlink dereference depth before `resolve` fails with
/// `LoopDetected` (spec §4.2).
pub const SYMLINK_DEPTH_LIMIT: u32 = 16;

/// Unix-style permission bits: owner/group/other each get read/write/
/// execute.
pub type Perms = u16;

/// `rwxr-xr-x`, the default for newly created entries.
pub const DEFAULT_PERMS: Perms = 0o755;

/// The kind of a namespace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A regular file, referencing exactly one blob.
    File {
        /// Content hash of the file's current bytes.
        blob: Hash,
    },
    /// A directory. Children are discovered by path prefix, not stored
    /// inline, since the namespace is a flat path-keyed map per view.
    Directory,
    /// A symbolic link. The target is stored verbatim and is not resolved
    /// at creation time.
    Symlink {
        /// The link target, as given at creation time.
        target: String,
    },
    /// A hard link: a second name for a blob already referenced by
    /// another entry. Distinguished from `File` only to make link
    /// accounting explicit; both share `blob` identity.
    HardLink {
        /// Content hash shared with the original entry.
        blob: Hash,
    },
}

/// A named node inside one view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Full normalized path, e.g. `/a/b.txt`.
    pub path: String,
    /// What kind of node this is.
    pub kind: EntryKind,
    /// Owning user id.
    pub owner: u32,
    /// Owning group id.
    pub group: u32,
    /// Unix-style permission bits.
    pub perms: Perms,
    /// Creation time, Unix epoch seconds.
    pub created_ts: u64,
    /// Number of entries across the current view that share this entry's
    /// blob identity via hardlink (spec §3.2 invariant c). Files and hard
    /// links both report this; directories and symlinks report 1.
    pub link_count: u32,
    /// Masks the entry from lookup/list without removing the underlying
    /// blob reference.
    pub hidden: bool,
}

impl Entry {
    fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A `stat`-style snapshot of an entry's attributes, returned to callers
/// instead of the internal `Entry` so future fields can be added to one
/// without breaking the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryStat {
    /// Entry name (last path component).
    pub name: String,
    /// Full path.
    pub path: String,
    /// Entry kind discriminant, for display.
    pub kind: &'static str,
    /// Byte length, for files and hard links.
    pub length: Option<u64>,
    /// Symlink target, if this is a symlink.
    pub target: Option<String>,
    /// Owning user id.
    pub owner: u32,
    /// Owning group id.
    pub group: u32,
    /// Permission bits.
    pub perms: Perms,
    /// Creation time, Unix epoch seconds.
    pub created_ts: u64,
    /// Hardlink count within the current view.
    pub link_count: u32,
}

/// Normalizes a path: collapses repeated slashes, drops a trailing slash
/// (except for the root), and requires a leading slash.
pub fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(EngineError::InvalidArgument(format!(
            "path must be absolute: {path}"
        )));
    }
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", parts.join("/")))
}

/// The parent directory of a normalized path (`/` for top-level entries).
pub fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "/",
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Resolves `path` within `view`, dereferencing symlinks up to `limit` hops
/// (the Engine passes its configured
/// [`crate::engine::Config::symlink_depth_limit`], which defaults to
/// [`SYMLINK_DEPTH_LIMIT`]). Hidden entries resolve as absent.
pub fn resolve(graph: &ViewGraph, view: ViewId, path: &str, limit: u32) -> Result<Entry> {
    resolve_with_depth(graph, view, path, 0, limit)
}

fn resolve_with_depth(
    graph: &ViewGraph,
    view: ViewId,
    path: &str,
    depth: u32,
    limit: u32,
) -> Result<Entry> {
    if depth > limit {
        return Err(EngineError::LoopDetected(format!(
            "symlink depth exceeded resolving {path}"
        )));
    }
    let normalized = normalize(path)?;
    if normalized == "/" {
        return Ok(Entry {
            path: "/".to_string(),
            kind: EntryKind::Directory,
            owner: 0,
            group: 0,
            perms: DEFAULT_PERMS,
            created_ts: 0,
            link_count: 1,
            hidden: false,
        });
    }
    let entry = lookup_raw(graph, view, &normalized)
        .ok_or_else(|| EngineError::NotFound(normalized.clone()))?;
    if entry.hidden {
        return Err(EngineError::NotFound(normalized));
    }
    if let EntryKind::Symlink { target } = &entry.kind {
        let next = if target.starts_with('/') {
            target.clone()
        } else {
            join(parent_of(&normalized), target)
        };
        return resolve_with_depth(graph, view, &next, depth + 1, limit);
    }
    Ok(entry)
}

/// Looks up the raw change-set entry for `path` without dereferencing
/// symlinks or masking hidden entries.
fn lookup_raw(graph: &ViewGraph, view: ViewId, path: &str) -> Option<Entry> {
    match graph.resolve_change(view, path)? {
        PathChange::Upsert(entry) => Some(entry.clone()),
        PathChange::Hide => Some(Entry {
            path: path.to_string(),
            kind: EntryKind::File {
                blob: [0u8; 32],
            },
            owner: 0,
            group: 0,
            perms: 0,
            created_ts: 0,
            link_count: 0,
            hidden: true,
        }),
    }
}

fn to_stat(pool: &BlobPool, entry: &Entry) -> Result<EntryStat> {
    let (kind, length, target) = match &entry.kind {
        EntryKind::File { blob } => ("file", Some(pool.length(blob)?), None),
        EntryKind::HardLink { blob } => ("hardlink", Some(pool.length(blob)?), None),
        EntryKind::Directory => ("directory", None, None),
        EntryKind::Symlink { target } => ("symlink", None, Some(target.clone())),
    };
    Ok(EntryStat {
        name: entry.name().to_string(),
        path: entry.path.clone(),
        kind,
        length,
        target,
        owner: entry.owner,
        group: entry.group,
        perms: entry.perms,
        created_ts: entry.created_ts,
        link_count: entry.link_count,
    })
}

/// `stat(path)`: kind, length, ownership, permissions, link count, target.
pub fn stat(
    graph: &ViewGraph,
    pool: &BlobPool,
    view: ViewId,
    path: &str,
    limit: u32,
) -> Result<EntryStat> {
    let entry = resolve(graph, view, path, limit)?;
    to_stat(pool, &entry)
}

/// `readlink(path)`: the stored target of a symlink, without dereferencing
/// it.
pub fn readlink(graph: &ViewGraph, view: ViewId, path: &str) -> Result<String> {
    let normalized = normalize(path)?;
    let entry =
        lookup_raw(graph, view, &normalized).ok_or_else(|| EngineError::NotFound(normalized))?;
    match entry.kind {
        EntryKind::Symlink { target } if !entry.hidden => Ok(target),
        _ => Err(EngineError::InvalidArgument(format!(
            "{path} is not a symlink"
        ))),
    }
}

/// `list(path)`: visible children of a directory, in lexicographic order
/// (the spec requires depth-first lexicographic order for diffs; plain
/// lexicographic order satisfies `list`, which has no nesting to order).
pub fn list(
    graph: &ViewGraph,
    pool: &BlobPool,
    view: ViewId,
    path: &str,
    limit: u32,
) -> Result<Vec<EntryStat>> {
    let dir = resolve(graph, view, path, limit)?;
    if !matches!(dir.kind, EntryKind::Directory) {
        return Err(EngineError::NotADirectory(path.to_string()));
    }
    let dir_path = normalize(path)?;
    let mut names = BTreeSet::new();
    for candidate in graph.known_paths(view) {
        if parent_of(&candidate) == dir_path && candidate != dir_path {
            names.insert(candidate);
        }
    }
    let mut out = Vec::new();
    for name in names {
        if let Some(entry) = lookup_raw(graph, view, &name) {
            if !entry.hidden {
                out.push(to_stat(pool, &entry)?);
            }
        }
    }
    Ok(out)
}

/// `find(name_pattern)`: every visible path anywhere in the view whose
/// final component contains `name_pattern` (plain substring match — the
/// Engine does not carry a query planner, spec §4.8/§6.1).
pub fn find(graph: &ViewGraph, view: ViewId, name_pattern: &str) -> Vec<String> {
    let mut out = Vec::new();
    for path in graph.known_paths(view) {
        if let Some(entry) = lookup_raw(graph, view, &path) {
            if !entry.hidden && entry.name().contains(name_pattern) {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

/// `grep(text_pattern)`: every visible file whose content contains
/// `text_pattern`, with the matching line numbers (1-based).
pub fn grep(
    graph: &ViewGraph,
    pool: &BlobPool,
    view: ViewId,
    text_pattern: &str,
) -> Result<Vec<(String, usize)>> {
    let mut out = Vec::new();
    for path in graph.known_paths(view) {
        if let Some(entry) = lookup_raw(graph, view, &path) {
            if entry.hidden {
                continue;
            }
            let blob = match &entry.kind {
                EntryKind::File { blob } | EntryKind::HardLink { blob } => *blob,
                _ => continue,
            };
            let bytes = pool.get(&blob)?;
            let text = String::from_utf8_lossy(bytes);
            for (i, line) in text.lines().enumerate() {
                if line.contains(text_pattern) {
                    out.push((path.clone(), i + 1));
                }
            }
        }
    }
    out.sort();
    Ok(out)
}

fn require_parent_dir(graph: &ViewGraph, view: ViewId, path: &str, limit: u32) -> Result<()> {
    let parent = parent_of(path);
    let parent_entry = resolve(graph, view, parent, limit)
        .map_err(|_| EngineError::NotFound(format!("parent directory {parent}")))?;
    if !matches!(parent_entry.kind, EntryKind::Directory) {
        return Err(EngineError::NotADirectory(parent.to_string()));
    }
    Ok(())
}

fn exists(graph: &ViewGraph, view: ViewId, path: &str, limit: u32) -> bool {
    resolve(graph, view, path, limit).is_ok()
}

/// Counts entries in `view` that currently reference `blob` via `File` or
/// `HardLink`, used to stamp `link_count` after a mutation (spec §3.2
/// invariant c, evaluated against the current view's visible set).
fn count_links(graph: &ViewGraph, view: ViewId, blob: &Hash) -> u32 {
    let mut count = 0u32;
    for path in graph.known_paths(view) {
        if let Some(entry) = lookup_raw(graph, view, &path) {
            if entry.hidden {
                continue;
            }
            let matches = match &entry.kind {
                EntryKind::File { blob: b } | EntryKind::HardLink { blob: b } => b == blob,
                _ => false,
            };
            if matches {
                count += 1;
            }
        }
    }
    count
}

fn restamp_link_count(graph: &mut ViewGraph, view: ViewId, path: &str, blob: &Hash, now: u64) {
    let count = count_links(graph, view, blob);
    if let Some(mut entry) = lookup_raw(graph, view, path).filter(|e| !e.hidden) {
        entry.link_count = count;
        graph.set_change(view, path.to_string(), PathChange::Upsert(entry), now);
    }
}

/// `mkdir(path)`: create a directory entry. Fails if the parent is missing
/// or the name already exists.
pub fn mkdir(
    graph: &mut ViewGraph,
    view: ViewId,
    path: &str,
    ctx_uid: u32,
    ctx_gid: u32,
    now: u64,
    limit: u32,
) -> Result<()> {
    let normalized = normalize(path)?;
    require_parent_dir(graph, view, &normalized, limit)?;
    if exists(graph, view, &normalized, limit) {
        return Err(EngineError::Exists(normalized));
    }
    let entry = Entry {
        path: normalized.clone(),
        kind: EntryKind::Directory,
        owner: ctx_uid,
        group: ctx_gid,
        perms: DEFAULT_PERMS,
        created_ts: now,
        link_count: 1,
        hidden: false,
    };
    graph.set_change(view, normalized, PathChange::Upsert(entry), now);
    Ok(())
}

/// `create-file`/`overwrite` (spec §4.2): puts `bytes` into the pool and
/// binds `path` to the resulting blob. If `path` already resolves to a
/// file, the previous blob is released (but never erased) and the entry
/// is rebound — this is `overwrite`. If `path` is new, this is
/// `create-file`. Returns whether the path already existed, and the
/// growth in pool bytes this call caused (0 when the content was already
/// stored under another name — the pool is deduplicated, and `release`
/// never shrinks it, so `bytes.len()` is only a real delta the first time
/// a given hash is seen).
pub fn write_file(
    graph: &mut ViewGraph,
    pool: &mut BlobPool,
    view: ViewId,
    path: &str,
    bytes: &[u8],
    ctx_uid: u32,
    ctx_gid: u32,
    now: u64,
    limit: u32,
) -> Result<(bool, i64)> {
    let normalized = normalize(path)?;
    require_parent_dir(graph, view, &normalized, limit)?;
    let previous = lookup_raw(graph, view, &normalized).filter(|e| !e.hidden);
    if let Some(existing) = &previous {
        if matches!(existing.kind, EntryKind::Directory) {
            return Err(EngineError::IsADirectory(normalized));
        }
    }
    let bytes_delta = if pool.contains(&BlobPool::hash_of(bytes)) {
        0
    } else {
        bytes.len() as i64
    };
    let new_blob = pool.put(bytes);
    if let Some(existing) = &previous {
        let old_blob = match &existing.kind {
            EntryKind::File { blob } | EntryKind::HardLink { blob } => Some(*blob),
            _ => None,
        };
        if let Some(old_blob) = old_blob {
            pool.release(&old_blob)?;
        }
    }
    let existed = previous.is_some();
    let (owner, group, perms) = previous
        .as_ref()
        .map(|e| (e.owner, e.group, e.perms))
        .unwrap_or((ctx_uid, ctx_gid, DEFAULT_PERMS));
    let entry = Entry {
        path: normalized.clone(),
        kind: EntryKind::File { blob: new_blob },
        owner,
        group,
        perms,
        created_ts: previous.as_ref().map(|e| e.created_ts).unwrap_or(now),
        link_count: 1,
        hidden: false,
    };
    graph.set_change(view, normalized.clone(), PathChange::Upsert(entry), now);
    restamp_link_count(graph, view, &normalized, &new_blob, now);
    Ok((existed, bytes_delta))
}

/// `append(path, bytes)`: reads the current content, concatenates, and
/// rebinds to the resulting blob. The previous blob remains live while any
/// ancestor view still references it (spec §4.2). Returns the growth in
/// pool bytes the call caused (the full combined blob, or 0 if that exact
/// combined content already existed under another name).
pub fn append(
    graph: &mut ViewGraph,
    pool: &mut BlobPool,
    view: ViewId,
    path: &str,
    bytes: &[u8],
    now: u64,
    limit: u32,
) -> Result<i64> {
    let normalized = normalize(path)?;
    let existing = resolve(graph, view, &normalized, limit)?;
    let old_blob = match &existing.kind {
        EntryKind::File { blob } | EntryKind::HardLink { blob } => *blob,
        EntryKind::Directory => return Err(EngineError::IsADirectory(normalized)),
        EntryKind::Symlink { .. } => {
            return Err(EngineError::InvalidArgument(format!(
                "{normalized} is a symlink"
            )))
        }
    };
    let mut combined = pool.get(&old_blob)?.to_vec();
    combined.extend_from_slice(bytes);
    let bytes_delta = if pool.contains(&BlobPool::hash_of(&combined)) {
        0
    } else {
        combined.len() as i64
    };
    let new_blob = pool.put(&combined);
    pool.release(&old_blob)?;
    let entry = Entry {
        kind: EntryKind::File { blob: new_blob },
        ..existing
    };
    graph.set_change(view, normalized.clone(), PathChange::Upsert(entry), now);
    restamp_link_count(graph, view, &normalized, &new_blob, now);
    Ok(bytes_delta)
}

/// `hide(path)`: masks the entry from lookup/list while preserving
/// ancestor views (spec §4.2, §9 glossary).
pub fn hide(graph: &mut ViewGraph, view: ViewId, path: &str, now: u64, limit: u32) -> Result<()> {
    let normalized = normalize(path)?;
    resolve(graph, view, &normalized, limit)?;
    graph.set_change(view, normalized, PathChange::Hide, now);
    Ok(())
}

/// `move(src, dst)`: atomic rename within one view. Fails if `src` is
/// missing or `dst` already exists.
pub fn move_entry(
    graph: &mut ViewGraph,
    view: ViewId,
    src: &str,
    dst: &str,
    now: u64,
    limit: u32,
) -> Result<()> {
    let src_norm = normalize(src)?;
    let dst_norm = normalize(dst)?;
    let entry = resolve(graph, view, &src_norm, limit)?;
    if exists(graph, view, &dst_norm, limit) {
        return Err(EngineError::Exists(dst_norm));
    }
    require_parent_dir(graph, view, &dst_norm, limit)?;
    let moved = Entry {
        path: dst_norm.clone(),
        ..entry
    };
    graph.set_change(view, src_norm, PathChange::Hide, now);
    graph.set_change(view, dst_norm, PathChange::Upsert(moved), now);
    Ok(())
}

/// `copy(src, dst)`: zero-copy — `dst` points at the same blob identity as
/// `src`, with the pool refcount increased, and a new entry created (spec
/// Testable Property 7: pool size is unchanged).
pub fn copy(
    graph: &mut ViewGraph,
    pool: &mut BlobPool,
    view: ViewId,
    src: &str,
    dst: &str,
    now: u64,
    limit: u32,
) -> Result<()> {
    let src_norm = normalize(src)?;
    let dst_norm = normalize(dst)?;
    let entry = resolve(graph, view, &src_norm, limit)?;
    let blob = match &entry.kind {
        EntryKind::File { blob } | EntryKind::HardLink { blob } => *blob,
        EntryKind::Directory => return Err(EngineError::IsADirectory(src_norm)),
        EntryKind::Symlink { .. } => {
            return Err(EngineError::InvalidArgument(format!("{src_norm} is a symlink")))
        }
    };
    if exists(graph, view, &dst_norm, limit) {
        return Err(EngineError::Exists(dst_norm));
    }
    require_parent_dir(graph, view, &dst_norm, limit)?;
    pool.retain(&blob)?;
    let copied = Entry {
        path: dst_norm.clone(),
        kind: EntryKind::File { blob },
        owner: entry.owner,
        group: entry.group,
        perms: entry.perms,
        created_ts: now,
        link_count: 1,
        hidden: false,
    };
    graph.set_change(view, dst_norm, PathChange::Upsert(copied), now);
    Ok(())
}

/// `hardlink(src, dst)`: both entries share one blob identity; both
/// entries' link count is recomputed across the current view.
pub fn hardlink(
    graph: &mut ViewGraph,
    pool: &mut BlobPool,
    view: ViewId,
    src: &str,
    dst: &str,
    now: u64,
    limit: u32,
) -> Result<()> {
    let src_norm = normalize(src)?;
    let dst_norm = normalize(dst)?;
    let entry = resolve(graph, view, &src_norm, limit)?;
    let blob = match &entry.kind {
        EntryKind::File { blob } | EntryKind::HardLink { blob } => *blob,
        EntryKind::Directory => return Err(EngineError::IsADirectory(src_norm)),
        EntryKind::Symlink { .. } => {
            return Err(EngineError::InvalidArgument(format!("{src_norm} is a symlink")))
        }
    };
    if exists(graph, view, &dst_norm, limit) {
        return Err(EngineError::Exists(dst_norm));
    }
    require_parent_dir(graph, view, &dst_norm, limit)?;
    pool.retain(&blob)?;
    let linked = Entry {
        path: dst_norm.clone(),
        kind: EntryKind::HardLink { blob },
        owner: entry.owner,
        group: entry.group,
        perms: entry.perms,
        created_ts: now,
        link_count: 1,
        hidden: false,
    };
    graph.set_change(view, dst_norm.clone(), PathChange::Upsert(linked), now);
    restamp_link_count(graph, view, &dst_norm, &blob, now);
    restamp_link_count(graph, view, &src_norm, &blob, now);
    Ok(())
}

/// `symlink(target, path)`: stores `target` verbatim; it is not resolved
/// at creation time.
pub fn symlink(
    graph: &mut ViewGraph,
    view: ViewId,
    target: &str,
    path: &str,
    ctx_uid: u32,
    ctx_gid: u32,
    now: u64,
    limit: u32,
) -> Result<()> {
    let normalized = normalize(path)?;
    if exists(graph, view, &normalized, limit) {
        return Err(EngineError::Exists(normalized));
    }
    require_parent_dir(graph, view, &normalized, limit)?;
    let entry = Entry {
        path: normalized.clone(),
        kind: EntryKind::Symlink {
            target: target.to_string(),
        },
        owner: ctx_uid,
        group: ctx_gid,
        perms: DEFAULT_PERMS,
        created_ts: now,
        link_count: 1,
        hidden: false,
    };
    graph.set_change(view, normalized, PathChange::Upsert(entry), now);
    Ok(())
}

/// `chmod(path, perms)`: mutates the permission bits on the entry in the
/// current view.
pub fn chmod(graph: &mut ViewGraph, view: ViewId, path: &str, perms: Perms, now: u64) -> Result<()> {
    let normalized = normalize(path)?;
    let mut entry = lookup_raw(graph, view, &normalized)
        .filter(|e| !e.hidden)
        .ok_or_else(|| EngineError::NotFound(normalized.clone()))?;
    entry.perms = perms;
    graph.set_change(view, normalized, PathChange::Upsert(entry), now);
    Ok(())
}

/// `chown(path, owner)`: mutates the owning user id on the entry in the
/// current view.
pub fn chown(graph: &mut ViewGraph, view: ViewId, path: &str, owner: u32, now: u64) -> Result<()> {
    let normalized = normalize(path)?;
    let mut entry = lookup_raw(graph, view, &normalized)
        .filter(|e| !e.hidden)
        .ok_or_else(|| EngineError::NotFound(normalized.clone()))?;
    entry.owner = owner;
    graph.set_change(view, normalized, PathChange::Upsert(entry), now);
    Ok(())
}

/// Evaluates the permission model (spec §4.2) for `entry` against
/// `(uid, caps)`: the kernel capability always wins; otherwise the owner
/// bits govern for the owning uid and the "other" bits govern everyone
/// else (a minimal but faithful Unix-like reduction — groups collapse into
/// "other" since the Engine does not model group membership beyond the
/// single `gid` on the context and entry).
pub fn check_permission(entry: &Entry, uid: u32, gid: u32, caps: u32, write: bool) -> bool {
    if caps & crate::context::CAP_KERNEL != 0 {
        return true;
    }
    let bits = if entry.owner == uid {
        (entry.perms >> 6) & 0o7
    } else if entry.group == gid {
        (entry.perms >> 3) & 0o7
    } else {
        entry.perms & 0o7
    };
    if write {
        bits & 0o2 != 0
    } else {
        bits & 0o4 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::ViewGraph;

    #[test]
    fn create_read_and_hide_round_trip() {
        let mut graph = ViewGraph::new(0);
        let mut pool = BlobPool::new();
        let view = graph.head();
        write_file(&mut graph, &mut pool, view, "/a.txt", b"hello", 1, 1, 0, SYMLINK_DEPTH_LIMIT).unwrap();
        let s = stat(&graph, &pool, view, "/a.txt", SYMLINK_DEPTH_LIMIT).unwrap();
        assert_eq!(s.length, Some(5));
        hide(&mut graph, view, "/a.txt", 1, SYMLINK_DEPTH_LIMIT).unwrap();
        assert!(stat(&graph, &pool, view, "/a.txt", SYMLINK_DEPTH_LIMIT).is_err());
    }

    #[test]
    fn symlink_loop_is_detected() {
        let mut graph = ViewGraph::new(0);
        let view = graph.head();
        symlink(&mut graph, view, "/b", "/a", 1, 1, 0, SYMLINK_DEPTH_LIMIT).unwrap();
        symlink(&mut graph, view, "/a", "/b", 1, 1, 0, SYMLINK_DEPTH_LIMIT).unwrap();
        assert!(matches!(
            resolve(&graph, view, "/a", SYMLINK_DEPTH_LIMIT),
            Err(EngineError::LoopDetected(_))
        ));
    }
}
