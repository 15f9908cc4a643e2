//! Operations API: the public façade through which every filesystem
//! mutation and query passes, gluing the View Graph, Namespace Tree,
//! Policy Engine, and Quota Accountant together (spec §4, §6.1).
//!
//! Every mutation follows the same shape: make sure the current branch's
//! head is writable, run the Policy Engine check, run the Unix-style
//! permission check against the resolved entry where one already exists,
//! perform the namespace mutation, then charge the Quota Accountant for
//! the resulting byte/ref/view delta. A failure at any step leaves
//! everything — namespace, pool, quota usage — as it was; nothing here
//! partially applies (spec §4.6, §7).

use crate::branches::{self, BranchId, MergeOutcome};
use crate::context::AccessContext;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::namespace::{self, EntryStat};
use crate::policy::{AuditRing, PolicyFlags, PolicyKind};
use crate::quota::{QuotaLimits, QuotaScope, QuotaUsage};
use crate::views::{ChangeKind, ViewId};

fn branch_scope(id: BranchId) -> QuotaScope {
    QuotaScope::Branch(id)
}

impl Engine {
    /// Ensures the current branch's head view is writable, creating a new
    /// child view if it was frozen, and keeps the branch pointer and view
    /// cursor in sync either way.
    fn begin_write(&mut self, now: u64) -> ViewId {
        self.views.switch(self.branches.current().head_view).ok();
        let view = self.views.ensure_writable(now);
        self.branches.set_current_head(view);
        view
    }

    fn symlink_limit(&self) -> u32 {
        self.config.symlink_depth_limit
    }

    /// Checks the Unix-style entry permission for `path`, raising the
    /// synthetic `fs-perm-denied` policy check (always denied, always
    /// audited — spec §7) on failure instead of returning the error bare.
    fn require_write_permission(
        &mut self,
        view: ViewId,
        path: &str,
        ctx: &AccessContext,
        now: u64,
    ) -> Result<()> {
        let limit = self.symlink_limit();
        if let Ok(entry) = namespace::resolve(&self.views, view, path, limit) {
            if !namespace::check_permission(&entry, ctx.uid, ctx.gid, ctx.caps, true) {
                self.policy
                    .enforce(PolicyKind::FsPermDenied, ctx, path, now)
                    .ok();
                return Err(EngineError::PermDenied(format!(
                    "{path} not writable by uid {}",
                    ctx.uid
                )));
            }
        }
        Ok(())
    }

    /// Fails with `QuotaExceeded` if applying the delta would violate
    /// either the current branch's limit or the volume's, raising the
    /// synthetic `fs-quota-exceeded` policy check (always denied, always
    /// audited — spec §7, Scenario S5) on failure. Callers run this before
    /// a namespace mutation that might itself fail for unrelated reasons
    /// (`Exists`, `NotFound`, ...) so a quota violation is never discovered
    /// only after the mutation already committed.
    fn precheck_quota(
        &mut self,
        ctx: &AccessContext,
        detail: &str,
        now: u64,
        bytes_delta: i64,
        refs_delta: i64,
        views_delta: i64,
    ) -> Result<()> {
        let branch_id = self.branches.current().id;
        let reason = self
            .quota
            .would_exceed(branch_scope(branch_id), bytes_delta, refs_delta, views_delta)
            .or_else(|| {
                self.quota
                    .would_exceed(QuotaScope::Volume, bytes_delta, refs_delta, views_delta)
            });
        if let Some(reason) = reason {
            self.policy
                .enforce(PolicyKind::FsQuotaExceeded, ctx, detail, now)
                .ok();
            return Err(EngineError::QuotaExceeded(reason));
        }
        Ok(())
    }

    /// Commits a delta already validated by [`Self::precheck_quota`]
    /// against the current branch's usage and the volume's.
    fn charge(&mut self, bytes_delta: i64, refs_delta: i64, views_delta: i64) -> Result<()> {
        let branch_id = self.branches.current().id;
        self.quota
            .charge(branch_scope(branch_id), bytes_delta, refs_delta, views_delta)
    }

    /// `mkdir(path)`.
    pub fn mkdir(&mut self, ctx: &AccessContext, path: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, path, now)?;
        let view = self.begin_write(now);
        let limit = self.symlink_limit();
        namespace::mkdir(&mut self.views, view, path, ctx.uid, ctx.gid, now, limit)?;
        self.charge(0, 0, 0)
    }

    /// `create-file`/`overwrite`. Classified `fs-write` when `path` is new
    /// and `fs-overwrite` when it already resolves to a file — the latter
    /// is always audited even though it is also always allowed, since the
    /// prior blob's retention (not deletion) is what preserves version
    /// history (spec §4.2, §4.5). Predicts the pool-byte growth this call
    /// would cause (0 if the content is already stored under another
    /// name) and charges the Quota Accountant with that prediction before
    /// touching the pool or the namespace, so a denial never leaves a
    /// partially-applied write behind (spec §4.6).
    pub fn write_file(
        &mut self,
        ctx: &AccessContext,
        path: &str,
        bytes: &[u8],
        now: u64,
    ) -> Result<()> {
        let limit = self.symlink_limit();
        let overwriting = matches!(
            namespace::resolve(&self.views, self.branches.current().head_view, path, limit),
            Ok(entry) if !matches!(entry.kind, namespace::EntryKind::Directory)
        );
        let kind = if overwriting { PolicyKind::FsOverwrite } else { PolicyKind::FsWrite };
        self.policy.enforce(kind, ctx, path, now)?;
        let view = self.begin_write(now);
        self.require_write_permission(view, path, ctx, now)?;
        let predicted_delta = if self.pool.contains(&crate::pool::BlobPool::hash_of(bytes)) {
            0
        } else {
            bytes.len() as i64
        };
        self.precheck_quota(ctx, path, now, predicted_delta, 1, 0)?;
        namespace::write_file(&mut self.views, &mut self.pool, view, path, bytes, ctx.uid, ctx.gid, now, limit)?;
        self.charge(predicted_delta, 1, 0)
    }

    /// `append(path, bytes)`. Reads the existing content to predict the
    /// combined blob's effect on pool size and charges for it before
    /// mutating anything, for the same reason as [`Self::write_file`].
    pub fn append(&mut self, ctx: &AccessContext, path: &str, bytes: &[u8], now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, path, now)?;
        let view = self.begin_write(now);
        self.require_write_permission(view, path, ctx, now)?;
        let limit = self.symlink_limit();
        let existing = namespace::resolve(&self.views, view, path, limit)?;
        let old_blob = match existing.kind {
            namespace::EntryKind::File { blob } | namespace::EntryKind::HardLink { blob } => blob,
            namespace::EntryKind::Directory => return Err(EngineError::IsADirectory(path.to_string())),
            namespace::EntryKind::Symlink { .. } => {
                return Err(EngineError::InvalidArgument(format!("{path} is a symlink")))
            }
        };
        let mut combined = self.pool.get(&old_blob)?.to_vec();
        combined.extend_from_slice(bytes);
        let predicted_delta = if self.pool.contains(&crate::pool::BlobPool::hash_of(&combined)) {
            0
        } else {
            combined.len() as i64
        };
        self.precheck_quota(ctx, path, now, predicted_delta, 1, 0)?;
        namespace::append(&mut self.views, &mut self.pool, view, path, bytes, now, limit)?;
        self.charge(predicted_delta, 1, 0)
    }

    /// `hide(path)`.
    pub fn hide(&mut self, ctx: &AccessContext, path: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsHide, ctx, path, now)?;
        let view = self.begin_write(now);
        self.require_write_permission(view, path, ctx, now)?;
        let limit = self.symlink_limit();
        namespace::hide(&mut self.views, view, path, now, limit)
    }

    /// `delete(path)`: the Engine has no true delete — the Policy Engine
    /// always classifies `delete` as `fs-delete`, whose fixed verdict is
    /// `transform`, and the transform routes to [`Self::hide`] (spec §4.5,
    /// §4.8, §7, Testable Property 8, Scenario S1). The `fs-delete` check
    /// itself is recorded in the audit ring with verdict `transform`
    /// before the hide's own `fs-hide` check runs.
    pub fn delete(&mut self, ctx: &AccessContext, path: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsDelete, ctx, path, now)?;
        self.hide(ctx, path, now)
    }

    /// `move(src, dst)`.
    pub fn move_entry(&mut self, ctx: &AccessContext, src: &str, dst: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, src, now)?;
        let view = self.begin_write(now);
        self.require_write_permission(view, src, ctx, now)?;
        let limit = self.symlink_limit();
        namespace::move_entry(&mut self.views, view, src, dst, now, limit)
    }

    /// `copy(src, dst)`.
    pub fn copy(&mut self, ctx: &AccessContext, src: &str, dst: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, dst, now)?;
        let view = self.begin_write(now);
        self.precheck_quota(ctx, dst, now, 0, 1, 0)?;
        let limit = self.symlink_limit();
        namespace::copy(&mut self.views, &mut self.pool, view, src, dst, now, limit)?;
        self.charge(0, 1, 0)
    }

    /// `hardlink(src, dst)`.
    pub fn hardlink(&mut self, ctx: &AccessContext, src: &str, dst: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, dst, now)?;
        let view = self.begin_write(now);
        self.precheck_quota(ctx, dst, now, 0, 1, 0)?;
        let limit = self.symlink_limit();
        namespace::hardlink(&mut self.views, &mut self.pool, view, src, dst, now, limit)?;
        self.charge(0, 1, 0)
    }

    /// `symlink(target, path)`.
    pub fn symlink(&mut self, ctx: &AccessContext, target: &str, path: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, path, now)?;
        let view = self.begin_write(now);
        let limit = self.symlink_limit();
        namespace::symlink(&mut self.views, view, target, path, ctx.uid, ctx.gid, now, limit)
    }

    /// `chmod(path, perms)`.
    pub fn chmod(&mut self, ctx: &AccessContext, path: &str, perms: namespace::Perms, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsWrite, ctx, path, now)?;
        let view = self.begin_write(now);
        self.require_write_permission(view, path, ctx, now)?;
        namespace::chmod(&mut self.views, view, path, perms, now)
    }

    /// `chown(path, owner)`. Requires `CAP_FS_ADMIN` unless the caller
    /// already owns the entry.
    pub fn chown(&mut self, ctx: &AccessContext, path: &str, owner: u32, now: u64) -> Result<()> {
        let limit = self.symlink_limit();
        let entry = namespace::resolve(&self.views, self.branches.current().head_view, path, limit)?;
        if entry.owner != ctx.uid {
            self.policy.enforce(PolicyKind::FsAdmin, ctx, path, now)?;
        } else {
            self.policy.enforce(PolicyKind::FsWrite, ctx, path, now)?;
        }
        let view = self.begin_write(now);
        namespace::chown(&mut self.views, view, path, owner, now)
    }

    /// `stat(path)`.
    pub fn stat(&mut self, ctx: &AccessContext, path: &str, now: u64) -> Result<EntryStat> {
        self.policy.enforce(PolicyKind::FsRead, ctx, path, now)?;
        let limit = self.symlink_limit();
        namespace::stat(&self.views, &self.pool, self.branches.current().head_view, path, limit)
    }

    /// `readlink(path)`.
    pub fn readlink(&mut self, ctx: &AccessContext, path: &str, now: u64) -> Result<String> {
        self.policy.enforce(PolicyKind::FsRead, ctx, path, now)?;
        namespace::readlink(&self.views, self.branches.current().head_view, path)
    }

    /// `list(path)`.
    pub fn list(&mut self, ctx: &AccessContext, path: &str, now: u64) -> Result<Vec<EntryStat>> {
        self.policy.enforce(PolicyKind::FsRead, ctx, path, now)?;
        let limit = self.symlink_limit();
        namespace::list(&self.views, &self.pool, self.branches.current().head_view, path, limit)
    }

    /// `find(name_pattern)`.
    pub fn find(&mut self, ctx: &AccessContext, name_pattern: &str, now: u64) -> Result<Vec<String>> {
        self.policy.enforce(PolicyKind::FsRead, ctx, name_pattern, now)?;
        Ok(namespace::find(&self.views, self.branches.current().head_view, name_pattern))
    }

    /// `grep(text_pattern)`.
    pub fn grep(
        &mut self,
        ctx: &AccessContext,
        text_pattern: &str,
        now: u64,
    ) -> Result<Vec<(String, usize)>> {
        self.policy.enforce(PolicyKind::FsRead, ctx, text_pattern, now)?;
        namespace::grep(&self.views, &self.pool, self.branches.current().head_view, text_pattern)
    }

    /// `snapshot(label)`: freezes the current head under `label` and
    /// returns the id of the resulting (now immutable) view.
    pub fn snapshot(&mut self, ctx: &AccessContext, label: &str, now: u64) -> Result<ViewId> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, label, now)?;
        self.precheck_quota(ctx, label, now, 0, 0, 1)?;
        self.views.switch(self.branches.current().head_view).ok();
        let frozen = self.views.snapshot(label, now);
        self.branches.set_current_head(self.views.head());
        self.charge(0, 0, 1)?;
        Ok(frozen)
    }

    /// `view-diff(a, b)`.
    pub fn view_diff(&self, a: ViewId, b: ViewId) -> Vec<(String, ChangeKind)> {
        self.views.diff(a, b)
    }

    /// `branch-create(name)`.
    pub fn branch_create(&mut self, ctx: &AccessContext, name: &str, now: u64) -> Result<BranchId> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, name, now)?;
        self.precheck_quota(ctx, name, now, 0, 0, 0)?;
        let id = self.branches.create(name, now)?;
        self.charge(0, 0, 0)?;
        Ok(id)
    }

    /// `branch-switch(name)`.
    pub fn branch_switch(&mut self, ctx: &AccessContext, name: &str, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, name, now)?;
        let head = self.branches.switch(name)?;
        self.views.switch(head)
    }

    /// `branch-merge(source, label)`.
    pub fn branch_merge(
        &mut self,
        ctx: &AccessContext,
        source: &str,
        label: &str,
        now: u64,
    ) -> Result<MergeOutcome> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, source, now)?;
        self.precheck_quota(ctx, source, now, 0, 0, 1)?;
        let outcome = branches::merge(&mut self.views, &mut self.branches, source, label, now)?;
        self.views.switch(outcome.new_head)?;
        self.charge(0, 0, 1)?;
        Ok(outcome)
    }

    /// `quota-set(scope, limits)`.
    pub fn quota_set(&mut self, ctx: &AccessContext, scope: QuotaScope, limits: QuotaLimits, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, "quota-set", now)?;
        self.quota.set_limits(scope, limits);
        Ok(())
    }

    /// `quota-get(scope)`.
    pub fn quota_get(&self, scope: QuotaScope) -> (QuotaLimits, QuotaUsage) {
        (self.quota.limits(scope), self.quota.usage(scope))
    }

    /// `policy-set-flags(flags)`.
    pub fn policy_set_flags(&mut self, ctx: &AccessContext, flags: PolicyFlags, now: u64) -> Result<()> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, "policy-set-flags", now)?;
        self.policy.set_flags(flags);
        Ok(())
    }

    /// `audit-log()`.
    pub fn audit_log(&self) -> &AuditRing {
        self.policy.audit_log()
    }

    /// `compact()`: reclaims blobs with zero refcount that no view's
    /// namespace still reaches. Optional, never called implicitly
    /// (spec §4.1, §9).
    pub fn compact(&mut self, ctx: &AccessContext, now: u64) -> Result<usize> {
        self.policy.enforce(PolicyKind::FsAdmin, ctx, "compact", now)?;
        let limit = self.symlink_limit();
        let mut reachable = std::collections::HashSet::new();
        for view in self.views.list() {
            for path in self.views.known_paths(view.id) {
                if let Ok(entry) = namespace::resolve(&self.views, view.id, &path, limit) {
                    match entry.kind {
                        namespace::EntryKind::File { blob } | namespace::EntryKind::HardLink { blob } => {
                            reachable.insert(blob);
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(self.pool.compact(&reachable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Config;

    #[test]
    fn write_then_stat_round_trips() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine.write_file(&ctx, "/a.txt", b"hello", 0).unwrap();
        let s = engine.stat(&ctx, "/a.txt", 1).unwrap();
        assert_eq!(s.length, Some(5));
    }

    #[test]
    fn hide_then_stat_is_not_found() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine.write_file(&ctx, "/a.txt", b"hello", 0).unwrap();
        engine.hide(&ctx, "/a.txt", 1).unwrap();
        assert!(engine.stat(&ctx, "/a.txt", 2).is_err());
    }

    #[test]
    fn snapshot_then_diff_shows_hide() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine.write_file(&ctx, "/a.txt", b"hello", 0).unwrap();
        engine.hide(&ctx, "/a.txt", 1).unwrap();
        let current = engine.branches.current().head_view;
        let diff = engine.view_diff(0, current);
        assert_eq!(diff, vec![("/a.txt".to_string(), ChangeKind::Hidden)]);
    }

    #[test]
    fn unprivileged_hide_is_denied() {
        let mut engine = Engine::new(Config::new());
        let root = AccessContext::root();
        engine.write_file(&root, "/a.txt", b"hello", 0).unwrap();
        let user = AccessContext::new(1000, 1000, 0);
        assert!(matches!(
            engine.hide(&user, "/a.txt", 1),
            Err(EngineError::DeniedByPolicy(_))
        ));
    }

    #[test]
    fn delete_transforms_into_hide_and_is_audited() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine.write_file(&ctx, "/a.txt", b"hello", 0).unwrap();
        engine.delete(&ctx, "/a.txt", 1).unwrap();
        assert!(engine.stat(&ctx, "/a.txt", 2).is_err());
        let entry = engine
            .audit_log()
            .entries()
            .find(|e| matches!(e.kind, PolicyKind::FsDelete))
            .expect("fs-delete audit entry");
        assert!(matches!(entry.verdict, crate::policy::Verdict::Transform));
    }

    #[test]
    fn overwrite_is_audited_but_allowed() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine.write_file(&ctx, "/a.txt", b"v1", 0).unwrap();
        engine.write_file(&ctx, "/a.txt", b"v2", 1).unwrap();
        let s = engine.stat(&ctx, "/a.txt", 2).unwrap();
        assert_eq!(s.length, Some(2));
        let entry = engine
            .audit_log()
            .entries()
            .find(|e| matches!(e.kind, PolicyKind::FsOverwrite))
            .expect("fs-overwrite audit entry");
        assert!(matches!(entry.verdict, crate::policy::Verdict::Audit));
    }

    #[test]
    fn quota_exceeded_is_denied_and_audited() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine
            .quota_set(
                &ctx,
                QuotaScope::Volume,
                QuotaLimits {
                    max_bytes: Some(1),
                    max_refs: None,
                    max_views: None,
                },
                0,
            )
            .unwrap();
        assert!(engine.write_file(&ctx, "/too-big.txt", b"hello", 1).is_err());
        let entry = engine
            .audit_log()
            .entries()
            .find(|e| matches!(e.kind, PolicyKind::FsQuotaExceeded))
            .expect("fs-quota-exceeded audit entry");
        assert!(matches!(entry.verdict, crate::policy::Verdict::Deny));
    }

    #[test]
    fn branch_and_merge_round_trip() {
        let mut engine = Engine::new(Config::new());
        let ctx = AccessContext::root();
        engine.write_file(&ctx, "/base", b"x", 0).unwrap();
        engine.branch_create(&ctx, "feature", 1).unwrap();
        engine.branch_switch(&ctx, "feature", 1).unwrap();
        engine.write_file(&ctx, "/feature-only", b"f", 2).unwrap();
        engine.branch_switch(&ctx, "main", 2).unwrap();
        let outcome = engine.branch_merge(&ctx, "feature", "merge1", 3).unwrap();
        assert!(outcome.conflicts.is_empty());
        assert!(engine.stat(&ctx, "/feature-only", 3).is_ok());
    }
}
