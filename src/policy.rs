//! Policy Engine: a closed set of checks consulted before every mutation,
//! plus a fixed-capacity audit trail (spec §3.5, §4.5).

use serde::{Deserialize, Serialize};

use crate::context::AccessContext;
use crate::error::Result;

/// Minimum capacity the audit ring must support (spec §3.5).
pub const MIN_AUDIT_CAPACITY: usize = 128;

/// The closed set of operation categories the Policy Engine classifies
/// every call into, spanning the filesystem surface plus the memory and
/// process-control surfaces a uniform policy core also governs (spec
/// §3.5, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// A read of file content or metadata.
    FsRead,
    /// A write, create, or rename of a file or directory (new path only —
    /// overwriting an existing one is classified [`PolicyKind::FsOverwrite`]).
    FsWrite,
    /// A hide (soft-delete) of an entry.
    FsHide,
    /// Filesystem administration: quotas, branches, permission changes on
    /// entries the caller does not own.
    FsAdmin,
    /// `fs-delete`: always transformed into a hide (spec §4.5, §4.8,
    /// Testable Property 8 — the Engine has no true delete).
    FsDelete,
    /// `fs-truncate`: always denied (in-place truncate would discard
    /// content rather than version it; spec Non-goals, §4.5).
    FsTruncate,
    /// `fs-overwrite`: rebinding an existing path to a new blob. Always
    /// allowed, but always audited — the prior blob's retention is what
    /// preserves version history (spec §4.2, §4.5).
    FsOverwrite,
    /// Synthetic: a Unix-style entry permission check failed. Raised by
    /// the Operations API, not requested directly; always denied and
    /// always audited (spec §4.5, §7).
    FsPermDenied,
    /// Synthetic: a quota check failed. Raised by the Operations API
    /// before a mutation commits; always denied and always audited (spec
    /// §4.5, §7, Scenario S5).
    FsQuotaExceeded,
    /// Allocating or releasing memory on behalf of another process.
    MemManage,
    /// Overwriting another process's memory pages.
    MemKernel,
    /// Sending a termination or control signal to another process.
    ProcSignal,
    /// Administrative control over process lifecycle.
    ProcAdmin,
}

/// The closed set of outcomes a policy check can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The operation proceeds unmodified.
    Allow,
    /// The operation is rejected; the caller receives `DeniedByPolicy`.
    Deny,
    /// The operation proceeds, but under constraints the caller did not
    /// request (e.g. forcing `caps` down to `CAPS_USER`). Still an
    /// `Ok(())` from the Engine's point of view.
    Transform,
    /// The operation proceeds and is additionally recorded in the audit
    /// ring even when `audit_all` is off.
    Audit,
}

/// Runtime flags controlling how strictly the Policy Engine enforces and
/// how much it logs (spec §3.5).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PolicyFlags {
    /// When set, any kernel-domain operation (`Mem*`/`Proc*`) without the
    /// matching capability is denied outright instead of transformed.
    pub strict: bool,
    /// When set, every checked call is recorded in the audit ring, not
    /// just `Deny`/`Transform`/`Audit` verdicts.
    pub audit_all: bool,
    /// When set, each verdict is also emitted through `tracing`.
    pub verbose: bool,
}

/// One entry in the audit ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix epoch seconds when the check ran.
    pub ts: u64,
    /// The operation category checked.
    pub kind: PolicyKind,
    /// The outcome.
    pub verdict: Verdict,
    /// Caller uid at the time of the check.
    pub uid: u32,
    /// Free-form detail (path, target pid, requested capability, ...).
    pub detail: String,
}

/// A fixed-capacity, append-only ring buffer of audit entries. Once full,
/// the oldest entry is evicted to make room for the newest (spec §3.5
/// invariant: "never grows past its configured capacity, never reorders").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRing {
    capacity: usize,
    entries: std::collections::VecDeque<AuditEntry>,
}

impl AuditRing {
    /// Creates a ring with `capacity` slots, raised to
    /// [`MIN_AUDIT_CAPACITY`] if given a smaller value.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(MIN_AUDIT_CAPACITY),
            entries: std::collections::VecDeque::new(),
        }
    }

    /// Appends `entry`, evicting the oldest entry if the ring is full.
    pub fn push(&mut self, entry: AuditEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Every entry currently held, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured maximum capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-domain violation counters, surfaced through [`crate::engine::Engine::health`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyCounters {
    /// Denials against filesystem-domain checks.
    pub fs_denied: u64,
    /// Denials against memory-domain checks.
    pub mem_denied: u64,
    /// Denials against process-domain checks.
    pub proc_denied: u64,
    /// Checks that resulted in `Transform`.
    pub transformed: u64,
}

impl PolicyCounters {
    fn record(&mut self, kind: PolicyKind, verdict: Verdict) {
        match verdict {
            Verdict::Deny => match kind {
                PolicyKind::FsRead
                | PolicyKind::FsWrite
                | PolicyKind::FsHide
                | PolicyKind::FsAdmin
                | PolicyKind::FsDelete
                | PolicyKind::FsTruncate
                | PolicyKind::FsOverwrite
                | PolicyKind::FsPermDenied
                | PolicyKind::FsQuotaExceeded => self.fs_denied += 1,
                PolicyKind::MemManage | PolicyKind::MemKernel => self.mem_denied += 1,
                PolicyKind::ProcSignal | PolicyKind::ProcAdmin => self.proc_denied += 1,
            },
            Verdict::Transform => self.transformed += 1,
            _ => {}
        }
    }
}

fn required_capability(kind: PolicyKind) -> u32 {
    use crate::context::*;
    match kind {
        PolicyKind::FsRead => 0,
        PolicyKind::FsWrite => 0,
        PolicyKind::FsHide => CAP_HIDE_FILES,
        PolicyKind::FsAdmin => CAP_FS_ADMIN,
        // fs-delete/fs-truncate/fs-overwrite/fs-perm-denied/fs-quota-exceeded
        // carry a fixed verdict (see `check`) and never consult a capability.
        PolicyKind::FsDelete
        | PolicyKind::FsTruncate
        | PolicyKind::FsOverwrite
        | PolicyKind::FsPermDenied
        | PolicyKind::FsQuotaExceeded => 0,
        PolicyKind::MemManage => CAP_FREE_MEMORY,
        PolicyKind::MemKernel => CAP_KERNEL_MEMORY,
        PolicyKind::ProcSignal => CAP_SIGNAL_PROCESSES,
        PolicyKind::ProcAdmin => CAP_PROCESS_ADMIN,
    }
}

fn is_kernel_domain(kind: PolicyKind) -> bool {
    matches!(
        kind,
        PolicyKind::MemManage
            | PolicyKind::MemKernel
            | PolicyKind::ProcSignal
            | PolicyKind::ProcAdmin
    )
}

/// The Policy Engine: flags, audit ring, and violation counters, wired in
/// front of every Engine operation via [`PolicyEngine::check`] (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEngine {
    flags: PolicyFlags,
    ring: AuditRing,
    counters: PolicyCounters,
}

impl PolicyEngine {
    /// Builds a Policy Engine with the given flags and audit capacity.
    pub fn new(flags: PolicyFlags, audit_capacity: usize) -> Self {
        Self {
            flags,
            ring: AuditRing::new(audit_capacity),
            counters: PolicyCounters::default(),
        }
    }

    /// Current flags.
    pub fn flags(&self) -> PolicyFlags {
        self.flags
    }

    /// Replaces the current flags.
    pub fn set_flags(&mut self, flags: PolicyFlags) {
        self.flags = flags;
    }

    /// The audit ring, for inspection (`audit-log` operation, spec §6.1).
    pub fn audit_log(&self) -> &AuditRing {
        &self.ring
    }

    /// Violation counters, for `health`.
    pub fn counters(&self) -> &PolicyCounters {
        &self.counters
    }

    /// Evaluates `kind` against `ctx` and `detail`, recording the outcome
    /// per `flags`, and returns the verdict without itself raising an
    /// error — callers translate `Deny` into `EngineError::DeniedByPolicy`.
    ///
    /// The fs domain requires no special capability beyond the entry-level
    /// Unix permission check already performed by [`crate::namespace`],
    /// except hides and admin actions, which require `CAP_HIDE_FILES` /
    /// `CAP_FS_ADMIN`. The kernel domain (`Mem*`/`Proc*`) always requires
    /// its matching capability; under `strict` a missing capability is
    /// denied outright, otherwise it is transformed down to the `CAPS_USER`
    /// view of the call (the caller is expected to re-derive its context
    /// from the transform).
    ///
    /// `FsDelete`, `FsTruncate`, `FsOverwrite`, `FsPermDenied`, and
    /// `FsQuotaExceeded` carry a fixed verdict regardless of capability: the
    /// classification table is the rule, not a gate (spec §4.5).
    pub fn check(&mut self, kind: PolicyKind, ctx: &AccessContext, detail: &str, now: u64) -> Verdict {
        let verdict = match kind {
            PolicyKind::FsDelete => Verdict::Transform,
            PolicyKind::FsTruncate => Verdict::Deny,
            PolicyKind::FsOverwrite => Verdict::Audit,
            PolicyKind::FsPermDenied | PolicyKind::FsQuotaExceeded => Verdict::Deny,
            _ => {
                let required = required_capability(kind);
                if ctx.is_kernel() || required == 0 {
                    Verdict::Allow
                } else if ctx.has(required) {
                    Verdict::Allow
                } else if is_kernel_domain(kind) && self.flags.strict {
                    Verdict::Deny
                } else if is_kernel_domain(kind) {
                    Verdict::Transform
                } else {
                    Verdict::Deny
                }
            }
        };

        self.counters.record(kind, verdict);

        let should_log = self.flags.audit_all || !matches!(verdict, Verdict::Allow);
        if should_log {
            self.ring.push(AuditEntry {
                ts: now,
                kind,
                verdict,
                uid: ctx.uid,
                detail: detail.to_string(),
            });
        }
        if self.flags.verbose {
            tracing::info!(?kind, ?verdict, uid = ctx.uid, detail, "policy check");
        }
        verdict
    }

    /// Evaluates `kind` and raises `DeniedByPolicy` on `Deny`; returns the
    /// verdict otherwise (the common case used by the Operations API,
    /// which only needs to special-case `Transform`).
    pub fn enforce(
        &mut self,
        kind: PolicyKind,
        ctx: &AccessContext,
        detail: &str,
        now: u64,
    ) -> Result<Verdict> {
        match self.check(kind, ctx, detail, now) {
            Verdict::Deny => Err(crate::error::EngineError::DeniedByPolicy(format!(
                "{detail} ({kind:?})"
            ))),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AccessContext, CAPS_USER};

    #[test]
    fn unprivileged_mem_manage_is_transformed_by_default() {
        let mut engine = PolicyEngine::new(PolicyFlags::default(), 4);
        let ctx = AccessContext::new(1000, 1000, CAPS_USER);
        let verdict = engine.check(PolicyKind::MemManage, &ctx, "free(pid=7)", 0);
        assert_eq!(verdict, Verdict::Transform);
        assert_eq!(engine.counters().transformed, 1);
    }

    #[test]
    fn strict_mode_denies_instead_of_transforming() {
        let mut flags = PolicyFlags::default();
        flags.strict = true;
        let mut engine = PolicyEngine::new(flags, 4);
        let ctx = AccessContext::new(1000, 1000, CAPS_USER);
        let verdict = engine.check(PolicyKind::ProcSignal, &ctx, "kill(pid=7)", 0);
        assert_eq!(verdict, Verdict::Deny);
        assert_eq!(engine.counters().proc_denied, 1);
    }

    #[test]
    fn audit_ring_evicts_oldest_when_full() {
        let mut ring = AuditRing::new(0);
        assert_eq!(ring.capacity(), MIN_AUDIT_CAPACITY);
        for i in 0..(MIN_AUDIT_CAPACITY as u64 + 1) {
            ring.push(AuditEntry {
                ts: i,
                kind: PolicyKind::FsRead,
                verdict: Verdict::Allow,
                uid: 0,
                detail: String::new(),
            });
        }
        assert_eq!(ring.len(), MIN_AUDIT_CAPACITY);
        assert_eq!(ring.entries().next().unwrap().ts, 1);
    }

    #[test]
    fn fs_hide_without_capability_is_denied() {
        let mut engine = PolicyEngine::new(PolicyFlags::default(), 4);
        let ctx = AccessContext::new(1000, 1000, 0);
        let verdict = engine.check(PolicyKind::FsHide, &ctx, "/a.txt", 0);
        assert_eq!(verdict, Verdict::Deny);
    }

    #[test]
    fn fs_delete_is_always_transformed() {
        let mut engine = PolicyEngine::new(PolicyFlags::default(), 4);
        let ctx = AccessContext::root();
        let verdict = engine.check(PolicyKind::FsDelete, &ctx, "/a.txt", 0);
        assert_eq!(verdict, Verdict::Transform);
        let entry = engine.audit_log().entries().last().unwrap();
        assert_eq!(entry.verdict, Verdict::Transform);
    }

    #[test]
    fn fs_truncate_is_always_denied() {
        let mut engine = PolicyEngine::new(PolicyFlags::default(), 4);
        let ctx = AccessContext::root();
        let verdict = engine.check(PolicyKind::FsTruncate, &ctx, "/a.txt", 0);
        assert_eq!(verdict, Verdict::Deny);
    }

    #[test]
    fn fs_overwrite_is_always_audited() {
        let mut engine = PolicyEngine::new(PolicyFlags::default(), 4);
        let ctx = AccessContext::root();
        let verdict = engine.check(PolicyKind::FsOverwrite, &ctx, "/a.txt", 0);
        assert_eq!(verdict, Verdict::Audit);
        let entry = engine.audit_log().entries().last().unwrap();
        assert_eq!(entry.verdict, Verdict::Audit);
    }

    #[test]
    fn synthetic_denials_are_always_audited() {
        let mut engine = PolicyEngine::new(PolicyFlags::default(), 4);
        let ctx = AccessContext::root();
        assert_eq!(
            engine.check(PolicyKind::FsQuotaExceeded, &ctx, "/a.txt", 0),
            Verdict::Deny
        );
        assert_eq!(
            engine.check(PolicyKind::FsPermDenied, &ctx, "/a.txt", 0),
            Verdict::Deny
        );
        assert_eq!(engine.audit_log().len(), 2);
    }
}
