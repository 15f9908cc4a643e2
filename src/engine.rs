//! The Engine: wires the Blob Pool, View Graph, Branch Registry, Policy
//! Engine, and Quota Accountant together behind one configuration and
//! exposes health reporting (spec §2, §4).

use serde::{Deserialize, Serialize};

use crate::branches::BranchRegistry;
use crate::context::AccessContext;
use crate::error::Result;
use crate::policy::{PolicyEngine, PolicyFlags};
use crate::pool::BlobPool;
use crate::quota::QuotaAccountant;
use crate::views::ViewGraph;

/// Construction-time configuration for an [`Engine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Audit ring capacity (raised to [`crate::policy::MIN_AUDIT_CAPACITY`]
    /// if smaller).
    pub audit_capacity: usize,
    /// Initial Policy Engine flags.
    pub policy_flags: PolicyFlags,
    /// Timestamp used to create the root view and `main` branch.
    pub created_ts: u64,
    /// Sector size assumed by the on-disk format (spec §6.2). Stored for
    /// introspection and `health`; the wire format's sectors are fixed at
    /// [`crate::serialize::SECTOR_SIZE`] bytes, so a value that disagrees
    /// with it is rejected by [`Config::new`]'s caller rather than silently
    /// ignored.
    pub sector_size: usize,
    /// Maximum symlink indirection depth `namespace::resolve` will follow
    /// before reporting a loop (spec §4.2).
    pub symlink_depth_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audit_capacity: crate::policy::MIN_AUDIT_CAPACITY,
            policy_flags: PolicyFlags::default(),
            created_ts: 0,
            sector_size: crate::serialize::SECTOR_SIZE,
            symlink_depth_limit: crate::namespace::SYMLINK_DEPTH_LIMIT,
        }
    }
}

impl Config {
    /// Starts from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A strict preset: kernel-domain capability gaps are denied outright
    /// rather than transformed, and every policy check is audited.
    pub fn strict() -> Self {
        Self {
            policy_flags: PolicyFlags {
                strict: true,
                audit_all: true,
                verbose: false,
            },
            ..Self::default()
        }
    }

    /// A permissive preset: kernel-domain capability gaps are transformed
    /// down to the user capability set instead of denied, and only
    /// non-`Allow` verdicts are audited.
    pub fn permissive() -> Self {
        Self {
            policy_flags: PolicyFlags {
                strict: false,
                audit_all: false,
                verbose: false,
            },
            ..Self::default()
        }
    }

    /// Overrides the audit ring capacity.
    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    /// Overrides the initial policy flags.
    pub fn with_policy_flags(mut self, flags: PolicyFlags) -> Self {
        self.policy_flags = flags;
        self
    }

    /// Overrides the creation timestamp.
    pub fn with_created_ts(mut self, ts: u64) -> Self {
        self.created_ts = ts;
        self
    }

    /// Overrides the symlink dereference depth limit.
    pub fn with_symlink_depth_limit(mut self, limit: u32) -> Self {
        self.symlink_depth_limit = limit;
        self
    }
}

/// A single check result reported by [`Engine::health`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Name of the subsystem checked.
    pub name: String,
    /// True if the subsystem looks healthy.
    pub healthy: bool,
    /// Human-readable detail.
    pub detail: String,
}

/// Aggregate health report across every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// True only if every check passed.
    pub healthy: bool,
    /// Individual component checks.
    pub checks: Vec<HealthCheck>,
}

/// The top-level Engine, owning every component plus its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) pool: BlobPool,
    pub(crate) views: ViewGraph,
    pub(crate) branches: BranchRegistry,
    pub(crate) policy: PolicyEngine,
    pub(crate) quota: QuotaAccountant,
    pub(crate) context: AccessContext,
}

impl Engine {
    /// Creates a fresh Engine: an empty pool, a single root view, a `main`
    /// branch pointing at it, and a Policy Engine seeded from `config`.
    pub fn new(config: Config) -> Self {
        let views = ViewGraph::new(config.created_ts);
        let branches = BranchRegistry::new(views.head(), config.created_ts);
        let policy = PolicyEngine::new(config.policy_flags, config.audit_capacity);
        Self {
            config,
            pool: BlobPool::new(),
            views,
            branches,
            policy,
            quota: QuotaAccountant::new(),
            context: AccessContext::default(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `get-context`: the process-wide access context currently in effect
    /// (spec §5, §6.1).
    pub fn get_context(&self) -> AccessContext {
        self.context
    }

    /// `set-context`: replaces the process-wide access context (spec §5,
    /// §6.1). Does not itself check any capability — narrowing or widening
    /// the ambient context is a host-process concern, not one this Engine
    /// polices.
    pub fn set_context(&mut self, ctx: AccessContext) {
        self.context = ctx;
    }

    /// Read-only access to the View Graph, for callers that need to walk
    /// or resolve against it directly (e.g. the CLI's `cat`).
    pub fn view_graph(&self) -> &ViewGraph {
        &self.views
    }

    /// Read-only access to the Blob Pool.
    pub fn pool(&self) -> &BlobPool {
        &self.pool
    }

    /// The view the current branch's head points at.
    pub fn current_head(&self) -> crate::views::ViewId {
        self.branches.current().head_view
    }

    /// Runs a shallow self-check over every component and reports the
    /// result, in the style of a liveness probe: cheap, synchronous, and
    /// safe to call often.
    pub fn health(&self) -> HealthReport {
        let mut checks = Vec::new();

        checks.push(HealthCheck {
            name: "blob_pool".to_string(),
            healthy: true,
            detail: format!(
                "{} blobs, {} bytes",
                self.pool.blob_count(),
                self.pool.total_bytes()
            ),
        });

        let view_count = self.views.list().len();
        checks.push(HealthCheck {
            name: "view_graph".to_string(),
            healthy: view_count > 0,
            detail: format!("{view_count} views"),
        });

        let branch_count = self.branches.list().len();
        let has_main = self.branches.by_name("main").is_ok();
        checks.push(HealthCheck {
            name: "branch_registry".to_string(),
            healthy: has_main,
            detail: format!("{branch_count} branches"),
        });

        let counters = self.policy.counters();
        checks.push(HealthCheck {
            name: "policy_engine".to_string(),
            healthy: true,
            detail: format!(
                "fs_denied={} mem_denied={} proc_denied={} audit_len={}",
                counters.fs_denied,
                counters.mem_denied,
                counters.proc_denied,
                self.policy.audit_log().len()
            ),
        });

        checks.push(HealthCheck {
            name: "quota_accountant".to_string(),
            healthy: true,
            detail: format!(
                "volume_bytes={}",
                self.quota
                    .usage(crate::quota::QuotaScope::Volume)
                    .bytes
            ),
        });

        let healthy = checks.iter().all(|c| c.healthy);
        HealthReport { healthy, checks }
    }

    /// Serializes the full Engine state into a [`crate::serialize::VolumeSnapshot`].
    pub fn to_snapshot(&self) -> crate::serialize::VolumeSnapshot {
        crate::serialize::VolumeSnapshot {
            pool: self.pool.clone(),
            views: self.views.clone(),
            branches: self.branches.clone(),
            policy: self.policy.clone(),
            quota: self.quota.clone(),
            context: self.context,
        }
    }

    /// Rebuilds an Engine from a previously written snapshot.
    pub fn from_snapshot(config: Config, snapshot: crate::serialize::VolumeSnapshot) -> Self {
        Self {
            config,
            pool: snapshot.pool,
            views: snapshot.views,
            branches: snapshot.branches,
            policy: snapshot.policy,
            quota: snapshot.quota,
            context: snapshot.context,
        }
    }

    /// Persists the Engine's state to `device`.
    pub fn save(&self, device: &mut dyn crate::serialize::SectorDevice) -> Result<()> {
        crate::serialize::write_volume(device, &self.to_snapshot())
    }

    /// Loads an Engine's state from `device`, keeping `config` for the
    /// reconstructed instance (the on-disk body does not carry `Config`
    /// itself, since it is a construction-time, not a persisted, concern).
    pub fn load(config: Config, device: &dyn crate::serialize::SectorDevice) -> Result<Self> {
        let snapshot = crate::serialize::read_volume(device)?;
        Ok(Self::from_snapshot(config, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_engine_reports_healthy() {
        let engine = Engine::new(Config::new());
        let report = engine.health();
        assert!(report.healthy);
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn save_and_load_round_trips_state() {
        let engine = Engine::new(Config::new());
        let mut device = crate::serialize::InMemorySectorDevice::new();
        engine.save(&mut device).unwrap();
        let loaded = Engine::load(Config::new(), &device).unwrap();
        assert_eq!(loaded.branches.list().len(), engine.branches.list().len());
    }
}
