//! # Engine - a content-addressed, versioned filesystem engine
//!
//! Engine is an embedded library implementing a deduplicated blob store, a
//! copy-on-write namespace tree, an immutable graph of views, a branch
//! registry with three-way merge, a capability-checked policy layer with
//! an audit trail, and a quota accountant, all persisted through a stable
//! on-disk format over an abstract sector device.
//!
//! ## Quick Start
//!
//! ```rust
//! use engine::{AccessContext, Config, Engine};
//!
//! let mut engine = Engine::new(Config::new());
//! let ctx = AccessContext::root();
//!
//! engine.write_file(&ctx, "/hello.txt", b"hello, engine", 0)?;
//! let stat = engine.stat(&ctx, "/hello.txt", 1)?;
//! assert_eq!(stat.length, Some(13));
//! # Ok::<(), engine::EngineError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Blob Pool** ([`pool`]): content-addressed, deduplicated, refcounted
//!   byte storage.
//! - **Namespace Tree** ([`namespace`]): path-keyed entries resolved
//!   against a view's change-set chain.
//! - **View Graph** ([`views`]): an arena-indexed, immutable DAG of
//!   snapshots.
//! - **Branch Registry** ([`branches`]): named, movable heads plus
//!   three-way merge.
//! - **Policy Engine** ([`policy`]): capability checks, verdicts, and a
//!   fixed-capacity audit ring.
//! - **Quota Accountant** ([`quota`]): volume-wide and per-branch limits.
//! - **Serialization** ([`serialize`]): the on-disk volume format over a
//!   [`serialize::SectorDevice`].
//! - **Operations API** ([`api`]): the façade gluing the above into the
//!   public surface on [`Engine`].

pub mod api;
pub mod branches;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod namespace;
pub mod policy;
pub mod pool;
pub mod quota;
pub mod serialize;
pub mod views;

pub use crate::branches::{Branch, BranchId, BranchRegistry, MergeOutcome};
pub use crate::context::AccessContext;
pub use crate::engine::{Config, Engine, HealthCheck, HealthReport};
pub use crate::error::{EngineError, Result};
pub use crate::namespace::{Entry, EntryKind, EntryStat, Perms};
pub use crate::policy::{AuditEntry, AuditRing, PolicyFlags, PolicyKind, Verdict};
pub use crate::pool::{BlobPool, Hash};
pub use crate::quota::{QuotaAccountant, QuotaLimits, QuotaScope, QuotaUsage};
pub use crate::serialize::{FileSectorDevice, InMemorySectorDevice, SectorDevice, VolumeSnapshot};
pub use crate::views::{ChangeKind, PathChange, View, ViewGraph, ViewId};
