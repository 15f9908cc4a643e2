//! Quota Accountant: volume-wide and per-branch limits on bytes, blob
//! references, and views, checked before every mutation commits and rolled
//! back atomically on violation (spec §3.6, §4.6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Which scope a limit or usage figure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaScope {
    /// The whole volume.
    Volume,
    /// A single branch, identified by [`crate::branches::BranchId`].
    Branch(u64),
}

/// Configured ceilings for one scope. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Maximum total blob bytes the pool may hold.
    pub max_bytes: Option<u64>,
    /// Maximum number of distinct blob references.
    pub max_refs: Option<u64>,
    /// Maximum number of views in the graph.
    pub max_views: Option<u64>,
}

/// Current consumption for one scope.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Bytes currently attributed to this scope.
    pub bytes: u64,
    /// Blob references currently attributed to this scope.
    pub refs: u64,
    /// Views currently attributed to this scope.
    pub views: u64,
}

/// Tracks limits and usage per [`QuotaScope`], and performs the
/// check-then-commit dance every mutating operation goes through: a
/// proposed delta is validated against the configured limit before being
/// applied, so usage never observably exceeds a limit even transiently
/// (spec Testable Property 8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaAccountant {
    #[serde(with = "hashmap_as_pairs")]
    limits: HashMap<QuotaScope, QuotaLimits>,
    #[serde(with = "hashmap_as_pairs")]
    usage: HashMap<QuotaScope, QuotaUsage>,
}

/// `serde_json` objects require string keys, but [`QuotaScope`] is an enum,
/// so maps keyed on it are serialized as an association list instead.
mod hashmap_as_pairs {
    use std::collections::HashMap;
    use std::hash::Hash;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, K, V>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        let pairs: Vec<(&K, &V)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Eq + Hash,
        V: Deserialize<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl QuotaAccountant {
    /// Creates an accountant with no configured limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the limits for `scope`.
    pub fn set_limits(&mut self, scope: QuotaScope, limits: QuotaLimits) {
        self.limits.insert(scope, limits);
    }

    /// Current usage for `scope`.
    pub fn usage(&self, scope: QuotaScope) -> QuotaUsage {
        self.usage.get(&scope).copied().unwrap_or_default()
    }

    /// Configured limits for `scope`.
    pub fn limits(&self, scope: QuotaScope) -> QuotaLimits {
        self.limits.get(&scope).copied().unwrap_or_default()
    }

    /// Checks whether applying `(bytes_delta, refs_delta, views_delta)` to
    /// `scope` would violate its configured limit, without mutating usage.
    /// A negative delta never violates a limit.
    pub fn would_exceed(
        &self,
        scope: QuotaScope,
        bytes_delta: i64,
        refs_delta: i64,
        views_delta: i64,
    ) -> Option<String> {
        let limits = self.limits(scope);
        let usage = self.usage(scope);
        if let Some(max) = limits.max_bytes {
            let projected = apply_delta(usage.bytes, bytes_delta);
            if projected > max {
                return Some(format!(
                    "{scope:?}: bytes {projected} would exceed limit {max}"
                ));
            }
        }
        if let Some(max) = limits.max_refs {
            let projected = apply_delta(usage.refs, refs_delta);
            if projected > max {
                return Some(format!(
                    "{scope:?}: refs {projected} would exceed limit {max}"
                ));
            }
        }
        if let Some(max) = limits.max_views {
            let projected = apply_delta(usage.views, views_delta);
            if projected > max {
                return Some(format!(
                    "{scope:?}: views {projected} would exceed limit {max}"
                ));
            }
        }
        None
    }

    /// Checks both the named branch scope and the volume scope, failing
    /// with `QuotaExceeded` if either would be violated, and otherwise
    /// applies the delta to both atomically. This is the entry point the
    /// Operations API calls around every mutation (spec §4.6: "quota
    /// checks are evaluated before a mutation is admitted; a rejected
    /// mutation leaves all state, including usage counters, unchanged").
    pub fn charge(
        &mut self,
        branch: QuotaScope,
        bytes_delta: i64,
        refs_delta: i64,
        views_delta: i64,
    ) -> Result<()> {
        if let Some(reason) = self.would_exceed(branch, bytes_delta, refs_delta, views_delta) {
            return Err(EngineError::QuotaExceeded(reason));
        }
        if let Some(reason) =
            self.would_exceed(QuotaScope::Volume, bytes_delta, refs_delta, views_delta)
        {
            return Err(EngineError::QuotaExceeded(reason));
        }
        for scope in [branch, QuotaScope::Volume] {
            let usage = self.usage.entry(scope).or_default();
            usage.bytes = apply_delta(usage.bytes, bytes_delta);
            usage.refs = apply_delta(usage.refs, refs_delta);
            usage.views = apply_delta(usage.views, views_delta);
        }
        Ok(())
    }
}

fn apply_delta(base: u64, delta: i64) -> u64 {
    if delta >= 0 {
        base.saturating_add(delta as u64)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_rolls_back_on_violation_leaving_usage_unchanged() {
        let mut acct = QuotaAccountant::new();
        acct.set_limits(
            QuotaScope::Volume,
            QuotaLimits {
                max_bytes: Some(10),
                max_refs: None,
                max_views: None,
            },
        );
        acct.charge(QuotaScope::Branch(0), 5, 1, 0).unwrap();
        let before = acct.usage(QuotaScope::Volume);
        let err = acct.charge(QuotaScope::Branch(0), 6, 1, 0);
        assert!(err.is_err());
        assert_eq!(acct.usage(QuotaScope::Volume).bytes, before.bytes);
    }

    #[test]
    fn negative_delta_never_violates() {
        let mut acct = QuotaAccountant::new();
        acct.set_limits(
            QuotaScope::Volume,
            QuotaLimits {
                max_bytes: Some(1),
                max_refs: None,
                max_views: None,
            },
        );
        acct.charge(QuotaScope::Branch(0), -100, 0, 0).unwrap();
        assert_eq!(acct.usage(QuotaScope::Volume).bytes, 0);
    }
}
