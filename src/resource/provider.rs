//! Per-host resource pool accounting: total vs. in-use amounts, with acquire/release
//! semantics that distinguish a fatal overcommit (the request can never be satisfied)
//! from a transient shortfall (it could be satisfied once something else releases).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::resource::amount::Amount;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pool {
    total: u64,
    in_use: u64,
    unit_tag: u8, // 0 = None, 1 = Bytes, 2 = Words; mirrors resource::amount::Unit for serde.
}

/// A host's resource pools, keyed by canonical resource name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceProvider {
    pools: HashMap<String, Pool>,
}

fn unit_tag(unit: crate::resource::amount::Unit) -> u8 {
    use crate::resource::amount::Unit;
    match unit {
        Unit::None => 0,
        Unit::Bytes => 1,
        Unit::Words => 2,
    }
}

fn tag_unit(tag: u8) -> crate::resource::amount::Unit {
    use crate::resource::amount::Unit;
    match tag {
        1 => Unit::Bytes,
        2 => Unit::Words,
        _ => Unit::None,
    }
}

impl ResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `amount` of total capacity for `resource`. Refuses to re-declare an
    /// existing resource that already has nonzero total, unless `override_existing`
    /// is set (used when building a virtual host copy with adjusted capacity).
    pub fn add_resource(
        &mut self,
        resource: &str,
        amount: Amount,
        override_existing: bool,
    ) -> Result<()> {
        if let Some(existing) = self.pools.get(resource) {
            if existing.total != 0 && !override_existing {
                return Err(OrchestratorError::Config(format!(
                    "resource {resource:?} already declared with total {}",
                    existing.total
                )));
            }
        }
        self.pools.insert(
            resource.to_string(),
            Pool {
                total: amount.total(),
                in_use: 0,
                unit_tag: unit_tag(amount.unit()),
            },
        );
        Ok(())
    }

    pub fn total(&self, resource: &str) -> Option<Amount> {
        self.pools
            .get(resource)
            .map(|p| Amount::new(p.total, tag_unit(p.unit_tag)))
    }

    pub fn in_use(&self, resource: &str) -> Option<Amount> {
        self.pools
            .get(resource)
            .map(|p| Amount::new(p.in_use, tag_unit(p.unit_tag)))
    }

    pub fn acquirable(&self, resource: &str) -> Option<Amount> {
        self.pools
            .get(resource)
            .map(|p| Amount::new(p.total.saturating_sub(p.in_use), tag_unit(p.unit_tag)))
    }

    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Checks whether `requested` of `resource` could be acquired right now.
    ///
    /// Returns `Ok(true)`/`Ok(false)` for a request within total capacity, and a
    /// fatal [`OrchestratorError::ResourceOvercommit`] for one that exceeds total
    /// capacity outright -- no amount of waiting will ever satisfy it.
    pub fn resources_available(&self, resource: &str, requested: Amount) -> Result<bool> {
        let pool = self
            .pools
            .get(resource)
            .ok_or_else(|| OrchestratorError::UnknownResource(resource.to_string()))?;
        if requested.total() > pool.total {
            return Err(OrchestratorError::ResourceOvercommit {
                action: String::new(),
                resource: resource.to_string(),
                requested: requested.to_string(),
                total: Amount::new(pool.total, tag_unit(pool.unit_tag)).to_string(),
            });
        }
        Ok(requested.total() + pool.in_use <= pool.total)
    }

    /// Acquires `requested` of `resource` for `action`, failing transiently (never
    /// mutating state) if insufficient capacity is currently free.
    pub fn acquire_resources(
        &mut self,
        action: &str,
        resource: &str,
        requested: Amount,
    ) -> Result<()> {
        let available = match self.resources_available(resource, requested) {
            Ok(available) => available,
            Err(OrchestratorError::ResourceOvercommit {
                resource,
                requested,
                total,
                ..
            }) => {
                return Err(OrchestratorError::ResourceOvercommit {
                    action: action.to_string(),
                    resource,
                    requested,
                    total,
                })
            }
            Err(e) => return Err(e),
        };
        if !available {
            let pool = self.pools.get(resource).expect("checked by resources_available");
            return Err(OrchestratorError::AcquireTransient {
                action: action.to_string(),
                resource: resource.to_string(),
                requested: requested.to_string(),
                available: Amount::new(pool.total.saturating_sub(pool.in_use), tag_unit(pool.unit_tag))
                    .to_string(),
            });
        }
        let pool = self.pools.get_mut(resource).expect("checked above");
        pool.in_use += requested.total();
        Ok(())
    }

    /// Releases `amount` of `resource` previously acquired. Over-release clamps at
    /// zero and is logged, never fatal: a double-release should not crash a run
    /// that otherwise completed successfully.
    pub fn release_resources(&mut self, resource: &str, amount: Amount) {
        let Some(pool) = self.pools.get_mut(resource) else {
            warn!(resource, "release of unknown resource ignored");
            return;
        };
        if amount.total() > pool.in_use {
            warn!(
                resource,
                requested = %amount,
                in_use = pool.in_use,
                "released more than was in use; clamping to zero"
            );
            pool.in_use = 0;
        } else {
            pool.in_use -= amount.total();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::amount::Unit;

    #[test]
    fn acquire_and_release_round_trip() {
        let mut p = ResourceProvider::new();
        p.add_resource("cpus", Amount::new(8, Unit::None), false).unwrap();
        p.acquire_resources("a1", "cpus", Amount::new(4, Unit::None)).unwrap();
        assert_eq!(p.acquirable("cpus").unwrap().total(), 4);
        p.release_resources("cpus", Amount::new(4, Unit::None));
        assert_eq!(p.acquirable("cpus").unwrap().total(), 8);
    }

    #[test]
    fn overcommit_is_fatal() {
        let mut p = ResourceProvider::new();
        p.add_resource("cpus", Amount::new(8, Unit::None), false).unwrap();
        let err = p
            .acquire_resources("a1", "cpus", Amount::new(16, Unit::None))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ResourceOvercommit { .. }));
    }

    #[test]
    fn transient_shortfall_leaves_state_unchanged() {
        let mut p = ResourceProvider::new();
        p.add_resource("cpus", Amount::new(8, Unit::None), false).unwrap();
        p.acquire_resources("a1", "cpus", Amount::new(8, Unit::None)).unwrap();
        let err = p
            .acquire_resources("a2", "cpus", Amount::new(1, Unit::None))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AcquireTransient { .. }));
        assert_eq!(p.acquirable("cpus").unwrap().total(), 0);
    }

    #[test]
    fn over_release_clamps_to_zero() {
        let mut p = ResourceProvider::new();
        p.add_resource("cpus", Amount::new(8, Unit::None), false).unwrap();
        p.acquire_resources("a1", "cpus", Amount::new(2, Unit::None)).unwrap();
        p.release_resources("cpus", Amount::new(99, Unit::None));
        assert_eq!(p.in_use("cpus").unwrap().total(), 0);
    }
}
