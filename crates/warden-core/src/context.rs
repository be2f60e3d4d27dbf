//! Execution Context Builder
//!
//! One context type for every tier, parameterized by its visible-tag set.
//! A context borrows capabilities from the registry; it never owns them and
//! cannot outlive the registry. The binding set is closed at build time.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::capability::{Capability, CapabilityRegistry, CapabilityTag, TrustTier};
use crate::error::{WardenError, WardenResult};
use crate::policy;

/// Capability bindings visible to one evaluation.
#[derive(Debug)]
pub struct ExecutionContext<'r> {
    tier: TrustTier,
    bindings: BTreeMap<CapabilityTag, &'r Capability>,
}

impl<'r> ExecutionContext<'r> {
    /// The RestrictedContext: zero bindings, hosts untrusted data only.
    pub fn restricted() -> Self {
        ExecutionContext {
            tier: TrustTier::Untrusted,
            bindings: BTreeMap::new(),
        }
    }

    pub fn tier(&self) -> TrustTier {
        self.tier
    }

    pub fn is_restricted(&self) -> bool {
        self.tier == TrustTier::Untrusted
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn is_bound(&self, tag: &str) -> bool {
        self.bindings.keys().any(|t| t.as_str() == tag)
    }

    pub fn visible_tags(&self) -> impl Iterator<Item = &CapabilityTag> {
        self.bindings.keys()
    }

    /// Resolve a capability at the context's own tier.
    pub fn resolve(&self, tag: &str) -> WardenResult<&'r Capability> {
        self.resolve_at(tag, self.tier)
    }

    /// Resolve a capability for code running at `effective` tier.
    ///
    /// `effective` may be lower than the context tier when the running code
    /// is a function created under a lower tier.
    pub fn resolve_at(&self, tag: &str, effective: TrustTier) -> WardenResult<&'r Capability> {
        let found = self
            .bindings
            .iter()
            .find(|(t, _)| t.as_str() == tag)
            .map(|(_, cap)| *cap);

        match found {
            Some(cap) if policy::permits(effective.min(self.tier), cap.min_trust()) => Ok(cap),
            _ => {
                warn!(tag, tier = %effective.min(self.tier), "capability denied");
                Err(WardenError::CapabilityDenied { tag: tag.to_string() })
            }
        }
    }
}

/// Builds contexts from a registry snapshot. Never mutates the registry.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder<'r> {
    registry: &'r CapabilityRegistry,
}

impl<'r> ContextBuilder<'r> {
    pub fn new(registry: &'r CapabilityRegistry) -> Self {
        ContextBuilder { registry }
    }

    pub fn build(&self, tier: TrustTier) -> ExecutionContext<'r> {
        if tier == TrustTier::Untrusted {
            return ExecutionContext::restricted();
        }

        let visible = policy::visible_tags(self.registry, tier);
        let bindings: BTreeMap<CapabilityTag, &'r Capability> = self
            .registry
            .iter()
            .filter(|cap| visible.contains(cap.tag()))
            .map(|cap| (cap.tag().clone(), cap))
            .collect();

        debug!(tier = %tier, bound = bindings.len(), "execution context built");
        ExecutionContext { tier, bindings }
    }
}
