//! Trust Tier Policy
//!
//! Pure functions of the registry. There is no separate allow-list: the
//! visible set for a tier is re-derived from each capability's `min_trust`.

use std::collections::BTreeSet;

use crate::capability::{CapabilityRegistry, CapabilityTag, TrustTier};

/// Dispatch entry points, each mapped to exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    LoadScript,
    EvalString,
    LoadModule,
    LoadMixin,
    EvalSandbox,
    EvalUntrustedString,
    LoadJson,
}

/// Tier a dispatch entry point runs under.
pub fn tier_for(entry: EntryPoint) -> TrustTier {
    match entry {
        EntryPoint::LoadScript | EntryPoint::EvalString => TrustTier::Trusted,
        EntryPoint::LoadModule | EntryPoint::LoadMixin | EntryPoint::EvalSandbox => TrustTier::Sandboxed,
        EntryPoint::EvalUntrustedString | EntryPoint::LoadJson => TrustTier::Untrusted,
    }
}

/// Code running at `tier` may use a capability requiring `min_trust`.
pub fn permits(tier: TrustTier, min_trust: TrustTier) -> bool {
    min_trust <= tier
}

/// Every tag whose `min_trust <= tier`.
pub fn visible_tags(registry: &CapabilityRegistry, tier: TrustTier) -> BTreeSet<CapabilityTag> {
    registry
        .iter()
        .filter(|cap| permits(tier, cap.min_trust()))
        .map(|cap| cap.tag().clone())
        .collect()
}
