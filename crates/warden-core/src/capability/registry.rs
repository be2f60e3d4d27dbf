//! Capability Registry
//!
//! Owns every capability for the process lifetime. Populated once at startup,
//! read-only afterwards, torn down in reverse registration order.

use std::collections::HashMap;

use tracing::{debug, info};

use super::capability::{Capability, CapabilityTag, NativeResource, TrustTier};
use crate::config::CapabilityDecl;
use crate::error::{WardenError, WardenResult};

/// Supplies already-initialized native handles during bootstrap.
pub trait ResourceProvider {
    fn provide(&mut self, tag: &CapabilityTag) -> WardenResult<Box<dyn NativeResource>>;
}

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: Vec<Capability>,
    index: HashMap<CapabilityTag, usize>,
}

impl CapabilityRegistry {
    /// New registry holds nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from startup declarations. Any error here is fatal for the host.
    pub fn bootstrap(decls: &[CapabilityDecl], provider: &mut dyn ResourceProvider) -> WardenResult<Self> {
        let mut registry = CapabilityRegistry::new();
        for decl in decls {
            let tag = CapabilityTag::parse(&decl.tag)?;
            if registry.index.contains_key(&tag) {
                return Err(WardenError::DuplicateRegistration(decl.tag.clone()));
            }
            let resource = provider.provide(&tag)?;
            registry.insert(tag, decl.min_trust, resource)?;
        }
        info!(count = registry.len(), "capability registry bootstrapped");
        Ok(registry)
    }

    /// Register a capability. Fails on a duplicate tag, a malformed tag, or
    /// an `Untrusted` minimum (the untrusted tier never holds capabilities).
    pub fn register(
        &mut self,
        tag: &str,
        min_trust: TrustTier,
        resource: Box<dyn NativeResource>,
    ) -> WardenResult<()> {
        let tag = CapabilityTag::parse(tag)?;
        self.insert(tag, min_trust, resource)
    }

    fn insert(
        &mut self,
        tag: CapabilityTag,
        min_trust: TrustTier,
        resource: Box<dyn NativeResource>,
    ) -> WardenResult<()> {
        if self.index.contains_key(&tag) {
            return Err(WardenError::DuplicateRegistration(tag.to_string()));
        }
        if min_trust == TrustTier::Untrusted {
            return Err(WardenError::InvalidRegistration {
                tag: tag.to_string(),
                reason: "the untrusted tier cannot hold capabilities".to_string(),
            });
        }

        debug!(tag = %tag, min_trust = %min_trust, kind = resource.kind(), "capability registered");
        self.index.insert(tag.clone(), self.entries.len());
        self.entries.push(Capability::new(tag, min_trust, resource));
        Ok(())
    }

    pub fn lookup(&self, tag: &str) -> WardenResult<&Capability> {
        let key = CapabilityTag::parse(tag).map_err(|_| WardenError::NotFound(format!("capability `{}`", tag)))?;
        self.index
            .get(&key)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| WardenError::NotFound(format!("capability `{}`", tag)))
    }

    /// Capabilities in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for CapabilityRegistry {
    fn drop(&mut self) {
        while let Some(mut cap) = self.entries.pop() {
            debug!(tag = %cap.tag(), "releasing capability");
            cap.release();
        }
        self.index.clear();
    }
}
