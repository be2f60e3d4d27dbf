//! Capability definitions
//!
//! Trust tiers, capability tags and the capability handle itself.
//! No policy here; visibility rules live in `policy`.

use std::fmt;

use serde::Deserialize;

use crate::error::{WardenError, WardenResult};
use crate::gate::PlainValue;

/// Longest accepted tag, in bytes
const MAX_TAG_LEN: usize = 64;

/// Ordered trust level. `Untrusted < Sandboxed < Trusted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Untrusted,
    Sandboxed,
    Trusted,
}

impl TrustTier {
    pub const ALL: [TrustTier; 3] = [TrustTier::Untrusted, TrustTier::Sandboxed, TrustTier::Trusted];

    pub fn as_str(self) -> &'static str {
        match self {
            TrustTier::Untrusted => "untrusted",
            TrustTier::Sandboxed => "sandboxed",
            TrustTier::Trusted => "trusted",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable capability identifier: `[a-z][a-z0-9-]*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityTag(String);

impl CapabilityTag {
    pub fn parse(raw: &str) -> WardenResult<Self> {
        let invalid = |reason: &str| WardenError::InvalidRegistration {
            tag: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() || raw.len() > MAX_TAG_LEN {
            return Err(invalid("tag must be 1 to 64 bytes"));
        }
        let mut chars = raw.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
            return Err(invalid("tag must start with a lowercase letter"));
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(invalid("tag may only contain a-z, 0-9 and '-'"));
        }
        Ok(CapabilityTag(raw.to_string()))
    }

    /// Tag as written inside scripts: `process-exec` becomes `process_exec`.
    pub fn script_name(&self) -> String {
        self.0.replace('-', "_")
    }

    /// Inverse of `script_name`.
    pub fn from_script_name(name: &str) -> String {
        name.replace('_', "-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interface contract every native subsystem binding implements.
///
/// Arguments and results are plain data only, so a resource can neither
/// receive nor hand out capability references or executable code.
pub trait NativeResource: Send + Sync {
    /// Human-readable kind, e.g. `"console"`
    fn kind(&self) -> &str;

    /// Invoke `method` with plain-data arguments.
    fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue>;

    /// Release the underlying native handle. Called once at registry teardown.
    fn release(&mut self) {}
}

/// Opaque handle to a native subsystem, owned by the registry.
pub struct Capability {
    tag: CapabilityTag,
    min_trust: TrustTier,
    resource: Box<dyn NativeResource>,
}

impl Capability {
    pub(crate) fn new(tag: CapabilityTag, min_trust: TrustTier, resource: Box<dyn NativeResource>) -> Self {
        Capability { tag, min_trust, resource }
    }

    pub fn tag(&self) -> &CapabilityTag {
        &self.tag
    }

    pub fn min_trust(&self) -> TrustTier {
        self.min_trust
    }

    pub fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
        self.resource.invoke(method, args)
    }

    pub(crate) fn release(&mut self) {
        self.resource.release();
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("tag", &self.tag)
            .field("min_trust", &self.min_trust)
            .field("kind", &self.resource.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_strictly_ordered() {
        assert!(TrustTier::Trusted > TrustTier::Sandboxed);
        assert!(TrustTier::Sandboxed > TrustTier::Untrusted);
        assert_eq!(TrustTier::ALL.iter().max(), Some(&TrustTier::Trusted));
    }

    #[test]
    fn tag_syntax() {
        assert!(CapabilityTag::parse("console").is_ok());
        assert!(CapabilityTag::parse("process-exec").is_ok());
        assert!(CapabilityTag::parse("gl2").is_ok());
        assert!(CapabilityTag::parse("").is_err());
        assert!(CapabilityTag::parse("2d").is_err());
        assert!(CapabilityTag::parse("Console").is_err());
        assert!(CapabilityTag::parse("db_main").is_err());
        assert!(CapabilityTag::parse(&"a".repeat(65)).is_err());
    }

    #[test]
    fn script_names_round_trip() {
        let tag = CapabilityTag::parse("process-exec").expect("valid tag");
        assert_eq!(tag.script_name(), "process_exec");
        assert_eq!(CapabilityTag::from_script_name("process_exec"), "process-exec");
    }
}
