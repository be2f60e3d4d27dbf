pub mod capability;
pub mod registry;

pub use capability::{Capability, CapabilityTag, NativeResource, TrustTier};
pub use registry::{CapabilityRegistry, ResourceProvider};
