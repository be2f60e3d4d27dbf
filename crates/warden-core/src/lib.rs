//! Warden - Core Library
//!
//! Capability-scoped script execution: registry, trust policy, context
//! builder, dispatch, untrusted data gate and heap lifecycle.

pub mod capability;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod policy;
pub mod script;

// Re-export commonly used types
pub use capability::{Capability, CapabilityRegistry, CapabilityTag, NativeResource, ResourceProvider, TrustTier};
pub use config::{CapabilityDecl, WardenConfig};
pub use context::{ContextBuilder, ExecutionContext};
pub use engine::{Engine, MixinMode, SandboxOptions};
pub use error::{SourceError, SourceLocation, WardenError, WardenResult};
pub use gate::{DataGate, PlainValue, UntrustedValue};
pub use lifecycle::{CollectStats, GcStats};
pub use script::{ObjectRef, Value};
