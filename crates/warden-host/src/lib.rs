//! Warden host crate: host/OS integration for the execution core
//!
//! Supplies the reference native resources and a `ResourceProvider` that
//! hands them to `CapabilityRegistry::bootstrap`. It contains no policy;
//! which tier may reach which tag is decided by the configuration.

pub mod resources;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use tracing::debug;
use warden_core::{CapabilityTag, NativeResource, ResourceProvider, WardenError, WardenResult};

pub use resources::{Console, Core, Environment, HostControl, Options, ProcessExec};

/// Tags this provider knows how to back
pub const HOST_TAGS: [&str; 5] = ["console", "core", "env", "options", "process-exec"];

/// Builds host resources for the tags named in the configuration
pub struct HostProvider {
    control: Arc<HostControl>,
    options: BTreeMap<String, String>,
    console: Option<Box<dyn Write + Send>>,
}

impl HostProvider {
    pub fn new(control: Arc<HostControl>) -> Self {
        HostProvider { control, options: BTreeMap::new(), console: None }
    }

    /// Values served by the `options` capability
    pub fn with_options(mut self, options: BTreeMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// Send console output somewhere other than stdout
    pub fn with_console(mut self, out: Box<dyn Write + Send>) -> Self {
        self.console = Some(out);
        self
    }

    pub fn control(&self) -> &Arc<HostControl> {
        &self.control
    }
}

impl ResourceProvider for HostProvider {
    fn provide(&mut self, tag: &CapabilityTag) -> WardenResult<Box<dyn NativeResource>> {
        debug!(tag = %tag, "providing host resource");
        let resource: Box<dyn NativeResource> = match tag.as_str() {
            "console" => match self.console.take() {
                Some(out) => Box::new(Console::with_writer(out)),
                None => Box::new(Console::stdout()),
            },
            "core" => Box::new(Core::new(self.control.clone())),
            "env" => Box::new(Environment),
            "options" => Box::new(Options::new(self.options.clone())),
            "process-exec" => Box::new(ProcessExec),
            other => return Err(WardenError::NotFound(format!("no host resource for `{}`", other))),
        };
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{CapabilityDecl, CapabilityRegistry, TrustTier};

    #[test]
    fn provider_backs_every_host_tag() {
        let mut provider = HostProvider::new(Arc::new(HostControl::default()));
        for tag in HOST_TAGS {
            let tag = CapabilityTag::parse(tag).expect("tag");
            let resource = provider.provide(&tag).expect("resource");
            assert_eq!(resource.kind(), tag.as_str());
        }
    }

    #[test]
    fn unknown_tag_fails_bootstrap() {
        let decls = vec![
            CapabilityDecl::new("console", TrustTier::Sandboxed),
            CapabilityDecl::new("gpu", TrustTier::Trusted),
        ];
        let mut provider = HostProvider::new(Arc::new(HostControl::default()));
        let err = CapabilityRegistry::bootstrap(&decls, &mut provider).expect_err("gpu is unknown");
        assert!(matches!(err, WardenError::NotFound(_)));
    }
}
