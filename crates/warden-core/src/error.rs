//! Warden Error Types
//!
//! Defines all error conditions produced by the Warden execution core.
//! Every variant except the two registration errors is recoverable per call:
//! it aborts the current load/eval/parse only and is handed back to the caller.

use std::fmt;
use std::io;

/// Where in a piece of source text an error was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File path, or a label such as `"<sandbox>"` for inline text
    pub source: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ line {}, column {}", self.source, self.line, self.column)
    }
}

/// Interpreter-reported syntax or runtime fault.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceError {
    pub location: SourceLocation,
    pub message: String,
    /// Text of the offending line, when available
    pub context: Option<String>,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in {}: {}", self.location, self.message)?;
        if let Some(line) = &self.context {
            write!(f, "\ncontext: {}", line.trim_end())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    // Lookup errors
    #[error("not found: {0}")]
    NotFound(String),

    // Capability & trust errors
    #[error("capability denied: `{tag}` is not bound in this context")]
    CapabilityDenied { tag: String },

    #[error("duplicate capability registration: `{0}`")]
    DuplicateRegistration(String),

    #[error("invalid capability registration `{tag}`: {reason}")]
    InvalidRegistration { tag: String, reason: String },

    // Interpreter errors
    #[error("{0}")]
    Source(Box<SourceError>),

    #[error("mixin collision: target already defines member `{member}`")]
    Collision { member: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("stale object reference #{index}")]
    StaleObject { index: u32 },

    #[error("value is not plain data: {0}")]
    NotPlainData(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} limit of {limit} exceeded")]
    LimitExceeded { what: &'static str, limit: usize },

    // Untrusted data gate rejections
    #[error("illegal token at line {line}, column {column} (offset {offset}): {found}")]
    IllegalToken {
        offset: usize,
        line: u32,
        column: u32,
        found: String,
    },

    #[error("nesting depth exceeds limit of {limit}")]
    DepthExceeded { limit: usize },

    #[error("payload of {actual} bytes exceeds limit of {limit}")]
    SizeExceeded { limit: usize, actual: u64 },

    // Startup configuration
    #[error("config error: {0}")]
    Config(String),

    // IO boundary
    #[error("io error: {0}")]
    Io(String),
}

impl WardenError {
    /// Registration errors leave the capability set ambiguous; the host must not continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WardenError::DuplicateRegistration(_) | WardenError::InvalidRegistration { .. }
        )
    }

    /// Errors a script may intercept with `try/catch`.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            WardenError::CapabilityDenied { .. }
                | WardenError::Source(_)
                | WardenError::NotFound(_)
                | WardenError::NotPlainData(_)
                | WardenError::InvalidArgument(_)
                | WardenError::StaleObject { .. }
        )
    }

    /// Stable short name used for the `kind` member of caught errors.
    pub fn kind(&self) -> &'static str {
        match self {
            WardenError::NotFound(_) => "NotFound",
            WardenError::CapabilityDenied { .. } => "CapabilityDenied",
            WardenError::DuplicateRegistration(_) => "DuplicateRegistration",
            WardenError::InvalidRegistration { .. } => "InvalidRegistration",
            WardenError::Source(_) => "SourceError",
            WardenError::Collision { .. } => "CollisionError",
            WardenError::InvalidTarget(_) => "InvalidTarget",
            WardenError::StaleObject { .. } => "StaleObject",
            WardenError::NotPlainData(_) => "NotPlainData",
            WardenError::InvalidArgument(_) => "InvalidArgument",
            WardenError::LimitExceeded { .. } => "LimitExceeded",
            WardenError::IllegalToken { .. } => "IllegalToken",
            WardenError::DepthExceeded { .. } => "DepthExceeded",
            WardenError::SizeExceeded { .. } => "SizeExceeded",
            WardenError::Config(_) => "ConfigError",
            WardenError::Io(_) => "IoError",
        }
    }

    pub(crate) fn source_error(
        location: SourceLocation,
        message: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        WardenError::Source(Box::new(SourceError {
            location,
            message: message.into(),
            context,
        }))
    }
}

impl From<io::Error> for WardenError {
    fn from(err: io::Error) -> Self {
        WardenError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for WardenError {
    fn from(err: toml::de::Error) -> Self {
        WardenError::Config(err.to_string())
    }
}

pub type WardenResult<T> = Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_errors_are_fatal_and_uncatchable() {
        let dup = WardenError::DuplicateRegistration("db".into());
        assert!(dup.is_fatal());
        assert!(!dup.is_catchable());

        let denied = WardenError::CapabilityDenied { tag: "db".into() };
        assert!(!denied.is_fatal());
        assert!(denied.is_catchable());
    }

    #[test]
    fn source_error_display_includes_location_and_line() {
        let err = WardenError::source_error(
            SourceLocation { source: "mod.ws".into(), line: 3, column: 7 },
            "unexpected `)`",
            Some("let x = );".into()),
        );
        let text = err.to_string();
        assert!(text.contains("mod.ws @ line 3, column 7"));
        assert!(text.contains("context: let x = );"));
    }
}
