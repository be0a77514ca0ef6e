//! Error types for IOC generation
//!
//! Every failure is fatal to the current run. Variants carry the class,
//! module or file context needed to fix the offending configuration.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unified error type for registration and generation
#[derive(Error, Debug)]
pub enum BuildError {
    // =========================================================================
    // Module registry
    // =========================================================================
    #[error("Module name {name:?} must be a valid identifier")]
    InvalidModuleName { name: String },

    #[error("Module {name} multiply defined")]
    DuplicateModule { name: String },

    #[error("Module {name} not defined, cannot override it")]
    UndeclaredOverride { name: String },

    #[error("Unknown module: {name}")]
    UnknownModule { name: String },

    #[error("Failed to parse extension descriptor {path}: {source}")]
    Extension {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    // =========================================================================
    // Device classes and instances
    // =========================================================================
    #[error("Unknown device class: {name}")]
    UnknownDeviceClass { name: String },

    #[error("Unknown device instance: {name}")]
    UnknownInstance { name: String },

    #[error("Device instance {name} declared twice")]
    DuplicateInstance { name: String },

    #[error("Device class {class} has no record factory {factory}")]
    UnknownRecordFactory { class: String, factory: String },

    #[error("Unknown parameter {{{name}}} in {context}")]
    UnknownParameter { context: String, name: String },

    #[error("Malformed template in {context}: {reason}")]
    MalformedTemplate { context: String, reason: String },

    #[error("Invalid IOC description: {0}")]
    Description(String),

    #[error("Failed to parse IOC description {path}: {source}")]
    DescriptionParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    // =========================================================================
    // Loader
    // =========================================================================
    #[error("Can't find {kind} file {path:?} for device class {class}")]
    ResourceNotFound {
        class: String,
        kind: &'static str,
        path: PathBuf,
    },

    #[error("Dependency cycle between device classes: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Interrupt vectors exhausted allocating {count} after {last}")]
    IntVectorsExhausted { count: u32, last: u32 },

    // =========================================================================
    // Records
    // =========================================================================
    #[error("Unused address arguments for record {record}")]
    UnusedArgument { record: String },

    #[error("Record {record} of type {record_type} has no field {field}")]
    UnknownField {
        record: String,
        record_type: String,
        field: String,
    },

    // =========================================================================
    // Generation
    // =========================================================================
    #[error("Line {line_number} of {path} too long ({length} > {limit}): {line:?}")]
    LineLengthExceeded {
        path: PathBuf,
        line_number: usize,
        length: usize,
        limit: usize,
        line: String,
    },

    #[error("Naming conflict for {name:?}: {reason}")]
    NamingConflict { name: String, reason: String },

    #[error("Out of sequence: {0}")]
    Sequencing(String),

    #[error("Directory {path} doesn't appear to be an IOC directory")]
    UnsafeOutputDirectory { path: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error taxonomy used when reporting a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Duplicate/unknown module declarations and bad descriptions
    Configuration,
    /// Missing library, binary or dbd file
    ResourceNotFound,
    /// Cyclic device class dependencies
    DependencyCycle,
    /// Generated line over the target limit
    LineLengthExceeded,
    /// Duplicate output name or invalid character in a name
    NamingConflict,
    /// Operation performed after its owning resource was finalised
    Sequencing,
    /// Address arguments supplied to a fixed address
    UnusedArgument,
    /// Filesystem failure
    Io,
}

impl BuildError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::InvalidModuleName { .. }
            | BuildError::DuplicateModule { .. }
            | BuildError::UndeclaredOverride { .. }
            | BuildError::UnknownModule { .. }
            | BuildError::Extension { .. }
            | BuildError::UnknownDeviceClass { .. }
            | BuildError::UnknownInstance { .. }
            | BuildError::DuplicateInstance { .. }
            | BuildError::UnknownRecordFactory { .. }
            | BuildError::UnknownParameter { .. }
            | BuildError::MalformedTemplate { .. }
            | BuildError::Description(_)
            | BuildError::DescriptionParse { .. }
            | BuildError::UnknownField { .. }
            | BuildError::IntVectorsExhausted { .. } => ErrorKind::Configuration,

            BuildError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            BuildError::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            BuildError::LineLengthExceeded { .. } => ErrorKind::LineLengthExceeded,
            BuildError::NamingConflict { .. } | BuildError::UnsafeOutputDirectory { .. } => {
                ErrorKind::NamingConflict
            }
            BuildError::Sequencing(_) => ErrorKind::Sequencing,
            BuildError::UnusedArgument { .. } => ErrorKind::UnusedArgument,
            BuildError::Io { .. } | BuildError::Json(_) => ErrorKind::Io,
        }
    }

    /// Wrap an IO error with the path it happened on, for use with `map_err`
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> BuildError {
        let path = path.as_ref().to_path_buf();
        move |source| BuildError::Io { path, source }
    }

    /// Check if this error was detected while registering the configuration
    /// rather than while writing artifacts
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::ResourceNotFound | ErrorKind::DependencyCycle
        )
    }
}

/// Result type alias for the builder
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = BuildError::DuplicateModule { name: "foo".into() };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.is_registration_error());

        let err = BuildError::LineLengthExceeded {
            path: "st.cmd".into(),
            line_number: 3,
            length: 130,
            limit: 126,
            line: "x".repeat(130),
        };
        assert_eq!(err.kind(), ErrorKind::LineLengthExceeded);
        assert!(!err.is_registration_error());
    }

    #[test]
    fn test_cycle_message() {
        let err = BuildError::DependencyCycle {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle between device classes: A -> B -> A"
        );
    }

    #[test]
    fn test_io_context() {
        let err = BuildError::io("/no/such/file")(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/no/such/file"));
    }
}
