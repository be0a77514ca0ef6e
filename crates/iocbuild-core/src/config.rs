//! Per-run build configuration
//!
//! Selected once before any generation starts and never changed during a run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum startup script line length accepted by the vxWorks shell
pub const VXWORKS_MAX_LINE_LENGTH: usize = 126;

/// First interrupt vector handed out when none is configured
pub const DEFAULT_INT_VECTOR_BASE: u32 = 192;

/// Operating system family of the target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    /// Embedded target with a line-limited shell and `ld` loading
    VxWorks,
    /// Host target running the IOC as a native executable
    Linux,
    /// Windows host target
    Windows,
}

impl TargetOs {
    /// Derive the target OS from an EPICS architecture name
    pub fn from_architecture(arch: &str) -> Self {
        if arch.starts_with("vxWorks") {
            TargetOs::VxWorks
        } else if arch.starts_with("win") {
            TargetOs::Windows
        } else {
            TargetOs::Linux
        }
    }

    /// Name used in makefile variables such as `PROD_IOC_vxWorks`
    pub fn make_name(&self) -> &'static str {
        match self {
            TargetOs::VxWorks => "vxWorks",
            TargetOs::Linux => "Linux",
            TargetOs::Windows => "WIN32",
        }
    }

    /// Maximum startup script line length, `None` when unlimited
    pub fn max_line_length(&self) -> Option<usize> {
        match self {
            TargetOs::VxWorks => Some(VXWORKS_MAX_LINE_LENGTH),
            TargetOs::Linux | TargetOs::Windows => None,
        }
    }

    /// Embedded targets are booted from a script loaded by the target itself
    pub fn is_embedded(&self) -> bool {
        matches!(self, TargetOs::VxWorks)
    }
}

/// Resolved build configuration for one generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Target architecture, e.g. `vxWorks-ppc604_long` or `linux-x86_64`
    pub architecture: String,
    /// Architecture of the build host
    #[serde(default = "default_host_architecture")]
    pub host_architecture: String,
    /// Load libraries and dbd files from the startup script at runtime
    #[serde(default)]
    pub dynamic_load: bool,
    /// Emit `<dbd>_registerRecordDeviceDriver` after each dynamic dbd load
    #[serde(default)]
    pub register_dbd: bool,
    /// Value written for CHECK_RELEASE
    #[serde(default = "default_true")]
    pub check_release: bool,
    /// Write `st<ioc>.src` for macro substitution instead of `st<ioc>.cmd`
    #[serde(default)]
    pub substitute_boot: bool,
    /// EPICS base installation, source of the configure templates
    #[serde(default)]
    pub epics_base: Option<PathBuf>,
    /// Directory holding the msi tool, added to the Db and boot makefiles
    #[serde(default)]
    pub msi_path: Option<PathBuf>,
    /// Source named in generated disclaimers
    #[serde(default = "default_source")]
    pub source: String,
    /// Include the generation time in disclaimers
    #[serde(default)]
    pub timestamp: bool,
    /// First interrupt vector handed out by the hardware registry
    #[serde(default = "default_int_vector_base")]
    pub int_vector_base: u32,
}

fn default_host_architecture() -> String {
    "linux-x86_64".to_string()
}

fn default_true() -> bool {
    true
}

fn default_source() -> String {
    "iocbuild".to_string()
}

fn default_int_vector_base() -> u32 {
    DEFAULT_INT_VECTOR_BASE
}

impl BuildConfig {
    /// Create a configuration for the given target with defaults elsewhere
    pub fn new(architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            host_architecture: default_host_architecture(),
            dynamic_load: false,
            register_dbd: false,
            check_release: true,
            substitute_boot: false,
            epics_base: None,
            msi_path: None,
            source: default_source(),
            timestamp: false,
            int_vector_base: DEFAULT_INT_VECTOR_BASE,
        }
    }

    /// Target operating system
    pub fn target_os(&self) -> TargetOs {
        TargetOs::from_architecture(&self.architecture)
    }

    /// True when the target differs from the build host
    pub fn cross_build(&self) -> bool {
        self.architecture != self.host_architecture
    }

    /// Startup script line limit for the target
    pub fn max_line_length(&self) -> Option<usize> {
        self.target_os().max_line_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_os() {
        assert_eq!(TargetOs::from_architecture("vxWorks-ppc604_long"), TargetOs::VxWorks);
        assert_eq!(TargetOs::from_architecture("linux-x86_64"), TargetOs::Linux);
        assert_eq!(TargetOs::from_architecture("win32-x86"), TargetOs::Windows);
    }

    #[test]
    fn test_line_limit_by_target() {
        let vx = BuildConfig::new("vxWorks-ppc604_long");
        assert_eq!(vx.max_line_length(), Some(VXWORKS_MAX_LINE_LENGTH));
        assert!(vx.cross_build());

        let host = BuildConfig::new("linux-x86_64");
        assert_eq!(host.max_line_length(), None);
        assert!(!host.cross_build());
    }
}
