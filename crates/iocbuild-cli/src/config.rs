//! Tool configuration loading

use anyhow::{Context, Result};
use iocbuild_core::config::DEFAULT_INT_VECTOR_BASE;
use iocbuild_core::BuildConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub build: BuildDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Default home of declared modules
    #[serde(default = "default_support")]
    pub support: PathBuf,
    /// EPICS base installation
    #[serde(default)]
    pub epics_base: Option<PathBuf>,
    /// Architecture of the build host
    #[serde(default = "default_host_architecture")]
    pub host_architecture: String,
    /// Directory of extension descriptors for modules that ship none
    #[serde(default)]
    pub defaults: Option<PathBuf>,
    /// Directory holding the msi tool
    #[serde(default)]
    pub msi: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            support: default_support(),
            epics_base: None,
            host_architecture: default_host_architecture(),
            defaults: None,
            msi: None,
        }
    }
}

fn default_support() -> PathBuf {
    PathBuf::from("/opt/epics/support")
}

fn default_host_architecture() -> String {
    "linux-x86_64".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDefaults {
    #[serde(default)]
    pub dynamic_load: bool,
    #[serde(default)]
    pub register_dbd: bool,
    #[serde(default = "default_true")]
    pub check_release: bool,
    #[serde(default)]
    pub substitute_boot: bool,
    #[serde(default = "default_int_vector_base")]
    pub int_vector_base: u32,
    /// Include the generation time in disclaimers
    #[serde(default)]
    pub timestamp: bool,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            dynamic_load: false,
            register_dbd: false,
            check_release: true,
            substitute_boot: false,
            int_vector_base: default_int_vector_base(),
            timestamp: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_int_vector_base() -> u32 {
    DEFAULT_INT_VECTOR_BASE
}

impl Config {
    /// Build configuration for one run targeting `architecture`
    pub fn to_build_config(&self, architecture: &str, source: &Path) -> BuildConfig {
        let mut config = BuildConfig::new(architecture);
        config.host_architecture = self.paths.host_architecture.clone();
        config.dynamic_load = self.build.dynamic_load;
        config.register_dbd = self.build.register_dbd;
        config.check_release = self.build.check_release;
        config.substitute_boot = self.build.substitute_boot;
        config.epics_base = self.paths.epics_base.clone();
        config.msi_path = self.paths.msi.clone();
        config.source = source.display().to_string();
        config.timestamp = self.build.timestamp;
        config.int_vector_base = self.build.int_vector_base;
        config
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("iocbuild.toml")).unwrap();
        assert!(config.build.check_release);
        assert_eq!(config.build.int_vector_base, 192);
        assert_eq!(config.paths.host_architecture, "linux-x86_64");
    }

    #[test]
    fn test_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("iocbuild.toml");
        std::fs::write(
            &path,
            "[paths]\nsupport = \"/opt/support\"\nmsi = \"/opt/msi\"\n\n[build]\ndynamic_load = true\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.paths.support, PathBuf::from("/opt/support"));
        assert!(config.build.dynamic_load);
        assert!(config.build.check_release);

        let build = config.to_build_config("vxWorks-ppc604_long", Path::new("ioc.toml"));
        assert!(build.dynamic_load);
        assert!(build.cross_build());
        assert_eq!(build.msi_path, Some(PathBuf::from("/opt/msi")));
        assert_eq!(build.source, "ioc.toml");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("iocbuild.toml");
        std::fs::write(&path, "[build]\nint_vector_base = \"high\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
