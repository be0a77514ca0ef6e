//! Extension descriptors - per-module device classes and constants
//!
//! Each support module may ship a TOML descriptor exporting device class
//! definitions and named constants. Descriptors are merged into one shared
//! namespace; a later export silently replaces an earlier one of the same
//! name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::device::{DeviceClass, DeviceClassDef};
use crate::error::{BuildError, Result};

/// Contents of one extension descriptor file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    /// Named constants available to hook templates as `{const:NAME}`
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    /// Device classes exported by the module
    #[serde(default)]
    pub device_class: Vec<DeviceClassDef>,
}

impl ExtensionDescriptor {
    /// Load a descriptor from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(BuildError::io(path))?;
        toml::from_str(&content).map_err(|source| BuildError::Extension {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a descriptor from a TOML string
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// A namespace entry together with the module that exported it
#[derive(Debug, Clone)]
pub struct Export<T> {
    pub value: T,
    pub origin: String,
}

/// Merged exports of every loaded descriptor
#[derive(Debug, Clone, Default)]
pub struct ExtensionNamespace {
    constants: BTreeMap<String, Export<String>>,
    classes: BTreeMap<String, Export<Arc<DeviceClass>>>,
}

impl ExtensionNamespace {
    /// Merge a descriptor exported by `origin`
    pub fn merge(&mut self, origin: &str, descriptor: ExtensionDescriptor) -> Result<()> {
        for (name, value) in descriptor.constants {
            if let Some(previous) = self.constants.get(&name) {
                debug!(constant = %name, from = %previous.origin, to = %origin, "Overriding constant");
            }
            self.constants.insert(
                name,
                Export {
                    value,
                    origin: origin.to_string(),
                },
            );
        }

        for def in descriptor.device_class {
            let class = DeviceClass::from_def(def, origin)?;
            self.insert_class(origin, class);
        }
        Ok(())
    }

    /// Insert a single class, replacing any earlier export of its name
    pub fn insert_class(&mut self, origin: &str, class: DeviceClass) -> Arc<DeviceClass> {
        let class = Arc::new(class);
        if let Some(previous) = self.classes.get(&class.name) {
            debug!(class = %class.name, from = %previous.origin, to = %origin, "Overriding device class");
        }
        self.classes.insert(
            class.name.clone(),
            Export {
                value: Arc::clone(&class),
                origin: origin.to_string(),
            },
        );
        class
    }

    /// Look up a device class by name
    pub fn class(&self, name: &str) -> Result<Arc<DeviceClass>> {
        self.classes
            .get(name)
            .map(|export| Arc::clone(&export.value))
            .ok_or_else(|| BuildError::UnknownDeviceClass {
                name: name.to_string(),
            })
    }

    /// Module that exported a class, if known
    pub fn class_origin(&self, name: &str) -> Option<&str> {
        self.classes.get(name).map(|export| export.origin.as_str())
    }

    /// Look up a constant by name
    pub fn constant(&self, name: &str) -> Option<&str> {
        self.constants.get(name).map(|export| export.value.as_str())
    }

    /// Names of all exported classes, sorted
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}
