//! Module registry - maps support module names to installed versions
//!
//! A module is declared once per configuration (or explicitly overridden)
//! and resolves to `<home>/<name>/<version>`. Declaring a module also loads
//! its extension descriptor, if it has one, into the shared namespace.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::device::DeviceClass;
use crate::error::{BuildError, Result};
use crate::extension::{ExtensionDescriptor, ExtensionNamespace};

/// Location of a module's own extension descriptor, relative to its path
pub const EXTENSION_DESCRIPTOR: &str = "builder/extension.toml";

/// A request to declare a module version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDeclaration {
    /// Directory name of the module, must be a valid identifier
    pub name: String,
    /// Version subdirectory, omitted for unversioned modules
    #[serde(default)]
    pub version: Option<String>,
    /// Home directory, defaults to the registry's support root
    #[serde(default)]
    pub home: Option<PathBuf>,
    /// Replace an existing declaration of the same name
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    /// Append the module name to the home directory
    #[serde(default = "default_use_name")]
    pub use_name: bool,
}

fn default_use_name() -> bool {
    true
}

impl ModuleDeclaration {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_string),
            home: None,
            override_existing: false,
            use_name: true,
        }
    }

    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn override_existing(mut self) -> Self {
        self.override_existing = true;
        self
    }

    pub fn without_name(mut self) -> Self {
        self.use_name = false;
        self
    }
}

/// A declared module version.
///
/// Equality, ordering and hashing use the name alone so that sets and
/// sorted lists of modules behave predictably.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleVersion {
    name: String,
    version: Option<String>,
    home: PathBuf,
    use_name: bool,
}

impl ModuleVersion {
    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version, if any
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Installation path of this module version
    pub fn path(&self) -> PathBuf {
        let mut path = self.home.clone();
        if self.use_name {
            path.push(&self.name);
        }
        if let Some(version) = &self.version {
            path.push(version);
        }
        path
    }

    /// Installation path without the version component
    pub fn unversioned_path(&self) -> PathBuf {
        let mut path = self.home.clone();
        if self.use_name {
            path.push(&self.name);
        }
        path
    }

    /// Macro naming this module in configure/RELEASE
    pub fn macro_name(&self) -> String {
        self.name.to_uppercase()
    }

    /// Absolute path to a readable file within this module
    pub fn module_file(&self, filename: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path().join(filename);
        if is_readable(&path) {
            Ok(path)
        } else {
            Err(BuildError::ResourceNotFound {
                class: self.name.clone(),
                kind: "module",
                path,
            })
        }
    }
}

impl PartialEq for ModuleVersion {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ModuleVersion {}

impl Hash for ModuleVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModuleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// Check that a path names a file we can open for reading
pub(crate) fn is_readable(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Registry of declared modules and their extension namespace.
///
/// Module declarations are configuration-global: one registry can outlive
/// any number of generation runs.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    /// Default home for modules declared without one
    support_root: PathBuf,
    /// Fallback directory of extension descriptors keyed by module name
    defaults_dir: Option<PathBuf>,
    modules: BTreeMap<String, ModuleVersion>,
    namespace: ExtensionNamespace,
    /// Modules whose extension lookup has already run
    extensions_loaded: HashSet<String>,
}

impl ModuleRegistry {
    /// Create an empty registry resolving undeclared homes to `support_root`
    pub fn new(support_root: impl Into<PathBuf>) -> Self {
        Self {
            support_root: support_root.into(),
            defaults_dir: None,
            modules: BTreeMap::new(),
            namespace: ExtensionNamespace::default(),
            extensions_loaded: HashSet::new(),
        }
    }

    /// Set the directory searched for `<name>.toml` descriptors
    pub fn with_defaults_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.defaults_dir = Some(dir.into());
        self
    }

    /// Declare a module version and load its extension descriptor
    pub fn declare(&mut self, decl: ModuleDeclaration) -> Result<&ModuleVersion> {
        if !is_identifier(&decl.name) {
            return Err(BuildError::InvalidModuleName { name: decl.name });
        }

        let defined = self.modules.contains_key(&decl.name);
        if defined && !decl.override_existing {
            return Err(BuildError::DuplicateModule { name: decl.name });
        }
        if decl.override_existing && !defined {
            return Err(BuildError::UndeclaredOverride { name: decl.name });
        }

        let module = ModuleVersion {
            name: decl.name.clone(),
            version: decl.version,
            home: decl.home.unwrap_or_else(|| self.support_root.clone()),
            use_name: decl.use_name,
        };
        info!(
            module = %module.name,
            path = %module.path().display(),
            overridden = defined,
            "Declared module"
        );
        self.modules.insert(decl.name.clone(), module);

        // An override points at a new tree, so its descriptor is read again.
        // Exports of the replaced version stay unless the new one replaces them.
        if decl.override_existing {
            self.extensions_loaded.remove(&decl.name);
        }
        self.load_extension(&decl.name)?;
        self.get(&decl.name)
    }

    /// Look up a declared module
    pub fn get(&self, name: &str) -> Result<&ModuleVersion> {
        self.modules.get(name).ok_or_else(|| BuildError::UnknownModule {
            name: name.to_string(),
        })
    }

    /// Resolve a module name to its installation path
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        self.get(name).map(ModuleVersion::path)
    }

    /// Check if a module has been declared
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All declared modules, sorted by name
    pub fn modules(&self) -> impl Iterator<Item = &ModuleVersion> {
        self.modules.values()
    }

    /// Find the extension descriptor for a module, if it has one
    pub fn extension_path(&self, name: &str) -> Result<Option<PathBuf>> {
        let own = self.resolve(name)?.join(EXTENSION_DESCRIPTOR);
        if is_readable(&own) {
            return Ok(Some(own));
        }
        Ok(self
            .defaults_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.toml", name)))
            .filter(|path| is_readable(path)))
    }

    /// Load a module's extension descriptor into the shared namespace.
    ///
    /// Runs at most once per declared version of a module; returns whether a
    /// descriptor was merged by this call.
    pub fn load_extension(&mut self, name: &str) -> Result<bool> {
        if self.extensions_loaded.contains(name) {
            return Ok(false);
        }
        let path = self.extension_path(name)?;
        self.extensions_loaded.insert(name.to_string());

        match path {
            Some(path) => {
                debug!(module = %name, path = %path.display(), "Loading extension descriptor");
                let descriptor = ExtensionDescriptor::from_file(&path)?;
                self.namespace.merge(name, descriptor)?;
                Ok(true)
            }
            None => {
                warn!(module = %name, "No extension descriptor found, skipping");
                Ok(false)
            }
        }
    }

    /// Register a device class directly, overriding any earlier export
    pub fn register_class(&mut self, class: DeviceClass) -> Arc<DeviceClass> {
        let origin = class.module.clone();
        self.namespace.insert_class(&origin, class)
    }

    /// Merge a descriptor that did not come from a module directory
    pub fn merge_descriptor(&mut self, origin: &str, descriptor: ExtensionDescriptor) -> Result<()> {
        self.namespace.merge(origin, descriptor)
    }

    /// The shared extension namespace
    pub fn namespace(&self) -> &ExtensionNamespace {
        &self.namespace
    }

    /// Look up a device class in the namespace
    pub fn class(&self, name: &str) -> Result<Arc<DeviceClass>> {
        self.namespace.class(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    #[test]
    fn test_declare_and_resolve() {
        let mut registry = ModuleRegistry::new("/opt/support");
        registry
            .declare(ModuleDeclaration::new("foo", Some("1-0")))
            .unwrap();

        assert_eq!(registry.resolve("foo").unwrap(), PathBuf::from("/opt/support/foo/1-0"));
        assert_eq!(registry.get("foo").unwrap().macro_name(), "FOO");
        assert_eq!(registry.get("foo").unwrap().version(), Some("1-0"));
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut registry = ModuleRegistry::new("/opt/support");
        registry.declare(ModuleDeclaration::new("foo", Some("1-0"))).unwrap();

        let err = registry
            .declare(ModuleDeclaration::new("foo", Some("1-1")))
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateModule { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        registry
            .declare(ModuleDeclaration::new("foo", Some("2-0")).home("/other").override_existing())
            .unwrap();
        assert_eq!(registry.resolve("foo").unwrap(), PathBuf::from("/other/foo/2-0"));
    }

    #[test]
    fn test_override_requires_existing() {
        let mut registry = ModuleRegistry::new("/opt/support");
        let err = registry
            .declare(ModuleDeclaration::new("bar", None).override_existing())
            .unwrap_err();
        assert!(matches!(err, BuildError::UndeclaredOverride { .. }));
    }

    #[test]
    fn test_invalid_and_unknown_names() {
        let mut registry = ModuleRegistry::new("/opt/support");
        assert!(matches!(
            registry.declare(ModuleDeclaration::new("bad-name", None)),
            Err(BuildError::InvalidModuleName { .. })
        ));
        assert!(matches!(
            registry.resolve("missing"),
            Err(BuildError::UnknownModule { .. })
        ));
    }

    #[test]
    fn test_path_variants() {
        let mut registry = ModuleRegistry::new("/opt/support");
        registry
            .declare(ModuleDeclaration::new("base", None).home("/epics/base").without_name())
            .unwrap();
        assert_eq!(registry.resolve("base").unwrap(), PathBuf::from("/epics/base"));

        registry.declare(ModuleDeclaration::new("asyn", Some("4-9"))).unwrap();
        assert_eq!(
            registry.get("asyn").unwrap().unversioned_path(),
            PathBuf::from("/opt/support/asyn")
        );
    }

    #[test]
    fn test_ordering_by_name() {
        let mut registry = ModuleRegistry::new("/opt/support");
        registry.declare(ModuleDeclaration::new("zeta", Some("1"))).unwrap();
        registry.declare(ModuleDeclaration::new("alpha", Some("9"))).unwrap();

        let set: BTreeSet<ModuleVersion> = registry.modules().cloned().collect();
        let names: Vec<_> = set.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_extension_loaded_once_with_fallback() {
        let temp = TempDir::new().unwrap();
        let support = temp.path().join("support");
        let defaults = temp.path().join("defaults");
        std::fs::create_dir_all(support.join("own/1-0/builder")).unwrap();
        std::fs::create_dir_all(&defaults).unwrap();

        std::fs::write(
            support.join("own/1-0").join(EXTENSION_DESCRIPTOR),
            "[constants]\nPROTOCOL_DIR = \"own\"\n",
        )
        .unwrap();
        std::fs::write(
            defaults.join("fallback.toml"),
            "[constants]\nPROTOCOL_DIR = \"fallback\"\n",
        )
        .unwrap();

        let mut registry = ModuleRegistry::new(&support).with_defaults_dir(&defaults);
        registry.declare(ModuleDeclaration::new("own", Some("1-0"))).unwrap();
        assert_eq!(registry.namespace().constant("PROTOCOL_DIR"), Some("own"));

        // Later module silently overrides the earlier export
        registry.declare(ModuleDeclaration::new("fallback", None)).unwrap();
        assert_eq!(registry.namespace().constant("PROTOCOL_DIR"), Some("fallback"));

        // Second load is a no-op
        assert!(!registry.load_extension("own").unwrap());
        assert_eq!(registry.namespace().constant("PROTOCOL_DIR"), Some("fallback"));
    }

    #[test]
    fn test_override_reloads_extension() {
        let temp = TempDir::new().unwrap();
        for (version, constant, class) in [("1-0", "1", "OldPsu"), ("2-0", "2", "Psu")] {
            let dir = temp.path().join("stream").join(version).join("builder");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("extension.toml"),
                format!(
                    "[constants]\nSTREAM_VERSION = \"{constant}\"\n\n[[device_class]]\nname = \"{class}\"\nlib_files = [\"stream{constant}\"]\n"
                ),
            )
            .unwrap();
        }

        let mut registry = ModuleRegistry::new(temp.path());
        registry.declare(ModuleDeclaration::new("stream", Some("1-0"))).unwrap();
        assert_eq!(registry.namespace().constant("STREAM_VERSION"), Some("1"));
        assert!(registry.class("Psu").is_err());

        registry
            .declare(ModuleDeclaration::new("stream", Some("2-0")).override_existing())
            .unwrap();
        assert_eq!(registry.namespace().constant("STREAM_VERSION"), Some("2"));
        assert_eq!(registry.class("Psu").unwrap().lib_files, vec!["stream2"]);
        assert_eq!(registry.namespace().class_origin("Psu"), Some("stream"));
        // Exports only the replaced version made are kept
        assert!(registry.class("OldPsu").is_ok());
    }
}
