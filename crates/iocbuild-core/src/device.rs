//! Device classes, instances and their initialisation hooks
//!
//! A [`DeviceClass`] is the static description of a hardware library: the
//! module it lives in, the classes it depends on, the files it needs and the
//! startup script it contributes. A [`DeviceInstance`] is one declared use
//! of a class.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::context::BuildContext;
use crate::error::{BuildError, Result};
use crate::extension::ExtensionNamespace;
use crate::record::RecordFactoryDef;
use crate::template;
use crate::writer::{DataDirectory, LineSink};

/// Callback run once when a class is first added to the load order
pub type AddedToLibrary = Arc<dyn Fn(&DeviceClass) -> Result<()> + Send + Sync>;

/// Callback run for each loaded class after registration, before any file is generated
pub type Finalise = Arc<dyn Fn(&DeviceClass, &mut BuildContext<'_>) -> Result<()> + Send + Sync>;

/// Keys available to a class's db makefile lines
const DB_MAKEFILE_KEYS: [&str; 3] = ["ioc", "db", "expanded_db"];

/// A startup script hook attached to a device class
pub trait InitHook: fmt::Debug + Send + Sync {
    /// Emit this hook's script lines for one instance
    fn emit(&self, ctx: &mut HookContext<'_>) -> Result<()>;

    /// Instance arguments this hook reads
    fn required_args(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Everything a hook may read or produce while emitting for an instance
pub struct HookContext<'a> {
    instance: &'a DeviceInstance,
    module_path: &'a Path,
    architecture: &'a str,
    namespace: &'a ExtensionNamespace,
    out: &'a mut dyn LineSink,
    data: &'a mut DataDirectory,
}

impl<'a> HookContext<'a> {
    pub fn new(
        instance: &'a DeviceInstance,
        module_path: &'a Path,
        architecture: &'a str,
        namespace: &'a ExtensionNamespace,
        out: &'a mut dyn LineSink,
        data: &'a mut DataDirectory,
    ) -> Self {
        Self {
            instance,
            module_path,
            architecture,
            namespace,
            out,
            data,
        }
    }

    pub fn instance(&self) -> &DeviceInstance {
        self.instance
    }

    pub fn module_path(&self) -> &Path {
        self.module_path
    }

    pub fn architecture(&self) -> &str {
        self.architecture
    }

    /// Append one line to the script being generated
    pub fn line(&mut self, line: impl Into<String>) -> Result<()> {
        self.out.line(line.into())
    }

    /// Render a template against the instance, its module and the namespace
    pub fn render(&self, template: &str) -> Result<String> {
        let context = format!("device {} ({})", self.instance.name, self.instance.class.name);
        template::render(template, &context, |key| match key {
            "module_path" => Some(self.module_path.display().to_string()),
            "arch" => Some(self.architecture.to_string()),
            _ => match key.strip_prefix("const:") {
                Some(name) => self.namespace.constant(name).map(str::to_string),
                None => self.instance.lookup(key),
            },
        })
    }

    /// Register a file to copy into the IOC data directory.
    ///
    /// Relative paths are taken from the instance's module directory.
    pub fn add_data_file(&mut self, source: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        let source = if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.module_path.join(source)
        };
        self.data.add(&source, None)
    }
}

/// Hook defined as lines of template text, as read from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptHook {
    /// Script lines, rendered per instance
    #[serde(default)]
    pub lines: Vec<String>,
    /// Data files to copy, rendered per instance
    #[serde(default)]
    pub data_files: Vec<String>,
}

impl ScriptHook {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            data_files: Vec::new(),
        }
    }

    pub fn with_data_file(mut self, file: impl Into<String>) -> Self {
        self.data_files.push(file.into());
        self
    }

    /// Reject templates that can never render
    fn validate(&self, context: &str) -> Result<()> {
        for text in self.lines.iter().chain(&self.data_files) {
            template::render(text, context, |_| Some(String::new()))?;
        }
        Ok(())
    }
}

impl InitHook for ScriptHook {
    fn emit(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        for line in &self.lines {
            let rendered = ctx.render(line)?;
            ctx.line(rendered)?;
        }
        for file in &self.data_files {
            let rendered = ctx.render(file)?;
            ctx.add_data_file(rendered)?;
        }
        Ok(())
    }

    fn required_args(&self) -> Result<Vec<String>> {
        let mut args = Vec::new();
        for text in self.lines.iter().chain(&self.data_files) {
            let keys = template::placeholders(text, "script hook")?;
            args.extend(keys.into_iter().filter(|key| !is_builtin_key(key)));
        }
        Ok(args)
    }
}

/// Placeholders supplied by the generator rather than instance arguments
fn is_builtin_key(key: &str) -> bool {
    matches!(key, "instance" | "module_path" | "arch" | "int_vector")
        || key.starts_with("int_vector.")
        || key.starts_with("const:")
}

/// Serialized form of a device class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceClassDef {
    pub name: String,
    /// Owning module, defaults to the module exporting the definition
    #[serde(default)]
    pub module: Option<String>,
    /// Names of classes that must load first, in order
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub lib_files: Vec<String>,
    #[serde(default)]
    pub bin_files: Vec<String>,
    #[serde(default)]
    pub dbd_files: Vec<String>,
    #[serde(default)]
    pub sys_libs: Vec<String>,
    #[serde(default)]
    pub phase: i32,
    /// Interrupt vectors allocated for every instance
    #[serde(default)]
    pub int_vectors: u32,
    #[serde(default)]
    pub initialise_once: Option<ScriptHook>,
    #[serde(default)]
    pub initialise: Option<ScriptHook>,
    #[serde(default)]
    pub post_ioc_initialise: Option<ScriptHook>,
    #[serde(default)]
    pub record_factory: Vec<RecordFactoryDef>,
    /// Lines added to the database makefile, with `{ioc}`, `{db}` and `{expanded_db}`
    #[serde(default)]
    pub db_makefile: Vec<String>,
}

/// Static description of a hardware library
#[derive(Clone)]
pub struct DeviceClass {
    pub name: String,
    pub module: String,
    pub dependencies: Vec<String>,
    pub lib_files: Vec<String>,
    pub bin_files: Vec<String>,
    pub dbd_files: Vec<String>,
    pub sys_libs: Vec<String>,
    pub phase: i32,
    pub int_vectors: u32,
    pub initialise_once: Option<Arc<dyn InitHook>>,
    pub initialise: Option<Arc<dyn InitHook>>,
    pub post_ioc_initialise: Option<Arc<dyn InitHook>>,
    pub added_to_library: Option<AddedToLibrary>,
    pub finalise: Option<Finalise>,
    pub record_factories: Vec<RecordFactoryDef>,
    pub db_makefile: Vec<String>,
}

fn to_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl DeviceClass {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            dependencies: Vec::new(),
            lib_files: Vec::new(),
            bin_files: Vec::new(),
            dbd_files: Vec::new(),
            sys_libs: Vec::new(),
            phase: 0,
            int_vectors: 0,
            initialise_once: None,
            initialise: None,
            post_ioc_initialise: None,
            added_to_library: None,
            finalise: None,
            record_factories: Vec::new(),
            db_makefile: Vec::new(),
        }
    }

    /// Build a class from its serialized form
    pub fn from_def(def: DeviceClassDef, default_module: &str) -> Result<Self> {
        if def.name.is_empty() {
            return Err(BuildError::Description(format!(
                "device class exported by {} has no name",
                default_module
            )));
        }

        let context = format!("device class {}", def.name);
        let hooks = [&def.initialise_once, &def.initialise, &def.post_ioc_initialise];
        for hook in hooks.into_iter().flatten() {
            hook.validate(&context)?;
        }
        for factory in &def.record_factory {
            factory.validate(&context)?;
        }
        for line in &def.db_makefile {
            template::render(line, &context, |key| DB_MAKEFILE_KEYS.contains(&key).then(String::new))?;
        }

        let hook = |h: Option<ScriptHook>| h.map(|h| Arc::new(h) as Arc<dyn InitHook>);
        Ok(Self {
            module: def.module.unwrap_or_else(|| default_module.to_string()),
            name: def.name,
            dependencies: def.dependencies,
            lib_files: def.lib_files,
            bin_files: def.bin_files,
            dbd_files: def.dbd_files,
            sys_libs: def.sys_libs,
            phase: def.phase,
            int_vectors: def.int_vectors,
            initialise_once: hook(def.initialise_once),
            initialise: hook(def.initialise),
            post_ioc_initialise: hook(def.post_ioc_initialise),
            added_to_library: None,
            finalise: None,
            record_factories: def.record_factory,
            db_makefile: def.db_makefile,
        })
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(to_strings(names));
        self
    }

    pub fn with_lib_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lib_files.extend(to_strings(files));
        self
    }

    pub fn with_bin_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bin_files.extend(to_strings(files));
        self
    }

    pub fn with_dbd_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dbd_files.extend(to_strings(files));
        self
    }

    pub fn with_sys_libs<I, S>(mut self, libs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sys_libs.extend(to_strings(libs));
        self
    }

    pub fn with_phase(mut self, phase: i32) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_int_vectors(mut self, count: u32) -> Self {
        self.int_vectors = count;
        self
    }

    pub fn with_initialise_once(mut self, hook: impl InitHook + 'static) -> Self {
        self.initialise_once = Some(Arc::new(hook));
        self
    }

    pub fn with_initialise(mut self, hook: impl InitHook + 'static) -> Self {
        self.initialise = Some(Arc::new(hook));
        self
    }

    pub fn with_post_ioc_initialise(mut self, hook: impl InitHook + 'static) -> Self {
        self.post_ioc_initialise = Some(Arc::new(hook));
        self
    }

    pub fn on_added_to_library<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeviceClass) -> Result<()> + Send + Sync + 'static,
    {
        self.added_to_library = Some(Arc::new(callback));
        self
    }

    pub fn on_finalise<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeviceClass, &mut BuildContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.finalise = Some(Arc::new(callback));
        self
    }

    pub fn with_record_factory(mut self, factory: RecordFactoryDef) -> Self {
        self.record_factories.push(factory);
        self
    }

    pub fn with_db_makefile<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.db_makefile.extend(to_strings(lines));
        self
    }

    /// Render this class's database makefile lines.
    ///
    /// `db` and `expanded_db` are empty when the file was not written.
    pub fn db_makefile_lines(&self, ioc: &str, db: &str, expanded_db: &str) -> Result<Vec<String>> {
        let context = format!("device class {}", self.name);
        self.db_makefile
            .iter()
            .map(|line| {
                template::render(line, &context, |key| match key {
                    "ioc" => Some(ioc.to_string()),
                    "db" => Some(db.to_string()),
                    "expanded_db" => Some(expanded_db.to_string()),
                    _ => None,
                })
            })
            .collect()
    }

    /// Find a record factory definition by name
    pub fn record_factory(&self, name: &str) -> Result<&RecordFactoryDef> {
        self.record_factories
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| BuildError::UnknownRecordFactory {
                class: self.name.clone(),
                factory: name.to_string(),
            })
    }

    fn hooks(&self) -> impl Iterator<Item = &Arc<dyn InitHook>> {
        [&self.initialise_once, &self.initialise, &self.post_ioc_initialise]
            .into_iter()
            .flatten()
    }
}

impl fmt::Debug for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClass")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("dependencies", &self.dependencies)
            .field("lib_files", &self.lib_files)
            .field("bin_files", &self.bin_files)
            .field("dbd_files", &self.dbd_files)
            .field("sys_libs", &self.sys_libs)
            .field("phase", &self.phase)
            .field("int_vectors", &self.int_vectors)
            .field("initialise_once", &self.initialise_once)
            .field("initialise", &self.initialise)
            .field("post_ioc_initialise", &self.post_ioc_initialise)
            .field("added_to_library", &self.added_to_library.is_some())
            .field("finalise", &self.finalise.is_some())
            .field("record_factories", &self.record_factories)
            .field("db_makefile", &self.db_makefile)
            .finish()
    }
}

/// Request to create one device instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Name of the device class to instantiate
    pub class: String,
    /// Instance name, generated from the class when omitted
    #[serde(default)]
    pub name: Option<String>,
    /// Comment written above the instance's startup lines
    #[serde(default)]
    pub comment: Option<String>,
    /// Arguments substituted into the class's hook templates
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl InstanceSpec {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(key.into(), value.to_string());
        self
    }
}

/// Position of an instance in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub usize);

/// One declared use of a device class
#[derive(Debug, Clone)]
pub struct DeviceInstance {
    index: usize,
    name: String,
    class: Arc<DeviceClass>,
    comment: Option<String>,
    args: BTreeMap<String, String>,
    int_vectors: Vec<u32>,
}

impl DeviceInstance {
    /// Create an instance, checking its name and that every argument its
    /// class's hooks read has been supplied
    pub(crate) fn new(
        index: usize,
        class: Arc<DeviceClass>,
        spec: InstanceSpec,
        int_vectors: Vec<u32>,
    ) -> Result<Self> {
        let name = spec
            .name
            .unwrap_or_else(|| format!("{}_{}", class.name, index));
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
        {
            return Err(BuildError::NamingConflict {
                name,
                reason: "device names may only contain letters, digits and _-:.".into(),
            });
        }

        for hook in class.hooks() {
            for arg in hook.required_args()? {
                if !spec.args.contains_key(&arg) {
                    return Err(BuildError::UnknownParameter {
                        context: format!("device {} ({})", name, class.name),
                        name: arg,
                    });
                }
            }
        }

        Ok(Self {
            index,
            name,
            class,
            comment: spec.comment,
            args: spec.args,
            int_vectors,
        })
    }

    pub fn id(&self) -> InstanceId {
        InstanceId(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &Arc<DeviceClass> {
        &self.class
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn args(&self) -> &BTreeMap<String, String> {
        &self.args
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Interrupt vectors allocated to this instance
    pub fn int_vectors(&self) -> &[u32] {
        &self.int_vectors
    }

    /// Resolve an instance-level template key
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "instance" => Some(self.name.clone()),
            "int_vector" => self.int_vectors.first().map(u32::to_string),
            _ => match key.strip_prefix("int_vector.") {
                Some(n) => n
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.int_vectors.get(i))
                    .map(u32::to_string),
                None => self.args.get(key).cloned(),
            },
        }
    }
}
