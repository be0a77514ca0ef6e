//! Hardware registry - library load order and device initialisation
//!
//! Device classes are added to the load order depth first, dependencies
//! before dependents, each at most once. Instances are kept in creation
//! order and visited by phase when the startup script is generated.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::BuildConfig;
use crate::dbd::DbdLoader;
use crate::device::{DeviceClass, DeviceInstance, HookContext, InitHook, InstanceId, InstanceSpec};
use crate::error::{BuildError, Result};
use crate::module::{is_readable, ModuleRegistry};
use crate::writer::{DataDirectory, LineSink};

/// Location of a library file under its module, for the configured build mode
pub fn lib_file_path(config: &BuildConfig, file: &str) -> PathBuf {
    if config.dynamic_load {
        Path::new("bin").join(&config.architecture).join(file)
    } else {
        Path::new("lib")
            .join(&config.architecture)
            .join(format!("lib{}.a", file))
    }
}

/// Location of a binary object file under its module
pub fn bin_file_path(config: &BuildConfig, file: &str) -> PathBuf {
    Path::new("bin").join(&config.architecture).join(file)
}

/// Location of a dbd file under its module
pub fn dbd_file_path(file: &str) -> PathBuf {
    Path::new("dbd").join(file)
}

/// Startup script work needed to load one device class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadAction {
    pub class: String,
    /// Module directory the script changes to
    pub working_dir: PathBuf,
    /// Object files loaded in both build modes, relative to `working_dir`
    pub bin_files: Vec<PathBuf>,
    /// Libraries loaded at runtime, dynamic mode only
    pub lib_files: Vec<PathBuf>,
    /// Dbd files loaded from `working_dir/dbd`, dynamic mode only
    pub dbd_files: Vec<String>,
    /// Register each dbd's record and device support after loading it
    pub register_dbd: bool,
}

impl LoadAction {
    pub fn is_empty(&self) -> bool {
        self.bin_files.is_empty() && self.lib_files.is_empty() && self.dbd_files.is_empty()
    }
}

/// State a hook may use while the init sequence is generated
pub struct HookEnv<'a> {
    pub modules: &'a ModuleRegistry,
    pub architecture: &'a str,
    pub data: &'a mut DataDirectory,
}

/// Load order, instances and interrupt vectors for one generation
#[derive(Debug)]
pub struct HardwareRegistry {
    load_order: Vec<Arc<DeviceClass>>,
    loaded: HashSet<String>,
    referenced: BTreeSet<String>,
    instances: Vec<DeviceInstance>,
    instance_names: HashMap<String, usize>,
    int_vector_base: u32,
    next_int_vector: u32,
    initialised_once: HashSet<String>,
}

impl HardwareRegistry {
    /// Create an empty registry handing out vectors from `int_vector_base`
    pub fn new(int_vector_base: u32) -> Self {
        Self {
            load_order: Vec::new(),
            loaded: HashSet::new(),
            referenced: BTreeSet::new(),
            instances: Vec::new(),
            instance_names: HashMap::new(),
            int_vector_base,
            next_int_vector: int_vector_base,
            initialised_once: HashSet::new(),
        }
    }

    /// Add a class and its dependencies to the load order.
    ///
    /// Dependencies are named and looked up in the module registry's
    /// namespace. Classes already loaded are skipped; a dependency that
    /// leads back to a class still being added is a cycle.
    pub fn add_library(
        &mut self,
        class: &Arc<DeviceClass>,
        modules: &ModuleRegistry,
        config: &BuildConfig,
        dbd: &mut dyn DbdLoader,
    ) -> Result<()> {
        if self.loaded.contains(&class.name) {
            return Ok(());
        }

        // Each stack entry is a class in progress and its next dependency
        let mut stack: Vec<(Arc<DeviceClass>, usize)> = vec![(Arc::clone(class), 0)];
        let mut in_progress: HashSet<String> = HashSet::from([class.name.clone()]);

        while let Some((current, next)) = stack.last_mut() {
            let Some(dep_name) = current.dependencies.get(*next).cloned() else {
                if let Some((done, _)) = stack.pop() {
                    in_progress.remove(&done.name);
                    self.finish_library(done, modules, config, dbd)?;
                }
                continue;
            };
            *next += 1;

            if self.loaded.contains(&dep_name) {
                continue;
            }
            if in_progress.contains(&dep_name) {
                let start = stack
                    .iter()
                    .position(|(c, _)| c.name == dep_name)
                    .unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|(c, _)| c.name.clone()).collect();
                cycle.push(dep_name);
                return Err(BuildError::DependencyCycle { cycle });
            }
            let dep = modules.class(&dep_name)?;
            in_progress.insert(dep_name);
            stack.push((dep, 0));
        }
        Ok(())
    }

    fn finish_library(
        &mut self,
        class: Arc<DeviceClass>,
        modules: &ModuleRegistry,
        config: &BuildConfig,
        dbd: &mut dyn DbdLoader,
    ) -> Result<()> {
        let module = modules.get(&class.module)?;
        self.referenced.insert(module.name().to_string());

        if let Some(callback) = &class.added_to_library {
            callback(&class)?;
        }
        self.loaded.insert(class.name.clone());
        self.load_order.push(Arc::clone(&class));
        debug!(class = %class.name, module = %class.module, position = self.load_order.len(), "Added library");

        let root = module.path();
        let check = |kind: &'static str, relative: PathBuf| -> Result<()> {
            let path = root.join(relative);
            if is_readable(&path) {
                Ok(())
            } else {
                Err(BuildError::ResourceNotFound {
                    class: class.name.clone(),
                    kind,
                    path,
                })
            }
        };
        for file in &class.lib_files {
            check("library", lib_file_path(config, file))?;
        }
        for file in &class.bin_files {
            check("binary", bin_file_path(config, file))?;
        }
        for file in &class.dbd_files {
            check("dbd", dbd_file_path(file))?;
        }

        let dbd_dir = root.join("dbd");
        for file in &class.dbd_files {
            dbd.load_dbd(&dbd_dir, file)?;
        }
        Ok(())
    }

    /// Record that a module is used other than through a loaded class
    pub fn mark_referenced(&mut self, module: &str) {
        self.referenced.insert(module.to_string());
    }

    /// Create an instance of an already loaded class
    pub fn add_hardware(&mut self, class: Arc<DeviceClass>, spec: InstanceSpec) -> Result<InstanceId> {
        if let Some(name) = &spec.name {
            if self.instance_names.contains_key(name) {
                return Err(BuildError::DuplicateInstance { name: name.clone() });
            }
        }

        let index = self.instances.len();
        let vectors = self.allocate_int_vector(class.int_vectors)?;
        let instance = DeviceInstance::new(index, class, spec, vectors)?;
        if self.instance_names.contains_key(instance.name()) {
            return Err(BuildError::DuplicateInstance {
                name: instance.name().to_string(),
            });
        }

        debug!(
            instance = %instance.name(),
            class = %instance.class().name,
            index,
            vectors = ?instance.int_vectors(),
            "Added hardware"
        );
        self.instance_names.insert(instance.name().to_string(), index);
        self.instances.push(instance);
        Ok(InstanceId(index))
    }

    /// Hand out `count` consecutive vectors above every earlier allocation
    pub fn allocate_int_vector(&mut self, count: u32) -> Result<Vec<u32>> {
        let start = self.next_int_vector;
        let end = start
            .checked_add(count)
            .ok_or(BuildError::IntVectorsExhausted { count, last: start })?;
        self.next_int_vector = end;
        Ok((start..end).collect())
    }

    pub fn load_order(&self) -> &[Arc<DeviceClass>] {
        &self.load_order
    }

    pub fn is_loaded(&self, class: &str) -> bool {
        self.loaded.contains(class)
    }

    /// Modules used by at least one loaded class, sorted
    pub fn referenced_modules(&self) -> &BTreeSet<String> {
        &self.referenced
    }

    pub fn instances(&self) -> &[DeviceInstance] {
        &self.instances
    }

    pub fn instance(&self, name: &str) -> Result<&DeviceInstance> {
        self.instance_names
            .get(name)
            .map(|&i| &self.instances[i])
            .ok_or_else(|| BuildError::UnknownInstance {
                name: name.to_string(),
            })
    }

    pub fn get(&self, id: InstanceId) -> Option<&DeviceInstance> {
        self.instances.get(id.0)
    }

    /// Load actions for every class in load order
    pub fn load_actions(&self, modules: &ModuleRegistry, config: &BuildConfig) -> Result<Vec<LoadAction>> {
        self.load_order
            .iter()
            .map(|class| {
                let dynamic = config.dynamic_load;
                Ok(LoadAction {
                    class: class.name.clone(),
                    working_dir: modules.resolve(&class.module)?,
                    bin_files: class
                        .bin_files
                        .iter()
                        .map(|f| bin_file_path(config, f))
                        .collect(),
                    lib_files: if dynamic {
                        class.lib_files.iter().map(|f| lib_file_path(config, f)).collect()
                    } else {
                        Vec::new()
                    },
                    dbd_files: if dynamic {
                        class.dbd_files.clone()
                    } else {
                        Vec::new()
                    },
                    register_dbd: config.register_dbd,
                })
            })
            .collect()
    }

    /// Libraries in link order: dependents before their dependencies
    pub fn libraries(&self) -> Vec<String> {
        self.load_order
            .iter()
            .flat_map(|c| c.lib_files.iter().cloned())
            .rev()
            .collect()
    }

    /// System libraries in link order, each listed once
    pub fn sys_libraries(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.load_order
            .iter()
            .flat_map(|c| c.sys_libs.iter().cloned())
            .rev()
            .filter(|lib| seen.insert(lib.clone()))
            .collect()
    }

    /// Dbd files in load order
    pub fn dbd_files(&self) -> Vec<String> {
        self.load_order
            .iter()
            .flat_map(|c| c.dbd_files.iter().cloned())
            .collect()
    }

    /// Instance indices ordered by phase, then creation
    fn sequence_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.instances.len()).collect();
        order.sort_by_key(|&i| (self.instances[i].class().phase, i));
        order
    }

    /// Emit the startup lines that run before `iocInit`.
    ///
    /// Each class's run-once hook fires before the first of its instances;
    /// every instance's comment then precedes its own hook output.
    pub fn generate_init_sequence(&mut self, env: &mut HookEnv<'_>, out: &mut dyn LineSink) -> Result<()> {
        self.initialised_once.clear();

        for index in self.sequence_order() {
            let instance = &self.instances[index];
            let class = instance.class();
            let once = class
                .initialise_once
                .as_ref()
                .filter(|_| !self.initialised_once.contains(&class.name));

            if instance.comment().is_some() || once.is_some() || class.initialise.is_some() {
                out.line(String::new())?;
            }
            if let Some(comment) = instance.comment() {
                for line in comment.lines() {
                    out.line(format!("# {}", line).trim_end().to_string())?;
                }
            }
            if let Some(hook) = once {
                debug!(class = %class.name, instance = %instance.name(), "Running initialise-once hook");
                emit(hook, instance, env, out)?;
                self.initialised_once.insert(class.name.clone());
            }
            if let Some(hook) = &class.initialise {
                emit(hook, instance, env, out)?;
            }
        }
        Ok(())
    }

    /// Emit the startup lines that run after `iocInit`
    pub fn generate_post_init_sequence(&self, env: &mut HookEnv<'_>, out: &mut dyn LineSink) -> Result<()> {
        for index in self.sequence_order() {
            let instance = &self.instances[index];
            if let Some(hook) = &instance.class().post_ioc_initialise {
                out.line(String::new())?;
                emit(hook, instance, env, out)?;
            }
        }
        Ok(())
    }

    /// Forget all classes, instances and allocations
    pub fn reset(&mut self) {
        *self = Self::new(self.int_vector_base);
    }
}

fn emit(
    hook: &Arc<dyn InitHook>,
    instance: &DeviceInstance,
    env: &mut HookEnv<'_>,
    out: &mut dyn LineSink,
) -> Result<()> {
    let module_path = env.modules.resolve(&instance.class().module)?;
    let mut ctx = HookContext::new(
        instance,
        &module_path,
        env.architecture,
        env.modules.namespace(),
        out,
        env.data,
    );
    hook.emit(&mut ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbd::DbdTable;
    use crate::device::ScriptHook;
    use crate::module::ModuleDeclaration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ARCH: &str = "linux-x86_64";

    struct Fixture {
        _temp: TempDir,
        modules: ModuleRegistry,
        config: BuildConfig,
        dbd: DbdTable,
    }

    /// Support tree with module `m` holding libraries a, b, c and a.dbd
    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("m/1-0");
        std::fs::create_dir_all(root.join("lib").join(ARCH)).unwrap();
        std::fs::create_dir_all(root.join("dbd")).unwrap();
        for lib in ["a", "b", "c"] {
            std::fs::write(root.join("lib").join(ARCH).join(format!("lib{}.a", lib)), "").unwrap();
        }
        std::fs::write(root.join("dbd/a.dbd"), "recordtype(ai) {\n    field(INP, DBF_INLINK)\n}\n").unwrap();

        let mut modules = ModuleRegistry::new(temp.path());
        modules.declare(ModuleDeclaration::new("m", Some("1-0"))).unwrap();
        Fixture {
            _temp: temp,
            modules,
            config: BuildConfig::new(ARCH),
            dbd: DbdTable::new(),
        }
    }

    fn add(f: &mut Fixture, reg: &mut HardwareRegistry, name: &str) -> Result<()> {
        let class = f.modules.class(name)?;
        reg.add_library(&class, &f.modules, &f.config, &mut f.dbd)
    }

    fn names(reg: &HardwareRegistry) -> Vec<&str> {
        reg.load_order().iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_dependencies_first() {
        let mut f = fixture();
        f.modules.register_class(DeviceClass::new("A", "m").with_lib_files(["a"]).with_dbd_files(["a.dbd"]));
        f.modules.register_class(DeviceClass::new("B", "m").with_lib_files(["b"]).with_dependencies(["A"]));
        f.modules.register_class(DeviceClass::new("C", "m").with_lib_files(["c"]).with_dependencies(["B", "A"]));

        let mut reg = HardwareRegistry::new(192);
        add(&mut f, &mut reg, "C").unwrap();
        add(&mut f, &mut reg, "C").unwrap();
        add(&mut f, &mut reg, "B").unwrap();

        assert_eq!(names(&reg), vec!["A", "B", "C"]);
        assert_eq!(reg.libraries(), vec!["c", "b", "a"]);
        assert_eq!(reg.dbd_files(), vec!["a.dbd"]);
        assert!(reg.referenced_modules().contains("m"));
        assert!(f.dbd.has_field("ai", "INP"));
    }

    #[test]
    fn test_cycle_detected() {
        let mut f = fixture();
        f.modules.register_class(DeviceClass::new("A", "m").with_dependencies(["C"]));
        f.modules.register_class(DeviceClass::new("B", "m").with_dependencies(["A"]));
        f.modules.register_class(DeviceClass::new("C", "m").with_dependencies(["B"]));

        let mut reg = HardwareRegistry::new(192);
        let err = add(&mut f, &mut reg, "A").unwrap_err();
        match err {
            BuildError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["A", "C", "B", "A"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(reg.load_order().is_empty());
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut f = fixture();
        f.modules.register_class(DeviceClass::new("A", "m").with_dependencies(["A"]));
        let mut reg = HardwareRegistry::new(192);
        assert!(matches!(
            add(&mut f, &mut reg, "A"),
            Err(BuildError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_missing_resource_names_class() {
        let mut f = fixture();
        f.modules.register_class(DeviceClass::new("X", "m").with_lib_files(["missing"]));
        let mut reg = HardwareRegistry::new(192);
        match add(&mut f, &mut reg, "X").unwrap_err() {
            BuildError::ResourceNotFound { class, kind, path } => {
                assert_eq!(class, "X");
                assert_eq!(kind, "library");
                assert!(path.ends_with("lib/linux-x86_64/libmissing.a"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_added_to_library_runs_once() {
        let mut f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        f.modules.register_class(DeviceClass::new("A", "m").on_added_to_library(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let mut reg = HardwareRegistry::new(192);
        for _ in 0..3 {
            add(&mut f, &mut reg, "A").unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_int_vectors() {
        let mut reg = HardwareRegistry::new(192);
        let first = reg.allocate_int_vector(3).unwrap();
        let second = reg.allocate_int_vector(2).unwrap();
        assert_eq!(first, vec![192, 193, 194]);
        assert_eq!(second, vec![195, 196]);

        let mut reg = HardwareRegistry::new(u32::MAX - 1);
        reg.allocate_int_vector(1).unwrap();
        assert!(matches!(
            reg.allocate_int_vector(2),
            Err(BuildError::IntVectorsExhausted { .. })
        ));

        reg.reset();
        assert_eq!(reg.allocate_int_vector(1).unwrap(), vec![u32::MAX - 1]);
    }

    fn sequence(f: &Fixture, reg: &mut HardwareRegistry) -> (Vec<String>, Vec<String>) {
        let mut data = DataDirectory::new();
        let mut env = HookEnv {
            modules: &f.modules,
            architecture: ARCH,
            data: &mut data,
        };
        let mut init = Vec::new();
        reg.generate_init_sequence(&mut env, &mut init).unwrap();
        let mut post = Vec::new();
        reg.generate_post_init_sequence(&mut env, &mut post).unwrap();
        (init, post)
    }

    #[test]
    fn test_init_sequence_once_then_each() {
        let mut f = fixture();
        let class = f.modules.register_class(
            DeviceClass::new("Card", "m")
                .with_int_vectors(1)
                .with_initialise_once(ScriptHook::new(["cardDriverInit()"]))
                .with_initialise(ScriptHook::new(["cardConfigure({slot}, {int_vector})"]))
                .with_post_ioc_initialise(ScriptHook::new(["cardStart({instance})"])),
        );

        let mut reg = HardwareRegistry::new(192);
        add(&mut f, &mut reg, "Card").unwrap();
        for slot in 0..3 {
            let mut spec = InstanceSpec::new("Card").named(format!("card{}", slot)).arg("slot", slot);
            if slot == 1 {
                spec = spec.comment("middle card");
            }
            reg.add_hardware(Arc::clone(&class), spec).unwrap();
        }

        let (init, post) = sequence(&f, &mut reg);
        assert_eq!(
            init,
            vec![
                "",
                "cardDriverInit()",
                "cardConfigure(0, 192)",
                "",
                "# middle card",
                "cardConfigure(1, 193)",
                "",
                "cardConfigure(2, 194)",
            ]
        );
        assert_eq!(post, vec!["", "cardStart(card0)", "", "cardStart(card1)", "", "cardStart(card2)"]);

        // A second pass produces the same output
        let (again, _) = sequence(&f, &mut reg);
        assert_eq!(again, init);
    }

    #[test]
    fn test_phase_orders_instances() {
        let mut f = fixture();
        let late = f.modules.register_class(
            DeviceClass::new("Late", "m")
                .with_phase(1)
                .with_initialise(ScriptHook::new(["late()"])),
        );
        let early = f.modules.register_class(
            DeviceClass::new("Early", "m").with_initialise(ScriptHook::new(["early()"])),
        );

        let mut reg = HardwareRegistry::new(192);
        reg.add_hardware(late, InstanceSpec::new("Late")).unwrap();
        reg.add_hardware(early, InstanceSpec::new("Early")).unwrap();

        let (init, _) = sequence(&f, &mut reg);
        assert_eq!(init, vec!["", "early()", "", "late()"]);
    }

    #[test]
    fn test_duplicate_instance_name() {
        let mut f = fixture();
        let class = f.modules.register_class(DeviceClass::new("A", "m"));
        let mut reg = HardwareRegistry::new(192);
        reg.add_hardware(Arc::clone(&class), InstanceSpec::new("A").named("x")).unwrap();
        assert!(matches!(
            reg.add_hardware(class, InstanceSpec::new("A").named("x")),
            Err(BuildError::DuplicateInstance { .. })
        ));
        assert!(reg.instance("x").is_ok());
        assert!(reg.instance("y").is_err());
    }

    #[test]
    fn test_load_actions_by_mode() {
        let mut f = fixture();
        f.modules.register_class(DeviceClass::new("A", "m").with_lib_files(["a"]).with_dbd_files(["a.dbd"]));
        let mut reg = HardwareRegistry::new(192);
        add(&mut f, &mut reg, "A").unwrap();

        let actions = reg.load_actions(&f.modules, &f.config).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].is_empty());

        let mut dynamic = f.config.clone();
        dynamic.dynamic_load = true;
        let actions = reg.load_actions(&f.modules, &dynamic).unwrap();
        assert_eq!(actions[0].lib_files, vec![PathBuf::from("bin/linux-x86_64/a")]);
        assert_eq!(actions[0].dbd_files, vec!["a.dbd"]);
    }
}
