//! Per-run build context
//!
//! Owns everything one generation run mutates and borrows the module
//! registry, which outlives individual runs. Starting over means building a
//! new context.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::dbd::DbdTable;
use crate::device::{DeviceClass, InstanceId, InstanceSpec};
use crate::error::Result;
use crate::hardware::HardwareRegistry;
use crate::module::ModuleRegistry;
use crate::record::{Fields, Record, RecordFactory, RecordSet, Substitution};

#[derive(Debug)]
pub struct BuildContext<'m> {
    modules: &'m ModuleRegistry,
    config: BuildConfig,
    hardware: HardwareRegistry,
    records: RecordSet,
    dbd: DbdTable,
    finalised: bool,
}

impl<'m> BuildContext<'m> {
    pub fn new(modules: &'m ModuleRegistry, config: BuildConfig) -> Self {
        info!(
            architecture = %config.architecture,
            dynamic = config.dynamic_load,
            "Starting build context"
        );
        let mut dbd = DbdTable::new();
        if let Some(base) = &config.epics_base {
            dbd = dbd.with_search_dir(base.join("dbd"));
        }
        Self {
            modules,
            hardware: HardwareRegistry::new(config.int_vector_base),
            config,
            records: RecordSet::new(),
            dbd,
            finalised: false,
        }
    }

    pub fn modules(&self) -> &'m ModuleRegistry {
        self.modules
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn hardware(&self) -> &HardwareRegistry {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut HardwareRegistry {
        &mut self.hardware
    }

    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordSet {
        &mut self.records
    }

    pub fn dbd(&self) -> &DbdTable {
        &self.dbd
    }

    /// Add a named class and its dependencies to the load order
    pub fn add_library(&mut self, class: &str) -> Result<Arc<DeviceClass>> {
        let class = self.modules.class(class)?;
        self.hardware
            .add_library(&class, self.modules, &self.config, &mut self.dbd)?;
        Ok(class)
    }

    /// Run the finalise callback of every loaded class, in load order.
    ///
    /// Only the first call per context has an effect. Classes first loaded
    /// by a callback are not finalised.
    pub fn finalise(&mut self) -> Result<()> {
        if self.finalised {
            return Ok(());
        }
        self.finalised = true;

        let classes = self.hardware.load_order().to_vec();
        for class in classes {
            if let Some(finalise) = &class.finalise {
                debug!(class = %class.name, "Finalising device class");
                finalise(&class, self)?;
            }
        }
        Ok(())
    }

    /// Load an instance's class, then create the instance
    pub fn instantiate(&mut self, spec: InstanceSpec) -> Result<InstanceId> {
        let class = self.add_library(&spec.class)?;
        self.hardware.add_hardware(class, spec)
    }

    pub fn allocate_int_vector(&mut self, count: u32) -> Result<Vec<u32>> {
        self.hardware.allocate_int_vector(count)
    }

    /// Reference a declared module directly, e.g. for its database templates
    pub fn use_module(&mut self, name: &str) -> Result<()> {
        self.modules.get(name)?;
        self.hardware.mark_referenced(name);
        Ok(())
    }

    /// Record factory of a device instance's class, bound to that instance
    pub fn record_factory(&self, instance: &str, factory: &str) -> Result<RecordFactory> {
        let instance = self.hardware.instance(instance)?;
        let def = instance.class().record_factory(factory)?;
        RecordFactory::from_def(def, instance)
    }

    /// Stamp and add a record using an instance's record factory
    pub fn create_record(
        &mut self,
        instance: &str,
        factory: &str,
        name: &str,
        address_args: &[String],
        fields: Fields,
    ) -> Result<()> {
        let record = self
            .record_factory(instance, factory)?
            .create(name, address_args, fields)?;
        self.records.add_record(record)
    }

    pub fn add_record(&mut self, record: Record) -> Result<()> {
        self.records.add_record(record)
    }

    pub fn add_substitution(&mut self, substitution: Substitution) -> Result<()> {
        if let Some(module) = &substitution.module {
            self.use_module(module)?;
        }
        self.records.add_substitution(substitution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use crate::module::ModuleDeclaration;
    use crate::record::RecordFactoryDef;

    fn registry() -> ModuleRegistry {
        let mut modules = ModuleRegistry::new("/opt/support");
        modules.declare(ModuleDeclaration::new("stream", Some("2-8"))).unwrap();
        modules.declare(ModuleDeclaration::new("calc", Some("3-7"))).unwrap();
        modules.register_class(DeviceClass::new("Psu", "stream").with_record_factory(RecordFactoryDef {
            name: Some("voltage".into()),
            record: "ai".into(),
            link: "INP".into(),
            dtyp: "stream".into(),
            address: "@psu.proto getV({0}) {port}".into(),
            fields: Fields::new(),
        }));
        modules
    }

    #[test]
    fn test_instantiate_and_records() {
        let modules = registry();
        let mut ctx = BuildContext::new(&modules, BuildConfig::new("linux-x86_64"));
        ctx.instantiate(InstanceSpec::new("Psu").named("psu1").arg("port", "ty0"))
            .unwrap();

        ctx.create_record("psu1", "voltage", "PSU:V", &["1".into()], Fields::new())
            .unwrap();
        let record = &ctx.records().records()[0];
        assert_eq!(record.field("INP"), Some("@psu.proto getV(1) ty0"));
        assert_eq!(
            ctx.hardware().referenced_modules().iter().collect::<Vec<_>>(),
            vec!["stream"]
        );

        assert!(matches!(
            ctx.create_record("psu1", "current", "PSU:I", &[], Fields::new()),
            Err(BuildError::UnknownRecordFactory { .. })
        ));
        assert!(matches!(
            ctx.create_record("psu2", "voltage", "PSU:X", &[], Fields::new()),
            Err(BuildError::UnknownInstance { .. })
        ));
    }

    #[test]
    fn test_substitution_references_module() {
        let modules = registry();
        let mut ctx = BuildContext::new(&modules, BuildConfig::new("linux-x86_64"));
        ctx.add_substitution(Substitution {
            template: "userCalc.template".into(),
            module: Some("calc".into()),
            args: Default::default(),
        })
        .unwrap();
        assert!(ctx.hardware().referenced_modules().contains("calc"));

        assert!(ctx
            .add_substitution(Substitution {
                template: "x.template".into(),
                module: Some("nope".into()),
                args: Default::default(),
            })
            .is_err());
    }

    #[test]
    fn test_finalise_runs_once_per_loaded_class() {
        let mut modules = registry();
        modules.register_class(DeviceClass::new("Archive", "calc").on_finalise(|class, ctx| {
            ctx.add_record(Record::new(
                "stringin",
                format!("{}:FINAL", class.name),
                Fields::from([("VAL".to_string(), ctx.hardware().instances().len().to_string())]),
            ))
        }));
        modules.register_class(DeviceClass::new("Unused", "calc").on_finalise(|_, _| {
            Err(BuildError::Sequencing("unused class finalised".into()))
        }));

        let mut ctx = BuildContext::new(&modules, BuildConfig::new("linux-x86_64"));
        ctx.instantiate(InstanceSpec::new("Psu").named("psu1").arg("port", "p")).unwrap();
        ctx.instantiate(InstanceSpec::new("Archive").named("arch1")).unwrap();

        ctx.finalise().unwrap();
        ctx.finalise().unwrap();
        let records = ctx.records().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "Archive:FINAL");
        assert_eq!(records[0].field("VAL"), Some("2"));
    }

    #[test]
    fn test_epics_base_dbd_is_searched() {
        let mut config = BuildConfig::new("linux-x86_64");
        let modules = registry();
        assert!(BuildContext::new(&modules, config.clone()).dbd().search_dirs().is_empty());

        config.epics_base = Some("/opt/epics/base".into());
        let ctx = BuildContext::new(&modules, config);
        assert_eq!(ctx.dbd().search_dirs(), [std::path::PathBuf::from("/opt/epics/base/dbd")]);
    }

    #[test]
    fn test_contexts_share_registry() {
        let modules = registry();
        let mut first = BuildContext::new(&modules, BuildConfig::new("linux-x86_64"));
        first.instantiate(InstanceSpec::new("Psu").named("a").arg("port", "p")).unwrap();

        let second = BuildContext::new(&modules, BuildConfig::new("linux-x86_64"));
        assert!(second.hardware().instances().is_empty());
        assert!(second.hardware().load_order().is_empty());
    }
}
