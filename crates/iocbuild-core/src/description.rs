//! Declarative IOC description
//!
//! An IOC is described in a TOML file naming its modules, device classes,
//! device instances, records and substitutions. Applying a description
//! performs every registration step before any file is generated, so
//! configuration errors surface before the output directory is touched.
//!
//! ```toml
//! [ioc]
//! domain = "BL11I"
//! tech_area = "MO"
//! id = 1
//! architecture = "vxWorks-ppc604_long"
//!
//! [[module]]
//! name = "motor"
//! version = "6-4"
//!
//! [[device]]
//! class = "MotorController"
//! name = "mc1"
//! args = { card = "0" }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::context::BuildContext;
use crate::device::{DeviceClass, DeviceClassDef, InstanceSpec};
use crate::error::{BuildError, Result};
use crate::module::{ModuleDeclaration, ModuleRegistry};
use crate::pipeline::{standard_ioc_name, validate_ioc_name, IocWriter, WriterOptions};
use crate::record::{Fields, Substitution};

/// Suffix added to the IOC name and directory of a simulation build
pub const SIM_SUFFIX: &str = "_sim";

/// The `[ioc]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocSection {
    /// Explicit IOC name; otherwise built from domain, tech area and id
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub tech_area: Option<String>,
    #[serde(default)]
    pub id: Option<u32>,
    pub architecture: String,
    /// Use the full IOC name as the output directory
    #[serde(default)]
    pub long_name: bool,
    /// Entries of the output directory that survive regeneration
    #[serde(default)]
    pub keep_files: Vec<String>,
    #[serde(default)]
    pub makefile_name: Option<String>,
}

/// A record stamped by one of a device instance's record factories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSpec {
    /// Instance whose class provides the factory
    pub device: String,
    pub factory: String,
    pub name: String,
    #[serde(default)]
    pub address_args: Vec<String>,
    #[serde(default)]
    pub fields: Fields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocDescription {
    pub ioc: IocSection,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleDeclaration>,
    #[serde(default, rename = "device_class")]
    pub device_classes: Vec<DeviceClassDef>,
    #[serde(default, rename = "device")]
    pub devices: Vec<InstanceSpec>,
    #[serde(default, rename = "record")]
    pub records: Vec<RecordSpec>,
    #[serde(default, rename = "substitution")]
    pub substitutions: Vec<Substitution>,
    /// Set when built for a simulation architecture
    #[serde(skip)]
    simulation: bool,
}

impl IocDescription {
    /// Load a description from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(BuildError::io(path))?;
        let description = Self::from_toml(&content).map_err(|source| BuildError::DescriptionParse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            modules = description.modules.len(),
            devices = description.devices.len(),
            "Loaded IOC description"
        );
        Ok(description)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Build for `architecture` instead, marking names as simulation names
    pub fn simulate(&mut self, architecture: impl Into<String>) {
        self.ioc.architecture = architecture.into();
        self.simulation = true;
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    pub fn architecture(&self) -> &str {
        &self.ioc.architecture
    }

    fn base_name(&self) -> Result<String> {
        let name = match (&self.ioc.name, &self.ioc.domain, &self.ioc.tech_area, self.ioc.id) {
            (Some(name), _, _, _) => name.clone(),
            (None, Some(domain), Some(tech_area), Some(id)) => standard_ioc_name(domain, tech_area, id),
            _ => {
                return Err(BuildError::Description(
                    "[ioc] needs either name or domain, tech_area and id".into(),
                ))
            }
        };
        // Domain and technical area also name directories
        validate_ioc_name(&name)?;
        Ok(name)
    }

    fn suffixed(&self, name: String) -> String {
        if self.simulation {
            name + SIM_SUFFIX
        } else {
            name
        }
    }

    pub fn ioc_name(&self) -> Result<String> {
        Ok(self.suffixed(self.base_name()?))
    }

    /// Directory the IOC is written to under `out`
    pub fn output_dir(&self, out: &Path) -> Result<PathBuf> {
        let name = self.base_name()?;
        let (parent, dir) = match (&self.ioc.name, &self.ioc.domain, &self.ioc.tech_area) {
            (None, Some(domain), Some(tech_area)) => {
                let dir = if self.ioc.long_name { name } else { tech_area.clone() };
                (out.join(domain), dir)
            }
            _ => (out.to_path_buf(), name),
        };
        Ok(parent.join(self.suffixed(dir)))
    }

    /// Writer for the full IOC tree under `out`
    pub fn writer(&self, out: &Path) -> Result<IocWriter> {
        let mut options = WriterOptions {
            keep_files: self.ioc.keep_files.clone(),
            ..Default::default()
        };
        if let Some(makefile) = &self.ioc.makefile_name {
            options.makefile_name = makefile.clone();
        }
        Ok(IocWriter::new(self.output_dir(out)?, &self.ioc_name()?).with_options(options))
    }

    /// Declare the description's modules and register its inline classes
    pub fn declare(&self, modules: &mut ModuleRegistry) -> Result<()> {
        for decl in &self.modules {
            modules.declare(decl.clone())?;
        }
        for def in &self.device_classes {
            let module = def.module.clone().ok_or_else(|| {
                BuildError::Description(format!("device class {} does not name its module", def.name))
            })?;
            modules.get(&module)?;
            let class = DeviceClass::from_def(def.clone(), &module)?;
            debug!(class = %class.name, module = %module, "Registered device class from description");
            modules.register_class(class);
        }
        Ok(())
    }

    /// Create the description's instances, records and substitutions
    pub fn populate(&self, ctx: &mut BuildContext<'_>) -> Result<()> {
        for spec in &self.devices {
            ctx.instantiate(spec.clone())?;
        }
        for record in &self.records {
            ctx.create_record(
                &record.device,
                &record.factory,
                &record.name,
                &record.address_args,
                record.fields.clone(),
            )?;
        }
        for substitution in &self.substitutions {
            ctx.add_substitution(substitution.clone())?;
        }
        info!(
            instances = ctx.hardware().instances().len(),
            records = ctx.records().records().len(),
            substitutions = ctx.records().substitutions().len(),
            "IOC description applied"
        );
        Ok(())
    }
}
