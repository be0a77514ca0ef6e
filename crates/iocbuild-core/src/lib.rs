//! iocbuild Core - Module registry, library loader and IOC generation
//!
//! This crate turns a declarative IOC configuration into a buildable IOC
//! application tree:
//! - Module registry with versioned support module declarations
//! - Extension namespace of device classes exported by modules
//! - Hardware registry: dependency-ordered library loading and the device
//!   initialisation sequence
//! - Record factories stamping device support fields into records
//! - Staged generation of databases, sources, startup scripts and makefiles

pub mod config;
pub mod context;
pub mod dbd;
pub mod description;
pub mod device;
pub mod error;
pub mod extension;
pub mod hardware;
pub mod module;
pub mod pipeline;
pub mod record;
pub mod script;
pub mod template;
pub mod writer;

pub use config::{BuildConfig, TargetOs};
pub use context::BuildContext;
pub use dbd::{DbdInclude, DbdLoader, DbdTable};
pub use description::IocDescription;
pub use device::{
    DeviceClass, DeviceClassDef, DeviceInstance, Finalise, HookContext, InitHook, InstanceId, InstanceSpec, ScriptHook,
};
pub use error::{BuildError, ErrorKind, Result};
pub use extension::{ExtensionDescriptor, ExtensionNamespace};
pub use hardware::{HardwareRegistry, LoadAction};
pub use module::{ModuleDeclaration, ModuleRegistry, ModuleVersion};
pub use pipeline::{
    validate_ioc_name, write_db_only, write_documentation, GenerationReport, IocLayout, IocWriter, WriterOptions,
};
pub use record::{Fields, Record, RecordFactory, RecordFactoryDef, RecordSet, Substitution};
pub use writer::{Artifact, Disclaimer, LineSink};
