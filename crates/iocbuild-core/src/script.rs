//! Startup script syntax for each target
//!
//! The order of a startup script is fixed; only the spelling of its
//! commands depends on the target.

use std::path::Path;

use crate::config::{BuildConfig, TargetOs};
use crate::error::Result;
use crate::hardware::LoadAction;
use crate::writer::{quote_c_string, LineSink};

/// Command spelling for one target
#[derive(Debug, Clone, Copy)]
pub struct ScriptSyntax {
    os: TargetOs,
}

impl ScriptSyntax {
    pub fn new(os: TargetOs) -> Self {
        Self { os }
    }

    pub fn for_config(config: &BuildConfig) -> Self {
        Self::new(config.target_os())
    }

    pub fn cd(&self, path: &Path) -> String {
        format!("cd {}", quote_c_string(&path.display().to_string()))
    }

    /// Change back to the IOC top directory
    pub fn cd_top(&self) -> String {
        match self.os {
            TargetOs::VxWorks => "cd top".to_string(),
            TargetOs::Linux | TargetOs::Windows => "cd \"$(TOP)\"".to_string(),
        }
    }

    /// Read the generated path definitions
    pub fn source_paths(&self) -> String {
        match self.os {
            TargetOs::VxWorks => "< cdCommands".to_string(),
            TargetOs::Linux | TargetOs::Windows => "< envPaths".to_string(),
        }
    }

    pub fn load_object(&self, path: &Path) -> String {
        match self.os {
            TargetOs::VxWorks => format!("ld < {}", path.display()),
            TargetOs::Linux | TargetOs::Windows => {
                format!("dlload {}", quote_c_string(&path.display().to_string()))
            }
        }
    }

    pub fn load_database(&self, file: &str) -> String {
        format!("dbLoadDatabase {}", quote_c_string(file))
    }

    pub fn register(&self, name: &str) -> String {
        format!("{}_registerRecordDeviceDriver pdbbase", name)
    }

    pub fn load_records(&self, file: &str) -> String {
        format!("dbLoadRecords {}", quote_c_string(file))
    }

    pub fn ioc_init(&self) -> String {
        "iocInit".to_string()
    }

    /// Lines loading one class's objects, libraries and dbd files
    pub fn load_action(&self, action: &LoadAction, out: &mut dyn LineSink) -> Result<()> {
        if action.is_empty() {
            return Ok(());
        }
        out.line(String::new())?;
        out.line(format!("# {}", action.class))?;
        out.line(self.cd(&action.working_dir))?;
        for file in action.bin_files.iter().chain(&action.lib_files) {
            out.line(self.load_object(file))?;
        }
        if !action.dbd_files.is_empty() {
            out.line(self.cd(Path::new("dbd")))?;
            for dbd in &action.dbd_files {
                out.line(self.load_database(dbd))?;
                if action.register_dbd {
                    out.line(self.register(dbd.strip_suffix(".dbd").unwrap_or(dbd)))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn action() -> LoadAction {
        LoadAction {
            class: "Serial".into(),
            working_dir: PathBuf::from("/opt/support/asyn/4-9"),
            bin_files: vec![PathBuf::from("bin/vxWorks-ppc604/drvSerial.o")],
            lib_files: vec![PathBuf::from("bin/vxWorks-ppc604/asyn.munch")],
            dbd_files: vec!["asyn.dbd".into()],
            register_dbd: true,
        }
    }

    #[test]
    fn test_vxworks_load_action() {
        let mut out = Vec::new();
        ScriptSyntax::new(TargetOs::VxWorks)
            .load_action(&action(), &mut out)
            .unwrap();
        assert_eq!(
            out,
            vec![
                "",
                "# Serial",
                "cd \"/opt/support/asyn/4-9\"",
                "ld < bin/vxWorks-ppc604/drvSerial.o",
                "ld < bin/vxWorks-ppc604/asyn.munch",
                "cd \"dbd\"",
                "dbLoadDatabase \"asyn.dbd\"",
                "asyn_registerRecordDeviceDriver pdbbase",
            ]
        );
    }

    #[test]
    fn test_empty_action_emits_nothing() {
        let mut out = Vec::new();
        let empty = LoadAction {
            bin_files: vec![],
            lib_files: vec![],
            dbd_files: vec![],
            ..action()
        };
        ScriptSyntax::new(TargetOs::Linux)
            .load_action(&empty, &mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_host_syntax() {
        let syntax = ScriptSyntax::new(TargetOs::Linux);
        assert_eq!(syntax.load_object(Path::new("bin/x/libfoo.so")), "dlload \"bin/x/libfoo.so\"");
        assert_eq!(syntax.cd_top(), "cd \"$(TOP)\"");
        assert_eq!(syntax.load_records("db/ioc.db"), "dbLoadRecords \"db/ioc.db\"");
    }
}
