//! IOC generation pipeline
//!
//! A full IOC is written in fixed stages: database, source, boot,
//! configure and data, followed by the makefiles. Later stages depend on
//! what earlier ones produced: the boot script loads the databases written
//! first, and the data stage copies files registered while the boot script
//! ran the device hooks. Loaded device classes are finalised before the
//! output directory is touched.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::context::BuildContext;
use crate::error::{BuildError, Result};
use crate::hardware::HookEnv;
use crate::script::ScriptSyntax;
use crate::writer::{Artifact, DataDirectory, Disclaimer, LineSink, Makefile};

/// Main program linked into host IOCs
const MAIN_CPP: &str = r#"#include "epicsExit.h"
#include "epicsThread.h"
#include "iocsh.h"

int main(int argc, char *argv[])
{
    if (argc >= 2) {
        iocsh(argv[1]);
        epicsThreadSleep(.2);
    }
    iocsh(NULL);
    epicsExit(0);
    return 0;
}"#;

/// Name of an IOC built from its domain, technical area and number
pub fn standard_ioc_name(domain: &str, tech_area: &str, id: u32) -> String {
    format!("{}-{}-IOC-{:02}", domain, tech_area, id)
}

/// Check that an IOC name is usable as a single path component.
///
/// The name becomes part of directory and file names, so it may only
/// contain ASCII letters, digits, `_` and `-`.
pub fn validate_ioc_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BuildError::NamingConflict {
            name: name.to_string(),
            reason: "IOC name is empty".into(),
        });
    }
    if let Some(c) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))) {
        return Err(BuildError::NamingConflict {
            name: name.to_string(),
            reason: format!("IOC names may only contain letters, digits, _ and -, found {:?}", c),
        });
    }
    Ok(())
}

/// Directory names inside a generated IOC tree
#[derive(Debug, Clone)]
pub struct IocLayout {
    pub name: String,
    pub app_dir: PathBuf,
    pub db_dir: PathBuf,
    pub src_dir: PathBuf,
    pub boot_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl IocLayout {
    pub fn new(ioc_name: &str) -> Self {
        let app_dir = PathBuf::from(format!("{}App", ioc_name));
        Self {
            name: ioc_name.to_string(),
            db_dir: app_dir.join("Db"),
            src_dir: app_dir.join("src"),
            boot_dir: Path::new("iocBoot").join(format!("ioc{}", ioc_name)),
            data_dir: app_dir.join("data"),
            app_dir,
        }
    }

    /// Name of the registration function generated for the IOC's dbd
    fn register_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// Summary of one generation run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub ioc_name: String,
    pub root: PathBuf,
    pub architecture: String,
    pub load_order: Vec<String>,
    pub link_order: Vec<String>,
    pub referenced_modules: Vec<String>,
    pub instances: usize,
    pub artifacts: Vec<PathBuf>,
}

impl GenerationReport {
    fn new(ioc_name: &str, root: &Path, ctx: &BuildContext<'_>) -> Self {
        let hardware = ctx.hardware();
        Self {
            ioc_name: ioc_name.to_string(),
            root: root.to_path_buf(),
            architecture: ctx.config().architecture.clone(),
            load_order: hardware.load_order().iter().map(|c| c.name.clone()).collect(),
            link_order: hardware.libraries(),
            referenced_modules: hardware.referenced_modules().iter().cloned().collect(),
            instances: hardware.instances().len(),
            artifacts: Vec::new(),
        }
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut artifact = Artifact::new(path);
        artifact.line(json)?;
        artifact.commit()?;
        Ok(())
    }
}

/// Options for writing a complete IOC tree
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Entries of an existing output directory to preserve
    pub keep_files: Vec<String>,
    /// File name of the top level makefile
    pub makefile_name: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            keep_files: Vec::new(),
            makefile_name: "Makefile".to_string(),
        }
    }
}

/// Writes a complete IOC application tree
#[derive(Debug, Clone)]
pub struct IocWriter {
    root: PathBuf,
    layout: IocLayout,
    options: WriterOptions,
}

impl IocWriter {
    pub fn new(root: impl Into<PathBuf>, ioc_name: &str) -> Self {
        Self {
            root: root.into(),
            layout: IocLayout::new(ioc_name),
            options: WriterOptions::default(),
        }
    }

    /// Writer for a standard IOC name, placed at `<path>/<domain>/<dir>`
    /// where `<dir>` is the technical area, or the full name if `long_name`
    pub fn standard(path: &Path, domain: &str, tech_area: &str, id: u32, long_name: bool) -> Self {
        let name = standard_ioc_name(domain, tech_area, id);
        let dir = if long_name { name.as_str() } else { tech_area };
        Self::new(path.join(domain).join(dir), &name)
    }

    pub fn with_options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &IocLayout {
        &self.layout
    }

    /// Generate the IOC from the context's registries
    pub fn write(&self, ctx: &mut BuildContext<'_>) -> Result<GenerationReport> {
        validate_ioc_name(&self.layout.name)?;
        info!(ioc = %self.layout.name, root = %self.root.display(), "Writing IOC");
        ctx.finalise()?;
        self.prepare_root()?;

        let mut generation = Generation::new(self, ctx);
        generation.database_stage(ctx)?;
        generation.source_stage(ctx)?;
        generation.boot_stage(ctx)?;
        generation.configure_stage(ctx)?;
        generation.data_stage()?;
        generation.write_makefiles()?;

        let mut report = GenerationReport::new(&self.layout.name, &self.root, ctx);
        report.artifacts = generation.artifacts;
        info!(ioc = %self.layout.name, artifacts = report.artifacts.len(), "IOC written");
        Ok(report)
    }

    /// Erase a previous IOC at the output root, refusing anything that does
    /// not look like one, then create the skeleton
    fn prepare_root(&self) -> Result<()> {
        if self.root.exists() {
            let app_dir = self.layout.app_dir.to_string_lossy().into_owned();
            let allowed = |name: &str| {
                matches!(name, "configure" | "iocBoot" | "bin" | "db" | "dbd" | "data")
                    || name == app_dir
                    || name == self.options.makefile_name
                    || self.options.keep_files.iter().any(|k| k == name)
            };

            let mut entries = Vec::new();
            for entry in fs::read_dir(&self.root).map_err(BuildError::io(&self.root))? {
                let entry = entry.map_err(BuildError::io(&self.root))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !allowed(&name) {
                    return Err(BuildError::UnsafeOutputDirectory {
                        path: self.root.clone(),
                    });
                }
                entries.push((name, entry.path()));
            }

            if self.options.keep_files.is_empty() {
                fs::remove_dir_all(&self.root).map_err(BuildError::io(&self.root))?;
            } else {
                for (name, path) in entries {
                    if self.options.keep_files.contains(&name) {
                        continue;
                    }
                    let removed = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    removed.map_err(BuildError::io(&path))?;
                }
            }
        }

        for dir in self.skeleton_dirs() {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).map_err(BuildError::io(&path))?;
        }
        Ok(())
    }

    /// Directories built by the top makefile, in build order
    fn skeleton_dirs(&self) -> [&Path; 4] {
        [
            Path::new("configure"),
            &self.layout.db_dir,
            &self.layout.src_dir,
            &self.layout.boot_dir,
        ]
    }
}

/// State shared between the stages of one full IOC write
struct Generation<'w> {
    writer: &'w IocWriter,
    disclaimer: Disclaimer,
    makefile_top: Makefile,
    makefile_db: Makefile,
    makefile_src: Makefile,
    makefile_boot: Makefile,
    /// Databases written by the database stage, relative to the IOC top
    databases: Vec<String>,
    data: DataDirectory,
    artifacts: Vec<PathBuf>,
}

impl<'w> Generation<'w> {
    fn new(writer: &'w IocWriter, ctx: &BuildContext<'_>) -> Self {
        let layout = &writer.layout;
        let mut makefile_top = Makefile::new(
            "",
            vec!["TOP = .".into(), "include $(TOP)/configure/CONFIG".into()],
            vec!["include $(TOP)/configure/RULES_TOP".into()],
        )
        .with_name(&writer.options.makefile_name);
        for dir in writer.skeleton_dirs() {
            makefile_top.add_line(format!("DIRS += {}", dir.display()));
        }

        Self {
            writer,
            disclaimer: Disclaimer::from_config(ctx.config()),
            makefile_top,
            makefile_db: Makefile::nested(&layout.db_dir),
            makefile_src: Makefile::nested(&layout.src_dir),
            makefile_boot: Makefile::nested(&layout.boot_dir),
            databases: Vec::new(),
            data: DataDirectory::new(),
            artifacts: Vec::new(),
        }
    }

    fn path(&self, dir: &Path, file: &str) -> PathBuf {
        self.writer.root.join(dir).join(file)
    }

    fn commit(&mut self, mut artifact: Artifact) -> Result<()> {
        let path = artifact.commit()?;
        self.artifacts.push(path);
        Ok(())
    }

    /// Records and substitutions, after which the record set is emptied
    fn database_stage(&mut self, ctx: &mut BuildContext<'_>) -> Result<()> {
        let ioc = self.writer.layout.name.clone();
        let db_dir = self.writer.layout.db_dir.clone();
        if let Some(msi) = &ctx.config().msi_path {
            self.makefile_db
                .add_line(format!("PATH := $(PATH):{}", msi.display()));
        }

        for record in ctx.records().records() {
            ctx.dbd().validate(record)?;
        }

        let db = format!("{}.db", ioc);
        let expanded = format!("{}_expanded.db", ioc);
        let has_records = !ctx.records().records().is_empty();
        let has_substitutions = !ctx.records().substitutions().is_empty();

        if has_records {
            let mut artifact = Artifact::new(self.path(&db_dir, &db));
            artifact.extend(self.disclaimer.script())?;
            artifact.blank()?;
            artifact.extend(ctx.records().record_lines())?;
            self.commit(artifact)?;
            self.databases.push(format!("db/{}", db));
            self.makefile_db.add_line(format!("DB += {}", db));
        }

        if has_substitutions {
            let lines = ctx.records().substitution_lines(ctx.modules())?;
            let mut artifact = Artifact::new(self.path(&db_dir, &format!("{}_expanded.substitutions", ioc)));
            artifact.extend(self.disclaimer.script())?;
            artifact.blank()?;
            artifact.extend(lines)?;
            self.commit(artifact)?;
            self.databases.push(format!("db/{}", expanded));
            self.makefile_db.add_line(format!("DB += {}", expanded));
        }

        let written_db = if has_records { db.as_str() } else { "" };
        let written_expanded = if has_substitutions { expanded.as_str() } else { "" };
        for class in ctx.hardware().load_order() {
            for line in class.db_makefile_lines(&ioc, written_db, written_expanded)? {
                self.makefile_db.add_line(line);
            }
        }

        info!(
            records = ctx.records().records().len(),
            substitutions = ctx.records().substitutions().len(),
            "Database stage complete"
        );
        ctx.records_mut().reset();
        Ok(())
    }

    /// Source makefile lines and the host main program
    fn source_stage(&mut self, ctx: &BuildContext<'_>) -> Result<()> {
        let ioc = self.writer.layout.name.clone();
        let config = ctx.config();
        let hardware = ctx.hardware();
        let os = config.target_os();
        let makefile = &mut self.makefile_src;

        let prod_ioc = if config.cross_build() {
            format!("PROD_IOC_{}", os.make_name())
        } else {
            "PROD_IOC".to_string()
        };
        makefile.add_line(format!("{} = {}", prod_ioc, ioc));
        makefile.add_line(format!("DBD += {}.dbd", ioc));
        for dbd in hardware.dbd_files() {
            makefile.add_line(format!("{}_DBD += {}", ioc, dbd));
        }
        makefile.add_line(format!("{}_SRCS += {}_registerRecordDeviceDriver.cpp", ioc, ioc));
        for lib in hardware.libraries() {
            makefile.add_line(format!("{}_LIBS += {}", ioc, lib));
        }
        for lib in hardware.sys_libraries() {
            makefile.add_line(format!("{}_SYS_LIBS += {}", ioc, lib));
        }
        makefile.add_line(format!("{}_LIBS += $(EPICS_BASE_IOC_LIBS)", ioc));

        if os.is_embedded() {
            makefile.add_line(format!("{}_OBJS += $(EPICS_BASE_BIN)/vxComLibrary", ioc));
        } else {
            makefile.add_line(format!("{}_SRCS += {}Main.cpp", ioc, ioc));
            let src_dir = self.writer.layout.src_dir.clone();
            let mut artifact = Artifact::new(self.path(&src_dir, &format!("{}Main.cpp", ioc)));
            artifact.extend(self.disclaimer.c())?;
            artifact.blank()?;
            artifact.extend(MAIN_CPP.lines())?;
            self.commit(artifact)?;
        }
        info!(libraries = hardware.libraries().len(), "Source stage complete");
        Ok(())
    }

    /// Startup script, host launcher and boot makefile
    fn boot_stage(&mut self, ctx: &mut BuildContext<'_>) -> Result<()> {
        let layout = self.writer.layout.clone();
        let config = ctx.config().clone();
        let os = config.target_os();
        let syntax = ScriptSyntax::for_config(&config);
        let extension = if config.substitute_boot { "src" } else { "cmd" };

        let mut script = Artifact::new(self.path(&layout.boot_dir, &format!("st{}.{}", layout.name, extension)))
            .with_max_line_length(config.max_line_length());
        script.extend(self.disclaimer.script())?;
        script.blank()?;
        if !config.substitute_boot {
            script.line(syntax.source_paths())?;
        }
        script.line(syntax.cd_top())?;

        if !config.dynamic_load {
            if os.is_embedded() {
                let munch = Path::new("bin")
                    .join(&config.architecture)
                    .join(format!("{}.munch", layout.name));
                script.line(syntax.load_object(&munch))?;
            }
            script.line(syntax.load_database(&format!("dbd/{}.dbd", layout.name)))?;
            script.line(syntax.register(&layout.register_name()))?;
        }

        for action in ctx.hardware().load_actions(ctx.modules(), &config)? {
            syntax.load_action(&action, &mut script)?;
        }

        let modules = ctx.modules();
        let mut env = HookEnv {
            modules,
            architecture: &config.architecture,
            data: &mut self.data,
        };
        ctx.hardware_mut().generate_init_sequence(&mut env, &mut script)?;

        if !self.databases.is_empty() {
            script.blank()?;
            script.line(syntax.cd_top())?;
            for db in &self.databases {
                script.line(syntax.load_records(db))?;
            }
        }
        script.blank()?;
        script.line(syntax.ioc_init())?;
        ctx.hardware().generate_post_init_sequence(&mut env, &mut script)?;
        self.commit(script)?;

        let scripts = if config.cross_build() {
            format!("SCRIPTS_{}", os.make_name())
        } else {
            "SCRIPTS".to_string()
        };

        if os.is_embedded() {
            if !config.substitute_boot {
                self.makefile_boot.add_line(format!("{} += cdCommands", scripts));
            }
        } else {
            let mut launcher = Artifact::new(self.path(&layout.boot_dir, &format!("st{}.sh", layout.name))).executable();
            launcher.line("#!/bin/sh".to_string())?;
            launcher.extend(self.disclaimer.script())?;
            launcher.blank()?;
            launcher.line("cd \"$(dirname \"$0\")\"".to_string())?;
            launcher.line(format!(
                "exec ../../bin/{}/{} st{}.boot",
                config.architecture, layout.name, layout.name
            ))?;
            self.commit(launcher)?;

            if !config.substitute_boot {
                self.makefile_boot.add_line(format!("{} += envPaths", scripts));
            }
            self.makefile_boot
                .add_line(format!("{} += ../st{}.sh", scripts, layout.name));
        }
        self.makefile_boot
            .add_line(format!("{} += st{}.boot", scripts, layout.name));

        if config.substitute_boot {
            if let Some(msi) = &config.msi_path {
                self.makefile_boot
                    .add_line(format!("PATH := $(PATH):{}", msi.display()));
            }
        } else {
            self.makefile_boot
                .add_rule("envPaths cdCommands:\n\t$(PERL) $(TOOLS)/convertRelease.pl -a $(T_A) $@");
            self.makefile_boot.add_rule("%.boot: ../%.cmd\n\tcp $< $@");
        }
        info!(data_files = self.data.files().len(), "Boot stage complete");
        Ok(())
    }

    /// configure directory: templates, target settings and RELEASE
    fn configure_stage(&mut self, ctx: &BuildContext<'_>) -> Result<()> {
        let config = ctx.config();
        let configure = self.writer.root.join("configure");

        let mut template_files = Vec::new();
        match &config.epics_base {
            Some(base) => {
                let template_dir = base.join("templates/makeBaseApp/top/configure");
                if template_dir.is_dir() {
                    for entry in fs::read_dir(&template_dir).map_err(BuildError::io(&template_dir))? {
                        let entry = entry.map_err(BuildError::io(&template_dir))?;
                        let name = entry.file_name().to_string_lossy().into_owned();
                        if name == "RELEASE" || !entry.path().is_file() {
                            continue;
                        }
                        let target = configure.join(&name);
                        fs::copy(entry.path(), &target).map_err(BuildError::io(entry.path()))?;
                        template_files.push(name);
                    }
                } else {
                    warn!(path = %template_dir.display(), "Configure templates not found, skipping");
                }
            }
            None => warn!("No EPICS base configured, configure templates not copied"),
        }

        let arch = if config.cross_build() {
            config.architecture.as_str()
        } else {
            ""
        };
        let config_site = template_files.iter().any(|f| f == "CONFIG_SITE");
        let mut settings = Artifact::new(configure.join(if config_site { "CONFIG_SITE" } else { "CONFIG" }));
        settings.line(format!("CROSS_COMPILER_TARGET_ARCHS = {}", arch))?;
        if config_site {
            settings.line(format!(
                "CHECK_RELEASE = {}",
                if config.check_release { "YES" } else { "NO" }
            ))?;
        }
        let path = settings.commit_appending()?;
        self.artifacts.push(path);

        let mut release = Artifact::new(configure.join("RELEASE"));
        release.extend(self.disclaimer.script())?;
        release.extend(release_lines(ctx)?)?;
        self.commit(release)?;
        info!(modules = ctx.hardware().referenced_modules().len(), "Configure stage complete");
        Ok(())
    }

    /// Copy the data files registered during the boot stage
    fn data_stage(&mut self) -> Result<()> {
        let dir = self.writer.root.join(&self.writer.layout.data_dir);
        let written = self.data.copy_to(&dir)?;
        self.artifacts.extend(written);
        Ok(())
    }

    fn write_makefiles(&mut self) -> Result<()> {
        let root = &self.writer.root;
        for makefile in [
            &self.makefile_top,
            &self.makefile_boot,
            &self.makefile_src,
            &self.makefile_db,
        ] {
            let path = makefile.generate(root, &self.disclaimer)?;
            self.artifacts.push(path);
        }
        Ok(())
    }
}

/// `MACRO = path` for each referenced module, sorted, then EPICS base
fn release_lines(ctx: &BuildContext<'_>) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for name in ctx.hardware().referenced_modules() {
        let module = ctx.modules().get(name)?;
        lines.push(format!("{} = {}", module.macro_name(), module.path().display()));
    }
    if let Some(base) = &ctx.config().epics_base {
        lines.push(format!("EPICS_BASE = {}", base.display()));
    }
    Ok(lines)
}

/// Write only the IOC's database and substitutions into `dir`.
///
/// The substitutions file is always written, even when empty.
pub fn write_db_only(dir: &Path, ioc_name: &str, ctx: &mut BuildContext<'_>) -> Result<GenerationReport> {
    validate_ioc_name(ioc_name)?;
    fs::create_dir_all(dir).map_err(BuildError::io(dir))?;
    let disclaimer = Disclaimer::from_config(ctx.config());
    let mut report = GenerationReport::new(ioc_name, dir, ctx);

    for record in ctx.records().records() {
        ctx.dbd().validate(record)?;
    }
    if !ctx.records().records().is_empty() {
        let mut db = Artifact::new(dir.join(format!("{}.db", ioc_name)));
        db.extend(disclaimer.script())?;
        db.blank()?;
        db.extend(ctx.records().record_lines())?;
        report.artifacts.push(db.commit()?);
    }

    let mut substitutions = Artifact::new(dir.join(format!("{}_expanded.substitutions", ioc_name)));
    if !ctx.records().substitutions().is_empty() {
        substitutions.extend(disclaimer.script())?;
        substitutions.blank()?;
        substitutions.extend(ctx.records().substitution_lines(ctx.modules())?)?;
    }
    report.artifacts.push(substitutions.commit()?);

    ctx.records_mut().reset();
    info!(ioc = %ioc_name, dir = %dir.display(), "Database files written");
    Ok(report)
}

/// Write a build instructions page for adding this IOC's configuration to
/// an existing application
pub fn write_documentation(path: &Path, ioc_name: &str, ctx: &mut BuildContext<'_>) -> Result<GenerationReport> {
    validate_ioc_name(ioc_name)?;
    let page = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ioc_name.to_string());
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    let mut report = GenerationReport::new(ioc_name, root, ctx);

    let mut doc = Artifact::new(path);
    doc.extend([
        "/**".to_string(),
        format!("\\page {} Build Instructions for {}", page, ioc_name),
        format!("Build Instructions for {}", ioc_name),
        "<ol>".to_string(),
        "<li> Add the dependencies to configure/RELEASE.".to_string(),
        "\\verbatim".to_string(),
    ])?;
    for name in ctx.hardware().referenced_modules() {
        let module = ctx.modules().get(name)?;
        doc.line(format!("{}={}", module.macro_name(), module.path().display()))?;
    }
    doc.extend(["\\endverbatim", "", "<li> Add the DBD dependencies to src/Makefile", "\\verbatim"])?;
    for dbd in ctx.hardware().dbd_files() {
        doc.line(format!("{}_DBD += {}", ioc_name, dbd))?;
    }
    doc.extend(["\\endverbatim", "", "<li> Add the LIBS dependencies to src/Makefile", "\\verbatim"])?;
    for lib in ctx.hardware().libraries() {
        doc.line(format!("{}_LIBS += {}", ioc_name, lib))?;
    }
    for lib in ctx.hardware().sys_libraries() {
        doc.line(format!("{}_SYS_LIBS += {}", ioc_name, lib))?;
    }
    doc.extend([
        "\\endverbatim",
        "",
        "<li> Use the template files to add records to the database.",
        "\\verbatim",
    ])?;
    doc.extend(ctx.records().substitution_lines(ctx.modules())?)?;
    doc.extend(["\\endverbatim", "", "<li> Add the startup commands to st.cmd", "\\verbatim"])?;

    let config = ctx.config().clone();
    let syntax = ScriptSyntax::for_config(&config);
    for action in ctx.hardware().load_actions(ctx.modules(), &config)? {
        syntax.load_action(&action, &mut doc)?;
    }
    // Data files only matter for a full IOC tree
    let mut data = DataDirectory::new();
    let mut env = HookEnv {
        modules: ctx.modules(),
        architecture: &config.architecture,
        data: &mut data,
    };
    ctx.hardware_mut().generate_init_sequence(&mut env, &mut doc)?;
    ctx.hardware().generate_post_init_sequence(&mut env, &mut doc)?;
    doc.extend(["\\endverbatim", "</ol>", "**/"])?;

    report.artifacts.push(doc.commit()?);
    info!(ioc = %ioc_name, path = %path.display(), "Build instructions written");
    Ok(report)
}
