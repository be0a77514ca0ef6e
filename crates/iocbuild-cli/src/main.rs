//! iocbuild - IOC generator entry point
//!
//! Reads an IOC description and writes the IOC application tree, only its
//! database files, or a build instructions page.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use iocbuild_core::{write_db_only, write_documentation, BuildContext, IocDescription, ModuleRegistry};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "iocbuild")]
#[command(about = "Generate an EPICS IOC application from a declarative description")]
#[command(version)]
struct Args {
    /// IOC description file
    input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Write a build instructions page to this file instead of an IOC
    #[arg(long, value_name = "FILE", conflicts_with = "db_only")]
    doc: Option<PathBuf>,

    /// Only write the database and substitution files, into the output directory
    #[arg(short = 'D', long)]
    db_only: bool,

    /// Build for a simulation architecture, suffixing names with _sim
    #[arg(long, value_name = "ARCH")]
    sim: Option<String>,

    /// Load libraries from the startup script at runtime
    #[arg(long, conflicts_with = "static_load")]
    dynamic: bool,

    /// Link libraries into the IOC executable
    #[arg(long = "static")]
    static_load: bool,

    /// Write CHECK_RELEASE = NO
    #[arg(short = 'c', long)]
    no_check_release: bool,

    /// Write st<ioc>.cmd rather than a substitutable st<ioc>.src
    #[arg(short = 'b', long)]
    no_substitute_boot: bool,

    /// Write st<ioc>.src for macro substitution
    #[arg(long, conflicts_with = "no_substitute_boot")]
    substitute_boot: bool,

    /// Path to configuration file
    #[arg(long, default_value = "iocbuild.toml")]
    config: PathBuf,

    /// Write a JSON report of the run to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.debug {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("iocbuild v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args.config)?;

    let mut description = IocDescription::from_file(&args.input)
        .with_context(|| format!("Failed to load IOC description {}", args.input.display()))?;
    if let Some(arch) = &args.sim {
        description.simulate(arch.clone());
    }
    let ioc_name = description.ioc_name()?;

    let mut modules = ModuleRegistry::new(&config.paths.support);
    if let Some(defaults) = &config.paths.defaults {
        modules = modules.with_defaults_dir(defaults);
    }
    description
        .declare(&mut modules)
        .with_context(|| format!("Failed to declare modules for {}", ioc_name))?;

    let mut build = config.to_build_config(description.architecture(), &args.input);
    if args.dynamic {
        build.dynamic_load = true;
    }
    if args.static_load {
        build.dynamic_load = false;
    }
    if args.no_check_release {
        build.check_release = false;
    }
    if args.no_substitute_boot {
        build.substitute_boot = false;
    }
    if args.substitute_boot {
        build.substitute_boot = true;
    }

    info!(
        ioc = %ioc_name,
        architecture = %build.architecture,
        dynamic = build.dynamic_load,
        "Configuration loaded"
    );

    let mut ctx = BuildContext::new(&modules, build);
    description
        .populate(&mut ctx)
        .with_context(|| format!("Invalid configuration for {}", ioc_name))?;

    let report = if let Some(doc) = &args.doc {
        write_documentation(doc, &ioc_name, &mut ctx)?
    } else if args.db_only {
        write_db_only(&args.out, &ioc_name, &mut ctx)?
    } else {
        description.writer(&args.out)?.write(&mut ctx)?
    };

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    println!("Generated {} in {}:", report.ioc_name, report.root.display());
    for artifact in &report.artifacts {
        println!("  - {}", artifact.display());
    }

    Ok(())
}
