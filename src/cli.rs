use crate::config::types::{ParkerConfig, INNER_ENTRY};
use crate::exec::launcher::{self, LaunchFailure};
use crate::exec::runner;
use crate::exec::supervisor::exit_code;
use anyhow::Result;
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CliMode {
    /// `parker`: build a self-extracting binary
    Build,
    /// `runner`: the stub prepended to every artifact
    Runner,
}

#[derive(Parser)]
#[command(name = "parker", author, version, about, long_about = None)]
struct BuildCli {
    /// Entry executable; its directory becomes the payload
    target: PathBuf,
    /// Runner stub to prepend (defaults to `runner` next to this executable)
    #[arg(long, env = "RUNNER_PATH")]
    runner: Option<PathBuf>,
    /// Verbose diagnostics on standard output (also enabled by a non-empty PARKER_VERBOSE)
    #[arg(short, long)]
    verbose: bool,
    /// Print the build report as JSON
    #[arg(long)]
    json: bool,
}

/// Configure `log` output from the explicit configuration.
pub fn init_logging(config: &ParkerConfig) {
    let mut builder = env_logger::Builder::new();
    if config.verbose {
        builder
            .filter_level(log::LevelFilter::Debug)
            .parse_env("RUST_LOG")
            .target(env_logger::Target::Stdout);
    } else {
        builder.filter_level(log::LevelFilter::Off);
    }
    let _ = builder.try_init();
}

/// Print a one-line diagnostic and terminate with a non-zero status.
pub fn abort(failure: &LaunchFailure) -> ! {
    eprintln!("parker: {}", failure);
    std::process::exit(1);
}

fn is_inner_entry(arg0: Option<&OsString>) -> bool {
    arg0.and_then(|arg| Path::new(arg).file_name())
        .map(|name| name == INNER_ENTRY)
        .unwrap_or(false)
}

pub fn run(mode: CliMode) -> Result<()> {
    // Platform compatibility check - mount namespaces and cgroups are Linux-only
    if !cfg!(target_os = "linux") {
        eprintln!("Error: parker requires Linux mount namespaces and cgroups");
        std::process::exit(1);
    }

    match mode {
        CliMode::Build => run_build(),
        CliMode::Runner => run_runner(),
    }
}

fn run_build() -> Result<()> {
    let cli = BuildCli::parse();
    let config = ParkerConfig::from_env();
    let verbose = config.verbose || cli.verbose;
    let config = config
        .with_verbose(verbose)
        .with_runner_path(cli.runner);
    init_logging(&config);
    log::debug!("config: {:?}", config);

    let report = crate::archive::build(&config, &cli.target)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let name = report
            .output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| report.output.display().to_string());
        println!("{}", name);
        println!("parker successful");
    }
    Ok(())
}

/// Runner entry: `argv[0] == INNER_ENTRY` selects the inner runner, anything
/// else launches the embedded payload. Arguments after `argv[0]` belong to
/// the target and are never parsed here.
pub fn run_runner() -> ! {
    let config = ParkerConfig::from_env();
    init_logging(&config);

    let mut argv: Vec<OsString> = std::env::args_os().collect();
    let rest = if argv.is_empty() {
        Vec::new()
    } else {
        argv.split_off(1)
    };

    if is_inner_entry(argv.first()) {
        match runner::run_inner(&config, &rest) {
            Ok(never) => match never {},
            Err(failure) => abort(&failure),
        }
    }

    match launcher::launch(config, &rest) {
        Ok(status) => {
            log::debug!("exit");
            std::process::exit(exit_code(status));
        }
        Err(failure) => abort(&failure),
    }
}
