//! Command-line entry point.

use bang::core::config::ScanConfig;
use bang::core::error::Result;
use bang::scan::{ScanJob, StagingDirs};
use bang::utils::logging::init_logging;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Recursive binary content identification and extraction
#[derive(Parser, Debug)]
#[command(name = "bang")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Regular file to scan
    #[arg(short, long)]
    file: PathBuf,

    /// INI configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_configuration() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if !cli.file.is_file() {
        return Err(bang::Error::ConfigInvalid {
            key: "file".into(),
            message: format!("not a regular file: {}", cli.file.display()),
        });
    }
    if !cli.config.is_file() {
        return Err(bang::Error::ConfigInvalid {
            key: "config".into(),
            message: format!("not a regular file: {}", cli.config.display()),
        });
    }

    let config = ScanConfig::load(&cli.config)?;
    log::debug!("configuration loaded: {} worker(s)", config.threads);

    let staging = StagingDirs::create(&config.base_unpack_directory)?;
    log::info!("staging directory: {}", staging.root.display());

    let job = ScanJob::new(&config, staging)?;
    let results = job.run(&cli.file)?;

    log::info!(
        "scan complete: {} file(s) in {}",
        results.len(),
        job.staging().root.display()
    );
    Ok(())
}
