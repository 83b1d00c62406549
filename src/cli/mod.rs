//! CLI argument parsing and workload dispatch

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use mongoload_core::config::WorkloadConfig;
use mongoload_core::context::WorkloadContext;
use mongoload_core::driver::WorkloadDriver;
use mongoload_core::metrics::{Registry, ReportFormat};
use mongoload_core::orchestrator::Orchestrator;

/// mongoload - drive synthetic, phase-coordinated load against MongoDB
#[derive(Parser, Debug)]
#[command(name = "mongoload")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the workload configuration YAML file. Can also be given as
    /// the first positional argument.
    #[arg(short = 'w', long, value_name = "FILE")]
    pub workload_file: Option<PathBuf>,

    /// Positional form of --workload-file.
    #[arg(value_name = "WORKLOAD", conflicts_with = "workload_file")]
    pub workload: Option<PathBuf>,

    /// MongoDB URI for the workload's shared connection pool.
    #[arg(short = 'u', long, default_value = "mongodb://localhost:27017")]
    pub mongo_uri: String,

    /// Metrics output format (csv or json).
    #[arg(short = 'm', long, default_value = "csv")]
    pub metrics_format: String,

    /// Write metrics to this file (appending). Use `-` for stdout.
    #[arg(short = 'o', long, default_value = "-")]
    pub metrics_output_file: String,

    /// List the registered actor types and exit.
    #[arg(long)]
    pub list_actors: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Run the workload described by the CLI arguments.
    pub fn run(&self) -> Result<()> {
        let cast = mongoload_actors::default_cast();

        if self.list_actors {
            for name in cast.names() {
                println!("{name}");
            }
            return Ok(());
        }

        let format: ReportFormat = self
            .metrics_format
            .parse()
            .context("bad --metrics-format")?;

        let path = self
            .workload_file
            .as_ref()
            .or(self.workload.as_ref())
            .context("a workload file is required (--workload-file or positional)")?;

        let registry = Registry::new();
        let setup_timer = registry.timer("Setup");
        let setup = setup_timer.start();

        let text = fs::read_to_string(path)
            .with_context(|| format!("reading workload file {}", path.display()))?;
        let config = WorkloadConfig::parse(&text)
            .with_context(|| format!("loading workload {}", path.display()))?;

        let orchestrator = Arc::new(Orchestrator::new());
        let (_workload, actors) = WorkloadContext::build(
            config,
            registry.clone(),
            Arc::clone(&orchestrator),
            &self.mongo_uri,
            &cast,
        )
        .context("constructing workload")?;
        setup.report();

        let driver = WorkloadDriver::new(orchestrator, registry.clone());
        let summary = driver.run(actors).context("running workload")?;

        self.write_metrics(&registry, format)
            .context("writing metrics")?;

        if summary.failures > 0 {
            bail!("{} of {} actors failed", summary.failures, summary.actors);
        }
        Ok(())
    }

    fn write_metrics(&self, registry: &Registry, format: ReportFormat) -> Result<()> {
        if self.metrics_output_file == "-" {
            let stdout = std::io::stdout();
            registry.report(stdout.lock(), format)?;
        } else {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.metrics_output_file)
                .with_context(|| format!("opening {}", self.metrics_output_file))?;
            registry.report(&mut file, format)?;
            file.flush()?;
        }
        Ok(())
    }
}
