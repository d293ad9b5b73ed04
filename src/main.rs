//! Command-line entry point for the uld linker.

use std::fs::File;

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use tracing_subscriber::EnvFilter;

use uld::config::Config;
use uld::writer;
use uld::Linker;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let inputs = config.input_files();
    if inputs.is_empty() {
        anyhow::bail!("no input files");
    }

    // Inputs stay mapped for the whole link; the linker borrows their bytes.
    let mut mapped = Vec::new();
    for path in &inputs {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map {}", path.display()))?;
        mapped.push((path.display().to_string(), mmap));
    }

    let mut linker = Linker::new(&config.entry);
    for (name, mmap) in &mapped {
        linker.add_input(name, mmap)?;
    }
    let image = linker.link()?;

    let output = config.output();
    writer::write_output(&output, &image)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}
