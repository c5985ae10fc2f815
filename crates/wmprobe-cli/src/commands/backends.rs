//! Backends command

use anyhow::Result;
use tracing::trace;
use wmprobe_gpu::{DenoiserConfig, describe_backends, detect_backends, select_best_backend};

pub fn run(verbose: bool) -> Result<()> {
    trace!("backends::run");

    let config = DenoiserConfig::from_env();
    let report = detect_backends(config.power_preference);

    print!("{}", describe_backends(&report));
    println!("auto -> {}", select_best_backend(&report));

    if verbose {
        println!("configured: {}", config.backend);
        if let Some(bytes) = config.host_memory_limit {
            println!("fallback memory limit: {}", super::format_size(bytes as u64));
        }
    }

    Ok(())
}
