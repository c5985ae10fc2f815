//! Denoise command
//!
//! Runs the blur + blend filter on one image and writes the result.

use crate::DenoiseArgs;
#[allow(unused_imports)]
use tracing::{debug, info, trace, warn};
use anyhow::{Result, bail};
use wmprobe_gpu::{DenoiserBuilder, DenoiserConfig, FilterParams, PowerPreference, RunStatus};

pub fn run(args: DenoiseArgs, verbose: bool) -> Result<()> {
    trace!(input = %args.input.display(), radius = args.radius, blend = args.blend, "denoise::run");

    let params = FilterParams::new(args.radius, args.blend)?;
    let config = config_for(&args);
    debug!(?config, "Denoiser config");

    let denoiser = DenoiserBuilder::new()
        .config(config)
        .on_status(move |status| {
            if verbose {
                println!("{status}");
            } else if let RunStatus::FallingBack(_) = status {
                println!("{status}");
            }
        })
        .build();

    let Some(backend) = denoiser.backend_name() else {
        bail!("No compute device available (try --backend cpu)");
    };

    let image = super::load_image(&args.input)?;
    let (w, h) = image.dimensions();
    info!(backend, w, h, radius = args.radius, blend = args.blend, "Applying denoise");

    if verbose {
        println!(
            "Denoising {} ({}x{}, {}) with radius={} blend={} on {}",
            args.input.display(),
            w,
            h,
            super::format_size(image.size_bytes() as u64),
            args.radius,
            args.blend,
            backend
        );
    }

    denoiser.load_image(image);
    let outcome = denoiser.run(params)?;

    if let Some(reason) = outcome.warning() {
        warn!(%reason, "Output produced by fallback; an all-black result also triggers this");
    }

    super::save_image(&args.output, &outcome.image)?;
    println!("{} -> {} [{}]", args.input.display(), args.output.display(), outcome.path);

    Ok(())
}

/// Environment defaults overridden by explicit flags.
fn config_for(args: &DenoiseArgs) -> DenoiserConfig {
    let mut config = DenoiserConfig::from_env();
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if args.low_power {
        config.power_preference = PowerPreference::LowPower;
    }
    config.force_fallback_adapter = args.software;
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use wmprobe_gpu::{Backend, Image};

    fn args(input: std::path::PathBuf, output: std::path::PathBuf) -> DenoiseArgs {
        DenoiseArgs {
            input,
            output,
            radius: 1,
            blend: 1.0,
            backend: Some(Backend::Cpu),
            low_power: false,
            software: false,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut a = args("in.png".into(), "out.png".into());
        a.low_power = true;
        a.software = true;
        let config = config_for(&a);
        assert_eq!(config.backend, Backend::Cpu);
        assert_eq!(config.power_preference, PowerPreference::LowPower);
        assert!(config.force_fallback_adapter);
    }

    #[test]
    fn test_denoise_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");

        // Vertical stripes: blur pulls every column toward grey
        let mut img = Image::filled(6, 4, [0, 0, 0, 255]).unwrap();
        for y in 0..4 {
            for x in (0..6).step_by(2) {
                img.put_pixel(x, y, [255, 255, 255, 255]);
            }
        }
        super::super::save_image(&input, &img).unwrap();

        run(args(input, output.clone()), false).unwrap();

        let out = super::super::load_image(&output).unwrap();
        assert_eq!(out.dimensions(), (6, 4));
        // column 1 (black) sees white on both sides: 2/3 white
        assert_eq!(out.pixel(1, 1), [170, 170, 170, 255]);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(dir.path().join("in.png"), dir.path().join("out.png"));
        a.blend = 1.5;
        assert!(run(a, false).is_err());

        let mut a = args(dir.path().join("in.png"), dir.path().join("out.png"));
        a.radius = FilterParams::MAX_RADIUS + 1;
        let err = run(a, false).unwrap_err();
        assert!(err.to_string().contains("radius"));
    }
}
