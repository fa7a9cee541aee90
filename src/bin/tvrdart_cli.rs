use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use tvrdart::geometry::{limited_angles, ProjectionGeometry, VolumeGeometry};
use tvrdart::io::save_image;
use tvrdart::phantom::{nanotube_phantom, simulate_sinogram};
use tvrdart::{run, ReconConfig, SystemMatrix};

/// TVR-DART discrete tomography for 2D parallel-beam data.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct a sinogram (-log already applied) stored as NPY.
    Recon(ReconArgs),

    /// Write a simulated nanotube sinogram as NPY.
    Phantom(PhantomArgs),
}

#[derive(Args, Debug)]
struct ReconArgs {
    /// NPY file with shape (angles, detectors)
    #[arg(long, default_value_os_t = default_input())]
    input: PathBuf,

    /// JSON configuration; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output path for the segmented reconstruction (.npy)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output path for the reconstruction snapped onto the estimated gray values (.npy)
    #[arg(long)]
    hard_output: Option<PathBuf>,

    /// Directory for PNG previews of the SIRT and TVR-DART images
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// Write estimated gray values and sharpness as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PhantomArgs {
    /// Output path for the sinogram (.npy)
    #[arg(long)]
    output: PathBuf,

    /// Image side length, which is also the number of detector elements
    #[arg(long, default_value_t = 128)]
    size: usize,

    /// Number of projection angles between -50 and 50 degrees
    #[arg(long, default_value_t = 51)]
    angles: usize,

    /// Gray value of the tube wall
    #[arg(long, default_value_t = 0.05)]
    value: f32,

    /// Standard deviation of additive Gaussian noise
    #[arg(long, default_value_t = 0.0)]
    noise: f32,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn default_input() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join("Documents/GitHub/ContributedTools/nanotube2d.npy")
}

fn recon(args: ReconArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ReconConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?,
        None => ReconConfig::default(),
    };
    if let Some(output) = args.output {
        config.output = output;
    }
    if args.hard_output.is_some() {
        config.hard_output = args.hard_output;
    }
    if args.preview_dir.is_some() {
        config.preview_dir = args.preview_dir;
    }
    if args.summary.is_some() {
        config.summary = args.summary;
    }

    let report = run(&config, &args.input)
        .with_context(|| format!("Reconstruction of {:?} failed", args.input))?;

    tracing::info!(
        gray_values = ?report.summary.gray_values,
        sharpness = ?report.summary.sharpness,
        "Reconstruction written to {:?}",
        config.output
    );
    Ok(())
}

fn phantom(args: PhantomArgs) -> Result<()> {
    let angles = limited_angles(args.angles, -50.0, 50.0);
    let proj = ProjectionGeometry::parallel(1.0, args.size, angles)?;
    let vol = VolumeGeometry::new(args.size, args.size)?;
    let w = SystemMatrix::build(&proj, &vol);

    let size = args.size as f32;
    let object = nanotube_phantom(args.size, 0.3 * size, 0.2 * size, args.value);
    let sinogram = simulate_sinogram(&w, &object, args.noise, args.seed)?;

    save_image(&args.output, &sinogram)
        .with_context(|| format!("Failed to write output NPY {:?}", args.output))?;
    tracing::info!(
        angles = args.angles,
        detectors = args.size,
        "Sinogram written to {:?}",
        args.output
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Recon(args) => recon(args),
        Command::Phantom(args) => phantom(args),
    }
}
