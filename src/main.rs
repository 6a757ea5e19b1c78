//! `flightmare-dataset` CLI: stereo capture sessions and SGM post-processing.
//!
//! Usage:
//!   flightmare-dataset collect -s /data/stereo --object-type 1 --object-type 5
//!   flightmare-dataset collect -s /data/stereo --render --sim_dt 0.02
//!   flightmare-dataset move-to-sgm -s /data/sgm_run
//!   flightmare-dataset inspect /data/stereo/object_01/environment_0000/sequence_00000

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flightmare_dataset::dataset::{CapturedSequence, SessionManifest};
use flightmare_dataset::flightmare::FlightmarePaths;
use flightmare_dataset::providers::{
    DartThrowingLayout, LayoutConfig, MinimumJerkTrajectories, TrajectoryConfig,
};
use flightmare_dataset::raycast::RaycastEnvironment;
use flightmare_dataset::render::RendererCommand;
use flightmare_dataset::session::SessionRunner;
use flightmare_dataset::{sgm, SessionConfig, DEFAULT_MAX_ENV, DEFAULT_SIM_DT};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "flightmare-dataset", about = "Collect stereo training sequences from Flightmare")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one session per object type.
    Collect {
        /// Dataset root; each object type gets its own `object_XX` directory
        #[arg(long = "save_dir", short = 's', default_value = ".")]
        save_dir: PathBuf,
        /// Launch the standalone Flightmare renderer for every environment
        #[arg(long)]
        render: bool,
        /// Simulation step in seconds
        #[arg(long = "sim_dt", default_value_t = DEFAULT_SIM_DT)]
        sim_dt: f64,
        /// Obstacle model families to capture
        #[arg(long = "object-type", default_values_t = vec![1u32, 5])]
        object_types: Vec<u32>,
        /// Obstacle layouts per session
        #[arg(long, default_value_t = DEFAULT_MAX_ENV)]
        max_env: usize,
        /// Trajectories flown per layout
        #[arg(long, default_value_t = 50)]
        num_trajectory: usize,
        /// Random seed for trajectories and layouts
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Write SGM timestamps and links for an existing capture.
    MoveToSgm {
        #[arg(long = "save_dir", short = 's', default_value = ".")]
        save_dir: PathBuf,
        #[arg(long = "sim_dt", default_value_t = DEFAULT_SIM_DT)]
        sim_dt: f64,
    },
    /// Check a captured sequence directory.
    Inspect {
        sequence_dir: PathBuf,
        /// Step used when no session manifest is found
        #[arg(long = "sim_dt", default_value_t = DEFAULT_SIM_DT)]
        sim_dt: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            save_dir,
            render,
            sim_dt,
            object_types,
            max_env,
            num_trajectory,
            seed,
        } => {
            let paths = FlightmarePaths::from_env()?;
            let options = CollectOptions {
                render,
                sim_dt,
                max_env,
                num_trajectory,
                seed,
            };
            collect(&paths, &save_dir, &object_types, &options)?;
        }
        Commands::MoveToSgm { save_dir, sim_dt } => {
            let summary = sgm::reorganize(&save_dir, sim_dt)
                .with_context(|| format!("preparing {} for SGM", save_dir.display()))?;
            println!(
                "SGM layout ready: {} left, {} right images",
                summary.left, summary.right
            );
        }
        Commands::Inspect {
            sequence_dir,
            sim_dt,
        } => {
            inspect(&sequence_dir, sim_dt)?;
        }
    }

    Ok(())
}

struct CollectOptions {
    render: bool,
    sim_dt: f64,
    max_env: usize,
    num_trajectory: usize,
    seed: u64,
}

fn collect(
    paths: &FlightmarePaths,
    save_dir: &Path,
    object_types: &[u32],
    options: &CollectOptions,
) -> Result<()> {
    let vision = paths
        .load_vision_config()
        .with_context(|| format!("loading {}", paths.vision_config().display()))?;
    let camera = vision.camera();
    info!(
        fov = camera.fov,
        baseline = camera.baseline,
        width = camera.width,
        height = camera.height,
        "loaded vision config"
    );

    let trajectory_config = TrajectoryConfig {
        num_trajectory: options.num_trajectory,
        ..TrajectoryConfig::default()
    };

    for &object_type in object_types {
        let config = SessionConfig::new(save_dir, object_type, camera.clone())
            .with_render(options.render)
            .with_sim_dt(options.sim_dt)
            .with_duration(trajectory_config.duration())
            .with_max_env(options.max_env);

        let trajectories = MinimumJerkTrajectories::new(trajectory_config.clone(), options.seed);
        let layouts = DartThrowingLayout::new(
            LayoutConfig::for_object_type(object_type).with_radius(config.radius),
            options.seed,
        );
        let env = RaycastEnvironment::new(camera.clone());

        let save_root = config.save_root.clone();
        let summary = SessionRunner::new(config, trajectories, layouts, env)
            .with_renderer(RendererCommand::flightmare(paths))
            .run()
            .with_context(|| format!("capturing {}", save_root.display()))?;

        println!(
            "{}: {} environments, {} sequences, {} frames",
            save_root.display(),
            summary.environments,
            summary.sequences,
            summary.frames
        );
    }
    Ok(())
}

fn inspect(sequence_dir: &Path, fallback_sim_dt: f64) -> Result<()> {
    let sequence = CapturedSequence::load(sequence_dir)?;

    // sequence_dir is save_root/environment_NNNN/sequence_NNNNN
    let manifest = sequence_dir
        .parent()
        .and_then(Path::parent)
        .and_then(|root| SessionManifest::load(root).ok());
    let sim_dt = manifest.as_ref().map_or(fallback_sim_dt, |m| m.sim_dt);

    println!("Sequence: {}", sequence_dir.display());
    if let Some(m) = &manifest {
        println!("  object type: {}", m.object_type);
        println!(
            "  camera: {}x{} fov {} baseline {}",
            m.camera.width, m.camera.height, m.camera.fov, m.camera.baseline
        );
    }
    println!("  frames: {}", sequence.frame_count());
    println!(
        "  left/right/disparity: {}/{}/{}",
        sequence.left_frames, sequence.right_frames, sequence.disparity_frames
    );

    sequence.validate(sim_dt)?;
    if sequence.frame_count() > 0 {
        let disparity = sequence.load_disparity(0)?;
        let (min, max) = disparity
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
        println!("  disparity[0]: {:?} range [{}, {}]", disparity.dim(), min, max);
    }
    println!("  OK (sim_dt {})", sim_dt);
    Ok(())
}
