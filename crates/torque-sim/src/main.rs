use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use torque_core::{DriverInput, GridWorld, SessionConfig};
use torque_sim::LoopbackRunner;

/// Run a server and a client session side by side over a flat voxel floor.
#[derive(Parser, Debug)]
#[command(name = "torque-sim", version, about)]
struct Args {
    /// Ticks to simulate.
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// Session config as JSON. Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Vehicles dropped onto the floor.
    #[arg(long, default_value_t = 4)]
    vehicles: u32,

    /// Hold forward on every vehicle once it exists.
    #[arg(long)]
    drive: bool,

    /// Deliver packets on sender threads instead of between ticks.
    #[arg(long)]
    threaded: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    SessionConfig::from_json(&json).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let world = Arc::new(GridWorld::with_floor(0));
    let mut runner = if args.threaded {
        LoopbackRunner::threaded(config, world)
    } else {
        LoopbackRunner::new(config, world)
    };

    let tags: Vec<u64> = (0..args.vehicles)
        .map(|i| runner.spawn_vehicle(Vec3::new(i as f32 * 6.0, 3.0, 0.0), 1000.0))
        .collect();
    runner.step();
    if args.drive {
        let forward = DriverInput {
            forward: true,
            ..DriverInput::default()
        };
        for id in tags.iter().filter_map(|tag| runner.body_for_tag(*tag)) {
            runner.drive(id, forward);
        }
    }

    let summary = runner.run(args.ticks);
    for fault in &summary.faults {
        log::warn!("{}", fault);
    }
    log::info!(
        "{} tick(s), {} snapshot(s), {} fault(s), max divergence {:.4}",
        summary.ticks + 1,
        summary.snapshots,
        summary.faults.len(),
        summary.max_divergence
    );

    let (server, client) = runner.shutdown();
    log::info!("shut down with {} server and {} client body(ies)", server, client);
    Ok(())
}
