use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::IVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tileworld_common::{BlockingLayers, Bounds, Coordinate, Direction, Directions, EntityId, Facing};
use tileworld_kernel::commands::{Spawn, ToggleDoor, Turn, step};
use tileworld_kernel::kinds::{Actor, Door, Wall};
use tileworld_kernel::{CommandRef, EventLog, KernelConfig, World, WorldComponent, WorldEvent};
use tileworld_tools::WorldInspector;

#[derive(Parser)]
#[command(name = "tileworld-cli", about = "CLI tool for tileworld operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Kernel limits as a JSON file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and effective kernel limits
    Info,
    /// Walk a player through a small room with a door
    Demo {
        /// World seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Drive many actors with random steps and report throughput
    Stress {
        /// Number of transactions to run
        #[arg(short, long, default_value = "200")]
        rounds: usize,
        /// Number of actors to spawn
        #[arg(short, long, default_value = "64")]
        actors: usize,
        /// Edge length of the square world
        #[arg(long, default_value = "32")]
        size: i32,
        /// RNG seed for the command stream
        #[arg(long, default_value = "7")]
        seed: u64,
    },
    /// Run the same stress scenario twice and compare state hashes
    Replay {
        /// Number of transactions to run
        #[arg(short, long, default_value = "50")]
        rounds: usize,
        /// RNG seed for the command stream
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KernelConfig> {
    let Some(path) = path else {
        return Ok(KernelConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded kernel config");
    Ok(config)
}

fn event_log() -> Arc<dyn WorldComponent> {
    Arc::new(EventLog::<WorldEvent>::new())
}

fn print_map(world: &World) -> anyhow::Result<()> {
    let map = WorldInspector::blocking_map(
        world,
        0,
        BlockingLayers::STATIC | BlockingLayers::MOBILE,
    )?;
    print!("{map}");
    Ok(())
}

fn run_demo(config: KernelConfig, seed: u64) -> anyhow::Result<()> {
    let bounds = Bounds::from_size(IVec3::new(7, 5, 1));
    let world = World::create_empty(bounds, seed, vec![event_log()])?.with_config(config);

    let mut layout: Vec<CommandRef> = (0..4)
        .map(|y| -> CommandRef {
            Arc::new(Spawn::new(Arc::new(Wall::new(
                "wall",
                Coordinate::at(IVec3::new(3, y, 0)),
                Directions::all(),
            ))))
        })
        .collect();
    layout.push(Arc::new(Spawn::new(Arc::new(Door::new(
        "door",
        Coordinate::new(IVec3::new(3, 4, 0), Facing::West),
    )))));
    let door = EntityId(5);
    let hero = EntityId(6);
    layout.push(Arc::new(Spawn::new(Arc::new(Actor::player(
        "hero",
        Coordinate::new(IVec3::new(1, 4, 0), Facing::East),
    )))));

    let mut world = world.apply_commands(layout)?.world;
    println!("{}", WorldInspector::summary(&world));
    print_map(&world)?;

    let script: Vec<(&str, Vec<CommandRef>)> = vec![
        ("step east", vec![step(hero, Direction::East)]),
        ("step east into the door", vec![step(hero, Direction::East)]),
        (
            "open the door and walk through",
            vec![
                Arc::new(ToggleDoor { door }),
                step(hero, Direction::East),
                step(hero, Direction::East),
            ],
        ),
        (
            "turn and head south",
            vec![
                Arc::new(Turn {
                    actor: hero,
                    facing: Facing::South,
                }),
                step(hero, Direction::South),
                step(hero, Direction::South),
            ],
        ),
    ];

    for (label, batch) in script {
        let checkpoint = world
            .checkpoint::<WorldEvent>()
            .context("demo world has no event log")?;
        let transition = world.apply_commands(batch)?;
        world.release();
        world = transition.world;

        println!("\n== {label} ({} commands executed)", transition.executed.len());
        for event in world.events_since::<WorldEvent>(checkpoint) {
            println!("  {event:?}");
        }
        print_map(&world)?;
    }

    if let Some(info) = WorldInspector::inspect_entity(&world, hero) {
        println!("\n{info}");
    }
    println!("{}", WorldInspector::summary(&world));
    Ok(())
}

/// Spawn actors and drive them with random steps. Returns the final world
/// and the total number of executed commands.
fn run_stress(
    config: KernelConfig,
    seed: u64,
    rounds: usize,
    actors: usize,
    size: i32,
) -> anyhow::Result<(World, usize)> {
    anyhow::ensure!(size > 0, "world size must be positive");
    let mut rng = StdRng::seed_from_u64(seed);
    let bounds = Bounds::from_size(IVec3::new(size, size, 2));
    let world = World::create_empty(bounds, seed, Vec::new())?.with_config(config);

    let spawns: Vec<CommandRef> = (0..actors)
        .map(|i| -> CommandRef {
            let at = IVec3::new(rng.gen_range(0..size), rng.gen_range(0..size), 0);
            Arc::new(Spawn::new(Arc::new(Actor::new(format!("actor-{i}"), Coordinate::at(at)))))
        })
        .collect();
    let mut world = world.apply_commands(spawns)?.world;
    let ids: Vec<EntityId> = WorldInspector::list_entities(&world);

    let mut executed = 0;
    for _ in 0..rounds {
        let batch: Vec<CommandRef> = ids
            .iter()
            .map(|id| step(*id, Direction::ALL[rng.gen_range(0..4)]))
            .collect();
        let transition = world.apply_commands(batch)?;
        executed += transition.executed.len();
        world.release();
        world = transition.world;
    }
    Ok((world, executed))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("tileworld-cli v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "kernel: max_command_executions={} max_rewrite_iterations={} pathing_check={}",
                config.max_command_executions,
                config.max_rewrite_iterations,
                config.pathing_check_enabled()
            );
            println!("layers: {} blocking layers per voxel", BlockingLayers::COUNT);
        }
        Commands::Demo { seed } => run_demo(config, seed)?,
        Commands::Stress {
            rounds,
            actors,
            size,
            seed,
        } => {
            println!("Stress: {actors} actors, {rounds} rounds, {size}x{size} world");
            let started = Instant::now();
            let (world, executed) = run_stress(config, seed, rounds, actors, size)?;
            let elapsed = started.elapsed();
            println!("{}", WorldInspector::summary(&world));
            println!(
                "executed={executed} elapsed={:.2?} per_round={:.2?} hash={:#018x}",
                elapsed,
                elapsed / rounds.max(1) as u32,
                world.state_hash()
            );
        }
        Commands::Replay { rounds, seed } => {
            println!("Deterministic replay: seed={seed}, rounds={rounds}");
            let (first, _) = run_stress(config.clone(), seed, rounds, 16, 12)?;
            let (second, _) = run_stress(config, seed, rounds, 16, 12)?;
            println!("Run 1: tick={} hash={:#018x}", first.tick(), first.state_hash());
            println!("Run 2: tick={} hash={:#018x}", second.tick(), second.state_hash());
            println!(
                "Match: {}",
                if first.state_hash() == second.state_hash() {
                    "OK"
                } else {
                    "MISMATCH"
                }
            );
        }
    }

    Ok(())
}
