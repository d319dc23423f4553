use clap::Parser;
use gas_sim_core::{
    CellMap, CellPos, Door, EffectId, EffectSink, EngineRegistry, GridId, GridIndex, SimConfig,
    SubstanceCatalog, SubstanceDef, SubstanceId, UniformWind, VisualHandle, VisualRequest,
};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Gas diffusion demo with configurable parameters
#[derive(Parser, Debug)]
#[command(name = "gas-sim-demo")]
#[command(about = "Headless gas and smoke diffusion demo", long_about = None)]
struct Args {
    /// Grid width in cells
    #[arg(long, default_value_t = 64)]
    width: u32,

    /// Grid height in cells
    #[arg(long, default_value_t = 64)]
    height: u32,

    /// Number of ticks to simulate
    #[arg(short, long, default_value_t = 1800)]
    ticks: u64,

    /// Host ticks per second
    #[arg(long, default_value_t = 60.0)]
    tps: f32,

    /// Wind strength (0 = calm)
    #[arg(short, long, default_value_t = 2.0)]
    wind_speed: f32,

    /// Wind heading in degrees (0=North, 90=East)
    #[arg(long, default_value_t = 90.0)]
    wind_direction: f32,

    /// Substance to release
    #[arg(short, long, default_value = "smoke")]
    substance: String,

    /// Total density released at the source
    #[arg(short, long, default_value_t = 40_000.0)]
    amount: f32,

    /// Spread the release over this many ticks
    #[arg(long, default_value_t = 120)]
    emit_ticks: u64,

    /// Substance catalog (JSON array); built-in smoke when omitted
    #[arg(short, long)]
    catalog: Option<PathBuf>,

    /// Release inside a roofed room with one open door instead of open ground
    #[arg(long)]
    room: bool,

    /// Report interval in ticks
    #[arg(short, long, default_value_t = 300)]
    report_interval: u64,

    /// Write a grid snapshot here when finished
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Seed for cosmetic randomness
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Host stand-in that tallies what the engines ask it to do.
#[derive(Default)]
struct Tally {
    effects: BTreeMap<String, (u64, f32)>,
    visuals: u64,
}

impl EffectSink for Tally {
    fn apply_occupant_effect(
        &mut self,
        _cell: CellPos,
        _substance: &SubstanceId,
        _density: f32,
        effect: &EffectId,
        magnitude: f32,
    ) {
        let entry = self.effects.entry(effect.to_string()).or_default();
        entry.0 += 1;
        entry.1 += magnitude;
    }

    fn spawn_visual(&mut self, _request: &VisualRequest<'_>) -> Option<VisualHandle> {
        self.visuals += 1;
        Some(VisualHandle(self.visuals))
    }
}

fn load_catalog(path: Option<&PathBuf>) -> Result<SubstanceCatalog, Box<dyn Error>> {
    let (catalog, rejected) = match path {
        Some(path) => SubstanceCatalog::from_json(&std::fs::read_to_string(path)?)?,
        None => SubstanceCatalog::from_definitions([SubstanceDef::smoke()]),
    };
    for err in &rejected {
        warn!("Catalog entry rejected: {}", err);
    }
    Ok(catalog)
}

/// Open ground, or a roofed room with a door in its east wall.
fn build_map(index: GridIndex, room: bool) -> (CellMap, CellPos) {
    let center = CellPos::new(index.width as i32 / 2, index.height as i32 / 2);
    if !room {
        return (CellMap::new(index), center);
    }

    let mut map = CellMap::new(index);
    let (half_w, half_h) = (index.width as i32 / 4, index.height as i32 / 4);
    let (min, max) = (
        CellPos::new(center.x - half_w, center.y - half_h),
        CellPos::new(center.x + half_w, center.y + half_h),
    );
    for y in min.y..=max.y {
        for x in min.x..=max.x {
            let cell = CellPos::new(x, y);
            let wall = x == min.x || x == max.x || y == min.y || y == max.y;
            map.set_filled(cell, wall);
            map.set_roofed(cell, true);
        }
    }
    map.set_door(CellPos::new(max.x, center.y), Door::Open);
    (map, center)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    println!("=== Gas Diffusion Demo ===\n");

    let config = SimConfig::default()
        .with_ticks_per_second(args.tps)
        .with_seed(args.seed);
    let catalog = load_catalog(args.catalog.as_ref())?;
    let substance = SubstanceId::new(args.substance.as_str());
    if catalog.get(&substance).is_none() {
        return Err(format!("substance '{}' not in catalog", substance).into());
    }
    let mut registry = EngineRegistry::new(catalog, config)?;

    let index = GridIndex::new(args.width, args.height);
    let grid = GridId::new(0, 0);
    let (map, source) = build_map(index, args.room);
    registry.register_grid(grid, index);

    let wind = UniformWind::from_heading(args.wind_direction, args.wind_speed);
    info!(
        "Releasing {:.0} of {} at {} over {} tick(s), wind {:.1} toward {:.0} deg",
        args.amount, substance, source, args.emit_ticks, args.wind_speed, args.wind_direction
    );

    let per_tick = args.amount / args.emit_ticks.max(1) as f32;
    let mut tally = Tally::default();
    let mut peak = 0usize;

    for tick in 0..args.ticks {
        if tick < args.emit_ticks.max(1) {
            registry.inject(grid, &substance, source, per_tick, tick, &map)?;
        }
        let report = registry.tick_grid(grid, tick, &map, &wind, &mut tally)?;
        for fault in &report.faults {
            warn!("Tick {}: {} fault: {}", tick, fault.substance, fault.error);
        }

        let Some(engine) = registry.engine(grid, &substance) else {
            break;
        };
        peak = peak.max(engine.len());
        if args.report_interval > 0 && tick % args.report_interval == 0 {
            let sizes = engine.bucket_sizes();
            info!(
                "t={:>6} ({:>6.1}s) particles={:>5} total={:>10.1} buckets {}..{}",
                tick,
                tick as f32 / args.tps,
                engine.len(),
                engine.total_density(),
                sizes.iter().min().copied().unwrap_or(0),
                sizes.iter().max().copied().unwrap_or(0)
            );
        }
        if tick >= args.emit_ticks && engine.is_empty() {
            info!("Cloud fully dissipated at tick {}", tick);
            break;
        }
    }

    let stats = registry.stats();
    println!("\n=== Summary ===");
    println!("Particles alive: {} (peak {})", stats.particles, peak);
    println!("Engines: {} ({} frozen)", stats.engines, stats.frozen);
    println!("Visual requests: {}", tally.visuals);
    for (effect, (count, magnitude)) in &tally.effects {
        println!("Effect {effect}: {count} application(s), total magnitude {magnitude:.3}");
    }

    if let Some(path) = &args.snapshot {
        registry.snapshot_grid(grid)?.save(path)?;
        println!("Snapshot written to {}", path.display());
    }
    Ok(())
}
