//! Property tests: density bounds, bucket partition and mass accounting hold
//! for arbitrary maps, injections, wind and host registrations.

use gas_sim_core::{
    CellMap, CellPos, DiffusionEngine, GridIndex, NullEffects, SimConfig, StorageKind,
    SubstanceDef, TickContext, UniformWind,
};
use proptest::prelude::*;
use std::sync::Arc;

const WIDTH: u32 = 12;
const HEIGHT: u32 = 10;
const MAX_DENSITY: f32 = 2000.0;

#[derive(Debug, Clone)]
enum HostAction {
    Inject { x: i32, y: i32, density: f32 },
    Register { x: i32, y: i32, density: f32 },
    Deregister { x: i32, y: i32 },
    Move { x: i32, y: i32, to_x: i32, to_y: i32 },
}

fn coord() -> impl Strategy<Value = (i32, i32)> {
    (0..WIDTH as i32, 0..HEIGHT as i32)
}

fn host_action() -> impl Strategy<Value = HostAction> {
    prop_oneof![
        4 => (coord(), 0.0f32..3000.0).prop_map(|((x, y), density)| HostAction::Inject { x, y, density }),
        2 => (coord(), 0.0f32..800.0).prop_map(|((x, y), density)| HostAction::Register { x, y, density }),
        1 => coord().prop_map(|(x, y)| HostAction::Deregister { x, y }),
        1 => (coord(), coord()).prop_map(|((x, y), (to_x, to_y))| HostAction::Move { x, y, to_x, to_y }),
    ]
}

fn build_map(walls: &[(i32, i32)], roofed: &[(i32, i32)]) -> CellMap {
    let mut map = CellMap::new(GridIndex::new(WIDTH, HEIGHT));
    for &(x, y) in walls {
        map.set_filled(CellPos::new(x, y), true);
    }
    for &(x, y) in roofed {
        map.set_roofed(CellPos::new(x, y), true);
    }
    map
}

fn substance(storage: StorageKind, grace_ticks: u32) -> SubstanceDef {
    SubstanceDef {
        wind_sensitive: true,
        grace_ticks,
        storage,
        ..SubstanceDef::new("smoke", MAX_DENSITY)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn bounds_and_partition_hold_every_tick(
        walls in prop::collection::vec(coord(), 0..30),
        roofed in prop::collection::vec(coord(), 0..40),
        actions in prop::collection::vec((0u64..90, host_action()), 1..40),
        heading in 0.0f32..360.0,
        strength in 0.0f32..12.0,
        sparse in any::<bool>(),
        grace_ticks in 0u32..3,
    ) {
        let map = build_map(&walls, &roofed);
        let storage = if sparse { StorageKind::Sparse } else { StorageKind::Dense };
        let mut engine = DiffusionEngine::new(
            Arc::new(substance(storage, grace_ticks)),
            map.index(),
            SimConfig::default(),
        )
        .unwrap();
        let wind = UniformWind::from_heading(heading, strength);
        let mut sink = NullEffects;

        for tick in 0..120u64 {
            for (_, action) in actions.iter().filter(|(at, _)| *at == tick) {
                match *action {
                    HostAction::Inject { x, y, density } => {
                        engine.inject(CellPos::new(x, y), density, tick, &map).unwrap();
                    }
                    HostAction::Register { x, y, density } => {
                        if engine.particle_at(CellPos::new(x, y)).is_none() {
                            engine.register(CellPos::new(x, y), density);
                        }
                    }
                    HostAction::Deregister { x, y } => engine.deregister(CellPos::new(x, y)),
                    HostAction::Move { x, y, to_x, to_y } => {
                        engine.notify_position_changed(CellPos::new(x, y), CellPos::new(to_x, to_y));
                    }
                }
            }

            let mut ctx = TickContext { tick, cells: &map, wind: &wind, effects: &mut sink };
            // Registrations may collide with particles created by diffusion;
            // that is reported, not repaired, and must leave the engine consistent
            let _ = engine.tick(&mut ctx);

            prop_assert!(engine.check_invariants().is_ok(), "{:?}", engine.check_invariants());
            for particle in engine.particles() {
                prop_assert!((0.0..=MAX_DENSITY).contains(&particle.density));
            }
        }
    }

    #[test]
    fn diffusion_never_creates_mass(
        walls in prop::collection::vec(coord(), 0..30),
        seeds in prop::collection::vec((coord(), 10.0f32..1500.0), 1..6),
        heading in 0.0f32..360.0,
        strength in 0.0f32..12.0,
    ) {
        let map = build_map(&walls, &[]);
        let def = SubstanceDef {
            decay_rate_roofed: 0.0,
            decay_rate_unroofed: 0.0,
            expiry_density: 0.0,
            ..substance(StorageKind::Dense, 0)
        };
        let mut engine = DiffusionEngine::new(Arc::new(def), map.index(), SimConfig::default()).unwrap();
        for &((x, y), density) in &seeds {
            engine.inject(CellPos::new(x, y), density, 0, &map).unwrap();
        }
        let mut total = engine.total_density();
        let wind = UniformWind::from_heading(heading, strength);
        let mut sink = NullEffects;

        for tick in 0..90u64 {
            let mut ctx = TickContext { tick, cells: &map, wind: &wind, effects: &mut sink };
            engine.tick(&mut ctx).unwrap();
            let now = engine.total_density();
            prop_assert!(now <= total + total * 1e-4 + 1e-3, "tick {}: {} grew from {}", tick, now, total);
            total = now;
        }
    }
}
