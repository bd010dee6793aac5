//! Server-owned world: the tiger table and the static decorations.
//!
//! Both sets are created once when the server starts. Tigers are mutated by
//! the simulation tick; trees never change.

use crate::physics::{nearest, Vector2};
use crate::tiger::{Tiger, TigerEvent, RETARGET_INTERVAL};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use shared::{Packet, TreePlacement, TreeSpawn, MAX_TREES_PER_PACKET};
use std::collections::BTreeMap;

/// Centre of the spawn area; tigers start on a grid from here and trees
/// surround it.
pub const WORLD_ORIGIN: Vector2 = Vector2::new(500.0, 500.0);
pub const TIGER_GRID_SIZE: usize = 4;
pub const TIGER_GRID_SPACING: f32 = 100.0;
pub const TREE_MIN_DISTANCE: f32 = 30.0;
pub const TREE_MAX_DISTANCE: f32 = 200.0;

/// Earliest and latest first wander retarget, in seconds after start.
const FIRST_RETARGET_RANGE: (f32, f32) = (0.5, 2.5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tree {
    pub id: i32,
    pub position: Vector2,
    pub height: f32,
    pub rot_y: f32,
    pub tree_type: i32,
}

impl Tree {
    pub fn placement(&self) -> TreePlacement {
        TreePlacement {
            x: self.position.x,
            y: self.height,
            z: self.position.z,
            rot_y: self.rot_y,
            tree_type: self.tree_type,
        }
    }
}

pub struct World {
    tigers: BTreeMap<i32, Tiger>,
    trees: Vec<Tree>,
    tick: u64,
    rng: StdRng,
}

impl World {
    /// An empty world. Use [`World::seeded`] for the startup layout.
    pub fn new(rng: StdRng) -> Self {
        Self {
            tigers: BTreeMap::new(),
            trees: Vec::new(),
            tick: 0,
            rng,
        }
    }

    /// A world with the 4x4 tiger grid and `tree_count` randomly placed trees.
    pub fn seeded(tree_count: usize, rng: StdRng) -> Self {
        let mut world = Self::new(rng);
        world.seed_tigers();
        world.seed_trees(tree_count);
        info!(
            "World seeded with {} tigers and {} trees",
            world.tigers.len(),
            world.trees.len()
        );
        world
    }

    fn seed_tigers(&mut self) {
        for row in 0..TIGER_GRID_SIZE {
            for col in 0..TIGER_GRID_SIZE {
                let id = self.tigers.len() as i32 + 1;
                let position = WORLD_ORIGIN.add(&Vector2::new(
                    TIGER_GRID_SPACING * col as f32,
                    TIGER_GRID_SPACING * row as f32,
                ));

                let mut tiger = Tiger::new(id, position);
                tiger.rot_y = self.rng.gen_range(0.0..360.0);
                // Stagger the first retarget so the herd does not move in lockstep.
                let first = self
                    .rng
                    .gen_range(FIRST_RETARGET_RANGE.0..FIRST_RETARGET_RANGE.1);
                tiger.search_timer = RETARGET_INTERVAL - first;
                tiger.retarget(&mut self.rng);

                debug!(
                    "Created tiger {} at ({}, {})",
                    id, position.x, position.z
                );
                self.tigers.insert(id, tiger);
            }
        }
    }

    fn seed_trees(&mut self, count: usize) {
        for i in 0..count {
            let angle = self.rng.gen_range(0.0..360.0);
            let distance = self.rng.gen_range(TREE_MIN_DISTANCE..TREE_MAX_DISTANCE);
            self.trees.push(Tree {
                id: i as i32 + 1,
                position: WORLD_ORIGIN.add(&Vector2::from_polar(angle, distance)),
                height: 0.0,
                rot_y: self.rng.gen_range(0.0..360.0),
                tree_type: 0,
            });
        }
    }

    pub fn add_tiger(&mut self, tiger: Tiger) {
        self.tigers.insert(tiger.id, tiger);
    }

    pub fn tiger(&self, id: i32) -> Option<&Tiger> {
        self.tigers.get(&id)
    }

    pub fn tigers(&self) -> impl Iterator<Item = &Tiger> {
        self.tigers.values()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advances every tiger by `dt` against the given player positions.
    pub fn step(&mut self, players: &[Vector2], dt: f32) -> Vec<TigerEvent> {
        self.tick += 1;
        let rng = &mut self.rng;
        self.tigers
            .values_mut()
            .filter_map(|tiger| {
                let target = nearest(&tiger.position, players);
                tiger.update(target, dt, &mut *rng)
            })
            .collect()
    }

    pub fn tiger_spawn_packets(&self) -> Vec<Packet> {
        self.tigers
            .values()
            .map(|t| Packet::TigerSpawn(t.spawn_packet()))
            .collect()
    }

    pub fn tiger_update_packets(&self) -> Vec<Packet> {
        self.tigers
            .values()
            .map(|t| Packet::TigerUpdate(t.update_packet()))
            .collect()
    }

    /// All trees, packed [`MAX_TREES_PER_PACKET`] per packet. An empty world
    /// still yields one packet with a zero count.
    pub fn tree_spawn_packets(&self) -> Vec<Packet> {
        let placements: Vec<TreePlacement> = self.trees.iter().map(Tree::placement).collect();
        if placements.is_empty() {
            return vec![Packet::TreeSpawn(TreeSpawn::default())];
        }
        placements
            .chunks(MAX_TREES_PER_PACKET)
            .map(|chunk| Packet::TreeSpawn(TreeSpawn::from_placements(chunk)))
            .collect()
    }
}
