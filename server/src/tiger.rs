//! Tiger behaviour.
//!
//! Each tick a tiger looks at the nearest logged-in player and picks one of
//! three behaviours by distance: wander (`Searching`), run at the player
//! (`Chasing`), or stand and attack (`Attacking`).

use crate::physics::Vector2;
use rand::Rng;
use shared::{AnimationName, TigerAnimation, TigerSpawn, TigerUpdate};

pub const CHASE_RADIUS: f32 = 200.0;
pub const ATTACK_RADIUS: f32 = 17.0;
/// Units per second while chasing. Wandering uses [`SEARCH_SPEED_FACTOR`] of it.
pub const BASE_SPEED: f32 = 30.0;
pub const SEARCH_SPEED_FACTOR: f32 = 0.7;
/// Seconds between wander targets.
pub const RETARGET_INTERVAL: f32 = 2.0;
/// Seconds between attack cycles.
pub const ATTACK_COOLDOWN: f32 = 2.0;
/// Seconds into the attack animation at which the hit lands.
pub const ATTACK_FIRE_DELAY: f32 = 0.4;
pub const WANDER_MIN_DISTANCE: f32 = 40.0;
pub const WANDER_MAX_DISTANCE: f32 = 120.0;

const ARRIVAL_EPSILON: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TigerBehavior {
    Searching,
    Chasing,
    Attacking,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TigerEvent {
    /// The attack animation reached its hit frame.
    AttackFired { tiger_id: i32, target: Vector2 },
}

#[derive(Debug, Clone)]
pub struct Tiger {
    pub id: i32,
    pub position: Vector2,
    pub height: f32,
    pub rot_y: f32,
    /// Wander destination.
    pub target: Vector2,
    pub behavior: TigerBehavior,
    pub animation: TigerAnimation,
    /// Seconds since `animation` last changed or restarted.
    pub animation_time: f32,
    /// Seconds since the last attack cycle began.
    pub attack_timer: f32,
    /// Seconds since the wander target was last refreshed.
    pub search_timer: f32,
    /// Seconds into the current attack cycle.
    pub attack_elapsed: f32,
    pub chasing: bool,
    pub attack_fired: bool,
}

impl Tiger {
    pub fn new(id: i32, position: Vector2) -> Self {
        Self {
            id,
            position,
            height: 0.0,
            rot_y: 0.0,
            target: position,
            behavior: TigerBehavior::Searching,
            animation: TigerAnimation::Idle,
            animation_time: 0.0,
            attack_timer: 0.0,
            search_timer: 0.0,
            attack_elapsed: 0.0,
            chasing: false,
            attack_fired: false,
        }
    }

    /// Advances the tiger by `dt` seconds toward or around `nearest_player`.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        nearest_player: Option<Vector2>,
        dt: f32,
        rng: &mut R,
    ) -> Option<TigerEvent> {
        self.animation_time += dt;
        self.attack_timer += dt;
        self.search_timer += dt;
        self.attack_elapsed += dt;

        let player = nearest_player.filter(|p| p.distance(&self.position) < CHASE_RADIUS);
        match player {
            Some(player) if player.distance(&self.position) < ATTACK_RADIUS => {
                self.behavior = TigerBehavior::Attacking;
                self.chasing = true;
                self.attack(player)
            }
            Some(player) => {
                self.behavior = TigerBehavior::Chasing;
                self.chasing = true;
                self.set_animation(TigerAnimation::Run);
                self.move_toward(player, BASE_SPEED, dt);
                None
            }
            None => {
                self.behavior = TigerBehavior::Searching;
                self.chasing = false;
                self.search(dt, rng);
                None
            }
        }
    }

    fn attack(&mut self, player: Vector2) -> Option<TigerEvent> {
        if self.attack_timer >= ATTACK_COOLDOWN {
            self.animation = TigerAnimation::Attack;
            self.animation_time = 0.0;
            self.attack_elapsed = 0.0;
            self.attack_fired = false;
            self.attack_timer = 0.0;
            self.rot_y = player.sub(&self.position).yaw_degrees();
        }

        if self.animation == TigerAnimation::Attack
            && self.attack_elapsed >= ATTACK_FIRE_DELAY
            && !self.attack_fired
        {
            self.attack_fired = true;
            return Some(TigerEvent::AttackFired {
                tiger_id: self.id,
                target: player,
            });
        }
        None
    }

    fn search<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        if self.search_timer > RETARGET_INTERVAL {
            self.search_timer = 0.0;
            self.retarget(rng);
        }

        if self.move_toward(self.target, BASE_SPEED * SEARCH_SPEED_FACTOR, dt) {
            self.set_animation(TigerAnimation::Walk);
        } else {
            self.set_animation(TigerAnimation::Idle);
        }
    }

    /// Picks a new wander target in the annulus around the current position.
    pub fn retarget<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let angle = rng.gen_range(0.0..360.0);
        let distance = rng.gen_range(WANDER_MIN_DISTANCE..=WANDER_MAX_DISTANCE);
        self.target = self.position.add(&Vector2::from_polar(angle, distance));
    }

    /// Steps toward `destination` without overshooting. Returns false if
    /// already there.
    fn move_toward(&mut self, destination: Vector2, speed: f32, dt: f32) -> bool {
        let offset = destination.sub(&self.position);
        let distance = offset.magnitude();
        if distance <= ARRIVAL_EPSILON {
            return false;
        }

        let step = (speed * dt).min(distance);
        self.position = self.position.add(&offset.normalize().scale(step));
        self.rot_y = offset.yaw_degrees();
        true
    }

    fn set_animation(&mut self, animation: TigerAnimation) {
        if self.animation != animation {
            self.animation = animation;
            self.animation_time = 0.0;
        }
    }

    pub fn spawn_packet(&self) -> TigerSpawn {
        TigerSpawn {
            tiger_id: self.id,
            x: self.position.x,
            y: self.height,
            z: self.position.z,
        }
    }

    pub fn update_packet(&self) -> TigerUpdate {
        TigerUpdate {
            tiger_id: self.id,
            x: self.position.x,
            y: self.height,
            z: self.position.z,
            rot_y: self.rot_y,
            animation_file: AnimationName::new(self.animation.file_name()),
            animation_time: self.animation_time,
        }
    }
}
