//! Fixed-tick rigid-body step: forces, semi-implicit Euler, voxel sweep with a
//! single resolution pass, body-body contacts, sleep and the non-finite guard.
//!
//! Terrain contacts push at the point where the body bears on the ground, so
//! an impact can turn a body as well as stop it.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::api::types::{BodyId, ChunkCoord};
use crate::collision::contact::{ContactManifold, ContactTarget};
use crate::collision::query::{QueryConfig, VoxelQuery};
use crate::collision::shape::penetration;
use crate::collision::world::VoxelWorld;
use crate::core::registry::{BodyFlags, BodyRegistry, BodyState, RigidBody};
use crate::core::time::DEFAULT_TICK_DT;
use crate::error::{TorqueError, WorldError};
use crate::math::{Aabb, Pose};
use crate::physics::forces::{self, ForceConfig};
use crate::physics::vehicle;

/// Sweep contacts this close in time of impact to the nearest one touch together.
const TOUCH_TOI: f32 = 0.05;

/// Integrator tuning. Every field has a default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Fixed tick length in seconds.
    pub dt: f32,
    pub forces: ForceConfig,
    pub query: QueryConfig,
    /// Quiet ticks tolerated before a body sleeps.
    pub sleep_ticks: u32,
    pub sleep_linear_epsilon: f32,
    pub sleep_angular_epsilon: f32,
    /// Fraction of the contact depth removed per tick.
    pub correction_bias: f32,
    /// Residual penetration above this is logged.
    pub penetration_tolerance: f32,
    pub body_contacts: bool,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_TICK_DT,
            forces: ForceConfig::default(),
            query: QueryConfig::default(),
            sleep_ticks: 60,
            sleep_linear_epsilon: 0.01,
            sleep_angular_epsilon: 0.01,
            correction_bias: 0.2,
            penetration_tolerance: 0.05,
            body_contacts: true,
        }
    }
}

/// What happened during one step.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub contacts: Vec<ContactManifold>,
    /// Largest overlap left after resolution, over all bodies.
    pub residual_penetration: f32,
    pub faults: Vec<TorqueError>,
    pub slept: Vec<BodyId>,
    /// Bodies that integrated this tick.
    pub moved: Vec<BodyId>,
    /// First world collaborator failure seen this tick.
    pub world_error: Option<WorldError>,
}

pub struct Integrator {
    config: IntegratorConfig,
}

impl Integrator {
    pub fn new(config: IntegratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Advance every awake, non-kinematic body by one tick.
    pub fn step(&self, registry: &mut BodyRegistry, world: &dyn VoxelWorld) -> StepReport {
        let mut report = StepReport::default();
        let query = VoxelQuery::new(world).with_config(self.config.query);

        for body in registry.iter_mut() {
            if body.state() != BodyState::Active {
                body.clear_accumulators();
                continue;
            }
            body.last_good = body.pose;
            forces::accumulate(body, &self.config.forces, world);
            self.integrate(body);
            self.collide(body, &query, &mut report);
            if body.flags.contains(BodyFlags::ORIENTATION_LOCK) {
                vehicle::lock_orientation(body, self.config.forces.orientation_lock_smoothing);
            }
            report.moved.push(body.id);
        }

        if self.config.body_contacts {
            self.resolve_bodies(registry, &mut report);
        }

        for body in registry.iter_mut() {
            if body.state() != BodyState::Active {
                continue;
            }
            if !is_finite_state(body) {
                revert(body);
                report.faults.push(TorqueError::NonFiniteState(body.id));
                report.moved.retain(|id| *id != body.id);
                continue;
            }
            if self.update_sleep(body) {
                report.slept.push(body.id);
            }
            body.clear_accumulators();
        }

        if report.residual_penetration > self.config.penetration_tolerance {
            log::debug!(
                "residual penetration {:.4} above tolerance {:.4}",
                report.residual_penetration,
                self.config.penetration_tolerance
            );
        }
        report
    }

    /// Semi-implicit Euler: velocities from forces, then pose from velocities.
    fn integrate(&self, body: &mut RigidBody) {
        let dt = self.config.dt;
        body.linear_velocity += body.force * body.inverse_mass * dt;
        body.angular_velocity += body.inverse_inertia_world() * body.torque * dt;
        body.angular_velocity = self.config.forces.damp_angular(body.angular_velocity);

        body.pose.position += body.linear_velocity * dt;
        let spin = Quat::from_scaled_axis(body.angular_velocity * dt);
        body.pose.orientation = (spin * body.pose.orientation).normalize();
    }

    /// Sweep from the pre-tick pose and resolve the nearest contact once.
    fn collide(&self, body: &mut RigidBody, query: &VoxelQuery<'_>, report: &mut StepReport) {
        let from = body.last_good;
        let to = body.pose;
        if !to.is_finite() {
            return;
        }

        let sweep = query.sweep_shape(body.id, &body.shape, &from, &to);
        if report.world_error.is_none() {
            report.world_error = sweep.world_error.clone();
        }
        body.deferred_chunks = sweep.unloaded_chunks.clone();

        let Some(hit) = sweep.nearest().copied() else {
            return;
        };

        // Move to the impact pose, keep the tangential part of the remaining motion.
        let impact = from.lerp(&to, hit.toi);
        let remaining = to.position - impact.position;
        let inward = remaining.dot(hit.normal).min(0.0);
        let slide = remaining - hit.normal * inward;
        let correction = hit.normal * (self.config.correction_bias * hit.depth);
        body.pose = Pose::new(impact.position + slide + correction, to.orientation);

        let point = bearing_point(body, &sweep.contacts, &hit);
        terrain_impulse(body, hit.normal, point);

        let residual = query.overlaps(body.id, &body.shape, &body.pose).max_depth();
        report.residual_penetration = report.residual_penetration.max(residual);
        report.contacts.extend(sweep.contacts);
    }

    /// Pairwise contacts between bodies. One impulse and one positional
    /// correction per overlapping pair.
    fn resolve_bodies(&self, registry: &mut BodyRegistry, report: &mut StepReport) {
        let boxes: Vec<(usize, Aabb)> = registry
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.shape.world_aabb(&b.pose)))
            .filter(|(_, aabb)| aabb.is_finite())
            .collect();
        let mut order = boxes;
        order.sort_by(|a, b| a.1.min.x.total_cmp(&b.1.min.x));

        let mut pairs = Vec::new();
        for (n, (i, a)) in order.iter().enumerate() {
            for (j, b) in &order[n + 1..] {
                if b.min.x >= a.max.x {
                    break;
                }
                if a.intersects(b) {
                    pairs.push((*i, *j));
                }
            }
        }

        for (i, j) in pairs {
            let (a, b) = registry.pair_mut(i, j);
            let a_awake = a.state() == BodyState::Active;
            let b_awake = b.state() == BodyState::Active;
            if !a_awake && !b_awake {
                continue;
            }
            let Some(contact) = body_contact(a, b) else {
                continue;
            };
            self.resolve_pair(a, b, &contact);
            report.residual_penetration = report.residual_penetration.max(contact.depth * (1.0 - self.config.correction_bias));
            report.contacts.push(contact);
        }
    }

    fn resolve_pair(&self, a: &mut RigidBody, b: &mut RigidBody, contact: &ContactManifold) {
        let n = contact.normal;
        let approach = (a.linear_velocity - b.linear_velocity).dot(n);

        // A sleeper wakes only when the other body is moving into it.
        if approach < -self.config.sleep_linear_epsilon {
            let (a_state, b_state) = (a.state(), b.state());
            if a_state == BodyState::Sleeping && b_state != BodyState::Sleeping {
                a.wake();
            }
            if b_state == BodyState::Sleeping && a_state != BodyState::Sleeping {
                b.wake();
            }
        }

        let inv_a = effective_inverse_mass(a);
        let inv_b = effective_inverse_mass(b);
        let total = inv_a + inv_b;
        if total <= 0.0 {
            return;
        }

        if approach < 0.0 {
            let e = a.material.restitution.min(b.material.restitution);
            let j = -(1.0 + e) * approach / total;
            a.linear_velocity += n * (j * inv_a);
            b.linear_velocity -= n * (j * inv_b);
        }
        let push = self.config.correction_bias * contact.depth / total;
        a.pose.position += n * (push * inv_a);
        b.pose.position -= n * (push * inv_b);
    }

    /// Returns true when the body fell asleep this tick.
    fn update_sleep(&self, body: &mut RigidBody) -> bool {
        let quiet = body.linear_velocity.length() < self.config.sleep_linear_epsilon
            && body.angular_velocity.length() < self.config.sleep_angular_epsilon
            && !body.pushed;
        if !quiet {
            body.sleep_counter = 0;
            return false;
        }
        body.sleep_counter += 1;
        if body.sleep_counter > self.config.sleep_ticks {
            body.sleep();
            log::debug!("{} asleep after {} quiet ticks", body.id, body.sleep_counter - 1);
            return true;
        }
        false
    }
}

/// Wake bodies whose last sweep was cut short by `chunk` being unloaded.
pub fn recheck_deferred(registry: &mut BodyRegistry, chunk: ChunkCoord) -> Vec<BodyId> {
    let mut woken = Vec::new();
    for body in registry.iter_mut() {
        if let Some(pos) = body.deferred_chunks.iter().position(|c| *c == chunk) {
            body.deferred_chunks.swap_remove(pos);
            if body.is_sleeping() {
                body.wake();
            }
            woken.push(body.id);
        }
    }
    woken
}

/// Where the body bears on the terrain it hit: its contact feature, kept
/// inside the cells touched at the same moment.
fn bearing_point(body: &RigidBody, contacts: &[ContactManifold], hit: &ContactManifold) -> Vec3 {
    let point = body.shape.contact_point(&body.pose, -hit.normal);
    contacts
        .iter()
        .filter(|c| c.toi <= hit.toi + TOUCH_TOI)
        .filter_map(|c| match c.target {
            ContactTarget::World(cell) => Some(Aabb::of_cell(cell)),
            ContactTarget::Body(_) => None,
        })
        .reduce(|a, b| a.union(&b))
        .map_or(point, |area| point.clamp(area.min, area.max))
}

/// One impulse against static terrain at `point`: restitution along the
/// normal, then Coulomb friction against the sliding direction. Both act
/// through the world inverse inertia, so off-centre hits spin the body.
fn terrain_impulse(body: &mut RigidBody, normal: Vec3, point: Vec3) {
    let r = point - body.pose.position;
    let approach = point_velocity(body, r).dot(normal);
    if approach >= 0.0 {
        return;
    }
    let k_normal = impulse_response(body, r, normal);
    if k_normal <= 0.0 {
        return;
    }
    let j = -(1.0 + body.material.restitution) * approach / k_normal;
    body.apply_impulse(normal * j, Some(point));

    let v = point_velocity(body, r);
    let tangent = v - normal * v.dot(normal);
    let slip = tangent.length();
    if slip <= 1e-6 {
        return;
    }
    let t = tangent / slip;
    let k_tangent = impulse_response(body, r, t);
    if k_tangent > 0.0 {
        let jt = (slip / k_tangent).min(body.material.friction * j);
        body.apply_impulse(-t * jt, Some(point));
    }
}

/// Velocity change along `axis` at offset `r` per unit impulse along `axis`.
fn impulse_response(body: &RigidBody, r: Vec3, axis: Vec3) -> f32 {
    let angular = (body.inverse_inertia_world() * r.cross(axis)).cross(r);
    body.inverse_mass + axis.dot(angular)
}

/// Velocity of the body point at offset `r` from the centre of mass.
fn point_velocity(body: &RigidBody, r: Vec3) -> Vec3 {
    body.linear_velocity + body.angular_velocity.cross(r)
}

/// Sleeping and kinematic bodies do not move in response to contacts.
fn effective_inverse_mass(body: &RigidBody) -> f32 {
    match body.state() {
        BodyState::Active => body.inverse_mass,
        BodyState::Sleeping | BodyState::Kinematic => 0.0,
    }
}

/// Deepest overlap between two bodies' convex pieces. Normal points from `b` to `a`.
fn body_contact(a: &RigidBody, b: &RigidBody) -> Option<ContactManifold> {
    let mut pa = Vec::new();
    let mut pb = Vec::new();
    a.shape.pieces(&a.pose, &mut pa);
    b.shape.pieces(&b.pose, &mut pb);
    pa.iter()
        .flat_map(|x| pb.iter().filter_map(move |y| penetration(x, y)))
        .max_by(|x, y| x.depth.total_cmp(&y.depth))
        .map(|hit| ContactManifold {
            body: a.id,
            target: ContactTarget::Body(b.id),
            point: hit.point,
            normal: hit.normal,
            depth: hit.depth,
            toi: 1.0,
        })
}

fn is_finite_state(body: &RigidBody) -> bool {
    body.pose.is_finite() && body.linear_velocity.is_finite() && body.angular_velocity.is_finite()
}

fn revert(body: &mut RigidBody) {
    log::warn!("{} produced a non-finite state, reverted to its pre-tick pose", body.id);
    body.pose = body.last_good;
    body.sleep();
    body.sleep_counter = 0;
    body.clear_accumulators();
}
