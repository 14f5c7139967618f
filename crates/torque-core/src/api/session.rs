use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::api::config::SessionConfig;
use crate::api::types::{BodyId, ChunkCoord, ConnectionId};
use crate::bus::event::{CoreEvent, HostEvent, SpawnRequest};
use crate::bus::queue::EventBus;
use crate::collision::world::VoxelWorld;
use crate::core::registry::{BodyFlags, BodyRegistry, RigidBody};
use crate::core::time::FixedTimestep;
use crate::core::view::{SharedView, ViewFrame};
use crate::error::{DesyncReason, TorqueError};
use crate::physics::integrator::{recheck_deferred, Integrator};
use crate::sync::client::{ClientSync, Received};
use crate::sync::codec::SyncMessage;
use crate::sync::outbox::{Outbox, Packet};
use crate::sync::server::{InterestFilter, ServerSync};

/// Which side of the protocol this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Server,
    /// Mirrors the server reachable through `server`.
    Client { server: ConnectionId },
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub faults: Vec<TorqueError>,
    pub residual_penetration: f32,
    /// Snapshots handed to the outbox (server only).
    pub snapshots: usize,
    pub contacts: usize,
}

enum SyncRole {
    Server(ServerSync),
    Client(ClientSync),
}

/// One simulated world: registry, integrator, sync state, buses and view.
///
/// Owned by a single tick thread. Other threads talk to it through the
/// `input()` bus and read results from `output()` and `view()`.
pub struct WorldSession {
    world: Arc<dyn VoxelWorld>,
    registry: BodyRegistry,
    integrator: Integrator,
    sync: SyncRole,
    input: EventBus<HostEvent>,
    output: EventBus<CoreEvent>,
    view: SharedView,
    outbox: Outbox,
    /// Receiving end of the built-in bounded outbox; `None` once a sender
    /// thread owns delivery.
    packets: Option<Receiver<Packet>>,
    timestep: FixedTimestep,
    tick: u64,
    degraded: bool,
    seen_input_drops: u64,
    seen_output_drops: u64,
}

impl WorldSession {
    pub fn new(config: SessionConfig, world: Arc<dyn VoxelWorld>, role: SessionRole) -> Self {
        let sync = match role {
            SessionRole::Server => SyncRole::Server(ServerSync::new(config.max_records)),
            SessionRole::Client { server } => {
                SyncRole::Client(ClientSync::new(server, config.reconcile))
            }
        };
        let (outbox, packets) = Outbox::bounded(config.outbox_capacity);
        let timestep = FixedTimestep::new(config.integrator.dt)
            .with_max_steps(config.max_steps_per_frame);
        log::info!(
            "world session started as {:?}, dt {:.4}s",
            role,
            config.integrator.dt
        );
        Self {
            world,
            registry: BodyRegistry::new(),
            integrator: Integrator::new(config.integrator),
            sync,
            input: EventBus::new(config.bus_capacity),
            output: EventBus::new(config.bus_capacity),
            view: SharedView::new(),
            outbox,
            packets: Some(packets),
            timestep,
            tick: 0,
            degraded: false,
            seen_input_drops: 0,
            seen_output_drops: 0,
        }
    }

    /// Deliver outbound bytes through `outbox` (usually from `spawn_sender`)
    /// instead of the built-in channel.
    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = outbox;
        self.packets = None;
        self
    }

    /// Limit which bodies each connection sees. Servers only.
    pub fn with_filter(mut self, filter: impl InterestFilter + 'static) -> Self {
        self.sync = match self.sync {
            SyncRole::Server(server) => SyncRole::Server(server.with_filter(filter)),
            client => {
                log::warn!("interest filter ignored on a client session");
                client
            }
        };
        self
    }

    /// Host → core bus. Clone freely; post from any thread.
    pub fn input(&self) -> EventBus<HostEvent> {
        self.input.clone()
    }

    /// Core → host bus.
    pub fn output(&self) -> EventBus<CoreEvent> {
        self.output.clone()
    }

    pub fn view(&self) -> SharedView {
        self.view.clone()
    }

    /// Outbound packets, when no sender thread was attached with `with_outbox`.
    /// Holds at most `outbox_capacity` packets; older ones are dropped if the
    /// host does not drain it.
    pub fn packets(&self) -> Option<Receiver<Packet>> {
        self.packets.clone()
    }

    pub fn registry(&self) -> &BodyRegistry {
        &self.registry
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_server(&self) -> bool {
        matches!(self.sync, SyncRole::Server(_))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn connect(&mut self, connection: ConnectionId) {
        match &mut self.sync {
            SyncRole::Server(server) => server.connect(connection),
            SyncRole::Client(_) => log::warn!("client session cannot accept {}", connection),
        }
    }

    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        match &mut self.sync {
            SyncRole::Server(server) => server.disconnect(connection),
            SyncRole::Client(_) => false,
        }
    }

    /// Queue bytes from a peer for the next tick.
    pub fn receive(&self, connection: ConnectionId, bytes: Vec<u8>) -> Result<(), TorqueError> {
        self.input
            .post(HostEvent::Inbound { connection, bytes })
            .map_err(|rejected| rejected.error)
    }

    /// Run however many ticks `frame_dt` seconds of host time cover.
    pub fn advance(&mut self, frame_dt: f32) -> Vec<TickReport> {
        let steps = self.timestep.accumulate(frame_dt);
        (0..steps).map(|_| self.tick()).collect()
    }

    /// Run one fixed tick.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };
        let mut events = Vec::new();

        // ---- host events, in arrival order ----
        for event in self.input.drain() {
            self.apply_host_event(event, &mut events, &mut report.faults);
        }

        // ---- simulation ----
        let step = self.integrator.step(&mut self.registry, self.world.as_ref());
        report.residual_penetration = step.residual_penetration;
        report.contacts = step.contacts.len();
        match (step.world_error, self.degraded) {
            (Some(err), degraded) => {
                if !degraded {
                    log::error!("world collaborator failing: {}", err);
                    events.push(CoreEvent::SimulationDegraded {
                        reason: err.to_string(),
                    });
                }
                self.degraded = true;
                report.faults.push(TorqueError::WorldUnavailable(err));
            }
            (None, true) => {
                log::info!("world collaborator recovered");
                self.degraded = false;
                events.push(CoreEvent::SimulationRecovered);
            }
            (None, false) => {}
        }
        report.faults.extend(step.faults);
        for id in step.moved {
            if let Some(body) = self.registry.body(id) {
                events.push(CoreEvent::BodyUpdated {
                    id,
                    pose: body.pose(),
                    linear_velocity: body.linear_velocity(),
                });
            }
        }
        events.extend(step.slept.into_iter().map(|id| CoreEvent::BodySlept { id }));

        // ---- synchronization ----
        let dt = self.integrator.config().dt;
        match &mut self.sync {
            SyncRole::Server(server) => {
                for (connection, snapshot) in server.build(&self.registry) {
                    match SyncMessage::Snapshot(snapshot).encode() {
                        Ok(bytes) => {
                            if self.outbox.send(connection, bytes) {
                                report.snapshots += 1;
                            } else {
                                log::warn!("outbox closed, snapshot for {} dropped", connection);
                            }
                        }
                        Err(err) => log::error!("snapshot for {} not encoded: {}", connection, err),
                    }
                }
            }
            SyncRole::Client(client) => client.advance(dt, &mut self.registry),
        }

        self.publish();
        self.emit(events, &mut report.faults);

        for fault in &report.faults {
            log::warn!("tick {}: {}", self.tick, fault);
        }
        report
    }

    /// Tear the world down. Every remaining body is reported destroyed.
    /// Returns how many bodies were alive.
    pub fn shutdown(mut self) -> usize {
        let ids = self.registry.ids();
        let count = ids.len();
        let mut events = Vec::with_capacity(count);
        for id in ids {
            if self.registry.destroy(id).is_ok() {
                events.push(CoreEvent::BodyDestroyed { id });
            }
        }
        let mut faults = Vec::new();
        self.emit(events, &mut faults);
        for fault in faults {
            log::warn!("shutdown: {}", fault);
        }
        self.publish();
        log::info!("world session shut down after {} tick(s), {} body(ies)", self.tick, count);
        count
    }

    // ---- event application ----

    fn apply_host_event(
        &mut self,
        event: HostEvent,
        events: &mut Vec<CoreEvent>,
        faults: &mut Vec<TorqueError>,
    ) {
        match event {
            HostEvent::Spawn(request) => match self.spawn(request) {
                Ok(event) => events.push(event),
                Err(err) => faults.push(err),
            },
            HostEvent::Destroy { id } => match self.registry.destroy(id) {
                Ok(_) => events.push(CoreEvent::BodyDestroyed { id }),
                Err(err) => faults.push(err),
            },
            HostEvent::ApplyForce { id, force, point } => {
                self.push_body(id, faults, |body| match point {
                    Some(point) => body.add_force_at(force, point),
                    None => body.add_force(force),
                });
            }
            HostEvent::ApplyImpulse { id, impulse, point } => {
                self.push_body(id, faults, |body| body.apply_impulse(impulse, point));
            }
            HostEvent::DriverInput { id, input } => {
                if input.is_idle() {
                    match self.registry.body_mut(id) {
                        Ok(body) => body.driver = input,
                        Err(err) => faults.push(err),
                    }
                } else {
                    self.push_body(id, faults, |body| body.driver = input);
                }
            }
            HostEvent::SetKinematicPose { id, pose } => match self.registry.body_mut(id) {
                Ok(body) if !pose.is_finite() => {
                    log::warn!("{} given a non-finite kinematic pose, ignored", id);
                    faults.push(TorqueError::NonFiniteState(body.id()));
                }
                Ok(body) if body.is_kinematic() => {
                    body.pose = pose;
                    body.last_good = pose;
                }
                Ok(body) => {
                    log::warn!("{} is not kinematic, pose change ignored", id);
                    faults.push(TorqueError::NotKinematic(body.id()));
                }
                Err(err) => faults.push(err),
            },
            HostEvent::ChunkLoaded(chunk) => {
                let woken = recheck_deferred(&mut self.registry, chunk);
                if !woken.is_empty() {
                    log::debug!("{} loaded, re-checking {} body(ies)", chunk, woken.len());
                }
            }
            HostEvent::ChunkUnloaded(chunk) => {
                for id in self.bodies_in(chunk) {
                    if self.registry.destroy(id).is_ok() {
                        log::debug!("{} left with unloaded {}", id, chunk);
                        events.push(CoreEvent::BodyDestroyed { id });
                    }
                }
            }
            HostEvent::Inbound { connection, bytes } => {
                self.apply_inbound(connection, &bytes, events, faults)
            }
        }
    }

    fn spawn(&mut self, request: SpawnRequest) -> Result<CoreEvent, TorqueError> {
        let SpawnRequest {
            id,
            tag,
            shape,
            pose,
            mass,
            material,
            kinematic,
            wheels,
            orientation_lock,
        } = request;
        let mirrored = id.is_some() && matches!(self.sync, SyncRole::Client(_));
        let id = match id {
            Some(id) => self.registry.spawn_with_id(id, shape, pose, mass)?,
            None => self.registry.spawn(shape, pose, mass)?,
        };
        let body = self.registry.body_mut(id)?;
        body.material = material;
        body.wheels = wheels;
        if kinematic {
            body.flags.set(BodyFlags::KINEMATIC, true);
        }
        body.flags.set(BodyFlags::ORIENTATION_LOCK, orientation_lock);
        body.flags.set(BodyFlags::SERVER_AUTHORITATIVE, mirrored);
        Ok(CoreEvent::BodySpawned {
            id,
            tag,
            pose: body.pose(),
        })
    }

    /// Host push: wakes the body and marks it as externally driven this tick.
    fn push_body(
        &mut self,
        id: BodyId,
        faults: &mut Vec<TorqueError>,
        f: impl FnOnce(&mut RigidBody),
    ) {
        match self.registry.body_mut(id) {
            Ok(body) => {
                body.wake();
                body.pushed = true;
                f(body);
            }
            Err(err) => faults.push(err),
        }
    }

    fn bodies_in(&self, chunk: ChunkCoord) -> Vec<BodyId> {
        self.registry
            .iter()
            .filter(|b| ChunkCoord::of_point(b.pose().position) == chunk)
            .map(|b| b.id())
            .collect()
    }

    fn apply_inbound(
        &mut self,
        connection: ConnectionId,
        bytes: &[u8],
        events: &mut Vec<CoreEvent>,
        faults: &mut Vec<TorqueError>,
    ) {
        match &mut self.sync {
            SyncRole::Server(server) => match SyncMessage::decode(bytes) {
                Ok(SyncMessage::ResyncRequest { last_applied }) => {
                    if server.resync(connection, last_applied) {
                        events.push(CoreEvent::ResyncRequested { connection });
                    }
                }
                Ok(SyncMessage::Snapshot(_)) => {
                    log::warn!("server ignored a snapshot from {}", connection);
                }
                Err(err) => faults.push(TorqueError::ProtocolDesync {
                    connection,
                    reason: DesyncReason::Malformed(err),
                }),
            },
            SyncRole::Client(client) => {
                if connection != client.server() {
                    log::warn!("client ignored bytes from {}", connection);
                    return;
                }
                match client.receive(bytes, &mut self.registry) {
                    Received::Applied(applied) => {
                        events.extend(
                            applied
                                .removed
                                .into_iter()
                                .map(|id| CoreEvent::BodyDestroyed { id }),
                        );
                    }
                    Received::Desync { error, resync } => {
                        faults.push(error);
                        match resync.encode() {
                            Ok(bytes) => {
                                self.outbox.send(connection, bytes);
                            }
                            Err(err) => log::error!("resync request not encoded: {}", err),
                        }
                    }
                    Received::Duplicate(_) | Received::Ignored => {}
                }
            }
        }
    }

    // ---- output ----

    fn publish(&self) {
        self.view.publish(ViewFrame {
            tick: self.tick,
            bodies: self.registry.iter().map(|b| b.view()).collect(),
        });
    }

    fn emit(&mut self, events: Vec<CoreEvent>, faults: &mut Vec<TorqueError>) {
        for event in events {
            if let Err(rejected) = self.output.post(event) {
                faults.push(rejected.error);
            }
        }
        let input_drops = self.input.dropped();
        let output_drops = self.output.dropped();
        if input_drops > self.seen_input_drops || output_drops > self.seen_output_drops {
            faults.push(TorqueError::QueueOverflow {
                dropped: input_drops + output_drops,
            });
        }
        self.seen_input_drops = input_drops;
        self.seen_output_drops = output_drops;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shape::{Material, Shape};
    use crate::collision::world::GridWorld;
    use crate::core::registry::BodyState;
    use crate::math::Pose;
    use crate::physics::forces::DriverInput;
    use crate::physics::vehicle::WheelLayout;
    use glam::{IVec3, Vec3};

    fn server(world: Arc<GridWorld>) -> WorldSession {
        WorldSession::new(SessionConfig::default(), world, SessionRole::Server)
    }

    fn spawn_at(session: &mut WorldSession, position: Vec3) -> BodyId {
        session
            .input()
            .post(HostEvent::Spawn(SpawnRequest::new(
                Shape::cuboid(0.5, 0.5, 0.5),
                Pose::from_position(position),
                100.0,
            )))
            .expect("post");
        session.tick();
        let spawned = session
            .output()
            .drain()
            .into_iter()
            .find_map(|e| match e {
                CoreEvent::BodySpawned { id, .. } => Some(id),
                _ => None,
            });
        spawned.expect("spawned event")
    }

    #[test]
    fn spawn_emits_event_and_publishes_view() {
        let mut session = server(Arc::new(GridWorld::new()));
        let input = session.input();
        input
            .post(HostEvent::Spawn(
                SpawnRequest::new(Shape::sphere(0.5), Pose::from_position(Vec3::Y * 10.0), 50.0)
                    .with_tag(9)
                    .with_material(Material::default().with_restitution(0.3)),
            ))
            .expect("post");
        let report = session.tick();
        assert_eq!(report.tick, 1);
        assert!(report.faults.is_empty(), "faults {:?}", report.faults);

        let events = session.output().drain();
        let (id, tag) = events
            .iter()
            .find_map(|e| match e {
                CoreEvent::BodySpawned { id, tag, .. } => Some((*id, *tag)),
                _ => None,
            })
            .expect("spawned");
        assert_eq!(tag, 9);
        let frame = session.view().latest();
        assert_eq!(frame.tick, 1);
        let body = frame.get(id).expect("body in view");
        assert!(body.pose.position.y < 10.0, "fell during the spawn tick");
        assert!((body.material.restitution - 0.3).abs() < 1e-6);
        assert!(!body.server_authoritative);
    }

    #[test]
    fn host_events_apply_in_arrival_order() {
        let mut session = server(Arc::new(GridWorld::new()));
        let id = spawn_at(&mut session, Vec3::Y * 10.0);
        let input = session.input();
        input.post(HostEvent::Destroy { id }).expect("post");
        input
            .post(HostEvent::ApplyForce {
                id,
                force: Vec3::X,
                point: None,
            })
            .expect("post");
        let report = session.tick();

        assert!(!session.registry().contains(id));
        assert_eq!(
            report.faults,
            vec![TorqueError::InvalidBodyReference(id)],
            "force after destroy should no-op with a fault"
        );
        let events = session.output().drain();
        assert!(events.contains(&CoreEvent::BodyDestroyed { id }));
    }

    #[test]
    fn spawn_then_destroy_in_one_tick_leaves_nothing() {
        let mut client = WorldSession::new(
            SessionConfig::default(),
            Arc::new(GridWorld::new()),
            SessionRole::Client {
                server: ConnectionId(0),
            },
        );
        let input = client.input();
        let id = BodyId(5);
        input
            .post(HostEvent::Spawn(
                SpawnRequest::new(Shape::sphere(0.5), Pose::from_position(Vec3::Y * 10.0), 1.0)
                    .with_id(id),
            ))
            .expect("post");
        input.post(HostEvent::Destroy { id }).expect("post");
        let report = client.tick();

        assert!(report.faults.is_empty(), "faults {:?}", report.faults);
        assert!(!client.registry().contains(id));
        let events = client.output().drain();
        let spawned = events
            .iter()
            .position(|e| matches!(e, CoreEvent::BodySpawned { id: s, .. } if *s == id));
        let destroyed = events
            .iter()
            .position(|e| *e == CoreEvent::BodyDestroyed { id });
        assert!(
            matches!((spawned, destroyed), (Some(s), Some(d)) if s < d),
            "events {:?}",
            events
        );
        assert!(client.view().latest().get(id).is_none());
    }

    #[test]
    fn spawn_request_carries_wheels_and_orientation_lock() {
        let mut session = server(Arc::new(GridWorld::new()));
        session
            .input()
            .post(HostEvent::Spawn(
                SpawnRequest::new(Shape::cuboid(1.0, 0.5, 2.0), Pose::IDENTITY, 1000.0)
                    .with_wheels(WheelLayout::four_wheel(0.9, 0.5, 1.5))
                    .with_orientation_lock(),
            ))
            .expect("post");
        session.tick();
        let id = session.registry().ids()[0];
        let body = session.registry().body(id).expect("body");
        assert_eq!(body.wheels().map(|w| w.wheels().len()), Some(4));
        assert!(body.flags().contains(BodyFlags::ORIENTATION_LOCK));
    }

    #[test]
    fn unknown_body_reference_is_a_fault_not_a_failure() {
        let mut session = server(Arc::new(GridWorld::new()));
        session
            .input()
            .post(HostEvent::ApplyImpulse {
                id: BodyId(99),
                impulse: Vec3::Y,
                point: None,
            })
            .expect("post");
        let report = session.tick();
        assert_eq!(report.faults, vec![TorqueError::InvalidBodyReference(BodyId(99))]);
    }

    #[test]
    fn driver_input_wakes_a_sleeping_body() {
        let world = Arc::new(GridWorld::with_floor(0));
        let mut session = server(Arc::clone(&world));
        let id = spawn_at(&mut session, Vec3::new(0.5, 0.5, 0.5));
        for _ in 0..200 {
            session.tick();
        }
        assert_eq!(session.registry().get(id).unwrap().state, BodyState::Sleeping);

        session
            .input()
            .post(HostEvent::DriverInput {
                id,
                input: DriverInput {
                    forward: true,
                    ..DriverInput::default()
                },
            })
            .expect("post");
        session.tick();
        let body = session.registry().get(id).unwrap();
        assert_eq!(body.state, BodyState::Active);
        assert!(body.linear_velocity.z < 0.0, "drives along -Z, got {:?}", body.linear_velocity);
    }

    #[test]
    fn kinematic_pose_rejects_non_finite() {
        let mut session = server(Arc::new(GridWorld::new()));
        let input = session.input();
        input
            .post(HostEvent::Spawn(
                SpawnRequest::new(Shape::sphere(1.0), Pose::IDENTITY, 1.0).kinematic(),
            ))
            .expect("post");
        session.tick();
        let id = session.registry().ids()[0];

        input
            .post(HostEvent::SetKinematicPose {
                id,
                pose: Pose::from_position(Vec3::new(f32::NAN, 0.0, 0.0)),
            })
            .expect("post");
        let report = session.tick();
        assert_eq!(report.faults, vec![TorqueError::NonFiniteState(id)]);
        assert_eq!(session.registry().get(id).unwrap().pose, Pose::IDENTITY);

        let target = Pose::from_position(Vec3::new(3.0, 4.0, 5.0));
        input
            .post(HostEvent::SetKinematicPose { id, pose: target })
            .expect("post");
        session.tick();
        assert_eq!(session.registry().get(id).unwrap().pose, target);
    }

    #[test]
    fn kinematic_pose_on_dynamic_body_is_not_kinematic_fault() {
        let mut session = server(Arc::new(GridWorld::new()));
        let id = spawn_at(&mut session, Vec3::Y * 10.0);
        let before = session.registry().get(id).unwrap().pose;
        session
            .input()
            .post(HostEvent::SetKinematicPose {
                id,
                pose: Pose::from_position(Vec3::new(3.0, 4.0, 5.0)),
            })
            .expect("post");
        let report = session.tick();
        assert_eq!(report.faults, vec![TorqueError::NotKinematic(id)]);
        let after = session.registry().get(id).unwrap().pose;
        assert!(
            after.position.distance(before.position) < 1.0,
            "pose was not teleported: {:?}",
            after.position
        );
    }

    #[test]
    fn chunk_unload_destroys_bodies_inside() {
        let mut session = server(Arc::new(GridWorld::new()));
        let inside = spawn_at(&mut session, Vec3::new(4.0, 100.0, 4.0));
        let outside = spawn_at(&mut session, Vec3::new(40.0, 100.0, 4.0));
        let chunk = ChunkCoord::of_point(session.registry().get(inside).unwrap().pose.position);
        session.input().post(HostEvent::ChunkUnloaded(chunk)).expect("post");
        session.tick();
        assert!(!session.registry().contains(inside));
        assert!(session.registry().contains(outside));
    }

    #[test]
    fn world_failure_degrades_once_and_recovers() {
        let world = Arc::new(GridWorld::new());
        let mut session = server(Arc::clone(&world));
        let _id = spawn_at(&mut session, Vec3::new(0.5, 2.0, 0.5));
        for y in -4..4 {
            world.fail_cell(IVec3::new(0, y, 0), "storage offline");
        }

        let first = session.tick();
        let second = session.tick();
        assert!(session.is_degraded());
        assert!(first
            .faults
            .iter()
            .any(|f| matches!(f, TorqueError::WorldUnavailable(_))));
        assert!(second
            .faults
            .iter()
            .any(|f| matches!(f, TorqueError::WorldUnavailable(_))));
        let degraded = session
            .output()
            .drain()
            .into_iter()
            .filter(|e| matches!(e, CoreEvent::SimulationDegraded { .. }))
            .count();
        assert_eq!(degraded, 1, "raised once per degraded spell");

        world.clear_failures();
        session.tick();
        assert!(!session.is_degraded());
        assert!(session.output().drain().contains(&CoreEvent::SimulationRecovered));
    }

    #[test]
    fn server_sends_snapshots_to_connections() {
        let mut session = server(Arc::new(GridWorld::new()));
        let packets = session.packets().expect("default channel");
        session.connect(ConnectionId(1));
        spawn_at(&mut session, Vec3::Y * 10.0);
        let packet = packets.try_recv().expect("snapshot sent");
        assert_eq!(packet.connection, ConnectionId(1));
        match SyncMessage::decode(&packet.bytes).expect("decodes") {
            SyncMessage::Snapshot(snapshot) => {
                assert_eq!(snapshot.sequence, 1);
                assert_eq!(snapshot.records.len(), 1);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn undrained_packets_stay_bounded() {
        let config = SessionConfig::default().with_outbox_capacity(64);
        let mut session = WorldSession::new(config, Arc::new(GridWorld::new()), SessionRole::Server);
        session.connect(ConnectionId(1));
        spawn_at(&mut session, Vec3::Y * 10.0);
        let mut sent = 1;
        for _ in 0..499 {
            sent += session.tick().snapshots;
        }
        assert!(sent > 64, "falling body sends every tick, got {}", sent);

        let packets = session.packets().expect("default channel");
        assert_eq!(packets.len(), 64);
        let sequences: Vec<u32> = packets
            .try_iter()
            .map(|p| match SyncMessage::decode(&p.bytes).expect("decodes") {
                SyncMessage::Snapshot(snapshot) => snapshot.sequence,
                other => panic!("expected snapshot, got {:?}", other),
            })
            .collect();
        let newest = *sequences.last().expect("kept packets");
        assert_eq!(newest as usize, sent, "newest packets are kept");
        assert_eq!(sequences[0], newest - 63, "oldest packets are dropped");
    }

    #[test]
    fn non_finite_body_is_reverted_and_not_resent() {
        let mut session = server(Arc::new(GridWorld::with_floor(0)));
        let packets = session.packets().expect("default channel");
        session.connect(ConnectionId(1));
        let id = spawn_at(&mut session, Vec3::new(0.5, 0.5, 0.5));
        for _ in 0..200 {
            session.tick();
        }
        let rest = session.registry().get(id).unwrap().pose;
        while packets.try_recv().is_ok() {}

        session
            .input()
            .post(HostEvent::ApplyImpulse {
                id,
                impulse: Vec3::new(f32::INFINITY, 0.0, 0.0),
                point: None,
            })
            .expect("post");
        let report = session.tick();
        assert!(report.faults.contains(&TorqueError::NonFiniteState(id)));
        let body = session.registry().get(id).unwrap();
        assert_eq!(body.state, BodyState::Sleeping);
        assert_eq!(body.pose, rest);
        assert_eq!(body.linear_velocity, Vec3::ZERO);
        assert!(packets.try_recv().is_err(), "reverted body is unchanged");
    }

    #[test]
    fn malformed_inbound_is_a_desync_fault() {
        let mut session = server(Arc::new(GridWorld::new()));
        session.connect(ConnectionId(2));
        session.receive(ConnectionId(2), vec![1, 2, 3]).expect("queued");
        let report = session.tick();
        assert!(
            report.faults.iter().any(|f| matches!(
                f,
                TorqueError::ProtocolDesync {
                    connection: ConnectionId(2),
                    reason: DesyncReason::Malformed(_)
                }
            )),
            "faults {:?}",
            report.faults
        );
    }

    #[test]
    fn resync_request_clears_baseline() {
        let mut session = server(Arc::new(GridWorld::with_floor(0)));
        let packets = session.packets().expect("default channel");
        session.connect(ConnectionId(1));
        let id = spawn_at(&mut session, Vec3::new(0.5, 0.5, 0.5));
        for _ in 0..200 {
            session.tick();
        }
        while packets.try_recv().is_ok() {}
        session.tick();
        assert!(packets.try_recv().is_err(), "resting body sends nothing");

        let request = SyncMessage::ResyncRequest { last_applied: 3 }.encode().unwrap();
        session.receive(ConnectionId(1), request).expect("queued");
        let report = session.tick();
        assert_eq!(report.snapshots, 1);
        let packet = packets.try_recv().expect("full snapshot");
        match SyncMessage::decode(&packet.bytes).unwrap() {
            SyncMessage::Snapshot(snapshot) => {
                assert_eq!(snapshot.records.len(), 1);
                assert_eq!(snapshot.records[0].id, id);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert!(session
            .output()
            .drain()
            .contains(&CoreEvent::ResyncRequested {
                connection: ConnectionId(1)
            }));
    }

    #[test]
    fn client_sends_resync_after_regression() {
        let server_id = ConnectionId(7);
        let mut client = WorldSession::new(
            SessionConfig::default(),
            Arc::new(GridWorld::new()),
            SessionRole::Client { server: server_id },
        );
        let packets = client.packets().expect("default channel");
        let snapshot = |sequence| {
            SyncMessage::Snapshot(crate::sync::codec::SyncSnapshot {
                sequence,
                records: Vec::new(),
                removed: Vec::new(),
            })
            .encode()
            .unwrap()
        };
        client.receive(server_id, snapshot(5)).unwrap();
        client.tick();
        client.receive(server_id, snapshot(3)).unwrap();
        let report = client.tick();
        assert!(matches!(
            report.faults.as_slice(),
            [TorqueError::ProtocolDesync {
                reason: DesyncReason::SequenceRegression {
                    received: 3,
                    last_applied: 5
                },
                ..
            }]
        ));
        let packet = packets.try_recv().expect("resync request sent");
        assert_eq!(packet.connection, server_id);
        assert_eq!(
            SyncMessage::decode(&packet.bytes).unwrap(),
            SyncMessage::ResyncRequest { last_applied: 5 }
        );
    }

    #[test]
    fn advance_runs_whole_ticks_only() {
        let mut session = server(Arc::new(GridWorld::new()));
        assert!(session.advance(0.02).is_empty());
        let reports = session.advance(0.09);
        assert_eq!(reports.len(), 2, "0.11s at 20 Hz is two ticks");
        assert_eq!(session.tick_count(), 2);
    }

    #[test]
    fn shutdown_reports_every_body() {
        let mut session = server(Arc::new(GridWorld::new()));
        let a = spawn_at(&mut session, Vec3::Y * 10.0);
        let b = spawn_at(&mut session, Vec3::new(5.0, 10.0, 0.0));
        let output = session.output();
        let view = session.view();
        assert_eq!(session.shutdown(), 2);
        let events = output.drain();
        assert!(events.contains(&CoreEvent::BodyDestroyed { id: a }));
        assert!(events.contains(&CoreEvent::BodyDestroyed { id: b }));
        assert!(view.latest().bodies.is_empty());
    }

    #[test]
    fn full_input_bus_rejects_receive_with_backpressure() {
        let config = SessionConfig::default().with_bus_capacity(1);
        let session = WorldSession::new(config, Arc::new(GridWorld::new()), SessionRole::Server);
        session
            .input()
            .post(HostEvent::ChunkLoaded(ChunkCoord::new(0, 0, 0)))
            .expect("post");
        assert_eq!(
            session.receive(ConnectionId(1), vec![0]),
            Err(TorqueError::Backpressure)
        );
    }
}
