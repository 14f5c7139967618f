use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use glam::Vec3;
use torque_core::{
    spawn_sender, BodyId, ConnectionId, CoreEvent, DriverInput, EventBus, GridWorld, HostEvent,
    Packet, Pose, SenderHandle, SessionConfig, SessionRole, Shape, SpawnRequest, TickReport,
    TorqueError, Transport, VoxelWorld, WheelLayout, WorldSession,
};

/// How the client knows the server.
pub const SERVER_CONNECTION: ConnectionId = ConnectionId(0);
/// How the server knows the client.
pub const CLIENT_CONNECTION: ConnectionId = ConnectionId(1);

/// Delivers bytes straight into a peer session's input bus, tagged with the
/// connection id the peer knows the sender by.
#[derive(Clone)]
pub struct BusTransport {
    peer: EventBus<HostEvent>,
    sender: ConnectionId,
}

impl BusTransport {
    pub fn new(peer: EventBus<HostEvent>, sender: ConnectionId) -> Self {
        Self { peer, sender }
    }
}

impl Transport for BusTransport {
    fn send(&mut self, _connection: ConnectionId, bytes: &[u8]) {
        let event = HostEvent::Inbound {
            connection: self.sender,
            bytes: bytes.to_vec(),
        };
        if let Err(rejected) = self.peer.post(event) {
            log::warn!("loopback dropped {} byte(s): {}", bytes.len(), rejected.error);
        }
    }
}

/// Both sides of one tick.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub server: TickReport,
    pub client: TickReport,
}

/// Totals over a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub snapshots: usize,
    pub faults: Vec<TorqueError>,
    /// Largest server/client position gap seen at the end of a tick.
    pub max_divergence: f32,
}

enum Delivery {
    /// Packets forwarded by the runner between ticks.
    Inline {
        server_packets: Receiver<Packet>,
        client_packets: Receiver<Packet>,
        to_client: BusTransport,
        to_server: BusTransport,
    },
    /// Packets forwarded by outbox sender threads.
    Threaded { senders: Vec<SenderHandle> },
}

/// One server session and one client session over a loopback transport,
/// sharing a voxel world. Stands in for the two host adapters.
pub struct LoopbackRunner {
    server: WorldSession,
    client: WorldSession,
    server_events: EventBus<CoreEvent>,
    delivery: Delivery,
    /// Server spawns waiting for their id, keyed by tag.
    pending: HashMap<u64, SpawnRequest>,
    spawned: HashMap<u64, BodyId>,
    next_tag: u64,
}

impl LoopbackRunner {
    /// Packets are forwarded synchronously between ticks, so runs are deterministic.
    pub fn new(config: SessionConfig, world: Arc<GridWorld>) -> Self {
        let (server, client) = Self::sessions(config, world);
        let to_client = BusTransport::new(client.input(), SERVER_CONNECTION);
        let to_server = BusTransport::new(server.input(), CLIENT_CONNECTION);
        let delivery = match (server.packets(), client.packets()) {
            (Some(server_packets), Some(client_packets)) => Delivery::Inline {
                server_packets,
                client_packets,
                to_client,
                to_server,
            },
            _ => Delivery::Threaded { senders: Vec::new() },
        };
        Self::assemble(server, client, delivery)
    }

    /// Packets travel through outbox sender threads, as a host would wire them.
    pub fn threaded(config: SessionConfig, world: Arc<GridWorld>) -> Self {
        let (server, client) = Self::sessions(config, world);
        let (server_outbox, server_sender) =
            spawn_sender(BusTransport::new(client.input(), SERVER_CONNECTION));
        let (client_outbox, client_sender) =
            spawn_sender(BusTransport::new(server.input(), CLIENT_CONNECTION));
        let server = server.with_outbox(server_outbox);
        let client = client.with_outbox(client_outbox);
        Self::assemble(
            server,
            client,
            Delivery::Threaded {
                senders: vec![server_sender, client_sender],
            },
        )
    }

    fn sessions(config: SessionConfig, world: Arc<GridWorld>) -> (WorldSession, WorldSession) {
        let world: Arc<dyn VoxelWorld> = world;
        let mut server = WorldSession::new(config.clone(), Arc::clone(&world), SessionRole::Server);
        let client = WorldSession::new(
            config,
            world,
            SessionRole::Client {
                server: SERVER_CONNECTION,
            },
        );
        server.connect(CLIENT_CONNECTION);
        (server, client)
    }

    fn assemble(server: WorldSession, client: WorldSession, delivery: Delivery) -> Self {
        Self {
            server_events: server.output(),
            server,
            client,
            delivery,
            pending: HashMap::new(),
            spawned: HashMap::new(),
            next_tag: 1,
        }
    }

    pub fn server(&self) -> &WorldSession {
        &self.server
    }

    pub fn client(&self) -> &WorldSession {
        &self.client
    }

    /// Queue a four-wheeled, upright-locked box vehicle on the server. It is
    /// mirrored to the client once the server assigns its id. Returns the spawn tag.
    pub fn spawn_vehicle(&mut self, position: Vec3, mass: f32) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        let request = SpawnRequest::new(
            Shape::cuboid(1.0, 0.5, 2.0),
            Pose::from_position(position),
            mass,
        )
        .with_tag(tag)
        .with_wheels(WheelLayout::four_wheel(0.9, 0.5, 1.5))
        .with_orientation_lock();
        self.pending.insert(tag, request.clone());
        if let Err(rejected) = self.server.input().post(HostEvent::Spawn(request)) {
            log::warn!("spawn {} not queued: {}", tag, rejected.error);
            self.pending.remove(&tag);
        }
        tag
    }

    /// Driver input goes to the server and, for prediction, to the client.
    pub fn drive(&self, id: BodyId, input: DriverInput) {
        for bus in [self.server.input(), self.client.input()] {
            if let Err(rejected) = bus.post(HostEvent::DriverInput { id, input }) {
                log::warn!("driver input for {} dropped: {}", id, rejected.error);
            }
        }
    }

    /// Body id the server gave the spawn with `tag`, once it exists.
    pub fn body_for_tag(&self, tag: u64) -> Option<BodyId> {
        self.spawned.get(&tag).copied()
    }

    /// Server tick, mirror spawns, deliver, client tick, deliver.
    pub fn step(&mut self) -> StepReport {
        let server = self.server.tick();
        self.mirror_spawns();
        self.forward_server_packets();
        let client = self.client.tick();
        self.forward_client_packets();
        StepReport { server, client }
    }

    pub fn run(&mut self, ticks: u64) -> RunSummary {
        let mut summary = RunSummary::default();
        for _ in 0..ticks {
            let step = self.step();
            summary.ticks += 1;
            summary.snapshots += step.server.snapshots;
            summary.faults.extend(step.server.faults);
            summary.faults.extend(step.client.faults);
            summary.max_divergence = summary.max_divergence.max(self.max_divergence());
        }
        summary
    }

    /// Position gap between the server's and the client's copy of `id`.
    pub fn divergence(&self, id: BodyId) -> Option<f32> {
        let server = self.server.view().latest();
        let client = self.client.view().latest();
        let a = server.get(id)?;
        let b = client.get(id)?;
        Some(a.pose.position.distance(b.pose.position))
    }

    pub fn max_divergence(&self) -> f32 {
        let server = self.server.view().latest();
        server
            .bodies
            .iter()
            .filter_map(|b| self.divergence(b.id))
            .fold(0.0, f32::max)
    }

    /// Shut both sessions down and join any sender threads.
    /// Returns the body counts of the server and the client.
    pub fn shutdown(self) -> (usize, usize) {
        let server = self.server.shutdown();
        let client = self.client.shutdown();
        if let Delivery::Threaded { senders } = self.delivery {
            let sent: u64 = senders.into_iter().map(SenderHandle::join).sum();
            log::debug!("sender threads delivered {} packet(s)", sent);
        }
        (server, client)
    }

    fn mirror_spawns(&mut self) {
        for event in self.server_events.drain() {
            let CoreEvent::BodySpawned { id, tag, pose } = event else {
                continue;
            };
            let Some(mut request) = self.pending.remove(&tag) else {
                continue;
            };
            request.pose = pose;
            self.spawned.insert(tag, id);
            if let Err(rejected) = self.client.input().post(HostEvent::Spawn(request.with_id(id))) {
                log::warn!("mirror of {} not queued: {}", id, rejected.error);
            }
        }
    }

    fn forward_server_packets(&mut self) {
        if let Delivery::Inline {
            server_packets,
            to_client,
            ..
        } = &mut self.delivery
        {
            for packet in server_packets.try_iter() {
                to_client.send(packet.connection, &packet.bytes);
            }
        }
    }

    fn forward_client_packets(&mut self) {
        if let Delivery::Inline {
            client_packets,
            to_server,
            ..
        } = &mut self.delivery
        {
            for packet in client_packets.try_iter() {
                to_server.send(packet.connection, &packet.bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor_runner() -> LoopbackRunner {
        LoopbackRunner::new(SessionConfig::default(), Arc::new(GridWorld::with_floor(0)))
    }

    #[test]
    fn spawned_vehicle_is_mirrored_to_the_client() {
        let mut runner = floor_runner();
        let tag = runner.spawn_vehicle(Vec3::new(0.0, 3.0, 0.0), 1000.0);
        runner.step();
        let id = runner.body_for_tag(tag).expect("server assigned an id");
        assert!(runner.server().registry().contains(id));
        let mirror = runner.client().registry().get(id).expect("client mirror");
        assert!(mirror.server_authoritative);
        assert_eq!(runner.client().view().latest().tick, 1);
    }

    #[test]
    fn dropped_vehicle_settles_in_agreement() {
        let mut runner = floor_runner();
        let tag = runner.spawn_vehicle(Vec3::new(0.0, 3.0, 0.0), 1000.0);
        let summary = runner.run(150);
        let id = runner.body_for_tag(tag).expect("id");

        assert!(summary.faults.is_empty(), "faults {:?}", summary.faults);
        assert!(summary.snapshots > 0);
        let server = runner.server().registry().get(id).expect("server body");
        assert!(
            (server.pose.position.y - 0.5).abs() < 0.1,
            "rests on the floor, y = {}",
            server.pose.position.y
        );
        let gap = runner.divergence(id).expect("both sides");
        assert!(gap < 0.05, "client drifted {} from the server", gap);
    }

    #[test]
    fn resting_world_stops_sending_snapshots() {
        let mut runner = floor_runner();
        runner.spawn_vehicle(Vec3::new(0.0, 0.5, 0.0), 1000.0);
        runner.run(120);
        let quiet = runner.run(20);
        assert_eq!(quiet.snapshots, 0, "nothing changed, nothing sent");
    }

    #[test]
    fn driven_vehicle_stays_close_on_the_client() {
        let mut runner = floor_runner();
        let tag = runner.spawn_vehicle(Vec3::new(0.0, 0.5, 0.0), 1000.0);
        runner.step();
        let id = runner.body_for_tag(tag).expect("id");
        runner.drive(
            id,
            DriverInput {
                forward: true,
                ..DriverInput::default()
            },
        );
        let summary = runner.run(40);

        let server = runner.server().registry().get(id).expect("server body");
        assert!(server.pose.position.z < -1.0, "drove along -Z, z = {}", server.pose.position.z);
        assert!(
            summary.max_divergence < 2.0,
            "prediction gap {}",
            summary.max_divergence
        );
    }

    #[test]
    fn shutdown_reports_both_sides() {
        let mut runner = floor_runner();
        runner.spawn_vehicle(Vec3::new(0.0, 2.0, 0.0), 1000.0);
        runner.spawn_vehicle(Vec3::new(8.0, 2.0, 0.0), 1000.0);
        runner.run(3);
        assert_eq!(runner.shutdown(), (2, 2));
    }

    #[test]
    fn threaded_delivery_joins_cleanly() {
        let mut runner =
            LoopbackRunner::threaded(SessionConfig::default(), Arc::new(GridWorld::with_floor(0)));
        runner.spawn_vehicle(Vec3::new(0.0, 3.0, 0.0), 1000.0);
        let summary = runner.run(10);
        assert_eq!(summary.ticks, 10);
        assert!(summary.snapshots > 0);
        let (server, _client) = runner.shutdown();
        assert_eq!(server, 1);
    }
}
