use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::api::types::ConnectionId;

/// Host network layer. Sends are fire-and-forget.
pub trait Transport: Send + 'static {
    fn send(&mut self, connection: ConnectionId, bytes: &[u8]);
}

/// One encoded message bound for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub connection: ConnectionId,
    pub bytes: Vec<u8>,
}

/// Hands encoded messages to a sender thread so the tick never waits on I/O.
#[derive(Clone)]
pub struct Outbox {
    tx: Sender<Packet>,
    /// Set on bounded outboxes; used to evict the oldest packet when full.
    evict: Option<Receiver<Packet>>,
    dropped: Arc<AtomicU64>,
}

impl Outbox {
    /// Unbounded outbox plus the receiving end. Delivery stops once the
    /// receiver is dropped.
    pub fn channel() -> (Outbox, Receiver<Packet>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let outbox = Outbox {
            tx,
            evict: None,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (outbox, rx)
    }

    /// Outbox holding at most `capacity` undelivered packets. When full, the
    /// oldest packet is dropped to make room, so an undrained receiver costs
    /// bounded memory.
    pub fn bounded(capacity: usize) -> (Outbox, Receiver<Packet>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let outbox = Outbox {
            tx,
            evict: Some(rx.clone()),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (outbox, rx)
    }

    /// Returns false when the packet could not be queued (receiver gone).
    pub fn send(&self, connection: ConnectionId, bytes: Vec<u8>) -> bool {
        let packet = Packet { connection, bytes };
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) => false,
            Err(TrySendError::Full(packet)) => {
                let Some(evict) = &self.evict else {
                    // Unbounded channels are never full.
                    return false;
                };
                if evict.try_recv().is_ok() {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 1024 == 0 {
                        log::warn!("outbox full, {} packet(s) dropped so far", dropped);
                    }
                }
                self.tx.try_send(packet).is_ok()
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Packets evicted because the outbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Join handle for the sender thread.
pub struct SenderHandle {
    handle: thread::JoinHandle<u64>,
}

impl SenderHandle {
    /// Wait for the thread to drain and exit. Returns the number of packets sent.
    /// The thread exits once every `Outbox` clone is dropped.
    pub fn join(self) -> u64 {
        self.handle.join().unwrap_or_else(|_| {
            log::error!("outbox sender thread panicked");
            0
        })
    }
}

/// Start a thread that forwards every packet to `transport`.
pub fn spawn_sender(mut transport: impl Transport) -> (Outbox, SenderHandle) {
    let (outbox, rx) = Outbox::channel();
    let handle = thread::spawn(move || {
        log::debug!("outbox sender started");
        let mut sent = 0u64;
        for packet in rx.iter() {
            transport.send(packet.connection, &packet.bytes);
            sent += 1;
        }
        log::debug!("outbox sender stopped after {} packet(s)", sent);
        sent
    });
    (outbox, SenderHandle { handle })
}
