//! Per-connection state held by the server.

use crate::physics::Vector2;
use log::warn;
use shared::{Packet, PlayerUpdate, Username};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

pub type ClientId = i32;

/// Queue of encoded frames drained by the connection's writer task.
pub type Outbox = mpsc::Sender<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Anonymous,
    /// Inside a login attempt. Only held while the session table is locked
    /// for that attempt; it ends as `LoggedIn` or back at `Anonymous`.
    LoginPending,
    LoggedIn,
    Ready,
    Disconnected,
}

impl LoginState {
    /// Holds a username: logged in, whether or not ready yet.
    pub fn is_logged_in(self) -> bool {
        matches!(self, LoginState::LoggedIn | LoginState::Ready)
    }
}

/// Result of handing a frame to a session's outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Outbox full or the packet could not be encoded; the packet is lost.
    Dropped,
    /// The writer is gone. The session should be torn down.
    Closed,
}

#[derive(Debug)]
pub struct Session {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub username: Username,
    pub state: LoginState,
    pub last_update: Option<PlayerUpdate>,
    pub io_errors: u32,
    pub connected_at: Instant,
    /// Position in the order sessions became ready. Set once on entering
    /// `Ready`.
    pub ready_order: Option<u64>,
    outbox: Outbox,
    closed: Arc<Notify>,
}

impl Session {
    pub fn new(id: ClientId, addr: SocketAddr, outbox: Outbox, closed: Arc<Notify>) -> Self {
        Self {
            id,
            addr,
            username: Username::default(),
            state: LoginState::Anonymous,
            last_update: None,
            io_errors: 0,
            connected_at: Instant::now(),
            ready_order: None,
            outbox,
            closed,
        }
    }

    pub fn send(&self, packet: &Packet) -> SendOutcome {
        match packet.encode() {
            Ok(bytes) => self.send_bytes(bytes),
            Err(e) => {
                warn!("Failed to encode {:?} for client {}: {}", packet.packet_type(), self.id, e);
                SendOutcome::Dropped
            }
        }
    }

    /// Queues an already encoded frame without waiting.
    pub fn send_bytes(&self, bytes: Vec<u8>) -> SendOutcome {
        match self.outbox.try_send(bytes) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                warn!("Outbox full for client {}, dropping packet", self.id);
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != LoginState::Disconnected && !self.outbox.is_closed()
    }

    /// Last reported ground position, if the client has sent one.
    pub fn position(&self) -> Option<Vector2> {
        self.last_update.map(|u| Vector2::new(u.x, u.z))
    }

    pub fn handshake_expired(&self, timeout: Duration) -> bool {
        self.state != LoginState::Ready && self.connected_at.elapsed() > timeout
    }

    /// Wakes the connection's reader so it stops reading.
    pub(crate) fn close(&mut self) {
        self.state = LoginState::Disconnected;
        self.closed.notify_one();
    }
}
