//! Session table for every live connection
//!
//! This module owns the server-side view of connected clients:
//! - Session lifecycle (accept, login, ready, teardown)
//! - Username uniqueness among logged-in sessions
//! - Broadcast audiences derived from login state
//! - Consecutive I/O error accounting per connection
//!
//! Identifiers are handed out monotonically and never reused, so a client
//! that reconnects always gets a fresh id.

use crate::physics::Vector2;
use crate::session::{ClientId, LoginState, Outbox, SendOutcome, Session};
use log::{info, warn};
use shared::{
    Packet, PlayerSpawn, PlayerUpdate, Username, ALREADY_LOGGED_IN_MESSAGE,
    INVALID_USERNAME_MESSAGE, USERNAME_TAKEN_MESSAGE,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Which sessions receive a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every session holding a username, ready or not
    LoggedIn,
    /// Every ready session
    Roster,
    /// Every ready session except one
    RosterExcept(ClientId),
    /// Ready sessions that became ready before the given ready order
    RosterBefore(u64),
}

impl Audience {
    fn includes(self, session: &Session) -> bool {
        match self {
            Audience::LoggedIn => session.state.is_logged_in(),
            Audience::Roster => session.state == LoginState::Ready,
            Audience::RosterExcept(id) => session.state == LoginState::Ready && session.id != id,
            Audience::RosterBefore(order) => {
                session.state == LoginState::Ready
                    && session.ready_order.map_or(false, |o| o < order)
            }
        }
    }
}

/// Why a login request was refused. The display text is what the client
/// sees in its login response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("{}", USERNAME_TAKEN_MESSAGE)]
    UsernameTaken,
    #[error("{}", INVALID_USERNAME_MESSAGE)]
    InvalidUsername,
    #[error("{}", ALREADY_LOGGED_IN_MESSAGE)]
    AlreadyLoggedIn,
    #[error("unknown session")]
    UnknownSession,
}

/// What is left of a session after it has been removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub id: ClientId,
    pub username: Username,
    pub previous_state: LoginState,
}

pub struct SessionManager {
    sessions: HashMap<ClientId, Session>,
    next_client_id: ClientId,
    next_ready_order: u64,
    max_clients: usize,
}

impl SessionManager {
    /// Creates an empty table that admits at most `max_clients` sessions.
    /// Identifiers start at 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_client_id: 1,
            next_ready_order: 1,
            max_clients,
        }
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns the new client id, or `None` when the server is full. The
    /// `closed` notifier is signalled when the session is removed so the
    /// connection's reader can stop.
    pub fn add_session(
        &mut self,
        addr: SocketAddr,
        outbox: Outbox,
        closed: Arc<Notify>,
    ) -> Option<ClientId> {
        if self.sessions.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.sessions
            .insert(client_id, Session::new(client_id, addr, outbox, closed));

        Some(client_id)
    }

    /// Removes a session, releasing its username and waking its reader.
    /// Returns `None` if it was already gone.
    pub fn remove_session(&mut self, client_id: ClientId) -> Option<Departure> {
        let mut session = self.sessions.remove(&client_id)?;
        let previous_state = session.state;
        session.close();

        Some(Departure {
            id: client_id,
            username: session.username,
            previous_state,
        })
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    pub fn state(&self, client_id: ClientId) -> Option<LoginState> {
        self.sessions.get(&client_id).map(|s| s.state)
    }

    pub fn username(&self, client_id: ClientId) -> Option<Username> {
        self.sessions.get(&client_id).map(|s| s.username)
    }

    /// Attempts to bind `username` to the session.
    ///
    /// The name must be non-empty and not held by any other logged-in
    /// session. On failure an anonymous session stays anonymous and may
    /// retry.
    pub fn begin_login(&mut self, client_id: ClientId, username: &Username) -> Result<(), LoginError> {
        let state = self.state(client_id).ok_or(LoginError::UnknownSession)?;
        if state.is_logged_in() {
            return Err(LoginError::AlreadyLoggedIn);
        }
        if username.as_str().trim().is_empty() {
            return Err(LoginError::InvalidUsername);
        }

        let requested = username.as_str();
        let taken = self.sessions.values().any(|s| {
            s.id != client_id && s.state.is_logged_in() && s.username.as_str() == requested
        });

        let session = self
            .sessions
            .get_mut(&client_id)
            .ok_or(LoginError::UnknownSession)?;
        session.state = LoginState::LoginPending;

        if taken {
            session.state = LoginState::Anonymous;
            return Err(LoginError::UsernameTaken);
        }

        // Re-pack so nothing after the terminator is echoed to other clients.
        session.username = Username::new(&requested);
        session.state = LoginState::LoggedIn;
        Ok(())
    }

    /// Moves a logged-in session into the roster and returns its ready
    /// order. Returns `None` for any other state, including a session that
    /// is already ready.
    pub fn mark_ready(&mut self, client_id: ClientId) -> Option<u64> {
        let session = self.sessions.get_mut(&client_id)?;
        if session.state != LoginState::LoggedIn {
            return None;
        }

        let order = self.next_ready_order;
        self.next_ready_order += 1;
        session.state = LoginState::Ready;
        session.ready_order = Some(order);
        Some(order)
    }

    /// Stores a ready session's latest update and returns it with the
    /// session's own id stamped in. Updates from other states are refused.
    pub fn record_update(&mut self, client_id: ClientId, update: &PlayerUpdate) -> Option<PlayerUpdate> {
        let session = self.sessions.get_mut(&client_id)?;
        if session.state != LoginState::Ready {
            return None;
        }

        let stamped = PlayerUpdate {
            client_id,
            ..*update
        };
        session.last_update = Some(stamped);
        Some(stamped)
    }

    /// Counts one more consecutive I/O error and returns the new total.
    pub fn record_io_error(&mut self, client_id: ClientId) -> Option<u32> {
        let session = self.sessions.get_mut(&client_id)?;
        session.io_errors += 1;
        Some(session.io_errors)
    }

    pub fn reset_io_errors(&mut self, client_id: ClientId) {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.io_errors = 0;
        }
    }

    pub fn send_to(&self, client_id: ClientId, packet: &Packet) -> SendOutcome {
        match self.sessions.get(&client_id) {
            Some(session) => session.send(packet),
            None => SendOutcome::Closed,
        }
    }

    /// Sends `packet` to every session in `audience`.
    ///
    /// The packet is encoded once. Returns the ids whose outbox turned out
    /// to be closed; the caller is expected to tear those down.
    pub fn broadcast(&self, packet: &Packet, audience: Audience) -> Vec<ClientId> {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode {:?} for broadcast: {}", packet.packet_type(), e);
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for session in self.sessions.values().filter(|s| audience.includes(s)) {
            if session.send_bytes(bytes.clone()) == SendOutcome::Closed {
                closed.push(session.id);
            }
        }
        closed
    }

    pub fn ready_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == LoginState::Ready)
            .count()
    }

    /// Spawn records for ready sessions that became ready before `order`,
    /// in id order.
    pub fn ready_players_before(&self, order: u64) -> Vec<PlayerSpawn> {
        let mut players: Vec<PlayerSpawn> = self
            .sessions
            .values()
            .filter(|s| Audience::RosterBefore(order).includes(s))
            .map(|s| PlayerSpawn {
                player_id: s.id,
                username: s.username,
            })
            .collect();
        players.sort_by_key(|p| p.player_id);
        players
    }

    /// Last reported positions of logged-in players. Players that have not
    /// sent an update yet are left out.
    pub fn player_positions(&self) -> Vec<Vector2> {
        self.sessions
            .values()
            .filter(|s| s.state.is_logged_in())
            .filter_map(Session::position)
            .collect()
    }

    /// True while the session exists and its writer is still accepting frames.
    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.sessions
            .get(&client_id)
            .map_or(false, Session::is_open)
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.sessions.contains_key(&client_id)
    }

    /// Sessions that have been connected longer than `timeout` without
    /// becoming ready.
    pub fn expired_handshakes(&self, timeout: Duration) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|s| s.handshake_expired(timeout))
            .map(|s| s.id)
            .collect()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
