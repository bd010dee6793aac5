//! State shared by every server task.
//!
//! `sessions` and `world` each sit behind their own lock and are never held
//! at the same time: take what is needed from one, drop the guard, then
//! take the other.

use crate::config::ServerConfig;
use crate::session::{ClientId, SendOutcome};
use crate::session_manager::{Audience, Departure, SessionManager};
use crate::world::World;
use log::{debug, info};
use shared::{Packet, PlayerDisconnect};
use std::fmt;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientRequest,
    EndOfStream,
    IoErrorCeiling(u32),
    SendFailed,
    HandshakeTimeout,
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientRequest => write!(f, "client requested disconnect"),
            DisconnectReason::EndOfStream => write!(f, "connection closed by peer"),
            DisconnectReason::IoErrorCeiling(count) => {
                write!(f, "{} consecutive I/O errors", count)
            }
            DisconnectReason::SendFailed => write!(f, "send failed"),
            DisconnectReason::HandshakeTimeout => write!(f, "handshake timed out"),
            DisconnectReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Teardown {
        client_id: ClientId,
        reason: DisconnectReason,
    },
}

pub struct ServerContext {
    pub config: ServerConfig,
    pub sessions: RwLock<SessionManager>,
    pub world: RwLock<World>,
    messages: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        world: World,
        messages: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let sessions = SessionManager::new(config.max_clients);
        Self {
            config,
            sessions: RwLock::new(sessions),
            world: RwLock::new(world),
            messages,
        }
    }

    /// Queues `packet` for one session. A closed outbox schedules a teardown.
    pub async fn send_to(&self, client_id: ClientId, packet: &Packet) -> SendOutcome {
        let outcome = self.sessions.read().await.send_to(client_id, packet);
        if outcome == SendOutcome::Closed {
            self.schedule_teardown(client_id, DisconnectReason::SendFailed);
        }
        outcome
    }

    pub async fn broadcast(&self, packet: &Packet, audience: Audience) {
        let closed = self.sessions.read().await.broadcast(packet, audience);
        for client_id in closed {
            self.schedule_teardown(client_id, DisconnectReason::SendFailed);
        }
    }

    /// Broadcasts several packets under a single lock acquisition.
    pub async fn broadcast_all(&self, packets: &[Packet], audience: Audience) {
        let mut closed = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for packet in packets {
                closed.extend(sessions.broadcast(packet, audience));
            }
        }
        closed.sort_unstable();
        closed.dedup();
        for client_id in closed {
            self.schedule_teardown(client_id, DisconnectReason::SendFailed);
        }
    }

    /// Asks the main loop to tear a session down. Safe to call repeatedly.
    pub fn schedule_teardown(&self, client_id: ClientId, reason: DisconnectReason) {
        if self
            .messages
            .send(ServerMessage::Teardown { client_id, reason })
            .is_err()
        {
            debug!("Server loop gone, dropping teardown of client {}", client_id);
        }
    }

    /// Removes a session and, if it had logged in, tells every other
    /// logged-in session that it left.
    pub async fn disconnect(
        &self,
        client_id: ClientId,
        reason: DisconnectReason,
    ) -> Option<Departure> {
        let departure = self.sessions.write().await.remove_session(client_id)?;
        info!("Client {} disconnected: {}", client_id, reason);

        if departure.previous_state.is_logged_in() && reason != DisconnectReason::Shutdown {
            let packet = Packet::PlayerDisconnect(PlayerDisconnect {
                player_id: departure.id,
                username: departure.username,
            });
            // The session is already gone, so it is not part of the audience.
            self.broadcast(&packet, Audience::LoggedIn).await;
        }

        Some(departure)
    }

    pub async fn disconnect_all(&self) {
        let ids = self.sessions.read().await.ids();
        for client_id in ids {
            self.disconnect(client_id, DisconnectReason::Shutdown).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LoginState;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::Username;
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn context() -> (ServerContext, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let world = World::new(StdRng::seed_from_u64(0));
        (ServerContext::new(ServerConfig::default(), world, tx), rx)
    }

    async fn connected_session(ctx: &ServerContext) -> (ClientId, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(16);
        let id = ctx
            .sessions
            .write()
            .await
            .add_session("127.0.0.1:9000".parse().unwrap(), tx, Arc::new(Notify::new()))
            .unwrap();
        (id, rx)
    }

    async fn logged_in_session(
        ctx: &ServerContext,
        name: &str,
    ) -> (ClientId, mpsc::Receiver<Vec<u8>>) {
        let (id, rx) = connected_session(ctx).await;
        ctx.sessions
            .write()
            .await
            .begin_login(id, &Username::new(name))
            .unwrap();
        (id, rx)
    }

    async fn ready_session(
        ctx: &ServerContext,
        name: &str,
    ) -> (ClientId, mpsc::Receiver<Vec<u8>>) {
        let (id, rx) = logged_in_session(ctx, name).await;
        ctx.sessions.write().await.mark_ready(id).unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_to_remaining_roster() {
        let (ctx, _rx) = context();
        let (alice, _ra) = ready_session(&ctx, "alice").await;
        let (_bob, mut rb) = ready_session(&ctx, "bob").await;

        let departure = ctx
            .disconnect(alice, DisconnectReason::ClientRequest)
            .await
            .unwrap();
        assert_eq!(departure.previous_state, LoginState::Ready);

        let frame = rb.try_recv().unwrap();
        match Packet::decode(&frame).unwrap() {
            Packet::PlayerDisconnect(p) => {
                assert_eq!(p.player_id, alice);
                assert_eq!(p.username.as_str(), "alice");
            }
            other => panic!("Unexpected packet: {:?}", other),
        }

        assert!(ctx
            .disconnect(alice, DisconnectReason::ClientRequest)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_disconnect_before_ready_is_announced() {
        let (ctx, _rx) = context();
        let (_alice, mut ra) = ready_session(&ctx, "alice").await;
        let (bob, _rb) = logged_in_session(&ctx, "bob").await;
        let (_carol, mut rc) = logged_in_session(&ctx, "carol").await;

        let departure = ctx
            .disconnect(bob, DisconnectReason::EndOfStream)
            .await
            .unwrap();
        assert_eq!(departure.previous_state, LoginState::LoggedIn);

        for rx in [&mut ra, &mut rc] {
            match Packet::decode(&rx.try_recv().unwrap()).unwrap() {
                Packet::PlayerDisconnect(p) => {
                    assert_eq!(p.player_id, bob);
                    assert_eq!(p.username.as_str(), "bob");
                }
                other => panic!("Unexpected packet: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_anonymous_disconnect_is_silent() {
        let (ctx, _rx) = context();
        let (_alice, mut ra) = ready_session(&ctx, "alice").await;
        let (stranger, _rs) = connected_session(&ctx).await;

        ctx.disconnect(stranger, DisconnectReason::EndOfStream).await;

        assert!(ra.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_disconnect_is_silent() {
        let (ctx, _rx) = context();
        let (_alice, mut ra) = ready_session(&ctx, "alice").await;
        let (_bob, mut rb) = ready_session(&ctx, "bob").await;

        ctx.disconnect_all().await;

        assert!(ctx.sessions.read().await.is_empty());
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_outbox_schedules_teardown() {
        let (ctx, mut rx) = context();
        let (alice, ra) = ready_session(&ctx, "alice").await;
        drop(ra);

        let packet = Packet::ClientReady(shared::ClientReady { client_id: 0 });
        ctx.broadcast(&packet, Audience::Roster).await;

        match rx.try_recv().unwrap() {
            ServerMessage::Teardown { client_id, reason } => {
                assert_eq!(client_id, alice);
                assert_eq!(reason, DisconnectReason::SendFailed);
            }
        }
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            DisconnectReason::IoErrorCeiling(11).to_string(),
            "11 consecutive I/O errors"
        );
    }
}
