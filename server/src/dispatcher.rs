//! Packet dispatch: decides what a framed packet means for its session and
//! carries it out.
//!
//! [`plan`] is a pure function of packet and login state. [`dispatch`] runs
//! the resulting action against the shared context.

use crate::context::{DisconnectReason, ServerContext};
use crate::session::{ClientId, LoginState, SendOutcome};
use crate::session_manager::{Audience, LoginError};
use log::{debug, info, warn};
use shared::{
    LoginResponse, Packet, PacketType, PlayerSpawn, PlayerUpdate, StatusMessage, Username,
    LOGIN_SUCCESS_MESSAGE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Only the server sends this kind of packet.
    ServerOnly(PacketType),
    NotLoggedIn,
    NotReady,
    AlreadyReady,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Login(Username),
    Ready,
    RelayUpdate(PlayerUpdate),
    RelaySpawn,
    Disconnect,
    Ignore(IgnoreReason),
}

pub fn plan(packet: &Packet, state: LoginState) -> Action {
    if state == LoginState::Disconnected {
        return Action::Ignore(IgnoreReason::Disconnected);
    }

    let kind = packet.packet_type();
    if kind.is_server_only() {
        return Action::Ignore(IgnoreReason::ServerOnly(kind));
    }

    match packet {
        Packet::LoginRequest(request) => Action::Login(request.username),
        Packet::ClientReady(_) => match state {
            LoginState::LoggedIn => Action::Ready,
            LoginState::Ready => Action::Ignore(IgnoreReason::AlreadyReady),
            _ => Action::Ignore(IgnoreReason::NotLoggedIn),
        },
        Packet::PlayerUpdate(update) if state == LoginState::Ready => Action::RelayUpdate(*update),
        Packet::PlayerSpawn(_) if state == LoginState::Ready => Action::RelaySpawn,
        Packet::PlayerUpdate(_) | Packet::PlayerSpawn(_) => Action::Ignore(IgnoreReason::NotReady),
        Packet::PlayerDisconnect(_) => Action::Disconnect,
        _ => Action::Ignore(IgnoreReason::ServerOnly(kind)),
    }
}

/// Handles one packet from `client_id`. Packets from a session are
/// dispatched one at a time, in the order they were received.
pub async fn dispatch(ctx: &ServerContext, client_id: ClientId, packet: Packet) {
    let Some(state) = ctx.sessions.read().await.state(client_id) else {
        debug!("Dropping {:?} from departed client {}", packet.packet_type(), client_id);
        return;
    };

    debug!("Client {} sent {:?}", client_id, packet.packet_type());

    match plan(&packet, state) {
        Action::Login(username) => handle_login(ctx, client_id, username).await,
        Action::Ready => handle_ready(ctx, client_id).await,
        Action::RelayUpdate(update) => {
            let stamped = ctx.sessions.write().await.record_update(client_id, &update);
            if let Some(update) = stamped {
                ctx.broadcast(&Packet::PlayerUpdate(update), Audience::RosterExcept(client_id))
                    .await;
            }
        }
        Action::RelaySpawn => {
            let Some(username) = ctx.sessions.read().await.username(client_id) else {
                return;
            };
            let spawn = Packet::PlayerSpawn(PlayerSpawn {
                player_id: client_id,
                username,
            });
            ctx.broadcast(&spawn, Audience::RosterExcept(client_id)).await;
        }
        Action::Disconnect => {
            ctx.disconnect(client_id, DisconnectReason::ClientRequest)
                .await;
        }
        Action::Ignore(IgnoreReason::ServerOnly(kind)) => {
            warn!("Client {} sent server-only packet {:?}, ignoring", client_id, kind);
        }
        Action::Ignore(reason) => {
            debug!(
                "Ignoring {:?} from client {} ({:?})",
                packet.packet_type(),
                client_id,
                reason
            );
        }
    }
}

async fn handle_login(ctx: &ServerContext, client_id: ClientId, username: Username) {
    let result = ctx.sessions.write().await.begin_login(client_id, &username);

    let response = match &result {
        Ok(()) => {
            info!("Login success for client {} as {}", client_id, username);
            login_response(client_id, true, LOGIN_SUCCESS_MESSAGE)
        }
        Err(LoginError::UnknownSession) => return,
        Err(e) => {
            info!("Login failed for client {} as {}: {}", client_id, username, e);
            login_response(client_id, false, &e.to_string())
        }
    };

    if ctx.send_to(client_id, &response).await == SendOutcome::Closed || result.is_err() {
        return;
    }

    // Announce the name as stored, not as it arrived.
    let Some(username) = ctx.sessions.read().await.username(client_id) else {
        return;
    };
    // Every logged-in client learns about the newcomer, the newcomer included.
    let spawn = Packet::PlayerSpawn(PlayerSpawn {
        player_id: client_id,
        username,
    });
    ctx.broadcast(&spawn, Audience::LoggedIn).await;
}

fn login_response(client_id: ClientId, success: bool, message: &str) -> Packet {
    Packet::LoginResponse(LoginResponse {
        client_id,
        success,
        message: StatusMessage::new(message),
    })
}

async fn handle_ready(ctx: &ServerContext, client_id: ClientId) {
    let Some(order) = ctx.sessions.write().await.mark_ready(client_id) else {
        return;
    };
    info!("Client {} is ready", client_id);

    send_world(ctx, client_id, order).await;
}

/// Sends the world and the earlier-ready roster to a session that became
/// ready at `order`, then announces it to that same roster.
///
/// Both directions are limited to sessions that became ready before this
/// one. A session that becomes ready later gets this one from its own sync,
/// so two players readying at once each learn about the other exactly once.
///
/// Each step first checks that the session is still connected; if it is
/// not, the remaining steps are skipped.
async fn send_world(ctx: &ServerContext, client_id: ClientId, order: u64) {
    let tigers = ctx.world.read().await.tiger_spawn_packets();
    if !send_step(ctx, client_id, &tigers).await {
        return;
    }

    let trees = ctx.world.read().await.tree_spawn_packets();
    if !send_step(ctx, client_id, &trees).await {
        return;
    }

    let others: Vec<Packet> = ctx
        .sessions
        .read()
        .await
        .ready_players_before(order)
        .into_iter()
        .map(Packet::PlayerSpawn)
        .collect();
    if !send_step(ctx, client_id, &others).await {
        return;
    }

    let username = {
        let sessions = ctx.sessions.read().await;
        if !sessions.is_connected(client_id) {
            return;
        }
        sessions.username(client_id)
    };
    if let Some(username) = username {
        let spawn = Packet::PlayerSpawn(PlayerSpawn {
            player_id: client_id,
            username,
        });
        ctx.broadcast(&spawn, Audience::RosterBefore(order)).await;
    }
}

async fn send_step(ctx: &ServerContext, client_id: ClientId, packets: &[Packet]) -> bool {
    if !ctx.sessions.read().await.is_connected(client_id) {
        debug!("Client {} left during world sync", client_id);
        return false;
    }

    for packet in packets {
        if ctx.send_to(client_id, packet).await == SendOutcome::Closed {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::ServerMessage;
    use crate::world::World;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{ClientReady, LoginRequest, PlayerDisconnect, TigerUpdate};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Notify};

    fn context(trees: usize) -> (ServerContext, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let world = World::seeded(trees, StdRng::seed_from_u64(3));
        (ServerContext::new(ServerConfig::default(), world, tx), rx)
    }

    async fn connect(ctx: &ServerContext) -> (ClientId, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(256);
        let id = ctx
            .sessions
            .write()
            .await
            .add_session("127.0.0.1:9000".parse().unwrap(), tx, Arc::new(Notify::new()))
            .unwrap();
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            packets.push(Packet::decode(&frame).unwrap());
        }
        packets
    }

    fn login_packet(name: &str) -> Packet {
        Packet::LoginRequest(LoginRequest {
            username: Username::new(name),
        })
    }

    fn ready_packet(client_id: ClientId) -> Packet {
        Packet::ClientReady(ClientReady { client_id })
    }

    #[test]
    fn test_plan_by_state() {
        let update = Packet::PlayerUpdate(PlayerUpdate::default());
        assert_eq!(
            plan(&update, LoginState::LoggedIn),
            Action::Ignore(IgnoreReason::NotReady)
        );
        assert!(matches!(
            plan(&update, LoginState::Ready),
            Action::RelayUpdate(_)
        ));

        let ready = ready_packet(1);
        assert_eq!(
            plan(&ready, LoginState::Anonymous),
            Action::Ignore(IgnoreReason::NotLoggedIn)
        );
        assert_eq!(plan(&ready, LoginState::LoggedIn), Action::Ready);
        assert_eq!(
            plan(&ready, LoginState::Ready),
            Action::Ignore(IgnoreReason::AlreadyReady)
        );

        let bye = Packet::PlayerDisconnect(PlayerDisconnect::default());
        assert_eq!(plan(&bye, LoginState::Anonymous), Action::Disconnect);
        assert_eq!(
            plan(&bye, LoginState::Disconnected),
            Action::Ignore(IgnoreReason::Disconnected)
        );
    }

    #[test]
    fn test_plan_rejects_server_only_packets() {
        let tiger = Packet::TigerUpdate(TigerUpdate::default());
        assert_eq!(
            plan(&tiger, LoginState::Ready),
            Action::Ignore(IgnoreReason::ServerOnly(PacketType::TigerUpdate))
        );

        let response = login_response(1, true, "hi");
        for state in [LoginState::Anonymous, LoginState::LoggedIn] {
            assert_eq!(
                plan(&response, state),
                Action::Ignore(IgnoreReason::ServerOnly(PacketType::LoginResponse))
            );
        }
    }

    #[tokio::test]
    async fn test_login_then_duplicate() {
        let (ctx, _rx) = context(3);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;

        dispatch(&ctx, a, login_packet("alice")).await;
        let packets = drain(&mut ra);
        assert_eq!(packets.len(), 2);
        match &packets[0] {
            Packet::LoginResponse(r) => {
                assert!(r.success);
                assert_eq!(r.client_id, a);
                assert_eq!(r.message.as_str(), "Login successful");
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
        assert!(matches!(&packets[1], Packet::PlayerSpawn(p) if p.player_id == a));

        dispatch(&ctx, b, login_packet("alice")).await;
        let packets = drain(&mut rb);
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::LoginResponse(r) => {
                assert!(!r.success);
                assert_eq!(r.message.as_str(), "Username already exists");
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
        assert!(drain(&mut ra).is_empty());

        dispatch(&ctx, b, login_packet("bob")).await;
        let packets = drain(&mut rb);
        assert!(matches!(&packets[0], Packet::LoginResponse(r) if r.success));
        // alice is logged in too and sees bob arrive
        assert!(matches!(&drain(&mut ra)[..], [Packet::PlayerSpawn(p)] if p.player_id == b));
    }

    #[tokio::test]
    async fn test_ready_sends_world_in_order() {
        let (ctx, _rx) = context(3);
        let (a, mut ra) = connect(&ctx).await;
        dispatch(&ctx, a, login_packet("alice")).await;
        drain(&mut ra);

        dispatch(&ctx, a, ready_packet(a)).await;
        let packets = drain(&mut ra);

        assert_eq!(packets.len(), 17);
        assert!(packets[..16]
            .iter()
            .all(|p| matches!(p, Packet::TigerSpawn(_))));
        match &packets[16] {
            Packet::TreeSpawn(t) => assert_eq!(t.tree_count, 3),
            other => panic!("Unexpected packet: {:?}", other),
        }
        assert_eq!(ctx.sessions.read().await.state(a), Some(LoginState::Ready));
    }

    #[tokio::test]
    async fn test_second_player_sees_first_and_is_announced() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        dispatch(&ctx, a, login_packet("alice")).await;
        dispatch(&ctx, a, ready_packet(a)).await;
        dispatch(&ctx, b, login_packet("bob")).await;
        drain(&mut ra);
        drain(&mut rb);

        dispatch(&ctx, b, ready_packet(b)).await;

        let to_b = drain(&mut rb);
        // 16 tigers, one empty tree packet, then alice
        assert_eq!(to_b.len(), 18);
        match &to_b[17] {
            Packet::PlayerSpawn(p) => {
                assert_eq!(p.player_id, a);
                assert_eq!(p.username.as_str(), "alice");
            }
            other => panic!("Unexpected packet: {:?}", other),
        }

        let to_a = drain(&mut ra);
        assert!(matches!(&to_a[..], [Packet::PlayerSpawn(p)] if p.player_id == b));
    }

    #[tokio::test]
    async fn test_update_relay_stamps_sender_id() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        for (id, name) in [(a, "alice"), (b, "bob")] {
            dispatch(&ctx, id, login_packet(name)).await;
            dispatch(&ctx, id, ready_packet(id)).await;
        }
        drain(&mut ra);
        drain(&mut rb);

        let update = PlayerUpdate {
            client_id: 999,
            x: 1.0,
            y: 2.0,
            z: 3.0,
            ..PlayerUpdate::default()
        };
        dispatch(&ctx, a, Packet::PlayerUpdate(update)).await;

        assert!(drain(&mut ra).is_empty());
        match &drain(&mut rb)[..] {
            [Packet::PlayerUpdate(u)] => {
                assert_eq!(u.client_id, a);
                assert_eq!(u.z, 3.0);
            }
            other => panic!("Unexpected packets: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_before_ready_is_dropped() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        dispatch(&ctx, a, login_packet("alice")).await;
        dispatch(&ctx, a, ready_packet(a)).await;
        dispatch(&ctx, b, login_packet("bob")).await;
        drain(&mut ra);
        drain(&mut rb);

        dispatch(&ctx, b, Packet::PlayerUpdate(PlayerUpdate::default())).await;

        assert!(drain(&mut ra).is_empty());
        assert!(ctx.sessions.read().await.get(b).unwrap().last_update.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_packet_announces_departure() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        for (id, name) in [(a, "alice"), (b, "bob")] {
            dispatch(&ctx, id, login_packet(name)).await;
            dispatch(&ctx, id, ready_packet(id)).await;
        }
        drain(&mut ra);
        drain(&mut rb);

        // the body is not trusted; the session's own identity is announced
        let bye = Packet::PlayerDisconnect(PlayerDisconnect {
            player_id: 500,
            username: Username::new("mallory"),
        });
        dispatch(&ctx, b, bye).await;

        assert!(!ctx.sessions.read().await.contains(b));
        match &drain(&mut ra)[..] {
            [Packet::PlayerDisconnect(p)] => {
                assert_eq!(p.player_id, b);
                assert_eq!(p.username.as_str(), "bob");
            }
            other => panic!("Unexpected packets: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_session_aborts_world_sync() {
        let (ctx, _rx) = context(3);
        let (a, mut ra) = connect(&ctx).await;
        let (b, rb) = connect(&ctx).await;
        dispatch(&ctx, a, login_packet("alice")).await;
        dispatch(&ctx, a, ready_packet(a)).await;
        dispatch(&ctx, b, login_packet("bob")).await;
        drain(&mut ra);

        drop(rb);
        dispatch(&ctx, b, ready_packet(b)).await;

        // alice is never told about bob, and her own state is untouched
        assert!(drain(&mut ra).is_empty());
        assert_eq!(ctx.sessions.read().await.state(a), Some(LoginState::Ready));
    }

    #[tokio::test]
    async fn test_relay_spawn_uses_session_identity() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        for (id, name) in [(a, "alice"), (b, "bob")] {
            dispatch(&ctx, id, login_packet(name)).await;
            dispatch(&ctx, id, ready_packet(id)).await;
        }
        drain(&mut ra);
        drain(&mut rb);

        let spoofed = Packet::PlayerSpawn(PlayerSpawn {
            player_id: 77,
            username: Username::new("eve"),
        });
        dispatch(&ctx, a, spoofed).await;

        match &drain(&mut rb)[..] {
            [Packet::PlayerSpawn(p)] => {
                assert_eq!(p.player_id, a);
                assert_eq!(p.username.as_str(), "alice");
            }
            other => panic!("Unexpected packets: {:?}", other),
        }
    }

    fn spawned_ids(packets: &[Packet]) -> Vec<ClientId> {
        packets
            .iter()
            .filter_map(|p| match p {
                Packet::PlayerSpawn(s) => Some(s.player_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_overlapping_ready_announces_each_player_once() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        dispatch(&ctx, a, login_packet("alice")).await;
        dispatch(&ctx, b, login_packet("bob")).await;
        drain(&mut ra);
        drain(&mut rb);

        // bob enters the roster first but his world sync has not run yet
        let bob_order = ctx.sessions.write().await.mark_ready(b).unwrap();
        dispatch(&ctx, a, ready_packet(a)).await;
        send_world(&ctx, b, bob_order).await;

        assert_eq!(spawned_ids(&drain(&mut ra)), vec![b]);
        assert_eq!(spawned_ids(&drain(&mut rb)), vec![a]);
    }

    #[tokio::test]
    async fn test_leaving_before_ready_is_announced() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;
        let (b, mut rb) = connect(&ctx).await;
        dispatch(&ctx, a, login_packet("alice")).await;
        dispatch(&ctx, a, ready_packet(a)).await;
        dispatch(&ctx, b, login_packet("bob")).await;

        // alice was told bob logged in
        assert_eq!(spawned_ids(&drain(&mut ra)), vec![a, b]);
        drain(&mut rb);

        dispatch(&ctx, b, Packet::PlayerDisconnect(PlayerDisconnect::default())).await;

        match &drain(&mut ra)[..] {
            [Packet::PlayerDisconnect(p)] => {
                assert_eq!(p.player_id, b);
                assert_eq!(p.username.as_str(), "bob");
            }
            other => panic!("Unexpected packets: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_spawn_carries_clean_name() {
        let (ctx, _rx) = context(0);
        let (a, mut ra) = connect(&ctx).await;

        let mut frame = vec![36, 0, 6, 0];
        frame.extend_from_slice(b"alice\0junk");
        frame.resize(36, 0x7a);
        dispatch(&ctx, a, Packet::decode(&frame).unwrap()).await;

        match &drain(&mut ra)[..] {
            [Packet::LoginResponse(r), Packet::PlayerSpawn(p)] => {
                assert!(r.success);
                assert_eq!(p.username, Username::new("alice"));
            }
            other => panic!("Unexpected packets: {:?}", other),
        }
    }
}
