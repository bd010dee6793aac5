//! Server network layer handling TCP connections and task coordination

use crate::config::ServerConfig;
use crate::context::{DisconnectReason, ServerContext, ServerMessage};
use crate::dispatcher::dispatch;
use crate::error::ServerError;
use crate::session::ClientId;
use crate::simulation::run_simulation;
use crate::world::World;
use log::{debug, error, info, warn};
use shared::{ReassemblyBuffer, MAX_PACKET_SIZE};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinSet;

/// Pause after a failed read before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// How long shutdown waits for connection tasks to flush and exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stops a running [`Server`] from any task or thread.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Main server coordinating connections, dispatch and the tiger simulation
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Seeds the world and binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let world = World::seeded(config.tree_count, config.world_rng());

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Server {
            listener,
            local_addr,
            ctx: Arc::new(ServerContext::new(config, world, server_tx)),
            server_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accepts connections and processes teardown requests until shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            ctx,
            mut server_rx,
            shutdown_rx,
            ..
        } = self;

        let mut tasks = JoinSet::new();
        tasks.spawn(run_simulation(Arc::clone(&ctx), shutdown_rx.clone()));
        if let Some(timeout) = ctx.config.handshake_timeout {
            tasks.spawn(run_handshake_checker(
                Arc::clone(&ctx),
                timeout,
                shutdown_rx.clone(),
            ));
        }

        info!("Server started successfully");

        let mut shutdown = shutdown_rx;
        while !*shutdown.borrow() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => accept_connection(&ctx, stream, addr, &mut tasks).await,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ctx.config.poll_interval).await;
                    }
                },

                Some(message) = server_rx.recv() => match message {
                    ServerMessage::Teardown { client_id, reason } => {
                        ctx.disconnect(client_id, reason).await;
                    }
                },

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!("Server task failed: {}", e);
                    }
                },

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Server shutting down");
        drop(listener);
        ctx.disconnect_all().await;

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Server task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Connection tasks did not finish in time, aborting them");
            tasks.shutdown().await;
        }

        Ok(())
    }
}

async fn accept_connection(
    ctx: &Arc<ServerContext>,
    stream: TcpStream,
    addr: SocketAddr,
    tasks: &mut JoinSet<()>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }

    let (outbox, outbox_rx) = mpsc::channel(ctx.config.outbox_capacity);
    let closed = Arc::new(Notify::new());
    let client_id = ctx
        .sessions
        .write()
        .await
        .add_session(addr, outbox, Arc::clone(&closed));

    let Some(client_id) = client_id else {
        warn!("Server full, closing connection from {}", addr);
        return;
    };

    let (reader, writer) = stream.into_split();
    tasks.spawn(write_loop(Arc::clone(ctx), client_id, writer, outbox_rx));
    tasks.spawn(read_loop(Arc::clone(ctx), client_id, reader, closed));
}

/// Reads from one connection and dispatches its packets in arrival order.
///
/// Stops when the session is removed, the peer closes the socket, or read
/// errors exceed the configured ceiling.
async fn read_loop(
    ctx: Arc<ServerContext>,
    client_id: ClientId,
    mut reader: OwnedReadHalf,
    closed: Arc<Notify>,
) {
    let mut buffer = ReassemblyBuffer::new();
    let mut chunk = [0u8; MAX_PACKET_SIZE];

    loop {
        let read = tokio::select! {
            _ = closed.notified() => break,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                ctx.schedule_teardown(client_id, DisconnectReason::EndOfStream);
                break;
            }
            Ok(len) => {
                if let Err(e) = buffer.extend(&chunk[..len]) {
                    warn!("Client {}: {}", client_id, e);
                    continue;
                }

                for result in buffer.drain_packets() {
                    match result {
                        Ok(packet) => {
                            ctx.sessions.write().await.reset_io_errors(client_id);
                            dispatch(&ctx, client_id, packet).await;
                        }
                        Err(e) if e.requires_resync() => {
                            warn!("Client {}: {}, discarding buffered data", client_id, e);
                        }
                        Err(e) => warn!("Client {}: dropped frame: {}", client_id, e),
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                let Some(count) = ctx.sessions.write().await.record_io_error(client_id) else {
                    break;
                };

                if count > ctx.config.io_error_ceiling {
                    ctx.schedule_teardown(client_id, DisconnectReason::IoErrorCeiling(count));
                    break;
                }

                warn!("Client {}: read error {} ({}/{})", client_id, e, count, ctx.config.io_error_ceiling);
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }

    debug!("Reader for client {} stopped", client_id);
}

/// Writes queued frames to one connection until its session is dropped.
async fn write_loop(
    ctx: Arc<ServerContext>,
    client_id: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            match e.kind() {
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                    warn!("Client {}: connection lost while sending: {}", client_id, e);
                    ctx.schedule_teardown(client_id, DisconnectReason::SendFailed);
                    break;
                }
                _ => warn!("Client {}: dropping packet after send error: {}", client_id, e),
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Client {}: shutdown of write half failed: {}", client_id, e);
    }
    debug!("Writer for client {} stopped", client_id);
}

/// Periodically evicts sessions that never completed the ready handshake.
async fn run_handshake_checker(
    ctx: Arc<ServerContext>,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let expired = ctx.sessions.read().await.expired_handshakes(timeout);
                for client_id in expired {
                    info!("Client {} did not become ready within {:?}", client_id, timeout);
                    ctx.schedule_teardown(client_id, DisconnectReason::HandshakeTimeout);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
