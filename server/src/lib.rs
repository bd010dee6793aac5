//! # Tiger Arena Server Library
//!
//! Authoritative TCP server for a small multiplayer survival scene. Players
//! log in with a unique name, receive the world (tigers and trees), and
//! stream their own position to each other through the server. The server
//! owns the tigers and simulates them at a fixed step.
//!
//! ## Architecture
//!
//! ### Connections
//! Every accepted connection gets a reader task and a writer task. The reader
//! reassembles length-prefixed frames and hands each packet to the
//! dispatcher before reading again, so one client's packets are handled in
//! the order they arrived. The writer drains a bounded outbox; sends never
//! wait on a slow peer.
//!
//! ### Shared state
//! [`context::ServerContext`] holds the session table and the world, each
//! behind its own lock. The two locks are never held together.
//!
//! ### Session lifecycle
//! `Anonymous -> LoginPending -> LoggedIn -> Ready -> Disconnected`. Only
//! ready sessions are part of the roster that receives player and tiger
//! updates.
//!
//! ### Simulation
//! Tigers search, chase and attack the nearest player. The loop checks the
//! clock every 10ms and advances the world by exactly one 50ms step whenever
//! that much time has passed.
//!
//! ## Modules
//!
//! - `network`: listener, per-connection tasks, shutdown
//! - `session`, `session_manager`: per-client state and the session table
//! - `dispatcher`: maps each packet to an action for its session
//! - `simulation`, `tiger`, `world`, `physics`: the tiger simulation
//! - `config`, `error`: settings and startup failures
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod network;
pub mod physics;
pub mod session;
pub mod session_manager;
pub mod simulation;
pub mod tiger;
pub mod world;

pub use config::ServerConfig;
pub use error::ServerError;
pub use network::{Server, ServerHandle};
