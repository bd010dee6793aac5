//! Runtime settings for the game server.

use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::DEFAULT_PORT;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IPv4 address to listen on
    pub host: String,
    pub port: u16,
    /// Size of the runtime's worker pool
    pub worker_threads: usize,
    /// Connections beyond this many live sessions are closed right after accept
    pub max_clients: usize,
    /// Consecutive read errors tolerated before a session is torn down
    pub io_error_ceiling: u32,
    pub tree_count: usize,
    /// Evicts sessions that have not become ready within this long. `None`
    /// keeps them indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// Upper bound on how long the tick loop sleeps between clock checks
    pub poll_interval: Duration,
    /// Fixed simulation step
    pub tick_step: Duration,
    /// Packets queued per session before further sends are dropped
    pub outbox_capacity: usize,
    /// Seed for world layout and tiger wandering; random when unset
    pub world_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            worker_threads: 2,
            max_clients: 64,
            io_error_ceiling: 10,
            tree_count: 3,
            handshake_timeout: None,
            poll_interval: Duration::from_millis(10),
            tick_step: Duration::from_millis(50),
            outbox_capacity: 1024,
            world_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn world_rng(&self) -> StdRng {
        match self.world_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.io_error_ceiling, 10);
        assert_eq!(config.tick_step, Duration::from_millis(50));
        assert!(config.handshake_timeout.is_none());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let config = ServerConfig {
            world_seed: Some(7),
            ..ServerConfig::default()
        };
        let a: u64 = config.world_rng().gen();
        let b: u64 = config.world_rng().gen();
        assert_eq!(a, b);
    }
}
