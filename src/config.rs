use std::env;
use std::time::Duration;

/// Well-known automation port, shared with the client tooling.
pub const DEFAULT_PORT: u16 = 4939;
/// Workers servicing connections concurrently; excess connections queue.
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5000;

/// Server construction parameters, fixed once the server exists.
///
/// [`ServerConfig::from_env`] also honors:
///
/// ```text
/// UIPROBE_PORT                listening port
/// UIPROBE_WORKERS             worker pool size
/// UIPROBE_SESSION_TIMEOUT_MS  per-connection idle read timeout
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub workers: usize,
    pub session_read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            session_read_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(port) = env::var("UIPROBE_PORT").ok().and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(workers) = env::var("UIPROBE_WORKERS").ok().and_then(|v| v.parse::<usize>().ok()) {
            // Zero workers would leave the queue unserviced.
            if workers > 0 {
                config.workers = workers;
            }
        }
        if let Some(ms) = env::var("UIPROBE_SESSION_TIMEOUT_MS").ok().and_then(|v| v.parse::<u64>().ok()) {
            // A zero read timeout is rejected by the socket layer.
            if ms > 0 {
                config.session_read_timeout = Duration::from_millis(ms);
            }
        }
        config
    }
}
