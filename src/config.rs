//! Configuration module - environment-based configuration
//!
//! Matches the deployment environment: every worker instance is configured
//! through `AQUEDUCT_*` variables (a `.env` file is honored in development).

use std::env;
use std::path::PathBuf;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker identity; part of the socket identity on the results channel.
    pub worker_id: String,
    /// Max concurrent workflows (>= 1).
    pub capacity: usize,
    /// Directory holding `client.key_secret` and `server.key_secret`.
    pub keys_path: PathBuf,
    pub results_address: String,
    pub control_address: String,

    // Request queue (Redis REST)
    pub queue_url: String,
    pub queue_token: String,
    pub queue_key: String,

    // Operator health surface
    pub health_addr: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let worker_id =
            env::var("AQUEDUCT_WORKER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let capacity = env::var("AQUEDUCT_CAPACITY")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .unwrap_or(8)
            .max(1);

        Self {
            worker_id,
            capacity,
            keys_path: env::var("AQUEDUCT_KEYS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".keys")),
            results_address: env::var("AQUEDUCT_RESULTS_ADDRESS")
                .unwrap_or_else(|_| "tcp://127.0.0.1:5556".to_string()),
            control_address: env::var("AQUEDUCT_CONTROL_ADDRESS")
                .unwrap_or_else(|_| "tcp://127.0.0.1:5557".to_string()),
            queue_url: env::var("AQUEDUCT_QUEUE_URL").unwrap_or_default(),
            queue_token: env::var("AQUEDUCT_QUEUE_TOKEN").unwrap_or_default(),
            queue_key: env::var("AQUEDUCT_QUEUE_KEY")
                .unwrap_or_else(|_| "request_queue".to_string()),
            health_addr: env::var("AQUEDUCT_HEALTH_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8099".to_string()),
        }
    }

    /// Stable client identity on the secured channels, ASCII.
    pub fn socket_identity(&self) -> String {
        format!("Worker-{}", self.worker_id)
    }
}
