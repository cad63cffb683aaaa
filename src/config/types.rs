//! Configuration Types

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub transport: TransportConfig,
    pub events: EventConfig,
    pub monitoring: MonitoringConfig,
}

/// Size limits forwarded to the WebSocket protocol layer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    pub max_message_size: usize,
    pub max_frame_size: usize,
}

/// Event delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    /// Capacity of the subscriber channel; a full channel applies
    /// backpressure to the socket tasks
    pub channel_capacity: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                max_message_size: 64 << 20,
                max_frame_size: 16 << 20,
            },
            events: EventConfig {
                channel_capacity: 256,
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
