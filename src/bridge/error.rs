//! Error definitions for the bridge lifecycle

use thiserror::Error;

use crate::mqtt::mqtt_handler::SessionError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Session setup failed; the initial connect is never retried locally
    #[error("MQTT session error: {0}")]
    Session(#[from] SessionError),

    /// A dispatcher task panicked or was aborted
    #[error("Dispatcher task failed: {0}")]
    TaskFailed(String),
}
