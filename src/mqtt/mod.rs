//! # MQTT Integration Module
//!
//! Bus side of the bridge: one resilient broker session that the command
//! dispatchers receive deliveries from and publish telemetry through.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs        - `[mqtt]` config section, broker URL and connection parameters
//! ├── message.rs       - Commands, inbound messages, published facts, topic namespace
//! └── mqtt_handler.rs  - Session lifecycle, reconnect handling and routing
//! ```
//!
//! ## Delivery Model
//!
//! The `rumqttc` event loop runs on its own task. Inbound publishes on a
//! command topic are forwarded into that subscription's channel, so a slow
//! handler never stalls the connection. Outbound publishes are QoS 0 and
//! fire-and-forget; nothing waits for the broker to acknowledge them.

pub mod config;
pub mod message;
pub mod mqtt_handler;
