//! Bridge lifecycle
//!
//! Wires configuration, the broker session and the two command dispatchers
//! together, then parks until the process is asked to stop.
//!
//! ```text
//! broker ──► BusSession ──► [battery/update] ──► CommandDispatcher ──┐
//!               ▲        └─► [daily]         ──► CommandDispatcher ──┤
//!               │                                                    ▼
//!               └──────────── publish (QoS 0) ◄──── account + decomposer
//! ```
//!
//! A failed initial connect is returned to the caller as fatal. After that the
//! session recovers from transport loss on its own, and only a termination
//! signal ends [`run`]. With auto-reconnect disabled, the first loss ends it
//! with an error instead.

pub mod dispatcher;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use dispatcher::{CommandDispatcher, CommandKind, DispatchContext};
pub use error::BridgeError;

use crate::config::Config;
use crate::mqtt::config::{redact, unique_client_id, ConnectionParams};
use crate::mqtt::message::TopicNamespace;
use crate::mqtt::mqtt_handler::{BusSession, Publisher, SessionError, Subscription};
use crate::telemetry::TelemetryAccount;

/// Derives the broker parameters, with a client id unique to this start
pub fn connection_params(config: &Config) -> Result<ConnectionParams, BridgeError> {
    let mqtt = &config.mqtt;
    let url = mqtt.broker_url()?;
    info!("Broker target: {}", redact(&url));

    Ok(ConnectionParams::from_url(
        &url,
        unique_client_id(&mqtt.client_id_prefix),
        Duration::from_secs(mqtt.keep_alive_secs),
        mqtt.auto_reconnect,
    )?)
}

/// Runs the bridge until a termination signal arrives
pub async fn run(config: &Config, account: Arc<dyn TelemetryAccount>) -> Result<(), BridgeError> {
    let namespace = TopicNamespace::new(&config.mqtt.topic)?;
    let params = connection_params(config)?;
    let shutdown = CancellationToken::new();

    let (battery_subscription, battery_rx) = Subscription::new(namespace.battery_command());
    let (daily_subscription, daily_rx) = Subscription::new(namespace.daily_command());

    let session = BusSession::connect(
        &params,
        vec![battery_subscription, daily_subscription],
        shutdown.child_token(),
    )
    .await?;

    let publisher: Arc<dyn Publisher> = Arc::new(session.publisher());
    let context = Arc::new(DispatchContext {
        account,
        publisher,
        namespace: namespace.clone(),
        units: config.units,
    });

    let battery = CommandDispatcher::new(CommandKind::Battery, context.clone())
        .spawn(battery_rx, shutdown.child_token());
    let daily = CommandDispatcher::new(CommandKind::Daily, context)
        .spawn(daily_rx, shutdown.child_token());

    info!(
        "Bridge ready under {}: send \"1\" to {} or {} (units: {})",
        namespace.prefix(),
        namespace.battery_command(),
        namespace.daily_command(),
        config.units
    );

    let outcome = tokio::select! {
        _ = wait_for_termination() => {
            info!("Termination requested, stopping bridge");
            Ok(())
        }
        _ = session.lost() => {
            error!("Broker connection lost and auto-reconnect is disabled, stopping bridge");
            let cause = session
                .status()
                .borrow()
                .last_error
                .clone()
                .unwrap_or_else(|| "auto-reconnect disabled".to_string());
            Err(BridgeError::Session(SessionError::ConnectionLost(cause)))
        }
    };

    let status = session.status().borrow().clone();
    info!(
        "Session summary: {:?}, {} messages received, {} reconnects, last error: {}, last activity: {}",
        status.connection_state,
        status.messages_received,
        status.reconnects,
        status.last_error.as_deref().unwrap_or("none"),
        status
            .last_activity
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string())
    );

    session.shutdown().await;
    shutdown.cancel();

    for (name, handle) in [("battery", battery), ("daily", daily)] {
        if let Err(e) = handle.await {
            error!("{} dispatcher ended abnormally: {}", name, e);
            return Err(BridgeError::TaskFailed(e.to_string()));
        }
    }

    outcome
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = terminate.recv() => {},
            }
        }
        Err(e) => {
            error!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
