//! Broker session
//!
//! Owns the single `rumqttc` connection of the bridge. The initial handshake is
//! awaited in the caller's task; afterwards a background task keeps polling the
//! event loop, which is what makes `rumqttc` reconnect after a transport loss.
//!
//! ```text
//!             ┌──────────── ConnAck ────────────┐
//!             ▼                                  │
//! Connecting ──► Connected ──► Reconnecting ─────┘
//!     │             (error, back-off, poll again)
//!     └──► Failed (initial handshake only: fatal)
//! ```
//!
//! Every successful ConnAck re-issues the SUBSCRIBE for every registered
//! command topic; subscriptions are never assumed to survive a reconnect.

use std::fmt;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, Publish,
    QoS,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ConnectionParams;
use super::message::{BusMessage, PublishedFact};

/// How long one handshake wait slice lasts before it is logged
pub const HANDSHAKE_WAIT: Duration = Duration::from_secs(3);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 100;
const SUBSCRIPTION_CAPACITY: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The initial handshake did not succeed, fatal for the bridge
    #[error("Connection to broker failed: {0}")]
    ConnectionFailed(String),

    /// Transport dropped after a successful connect, recovered automatically
    #[error("Connection to broker lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid broker url: {0}")]
    InvalidBrokerUrl(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub last_error: Option<String>,
    pub messages_received: usize,
    pub reconnects: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

/// Fire-and-forget sink for bridge output
///
/// Delivery is at most once; failures are absorbed by the implementation.
pub trait Publisher: Send + Sync {
    fn publish(&self, fact: PublishedFact);
}

/// The part of the MQTT client the session needs to (re-)install subscriptions
pub trait SubscribeClient: Send {
    fn request_subscription(&self, topic: &str) -> Result<(), ClientError>;
}

impl SubscribeClient for AsyncClient {
    fn request_subscription(&self, topic: &str) -> Result<(), ClientError> {
        self.try_subscribe(topic, QoS::AtMostOnce)
    }
}

/// A command topic together with the channel its deliveries go to
pub struct Subscription {
    topic: String,
    sender: mpsc::Sender<BusMessage>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>) -> (Self, mpsc::Receiver<BusMessage>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        (
            Self {
                topic: topic.into(),
                sender,
            },
            receiver,
        )
    }
}

/// What a single event loop event meant for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Connected,
    Refused(ConnectReturnCode),
    Delivered,
    Unrouted,
    Idle,
}

/// Event handling of the session, independent of the socket
///
/// Holds the subscriptions, reinstalls them on every ConnAck, routes inbound
/// publishes to their subscription channel and tracks the reconnect back-off.
pub struct SessionDriver<C: SubscribeClient> {
    client: C,
    subscriptions: Vec<Subscription>,
    status: watch::Sender<SessionStatus>,
    backoff: Duration,
}

impl<C: SubscribeClient> SessionDriver<C> {
    pub fn new(client: C, subscriptions: Vec<Subscription>) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            connection_state: ConnectionState::Connecting,
            ..SessionStatus::default()
        });
        Self {
            client,
            subscriptions,
            status,
            backoff: INITIAL_BACKOFF,
        }
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn handle_event(&mut self, event: &Event) -> SessionSignal {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                self.on_connect(ack.session_present);
                SessionSignal::Connected
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                self.on_refused(ack.code);
                SessionSignal::Refused(ack.code)
            }
            Event::Incoming(Packet::Publish(publish)) => {
                if self.route(publish) {
                    SessionSignal::Delivered
                } else {
                    SessionSignal::Unrouted
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!("Subscription acknowledged (pkid {})", ack.pkid);
                SessionSignal::Idle
            }
            _ => SessionSignal::Idle,
        }
    }

    /// Records a transport loss and returns how long to wait before polling again
    pub fn connection_lost(&mut self, cause: &impl fmt::Display) -> Duration {
        let error = SessionError::ConnectionLost(cause.to_string());
        warn!("{}, retrying in {:?}", error, self.backoff);

        self.status.send_modify(|status| {
            status.connection_state = ConnectionState::Reconnecting;
            status.last_error = Some(error.to_string());
            status.reconnects += 1;
        });

        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn mark_failed(&mut self, cause: &impl fmt::Display) {
        self.status.send_modify(|status| {
            status.connection_state = ConnectionState::Failed;
            status.last_error = Some(cause.to_string());
        });
    }

    pub fn mark_disconnected(&mut self) {
        self.status.send_modify(|status| {
            status.connection_state = ConnectionState::Disconnected;
        });
    }

    fn on_connect(&mut self, session_present: bool) {
        info!(
            "Connected to broker (session present: {}), installing {} subscriptions",
            session_present,
            self.subscriptions.len()
        );
        self.backoff = INITIAL_BACKOFF;

        for subscription in &self.subscriptions {
            match self.client.request_subscription(&subscription.topic) {
                Ok(()) => info!("Subscribed to {}", subscription.topic),
                Err(e) => error!("Failed to subscribe to {}: {}", subscription.topic, e),
            }
        }

        self.status.send_modify(|status| {
            status.connection_state = ConnectionState::Connected;
            status.last_error = None;
            status.last_activity = Some(chrono::Local::now());
        });
    }

    fn on_refused(&mut self, code: ConnectReturnCode) {
        error!("Broker refused connection: {:?}", code);
        self.mark_failed(&format!("refused: {:?}", code));
    }

    fn route(&mut self, publish: &Publish) -> bool {
        let message = BusMessage::new(publish.topic.clone(), publish.payload.to_vec());
        info!("Incoming mqtt message -> {}", message);

        self.status.send_modify(|status| {
            status.messages_received += 1;
            status.last_activity = Some(chrono::Local::now());
        });

        let Some(subscription) = self
            .subscriptions
            .iter()
            .find(|s| s.topic == publish.topic)
        else {
            debug!("No subscription for topic {}", publish.topic);
            return false;
        };

        match subscription.sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Handler for {} is saturated, dropping {}", subscription.topic, dropped);
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!("Handler for {} is gone, dropping {}", subscription.topic, dropped);
                false
            }
        }
    }
}

/// Publisher backed by the session's MQTT client
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, fact: PublishedFact) {
        debug!(
            "Publishing [{}] {} (retained: {})",
            fact.topic, fact.value, fact.retained
        );
        if let Err(e) = self.client.try_publish(
            fact.topic,
            QoS::AtMostOnce,
            fact.retained,
            fact.value.into_bytes(),
        ) {
            debug!("Publish dropped: {}", e);
        }
    }
}

/// A connected broker session
pub struct BusSession {
    client: AsyncClient,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<()>,
    lost: CancellationToken,
}

impl BusSession {
    /// Connects and waits for the first ConnAck
    ///
    /// The wait is logged every [`HANDSHAKE_WAIT`] but never times out on its
    /// own; only an explicit failure ends it. Subscriptions are installed as
    /// part of the handshake and again after every reconnect.
    pub async fn connect(
        params: &ConnectionParams,
        subscriptions: Vec<Subscription>,
        shutdown: CancellationToken,
    ) -> Result<Self, SessionError> {
        info!(
            "Connecting to broker {}:{} as {}",
            params.host, params.port, params.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(params.to_mqtt_options(), REQUEST_CAPACITY);
        let mut driver = SessionDriver::new(client.clone(), subscriptions);
        let status = driver.status();

        await_handshake(&mut eventloop, &mut driver).await?;

        let auto_reconnect = params.auto_reconnect;
        let lost = CancellationToken::new();
        let task_lost = lost.clone();
        let task = tokio::spawn(async move {
            drive(eventloop, driver, auto_reconnect, shutdown, task_lost).await;
        });

        Ok(Self {
            client,
            status,
            task,
            lost,
        })
    }

    /// Resolves once the session has given up on the broker for good
    ///
    /// Only happens with auto-reconnect disabled; a requested shutdown does
    /// not resolve it.
    pub async fn lost(&self) {
        self.lost.cancelled().await
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Sends a DISCONNECT and waits briefly for the event loop task to stop
    pub async fn shutdown(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request dropped: {}", e);
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.task).await {
            Ok(Ok(())) => info!("MQTT session stopped"),
            Ok(Err(e)) => error!("MQTT session task failed: {}", e),
            Err(_) => warn!("MQTT session did not stop within {:?}", SHUTDOWN_GRACE),
        }
    }
}

async fn await_handshake(
    eventloop: &mut EventLoop,
    driver: &mut SessionDriver<AsyncClient>,
) -> Result<(), SessionError> {
    let mut slices: u64 = 0;

    loop {
        let polled = {
            let poll = eventloop.poll();
            tokio::pin!(poll);
            loop {
                tokio::select! {
                    polled = &mut poll => break polled,
                    _ = tokio::time::sleep(HANDSHAKE_WAIT) => {
                        slices += 1;
                        info!(
                            "Still waiting for broker handshake ({}s)",
                            slices * HANDSHAKE_WAIT.as_secs()
                        );
                    }
                }
            }
        };

        match polled {
            Ok(event) => match driver.handle_event(&event) {
                SessionSignal::Connected => return Ok(()),
                SessionSignal::Refused(code) => {
                    return Err(SessionError::ConnectionFailed(format!(
                        "broker refused connection: {:?}",
                        code
                    )))
                }
                _ => {}
            },
            Err(e) => {
                driver.mark_failed(&e);
                return Err(SessionError::ConnectionFailed(e.to_string()));
            }
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    mut driver: SessionDriver<AsyncClient>,
    auto_reconnect: bool,
    shutdown: CancellationToken,
    lost: CancellationToken,
) {
    debug!("MQTT event loop task started");

    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnect sent to broker");
                break;
            }
            Ok(event) => {
                driver.handle_event(&event);
            }
            Err(e) => {
                let delay = driver.connection_lost(&e);
                if !auto_reconnect {
                    error!("Auto-reconnect is disabled, stopping MQTT session");
                    lost.cancel();
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    driver.mark_disconnected();
}
