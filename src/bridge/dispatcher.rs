//! Command dispatcher with statum state machine
//!
//! Each delivery on a command topic runs its own [`CommandRun`] through
//!
//! ```text
//! Idle ──(Trigger)──► Fetching ──► Publishing ──► Idle
//!   │
//!   └──(Other)──► ignored
//! ```
//!
//! Runs are spawned as independent tasks and never queued behind each other,
//! so two triggers in quick succession fetch from the account concurrently.
//! That overlap is accepted; the account client is shared and `Sync`.
//!
//! Remote failures are logged and do not abort a run: the zero snapshot is
//! published in place of a failed fetch and the completion signal always
//! follows.

use std::sync::Arc;

use statum::{machine, state};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::mqtt::message::{BusMessage, Command, PublishedFact, TopicNamespace};
use crate::mqtt::mqtt_handler::Publisher;
use crate::telemetry::decompose::{
    battery_readings, daily_readings, Reading, BATTERY_CATEGORY, DAILY_CATEGORY,
};
use crate::telemetry::units::UnitSystem;
use crate::telemetry::{BatteryStatus, DailyStatistics, TelemetryAccount};

/// Which command topic a dispatcher serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Battery,
    Daily,
}

impl CommandKind {
    pub fn command_topic(&self, namespace: &TopicNamespace) -> String {
        match self {
            CommandKind::Battery => namespace.battery_command(),
            CommandKind::Daily => namespace.daily_command(),
        }
    }
}

/// Result of the fetch phase, consumed by the publish phase
#[derive(Debug, Clone)]
pub enum Snapshot {
    Battery(BatteryStatus),
    Daily(DailyStatistics),
}

/// Collaborators shared by every run
pub struct DispatchContext {
    pub account: Arc<dyn TelemetryAccount>,
    pub publisher: Arc<dyn Publisher>,
    pub namespace: TopicNamespace,
    pub units: UnitSystem,
}

#[state]
#[derive(Debug, Clone)]
pub enum CommandState {
    Idle,
    Fetching,
    Publishing(Snapshot),
}

#[machine]
pub struct CommandRun<S: CommandState> {
    kind: CommandKind,
    context: Arc<DispatchContext>,
}

impl CommandRun<Idle> {
    pub fn start(kind: CommandKind, context: Arc<DispatchContext>) -> Self {
        Self::new(kind, context)
    }

    /// Moves to Fetching on a trigger, stays idle on anything else
    pub fn accept(self, command: Command) -> Result<CommandRun<Fetching>, CommandRun<Idle>> {
        match command {
            Command::Trigger => Ok(self.transition()),
            Command::Other => Err(self),
        }
    }
}

impl CommandRun<Fetching> {
    pub async fn fetch(self) -> CommandRun<Publishing> {
        let snapshot = match self.kind {
            CommandKind::Battery => Snapshot::Battery(self.fetch_battery().await),
            CommandKind::Daily => Snapshot::Daily(self.fetch_daily().await),
        };
        self.transition_with(snapshot)
    }

    async fn fetch_battery(&self) -> BatteryStatus {
        let account = &self.context.account;

        match account.update_status().await {
            Ok(key) => debug!("Battery update requested (key {})", key),
            Err(e) => error!("Error during carwings battery-update: {}", e),
        }

        match account.battery_status().await {
            Ok(status) => status,
            Err(e) => {
                error!("Error during carwings battery-status: {}", e);
                BatteryStatus::default()
            }
        }
    }

    async fn fetch_daily(&self) -> DailyStatistics {
        let today = chrono::Local::now().date_naive();

        match self.context.account.daily_statistics(today).await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Error during carwings daily-statistics for {}: {}", today, e);
                DailyStatistics::default()
            }
        }
    }
}

impl CommandRun<Publishing> {
    /// Publishes every reading in order, then the completion signal
    pub fn publish(self) -> CommandRun<Idle> {
        let context = &self.context;
        let command_topic = self.kind.command_topic(&context.namespace);

        let (category, readings) = match self.get_state_data() {
            Some(Snapshot::Battery(status)) => {
                (BATTERY_CATEGORY, battery_readings(status, context.units))
            }
            Some(Snapshot::Daily(stats)) => (DAILY_CATEGORY, daily_readings(stats)),
            None => {
                error!("Publishing without a snapshot for {}", command_topic);
                (BATTERY_CATEGORY, Vec::new())
            }
        };

        let count = readings.len();
        for Reading {
            field,
            value,
            retained,
        } in readings
        {
            context.publisher.publish(PublishedFact::new(
                context.namespace.topic(category, field),
                value,
                retained,
            ));
        }
        context
            .publisher
            .publish(PublishedFact::completion(command_topic.clone()));

        info!("Published {} {} values, {} is ready", count, category, command_topic);
        self.transition()
    }
}

/// Runs one delivery through the state machine, returns whether it triggered
pub async fn run_command(kind: CommandKind, context: Arc<DispatchContext>, message: BusMessage) -> bool {
    let run = CommandRun::start(kind, context);

    match run.accept(message.command()) {
        Ok(fetching) => {
            info!(
                "Trigger received on {} at {}",
                message.topic,
                message.received_at.format("%H:%M:%S")
            );
            fetching.fetch().await.publish();
            true
        }
        Err(_idle) => {
            debug!("Ignoring non-trigger message {}", message);
            false
        }
    }
}

/// Drains one subscription and spawns a run per delivery
pub struct CommandDispatcher {
    kind: CommandKind,
    context: Arc<DispatchContext>,
}

impl CommandDispatcher {
    pub fn new(kind: CommandKind, context: Arc<DispatchContext>) -> Self {
        Self { kind, context }
    }

    pub fn command_topic(&self) -> String {
        self.kind.command_topic(&self.context.namespace)
    }

    pub fn spawn(
        self,
        mut receiver: mpsc::Receiver<BusMessage>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let topic = self.command_topic();
        info!("Spawning {:?} command dispatcher for {}", self.kind, topic);

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = receiver.recv() => message,
                };
                let Some(message) = message else {
                    debug!("Subscription channel for {} closed", topic);
                    break;
                };

                let context = self.context.clone();
                let kind = self.kind;
                tokio::spawn(async move {
                    run_command(kind, context, message).await;
                });
            }
            info!("Command dispatcher for {} stopped", topic);
        })
    }
}
