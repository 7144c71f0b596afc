//! Service wiring
//!
//! Builds the ports (PostgreSQL and NATS JetStream when configured, in memory
//! otherwise), the orchestrator and the notification fan-out, then starts the
//! background tasks:
//!
//! ```text
//!   command ──► Orchestrator ──► outbox ──► OutboxPublisher ──► bus
//!                    ▲                                          │
//!                    └── workflow consumer ◄── pump ◄───────────┤
//!                                                               │
//!        NotificationFanout ◄── notification consumer ◄── pump ◄┘
//!   SlaSweeper ──► Orchestrator (escalations)
//! ```
//!
//! Every task watches the same shutdown channel. On shutdown a pump hands
//! what its feed already holds to the consumer, and the consumer drains its
//! queues before the task ends.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use domain_workflow::{Topic, TransitionValidator};
use infra_bus::NatsEventBus;
use infra_db::{
    create_pool, run_migrations, DatabaseConfig, PgDeadLetterSink, PgDeliveryLedger,
    PgWorkflowStore,
};
use workflow_engine::adapters::memory::{
    InMemoryDeadLetters, InMemoryDeliveryLedger, InMemoryEventBus, InMemoryWorkflowStore,
};
use workflow_engine::{
    DeadLetterSink, Delivery, DeliveryLedger, EngineConfig, EngineError, EventBus, EventSource,
    NotificationDelivery, NotificationFanout, Orchestrator, OutboxPublisher, OutboxStore,
    PartitionedConsumer, ProjectionStore, SlaSweeper,
};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::AppState;

/// Every port one service talks to
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn ProjectionStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub bus: Arc<dyn EventBus>,
    /// Feeds the consumers; usually the same broker as `bus`
    pub source: Arc<dyn EventSource>,
}

impl Ports {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        Self {
            store: store.clone(),
            outbox: store,
            dead_letters: Arc::new(InMemoryDeadLetters::new()),
            ledger: Arc::new(InMemoryDeliveryLedger::new()),
            bus: bus.clone(),
            source: bus,
        }
    }

    /// Connects, migrates and wraps the pool in the PostgreSQL adapters
    ///
    /// The bus stays in process until [`Ports::with_bus`] replaces it.
    pub async fn postgres(database: &DatabaseConfig) -> Result<Self, ServiceError> {
        let pool = create_pool(database).await?;
        run_migrations(&pool).await?;

        let store = Arc::new(PgWorkflowStore::new(pool.clone()));
        let bus = Arc::new(InMemoryEventBus::new());
        Ok(Self {
            store: store.clone(),
            outbox: store,
            dead_letters: Arc::new(PgDeadLetterSink::new(pool.clone())),
            ledger: Arc::new(PgDeliveryLedger::new(pool)),
            bus: bus.clone(),
            source: bus,
        })
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>, source: Arc<dyn EventSource>) -> Self {
        self.bus = bus;
        self.source = source;
        self
    }

    pub async fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let ports = match &config.database {
            Some(database) => Self::postgres(database).await?,
            None => {
                warn!("No database configured; projections and outbox live in memory");
                Self::in_memory()
            }
        };

        match &config.bus {
            Some(bus) => {
                let nats = Arc::new(NatsEventBus::connect(bus, &config.service_name).await?);
                Ok(ports.with_bus(nats.clone(), nats))
            }
            None => {
                warn!("No bus configured; events only reach this process");
                Ok(ports)
            }
        }
    }
}

/// One wired workflow service
pub struct Service {
    name: Arc<str>,
    engine: EngineConfig,
    ports: Ports,
    orchestrator: Arc<Orchestrator>,
    fanout: Arc<NotificationFanout>,
}

impl Service {
    pub fn new(
        config: &ServiceConfig,
        validator: Arc<TransitionValidator>,
        ports: Ports,
        notifier: Arc<dyn NotificationDelivery>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            config.service_name.clone(),
            validator,
            config.variants.iter().copied(),
            ports.store.clone(),
            ports.dead_letters.clone(),
            config.engine.reorder.clone(),
        ));
        let fanout = Arc::new(NotificationFanout::new(notifier, ports.ledger.clone()));

        Self {
            name: Arc::from(config.service_name.as_str()),
            engine: config.engine.clone(),
            ports,
            orchestrator,
            fanout,
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub fn state(&self) -> AppState {
        AppState {
            service_name: self.name.clone(),
            orchestrator: self.orchestrator.clone(),
            store: self.ports.store.clone(),
        }
    }

    /// Spawns consumers, bus pumps, the outbox publisher and the SLA sweeper
    ///
    /// Both feeds subscribe under names derived from this service's name, so
    /// every service keeps its own position on the bus. Nothing is spawned
    /// when a subscription fails.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Running, ServiceError> {
        let engine = &self.engine;
        let source = &self.ports.source;
        let workflow_feed = source
            .subscribe(&self.name, &Topic::ALL)
            .await
            .map_err(EngineError::from)?;
        let notification_feed = source
            .subscribe(&format!("{}-notifications", self.name), &[Topic::Pcic, Topic::Notifications])
            .await
            .map_err(EngineError::from)?;

        let mut tasks = Vec::new();
        let workflow = PartitionedConsumer::spawn(
            self.orchestrator.clone(),
            self.ports.dead_letters.clone(),
            engine.retry.clone(),
            engine.workers,
            engine.channel_capacity,
        );
        tasks.push((
            "workflow-pump",
            tokio::spawn(pump("workflow", workflow_feed, workflow, shutdown.clone())),
        ));

        let notifications = PartitionedConsumer::spawn(
            self.fanout.clone(),
            self.ports.dead_letters.clone(),
            engine.retry.clone(),
            engine.workers,
            engine.channel_capacity,
        );
        tasks.push((
            "notification-pump",
            tokio::spawn(pump("notifications", notification_feed, notifications, shutdown.clone())),
        ));

        let publisher = Arc::new(OutboxPublisher::new(
            self.ports.outbox.clone(),
            self.ports.bus.clone(),
            engine.retry.clone(),
            engine.outbox.clone(),
        ));
        tasks.push(("outbox-publisher", tokio::spawn(publisher.run(shutdown.clone()))));

        let sweeper = Arc::new(SlaSweeper::new(
            self.ports.store.clone(),
            self.orchestrator.clone(),
            engine.sla.clone(),
        ));
        tasks.push(("sla-sweeper", tokio::spawn(sweeper.run(shutdown))));

        info!(service = %self.name, tasks = tasks.len(), "Background tasks started");
        Ok(Running { tasks })
    }
}

/// Handles of the background tasks
pub struct Running {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Running {
    /// Waits for every task to stop
    pub async fn join(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Background task failed");
            }
        }
    }
}

/// Forwards bus deliveries into a consumer until shutdown, then drains both
async fn pump(
    name: &'static str,
    mut feed: mpsc::UnboundedReceiver<Delivery>,
    consumer: PartitionedConsumer,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            delivery = feed.recv() => match delivery {
                Some(delivery) => {
                    if let Err(e) = consumer.dispatch(delivery).await {
                        warn!(pump = name, error = %e, "Consumer stopped accepting deliveries");
                        break;
                    }
                }
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let mut handed_over = 0usize;
                    while let Ok(delivery) = feed.try_recv() {
                        if consumer.dispatch(delivery).await.is_err() {
                            break;
                        }
                        handed_over += 1;
                    }
                    if handed_over > 0 {
                        info!(pump = name, deliveries = handed_over, "Handed buffered deliveries to consumer");
                    }
                    break;
                }
            }
        }
    }

    consumer.close().await;
    info!(pump = name, "Bus pump stopped");
}
