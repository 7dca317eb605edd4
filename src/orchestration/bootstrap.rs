//! # Engine Bootstrap
//!
//! Wires a running engine: loads configuration, builds the partitioned
//! event bus, subscribes the dispatcher to every lifecycle topic and starts
//! the background loops (SLA monitor, compensation retrier, notification
//! retry). All of them stop on the same shutdown signal.

use super::compensation::CompensationRetrier;
use super::engine::CarePathwayEngine;
use super::event_dispatcher::EventDispatcher;
use super::sla_monitor::SlaMonitor;
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigManager;
use crate::constants::{groups, topics};
use crate::error::Result;
use crate::events::{EventBus, PartitionedEventBus};
use crate::notification::{LoggingNotificationProvider, NotificationProvider, NotificationService};
use crate::repository::{InMemoryRepository, Repository};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running engine with its bus consumers and background loops
pub struct EngineSystem {
    engine: Arc<CarePathwayEngine>,
    bus: Arc<PartitionedEventBus>,
    shutdown_sender: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    environment: String,
}

/// System status information
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub bus_partitions: usize,
    pub background_workers: usize,
    pub events_published: u64,
    pub events_delivered: u64,
    pub handler_errors: u64,
}

impl EngineSystem {
    /// Subscribe the dispatcher, start the bus and spawn the background loops
    pub fn start(engine: Arc<CarePathwayEngine>, bus: Arc<PartitionedEventBus>) -> Result<Self> {
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&engine)));
        let subscriptions = [
            (topics::TASK_EVENTS, groups::TASK_CONSUMER),
            (topics::ORDER_EVENTS, groups::ORDER_CONSUMER),
            (topics::WORKFLOW_EVENTS, groups::WORKFLOW_CONSUMER),
        ];
        for (topic, group) in subscriptions {
            bus.subscribe(topic, group, dispatcher.clone());
        }

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mut workers = bus.start(shutdown_receiver.clone())?;

        let config = engine.config().clone();
        if config.sla.enabled {
            let monitor = SlaMonitor::new(Arc::clone(&engine));
            workers.push(tokio::spawn(monitor.run(shutdown_receiver.clone())));
        } else {
            info!("SLA monitor disabled");
        }

        let retrier = CompensationRetrier::new(
            Arc::clone(engine.compensation()),
            config.compensation.retry_interval(),
        );
        workers.push(tokio::spawn(retrier.run(shutdown_receiver.clone())));

        let notifications = Arc::clone(engine.notifications());
        workers.push(tokio::spawn(notifications.run_retry_loop(
            config.notifications.retry_interval(),
            shutdown_receiver,
        )));

        info!(
            partitions = bus.partition_count(),
            workers = workers.len(),
            "Care pathway engine started"
        );

        Ok(Self {
            engine,
            bus,
            shutdown_sender,
            workers,
            environment: crate::logging::get_environment(),
        })
    }

    pub fn engine(&self) -> &Arc<CarePathwayEngine> {
        &self.engine
    }

    pub fn bus(&self) -> &Arc<PartitionedEventBus> {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_sender.borrow()
    }

    pub fn status(&self) -> SystemStatus {
        let (published, delivered, handler_errors) = self.bus.stats().snapshot();
        SystemStatus {
            running: self.is_running(),
            environment: self.environment.clone(),
            bus_partitions: self.bus.partition_count(),
            background_workers: self.workers.iter().filter(|w| !w.is_finished()).count(),
            events_published: published,
            events_delivered: delivered,
            handler_errors,
        }
    }

    /// Signal shutdown and wait for every worker to stop
    pub async fn shutdown(self) -> anyhow::Result<()> {
        if self.shutdown_sender.send(true).is_err() {
            warn!("All workers already stopped");
        }

        let count = self.workers.len();
        for worker in self.workers {
            worker.await.context("background worker panicked")?;
        }

        info!(workers = count, "Care pathway engine stopped");
        Ok(())
    }
}

/// Where to load configuration from
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = ./config)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
}

pub struct EngineBootstrap;

impl EngineBootstrap {
    /// Start an engine over the in-memory repository with log-only delivery
    pub async fn bootstrap(config: BootstrapConfig) -> anyhow::Result<EngineSystem> {
        Self::bootstrap_with(
            config,
            Arc::new(InMemoryRepository::new()),
            Arc::new(LoggingNotificationProvider),
            Arc::new(SystemClock),
        )
        .await
    }

    pub async fn bootstrap_with(
        config: BootstrapConfig,
        repository: Arc<dyn Repository>,
        provider: Arc<dyn NotificationProvider>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<EngineSystem> {
        let config_manager = match &config.environment_override {
            Some(environment) => {
                ConfigManager::load_from_directory_with_env(config.config_directory.clone(), environment)
            }
            None => ConfigManager::load_from_directory(config.config_directory.clone()),
        }
        .context("failed to load engine configuration")?;

        info!(
            environment = config_manager.environment(),
            "Configuration loaded for bootstrap"
        );

        let engine_config = config_manager.config().clone();
        let bus = Arc::new(PartitionedEventBus::new(
            engine_config.dispatcher.worker_count,
            engine_config.dispatcher.channel_capacity,
        ));
        let notifications = Arc::new(NotificationService::new(
            provider,
            Arc::clone(&clock),
            engine_config.notifications.clone(),
        ));
        let engine = Arc::new(CarePathwayEngine::new(
            repository,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            clock,
            engine_config,
            notifications,
        ));

        let system = EngineSystem::start(engine, bus).context("failed to start engine")?;
        Ok(system)
    }
}
