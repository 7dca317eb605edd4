//! # Event Bus
//!
//! In-process, partitioned delivery of lifecycle events.
//!
//! Each published event is routed by its key onto one of N partitions. A
//! single consumer task drains each partition, so events sharing a key are
//! handled strictly in order and never concurrently, while different keys
//! proceed in parallel on other partitions.
//!
//! External publishers wait on a bounded channel per partition. Events
//! published from inside a handler go to an unbounded follow-up channel
//! instead, which the consumer drains before taking new external work, so a
//! consumer never waits on a queue only it can empty.

use super::types::LifecycleEvent;
use crate::error::{CarePathwayError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task_local;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[async_trait]
pub trait EventBus: Send + Sync + fmt::Debug {
    async fn publish(&self, topic: &str, key: Uuid, event: LifecycleEvent) -> Result<()>;
}

/// Consumer of delivered events
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: LifecycleEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub key: Uuid,
    pub event: LifecycleEvent,
}

struct Subscription {
    topic: String,
    group: String,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Default)]
pub struct BusStats {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub handler_errors: AtomicU64,
}

impl BusStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.published.load(Ordering::Relaxed),
            self.delivered.load(Ordering::Relaxed),
            self.handler_errors.load(Ordering::Relaxed),
        )
    }
}

task_local! {
    /// Set while a partition consumer runs its handlers
    static CONSUMER_PARTITION: usize;
}

/// Both inboxes of one partition
struct PartitionReceivers {
    external: mpsc::Receiver<Delivery>,
    follow_ups: mpsc::UnboundedReceiver<Delivery>,
}

pub struct PartitionedEventBus {
    senders: Vec<mpsc::Sender<Delivery>>,
    follow_up_senders: Vec<mpsc::UnboundedSender<Delivery>>,
    receivers: Mutex<Option<Vec<PartitionReceivers>>>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    observer: broadcast::Sender<Delivery>,
    stats: Arc<BusStats>,
}

impl fmt::Debug for PartitionedEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedEventBus")
            .field("partitions", &self.senders.len())
            .field("subscriptions", &self.subscriptions.read().len())
            .finish()
    }
}

impl PartitionedEventBus {
    pub fn new(partitions: usize, capacity: usize) -> Self {
        let partitions = partitions.max(1);
        let capacity = capacity.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut follow_up_senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (sender, external) = mpsc::channel(capacity);
            let (follow_up_sender, follow_ups) = mpsc::unbounded_channel();
            senders.push(sender);
            follow_up_senders.push(follow_up_sender);
            receivers.push(PartitionReceivers {
                external,
                follow_ups,
            });
        }
        let (observer, _) = broadcast::channel(capacity);

        Self {
            senders,
            follow_up_senders,
            receivers: Mutex::new(Some(receivers)),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            observer,
            stats: Arc::new(BusStats::default()),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.senders.len()
    }

    pub fn partition_for(&self, key: Uuid) -> usize {
        (key.as_u128() % self.senders.len() as u128) as usize
    }

    /// Register a handler for a topic under a consumer group
    pub fn subscribe(&self, topic: &str, group: &str, handler: Arc<dyn EventHandler>) {
        info!(topic = topic, group = group, handler = handler.name(), "Subscribing handler");
        self.subscriptions.write().push(Subscription {
            topic: topic.to_string(),
            group: group.to_string(),
            handler,
        });
    }

    /// Passive tap on everything published, for monitoring
    pub fn observe(&self) -> broadcast::Receiver<Delivery> {
        self.observer.subscribe()
    }

    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn one consumer per partition. Can only be called once.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let receivers = self
            .receivers
            .lock()
            .take()
            .ok_or_else(|| CarePathwayError::Internal("Event bus already started".to_string()))?;

        let handles = receivers
            .into_iter()
            .enumerate()
            .map(|(partition, receiver)| {
                let subscriptions = Arc::clone(&self.subscriptions);
                let stats = Arc::clone(&self.stats);
                let shutdown = shutdown.clone();
                tokio::spawn(CONSUMER_PARTITION.scope(
                    partition,
                    run_partition(partition, receiver, subscriptions, stats, shutdown),
                ))
            })
            .collect();

        info!(partitions = self.senders.len(), "Event bus started");
        Ok(handles)
    }
}

#[async_trait]
impl EventBus for PartitionedEventBus {
    async fn publish(&self, topic: &str, key: Uuid, event: LifecycleEvent) -> Result<()> {
        let partition = self.partition_for(key);
        let delivery = Delivery {
            topic: topic.to_string(),
            key,
            event,
        };

        // No observers is fine
        let _ = self.observer.send(delivery.clone());

        let sent = if CONSUMER_PARTITION.try_with(|_| ()).is_ok() {
            // Any consumer may be the one draining the target partition
            self.follow_up_senders[partition].send(delivery).is_ok()
        } else {
            self.senders[partition].send(delivery).await.is_ok()
        };
        if !sent {
            return Err(CarePathwayError::Event(format!("Partition {partition} is closed")));
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

async fn run_partition(
    partition: usize,
    mut receiver: PartitionReceivers,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    stats: Arc<BusStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(partition = partition, "Partition consumer started");
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(delivery) = receiver.follow_ups.recv() => {
                deliver(&delivery, &subscriptions, &stats).await;
            }
            delivery = receiver.external.recv() => {
                let Some(delivery) = delivery else { break };
                deliver(&delivery, &subscriptions, &stats).await;
            }
        }
    }
    debug!(partition = partition, "Partition consumer stopped");
}

async fn deliver(delivery: &Delivery, subscriptions: &RwLock<Vec<Subscription>>, stats: &BusStats) {
    let targets: Vec<(String, Arc<dyn EventHandler>)> = subscriptions
        .read()
        .iter()
        .filter(|sub| sub.topic == delivery.topic)
        .map(|sub| (sub.group.clone(), Arc::clone(&sub.handler)))
        .collect();

    for (group, handler) in targets {
        match handler.handle(delivery.event.clone()).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    group = %group,
                    handler = handler.name(),
                    event_type = delivery.event.event_type(),
                    key = %delivery.key,
                    error = %error,
                    "Event handler failed; event dropped"
                );
            }
        }
    }
}

/// Bus that only records what was published.
///
/// Lets callers run the engine without consumers and feed events to a
/// dispatcher by hand, one step at a time.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<Delivery>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.published
            .lock()
            .iter()
            .map(|delivery| delivery.event.clone())
            .collect()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.published
            .lock()
            .iter()
            .map(|delivery| delivery.event.event_type())
            .collect()
    }

    /// Take everything recorded so far
    pub fn drain(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.published.lock())
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, topic: &str, key: Uuid, event: LifecycleEvent) -> Result<()> {
        self.published.lock().push(Delivery {
            topic: topic.to_string(),
            key,
            event,
        });
        Ok(())
    }
}
