use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{ProgressEvent, PING_FRAME};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub type ObserverId = Uuid;

/// Transport for one live observer.
#[async_trait]
pub trait ObserverSink: Send + Sync {
    async fn send_text(&self, text: String) -> anyhow::Result<()>;
}

/// Fans progress events out to every connected observer. Delivery is
/// best-effort and at-most-once; late joiners get no replay.
pub struct ProgressBroadcaster {
    observers: DashMap<ObserverId, Arc<dyn ObserverSink>>,
    heartbeats: DashMap<ObserverId, JoinHandle<()>>,
    heartbeat_interval: Duration,
}

impl ProgressBroadcaster {
    pub fn new(heartbeat_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            observers: DashMap::new(),
            heartbeats: DashMap::new(),
            heartbeat_interval,
        })
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    #[cfg(test)]
    pub fn is_connected(&self, id: &ObserverId) -> bool {
        self.observers.contains_key(id)
    }

    pub fn connect(self: &Arc<Self>, sink: Arc<dyn ObserverSink>) -> ObserverId {
        let id = Uuid::new_v4();
        self.observers.insert(id, sink);

        let handle = tokio::spawn(heartbeat(Arc::downgrade(self), id, self.heartbeat_interval));
        self.heartbeats.insert(id, handle);
        if !self.observers.contains_key(&id) {
            // dropped between registration and heartbeat start
            if let Some((_, handle)) = self.heartbeats.remove(&id) {
                handle.abort();
            }
        }

        info!(observer = %id, observers = self.observers.len(), "Observer connected");
        id
    }

    /// Idempotent.
    pub fn disconnect(&self, id: ObserverId) {
        let removed = self.observers.remove(&id).is_some();
        if let Some((_, handle)) = self.heartbeats.remove(&id) {
            handle.abort();
        }
        if removed {
            info!(observer = %id, observers = self.observers.len(), "Observer disconnected");
        }
    }

    pub async fn broadcast(&self, event: &ProgressEvent) {
        match serde_json::to_string(event) {
            Ok(text) => self.broadcast_text(text).await,
            Err(e) => warn!(error = %e, "Failed to serialize progress event"),
        }
    }

    /// Snapshot the observer set, deliver to all of it, then drop the observers
    /// whose delivery failed.
    pub async fn broadcast_text(&self, text: String) {
        let snapshot: Vec<(ObserverId, Arc<dyn ObserverSink>)> = self
            .observers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let deliveries = snapshot.into_iter().map(|(id, sink)| {
            let text = text.clone();
            async move { (id, deliver(sink.as_ref(), text).await) }
        });

        let failed: Vec<ObserverId> = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(observer = %id, error = %e, "Dropping observer after failed delivery");
                    Some(id)
                }
            })
            .collect();

        for id in failed {
            self.disconnect(id);
        }
    }

    /// Unicast. Returns whether the observer is still connected afterwards.
    pub async fn send_personal<T: Serialize>(&self, message: &T, id: ObserverId) -> bool {
        let Some(sink) = self.observers.get(&id).map(|s| s.value().clone()) else {
            return false;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize personal message");
                return true;
            }
        };
        match deliver(sink.as_ref(), text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(observer = %id, error = %e, "Personal message failed");
                self.disconnect(id);
                false
            }
        }
    }
}

async fn deliver(sink: &dyn ObserverSink, text: String) -> anyhow::Result<()> {
    match tokio::time::timeout(SEND_TIMEOUT, sink.send_text(text)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("send timed out after {}s", SEND_TIMEOUT.as_secs()),
    }
}

async fn heartbeat(broadcaster: Weak<ProgressBroadcaster>, id: ObserverId, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(broadcaster) = broadcaster.upgrade() else {
            return;
        };
        let Some(sink) = broadcaster.observers.get(&id).map(|s| s.value().clone()) else {
            return;
        };

        if let Err(e) = deliver(sink.as_ref(), PING_FRAME.to_string()).await {
            debug!(observer = %id, error = %e, "Heartbeat failed");
            broadcaster.disconnect(id);
            return;
        }
    }
}
