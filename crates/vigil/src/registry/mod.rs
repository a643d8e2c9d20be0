/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Repeatable schedule registry.
//!
//! Holds the live repeating triggers: one timer task per registered key,
//! firing into a [`FireSink`] at every occurrence of the trigger spec.
//! Keys are caller-chosen (one per entity); registering an existing key
//! is an error, so replacement is always remove-before-add. The registry
//! is in-memory derived state; the schedule store remains authoritative
//! and the scheduler reconciles the two.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::models::entity::TriggerSpec;

/// Receives trigger fires. Implementations must not block the timer
/// task; a slow sink delays subsequent fires of the same trigger.
#[async_trait]
pub trait FireSink: Send + Sync {
    /// Called once per trigger occurrence.
    async fn fire(&self, entity_id: Uuid);
}

/// A live registered trigger.
struct RegisteredTrigger {
    trigger_id: Uuid,
    entity_id: Uuid,
    spec: TriggerSpec,
    handle: JoinHandle<()>,
}

/// Snapshot of one registered trigger, for listings and drift checks.
#[derive(Debug, Clone)]
pub struct TriggerInfo {
    pub trigger_id: Uuid,
    pub key: String,
    pub entity_id: Uuid,
    pub pattern: String,
    pub next_fire: Option<DateTime<Utc>>,
}

/// In-memory registry of repeating triggers.
pub struct TriggerRegistry {
    triggers: RwLock<HashMap<String, RegisteredTrigger>>,
    sink: Arc<dyn FireSink>,
}

impl TriggerRegistry {
    pub fn new(sink: Arc<dyn FireSink>) -> Self {
        Self {
            triggers: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Registers a repeating trigger under `key` and starts its timer
    /// task. Fails with [`RegistryError::DuplicateTrigger`] if the key
    /// already holds a live trigger.
    pub fn register(
        &self,
        key: &str,
        entity_id: Uuid,
        spec: TriggerSpec,
    ) -> Result<Uuid, RegistryError> {
        // Validate before taking the write lock; a bad spec must never
        // occupy a registry slot.
        spec.next_fire(Utc::now())?;

        let mut triggers = self.triggers.write();
        if triggers.contains_key(key) {
            return Err(RegistryError::DuplicateTrigger {
                key: key.to_string(),
            });
        }

        let trigger_id = Uuid::new_v4();
        let handle = spawn_timer(key.to_string(), entity_id, spec.clone(), self.sink.clone());

        triggers.insert(
            key.to_string(),
            RegisteredTrigger {
                trigger_id,
                entity_id,
                spec,
                handle,
            },
        );

        info!(key, %entity_id, %trigger_id, "Registered repeating trigger");
        Ok(trigger_id)
    }

    /// Removes the trigger under `key`, stopping its timer task.
    /// Returns the removed trigger id, or `None` if the key held none.
    pub fn remove(&self, key: &str) -> Option<Uuid> {
        let removed = self.triggers.write().remove(key);
        match removed {
            Some(trigger) => {
                trigger.handle.abort();
                debug!(key, trigger_id = %trigger.trigger_id, "Removed repeating trigger");
                Some(trigger.trigger_id)
            }
            None => None,
        }
    }

    /// Removes a trigger by the id `register` returned, stopping its
    /// timer task. Idempotent: an unknown id returns `None`.
    pub fn remove_by_id(&self, trigger_id: Uuid) -> Option<Uuid> {
        let mut triggers = self.triggers.write();
        let key = triggers
            .iter()
            .find(|(_, trigger)| trigger.trigger_id == trigger_id)
            .map(|(key, _)| key.clone())?;
        let trigger = triggers.remove(&key)?;
        trigger.handle.abort();
        debug!(key = %key, %trigger_id, "Removed repeating trigger");
        Some(trigger_id)
    }

    /// Whether `key` currently holds a live trigger.
    pub fn contains(&self, key: &str) -> bool {
        self.triggers.read().contains_key(key)
    }

    /// Number of live triggers.
    pub fn len(&self) -> usize {
        self.triggers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.read().is_empty()
    }

    /// Snapshot of all live triggers, with their computed next fire
    /// times.
    pub fn list(&self) -> Vec<TriggerInfo> {
        let now = Utc::now();
        self.triggers
            .read()
            .iter()
            .map(|(key, trigger)| TriggerInfo {
                trigger_id: trigger.trigger_id,
                key: key.clone(),
                entity_id: trigger.entity_id,
                pattern: trigger.spec.pattern(),
                next_fire: trigger.spec.next_fire(now).ok(),
            })
            .collect()
    }

    /// Removes every trigger. Used at shutdown and by full rebuild
    /// sweeps.
    pub fn clear(&self) {
        let mut triggers = self.triggers.write();
        let count = triggers.len();
        for (_, trigger) in triggers.drain() {
            trigger.handle.abort();
        }
        if count > 0 {
            info!(count, "Cleared all repeating triggers");
        }
    }
}

impl Drop for TriggerRegistry {
    fn drop(&mut self) {
        for trigger in self.triggers.get_mut().values() {
            trigger.handle.abort();
        }
    }
}

/// Spawns the timer loop for one trigger: sleep until the next
/// occurrence, fire the sink, repeat. The task ends only by abort or if
/// the spec stops producing occurrences.
fn spawn_timer(
    key: String,
    entity_id: Uuid,
    spec: TriggerSpec,
    sink: Arc<dyn FireSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = match spec.next_fire(now) {
                Ok(next) => next,
                Err(e) => {
                    // Specs are validated at registration; hitting this
                    // means the expression has no future occurrences.
                    error!(key, %entity_id, error = %e, "Trigger has no next occurrence; stopping timer");
                    return;
                }
            };

            let wait = (next - now).to_std().unwrap_or_default();
            debug!(key, %entity_id, next = %next, "Trigger sleeping until next occurrence");
            tokio::time::sleep(wait).await;

            sink.fire(entity_id).await;
        }
    })
}

// Tests use a paused tokio clock so interval timers fire without real
// waiting.
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ChannelSink {
        tx: mpsc::UnboundedSender<Uuid>,
    }

    #[async_trait]
    impl FireSink for ChannelSink {
        async fn fire(&self, entity_id: Uuid) {
            let _ = self.tx.send(entity_id);
        }
    }

    fn channel_registry() -> (TriggerRegistry, mpsc::UnboundedReceiver<Uuid>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TriggerRegistry::new(Arc::new(ChannelSink { tx })), rx)
    }

    fn minute_spec() -> TriggerSpec {
        TriggerSpec::Interval { minutes: 1 }
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let (registry, _rx) = channel_registry();
        let entity_id = Uuid::new_v4();

        let trigger_id = registry
            .register("entity:a", entity_id, minute_spec())
            .unwrap();

        assert!(registry.contains("entity:a"));
        assert_eq!(registry.len(), 1);

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].trigger_id, trigger_id);
        assert_eq!(listed[0].entity_id, entity_id);
        assert_eq!(listed[0].pattern, "every 1m");
        assert!(listed[0].next_fire.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let (registry, _rx) = channel_registry();
        let entity_id = Uuid::new_v4();

        registry
            .register("entity:a", entity_id, minute_spec())
            .unwrap();
        let result = registry.register("entity:a", entity_id, minute_spec());

        assert!(matches!(
            result,
            Err(RegistryError::DuplicateTrigger { key }) if key == "entity:a"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_then_register_replaces() {
        let (registry, _rx) = channel_registry();
        let entity_id = Uuid::new_v4();

        let first = registry
            .register("entity:a", entity_id, minute_spec())
            .unwrap();
        assert_eq!(registry.remove("entity:a"), Some(first));

        let second = registry
            .register("entity:a", entity_id, minute_spec())
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_key() {
        let (registry, _rx) = channel_registry();
        assert_eq!(registry.remove("entity:ghost"), None);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let (registry, _rx) = channel_registry();
        let entity_id = Uuid::new_v4();

        let kept = registry
            .register("entity:kept", entity_id, minute_spec())
            .unwrap();
        let doomed = registry
            .register("entity:doomed", entity_id, minute_spec())
            .unwrap();

        assert_eq!(registry.remove_by_id(doomed), Some(doomed));
        assert!(!registry.contains("entity:doomed"));
        assert!(registry.contains("entity:kept"));
        assert_eq!(registry.list()[0].trigger_id, kept);

        // Idempotent on an already-removed or unknown id.
        assert_eq!(registry.remove_by_id(doomed), None);
        assert_eq!(registry.remove_by_id(Uuid::new_v4()), None);
    }

    #[tokio::test]
    async fn test_invalid_spec_never_registered() {
        let (registry, _rx) = channel_registry();

        let result = registry.register(
            "entity:bad",
            Uuid::new_v4(),
            TriggerSpec::Interval { minutes: 0 },
        );
        assert!(matches!(result, Err(RegistryError::Validation(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_trigger_fires_repeatedly() {
        let (registry, mut rx) = channel_registry();
        let entity_id = Uuid::new_v4();

        registry
            .register("entity:a", entity_id, minute_spec())
            .unwrap();

        // The paused clock auto-advances through the sleeps.
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, entity_id);
        assert_eq!(second, entity_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_trigger_stops_firing() {
        let (registry, mut rx) = channel_registry();
        let entity_id = Uuid::new_v4();

        registry
            .register("entity:a", entity_id, minute_spec())
            .unwrap();
        rx.recv().await.unwrap();

        registry.remove("entity:a");
        // Drain anything already in flight, then confirm silence.
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(std::time::Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let (registry, _rx) = channel_registry();
        for i in 0..3 {
            registry
                .register(&format!("entity:{}", i), Uuid::new_v4(), minute_spec())
                .unwrap();
        }

        registry.clear();
        assert!(registry.is_empty());
    }
}
