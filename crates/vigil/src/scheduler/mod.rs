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

//! Scheduler manager: reconciles the schedule store with the trigger
//! registry.
//!
//! The store is durable truth; the registry is derived state. Entity
//! mutations are two-phase (store write, then registry sync) with no
//! shared transaction, so registry failures never roll back a store
//! write — the entity persists unscheduled, the failure is logged, and
//! [`SchedulerManager::initialize_all`] repairs scheduling state at the
//! next boot. Trigger replacement is always remove-before-add, so the
//! registry's duplicate-key error cannot surface here.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dal::EntityDAL;
use crate::error::{SchedulerError, ValidationError};
use crate::models::entity::{Entity, NewEntity, TriggerSpec};
use crate::registry::TriggerRegistry;

/// Registry key for an entity's repeating trigger.
pub fn trigger_key(entity_id: Uuid) -> String {
    format!("entity:{}", entity_id)
}

/// Outcome of a full reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub initialized: usize,
    pub failed: usize,
}

/// Outcome of syncing one entity's registry state.
///
/// `PendingReconciliation` means the store mutation stands but the
/// registry (or its store bookkeeping) does not yet reflect it; the
/// system invariant is restored by the next reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySync {
    Synced,
    PendingReconciliation,
}

/// Store-vs-registry drift, for the admin diagnosis surface.
#[derive(Debug, Clone)]
pub struct DriftReport {
    /// Schedulable entities with no live trigger.
    pub store_only: Vec<Uuid>,
    /// Registry keys with no schedulable entity behind them.
    pub registry_only: Vec<String>,
    pub consistent: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.store_only.is_empty() && self.registry_only.is_empty()
    }
}

/// Owns the store-write-then-registry-sync lifecycle for entities.
pub struct SchedulerManager {
    entities: EntityDAL,
    registry: Arc<TriggerRegistry>,
}

impl SchedulerManager {
    pub fn new(entities: EntityDAL, registry: Arc<TriggerRegistry>) -> Self {
        Self { entities, registry }
    }

    /// Boot-time sweep: for every entity, removes any stale trigger and
    /// registers a fresh one from the current spec when schedulable.
    ///
    /// The unconditional remove/recreate tolerates drift left by a
    /// previous crash; persisted trigger ids are never trusted without
    /// the registry confirming them.
    pub async fn initialize_all(&self) -> Result<ReconcileReport, SchedulerError> {
        let all = self.entities.list().await?;

        let mut initialized = 0;
        let mut failed = 0;
        for entity in &all {
            if entity.is_schedulable() {
                match self.sync_entity(entity).await {
                    RegistrySync::Synced => initialized += 1,
                    RegistrySync::PendingReconciliation => failed += 1,
                }
            } else {
                // Disabled or spec-less entities must hold no trigger.
                self.registry.remove(&trigger_key(entity.id));
                if entity.trigger_id.is_some() {
                    self.entities.set_trigger_id(entity.id, None).await?;
                }
            }
        }

        // Drop triggers with no backing entity, so the sweep heals
        // drift in both directions.
        let expected: HashSet<String> = all
            .iter()
            .filter(|entity| entity.is_schedulable())
            .map(|entity| trigger_key(entity.id))
            .collect();
        let mut orphaned = 0;
        for info in self.registry.list() {
            if !expected.contains(&info.key) {
                self.registry.remove(&info.key);
                orphaned += 1;
            }
        }
        if orphaned > 0 {
            warn!(orphaned, "Removed registry triggers with no backing entity");
        }

        info!(initialized, failed, total = all.len(), "Schedule reconciliation sweep complete");
        Ok(ReconcileReport {
            initialized,
            failed,
        })
    }

    /// Creates an entity, then registers its trigger when schedulable.
    pub async fn create_entity(&self, new_entity: NewEntity) -> Result<Entity, SchedulerError> {
        let entity = self.entities.create(new_entity).await?;
        if entity.is_schedulable() {
            // A sync failure leaves the entity unscheduled; the store
            // write stands and the next sweep repairs it.
            self.note_pending(entity.id, self.sync_entity(&entity).await);
            return Ok(self.entities.get_by_id(entity.id).await?);
        }
        Ok(entity)
    }

    /// Replaces an entity's trigger spec, then its registry trigger.
    pub async fn update_entity_spec(
        &self,
        id: Uuid,
        spec: Option<TriggerSpec>,
    ) -> Result<Entity, SchedulerError> {
        let entity = self.entities.update_spec(id, spec).await?;
        self.note_pending(id, self.sync_entity(&entity).await);
        Ok(self.entities.get_by_id(id).await?)
    }

    /// Flips the enabled flag, registering or removing the trigger.
    pub async fn set_entity_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Entity, SchedulerError> {
        let entity = self.entities.set_enabled(id, enabled).await?;
        self.note_pending(id, self.sync_entity(&entity).await);
        Ok(self.entities.get_by_id(id).await?)
    }

    fn note_pending(&self, entity_id: Uuid, sync: RegistrySync) {
        if sync == RegistrySync::PendingReconciliation {
            warn!(%entity_id, "Entity stored but scheduling state is stale; awaiting reconciliation sweep");
        }
    }

    /// Deletes an entity. Trigger removal happens first but is best
    /// effort; store consistency takes priority and the registry
    /// self-heals at the next sweep.
    pub async fn delete_entity(&self, id: Uuid) -> Result<bool, SchedulerError> {
        self.registry.remove(&trigger_key(id));
        Ok(self.entities.delete(id).await?)
    }

    /// Compares schedulable store rows against live registry triggers.
    pub async fn drift_report(&self) -> Result<DriftReport, SchedulerError> {
        let schedulable = self.entities.list_schedulable().await?;
        let live: std::collections::HashSet<String> = self
            .registry
            .list()
            .into_iter()
            .map(|info| info.key)
            .collect();

        let mut store_only = Vec::new();
        let mut consistent = 0;
        let mut expected = std::collections::HashSet::new();
        for entity in &schedulable {
            let key = trigger_key(entity.id);
            if live.contains(&key) {
                consistent += 1;
            } else {
                store_only.push(entity.id);
            }
            expected.insert(key);
        }
        let registry_only = live
            .into_iter()
            .filter(|key| !expected.contains(key))
            .collect();

        Ok(DriftReport {
            store_only,
            registry_only,
            consistent,
        })
    }

    /// Remove-before-add trigger replacement for one entity, persisting
    /// the resulting trigger id and next fire time.
    ///
    /// Never fails: registry and store-bookkeeping errors are logged
    /// and reported as [`RegistrySync::PendingReconciliation`], which
    /// the next sweep resolves.
    async fn sync_entity(&self, entity: &Entity) -> RegistrySync {
        let key = trigger_key(entity.id);
        self.registry.remove(&key);

        if !entity.is_schedulable() {
            return match self.clear_trigger_state(entity.id).await {
                Ok(()) => RegistrySync::Synced,
                Err(e) => {
                    warn!(entity_id = %entity.id, error = %e, "Failed to persist cleared trigger state");
                    RegistrySync::PendingReconciliation
                }
            };
        }

        let spec = match entity.spec.clone() {
            Some(spec) => spec,
            // is_schedulable guarantees a spec; treat a miss as drift.
            None => return RegistrySync::PendingReconciliation,
        };

        match self.registry.register(&key, entity.id, spec.clone()) {
            Ok(trigger_id) => {
                let persisted = async {
                    self.entities
                        .set_trigger_id(entity.id, Some(trigger_id))
                        .await?;
                    self.entities
                        .set_next_run_at(entity.id, spec.next_fire(Utc::now()).ok())
                        .await
                }
                .await;
                match persisted {
                    Ok(()) => RegistrySync::Synced,
                    Err(e) => {
                        warn!(entity_id = %entity.id, %trigger_id, error = %e, "Trigger registered but store bookkeeping failed");
                        RegistrySync::PendingReconciliation
                    }
                }
            }
            Err(e) => {
                warn!(entity_id = %entity.id, error = %e, "Trigger registration failed; entity left unscheduled");
                if let Err(store_err) = self.clear_trigger_state(entity.id).await {
                    warn!(entity_id = %entity.id, error = %store_err, "Failed to persist cleared trigger state");
                }
                RegistrySync::PendingReconciliation
            }
        }
    }

    async fn clear_trigger_state(&self, id: Uuid) -> Result<(), ValidationError> {
        self.entities.set_trigger_id(id, None).await?;
        self.entities.set_next_run_at(id, None).await
    }
}
