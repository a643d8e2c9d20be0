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

//! Runner: the assembled scheduling and execution service.
//!
//! Wires the pieces together with explicit construction (no process
//! globals): database, DALs, trigger registry firing into the execution
//! queue, task executor publishing run events, scheduler manager, and a
//! webhook notifier consuming terminal events. Startup runs the full
//! reconciliation sweep before any trigger can fire, so a previous
//! instance's drift never double-schedules work.

pub mod config;

pub use config::{RunnerConfig, RunnerConfigBuilder};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dal::{DAL, EntityDAL, RunDAL};
use crate::database::Database;
use crate::error::{QueueError, SchedulerError, ValidationError};
use crate::executor::{
    FilesystemObjectStore, ProbeRunner, ProcessScriptEngine, TaskExecutor,
};
use crate::models::entity::{Entity, NewEntity};
use crate::models::events::RunEvent;
use crate::models::run::{NewRun, Run, RunStatus};
use crate::models::task::ExecutionTask;
use crate::models::webhook::{NewWebhookSubscription, WebhookEvent, WebhookSubscription};
use crate::queue::{ExecutionQueue, QueueConfig, QueueStats};
use crate::registry::{FireSink, TriggerRegistry};
use crate::scheduler::{DriftReport, ReconcileReport, SchedulerManager};
use crate::webhook::{should_quarantine, WebhookDeliveryEngine};

/// Admission receipt for an accepted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAccepted {
    pub task_id: Uuid,
    pub run_id: Uuid,
}

/// Fire sink bridging the trigger registry to the execution queue.
///
/// Fires are per-trigger tasks, so a slow admission check on one
/// trigger never delays the others. A rejected fire marks its run
/// terminal instead of leaving a dangling pending row.
struct QueueSink {
    entities: EntityDAL,
    runs: RunDAL,
    queue: ExecutionQueue,
}

impl QueueSink {
    async fn enqueue_entity(&self, entity: &Entity) -> Result<TaskAccepted, QueueError> {
        let task = ExecutionTask::new(entity.id, entity.config.work_units());
        let receipt = TaskAccepted {
            task_id: task.task_id,
            run_id: task.run_id,
        };

        // The pending row exists from admission on, so status polling
        // sees waiting tasks.
        self.runs
            .create(NewRun {
                id: task.run_id,
                task_id: task.task_id,
                entity_id: entity.id,
            })
            .await
            .map_err(QueueError::Validation)?;

        if let Err(e) = self.queue.enqueue(task).await {
            let detail = format!("not admitted: {}", e);
            if let Err(mark_err) = self
                .runs
                .complete(receipt.run_id, RunStatus::Error, None, Some(detail), None)
                .await
            {
                warn!(run_id = %receipt.run_id, error = %mark_err, "Failed to mark rejected run");
            }
            return Err(e);
        }
        Ok(receipt)
    }
}

#[async_trait]
impl FireSink for QueueSink {
    async fn fire(&self, entity_id: Uuid) {
        let entity = match self.entities.get_by_id(entity_id).await {
            Ok(entity) => entity,
            Err(e) => {
                warn!(%entity_id, error = %e, "Trigger fired for unknown entity");
                return;
            }
        };
        if !entity.enabled {
            // Registry lag after a disable; the sweep will remove the
            // trigger.
            debug!(%entity_id, "Trigger fired for disabled entity; skipping");
            return;
        }

        match self.enqueue_entity(&entity).await {
            Ok(receipt) => {
                debug!(%entity_id, run_id = %receipt.run_id, "Triggered task admitted");
            }
            Err(QueueError::CapacityExceeded { queued, capacity }) => {
                warn!(%entity_id, queued, capacity, "Triggered task rejected by admission control");
            }
            Err(e) => {
                warn!(%entity_id, error = %e, "Triggered task not admitted");
            }
        }
    }
}

/// The assembled service.
pub struct Runner {
    dal: DAL,
    queue: ExecutionQueue,
    registry: Arc<TriggerRegistry>,
    scheduler: SchedulerManager,
    sink: Arc<QueueSink>,
    events: broadcast::Sender<RunEvent>,
    notifier: tokio::task::JoinHandle<()>,
}

impl Runner {
    /// Builds the service, runs migrations, and performs the boot
    /// reconciliation sweep before returning.
    pub async fn new(config: RunnerConfig) -> Result<Self, SchedulerError> {
        let database = Database::new(config.database_url(), config.db_pool_size())
            .map_err(SchedulerError::Validation)?;
        database
            .run_migrations()
            .await
            .map_err(SchedulerError::Validation)?;
        let dal = DAL::new(database);

        let (events, _) = broadcast::channel(config.event_capacity());

        let mut executor = TaskExecutor::new(
            dal.run(),
            Arc::new(ProbeRunner::new(Box::new(ProcessScriptEngine))),
            events.clone(),
        )
        .with_timeout(config.task_timeout());
        if let Some(root) = config.artifact_root() {
            executor = executor.with_object_store(Arc::new(FilesystemObjectStore::new(root)));
        }

        let queue = ExecutionQueue::new(
            QueueConfig {
                running_capacity: config.running_capacity(),
                waiting_capacity: config.waiting_capacity(),
            },
            Arc::new(executor),
        );

        let sink = Arc::new(QueueSink {
            entities: dal.entity(),
            runs: dal.run(),
            queue: queue.clone(),
        });
        let registry = Arc::new(TriggerRegistry::new(sink.clone()));
        let scheduler = SchedulerManager::new(dal.entity(), registry.clone());

        // Sweep before any trigger exists, so stale state from a
        // previous instance cannot double-schedule.
        let report = scheduler.initialize_all().await?;
        info!(
            initialized = report.initialized,
            failed = report.failed,
            "Runner started"
        );

        let notifier = spawn_webhook_notifier(
            dal.clone(),
            Arc::new(WebhookDeliveryEngine::default()),
            events.subscribe(),
        );

        Ok(Self {
            dal,
            queue,
            registry,
            scheduler,
            sink,
            events,
            notifier,
        })
    }

    /// Entity lifecycle, backed by the scheduler manager.
    pub fn scheduler(&self) -> &SchedulerManager {
        &self.scheduler
    }

    /// Creates an entity and schedules it when enabled.
    pub async fn create_entity(&self, new_entity: NewEntity) -> Result<Entity, SchedulerError> {
        self.scheduler.create_entity(new_entity).await
    }

    /// Runs an entity's work now, bypassing its schedule.
    pub async fn execute_adhoc(&self, entity_id: Uuid) -> Result<TaskAccepted, QueueError> {
        let entity = self
            .sink
            .entities
            .get_by_id(entity_id)
            .await
            .map_err(QueueError::Validation)?;
        self.sink.enqueue_entity(&entity).await
    }

    /// Terminal-or-current status of a run.
    pub async fn run_status(&self, run_id: Uuid) -> Result<Run, ValidationError> {
        self.dal.run().get_by_id(run_id).await
    }

    /// Run history for an entity, newest first.
    pub async fn runs_for_entity(&self, entity_id: Uuid) -> Result<Vec<Run>, ValidationError> {
        self.dal.run().list_for_entity(entity_id).await
    }

    /// Live stream of run status transitions.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Queue occupancy.
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Store-vs-registry drift, for operator diagnosis.
    pub async fn drift_report(&self) -> Result<DriftReport, SchedulerError> {
        self.scheduler.drift_report().await
    }

    /// Re-runs the reconciliation sweep.
    pub async fn reconcile(&self) -> Result<ReconcileReport, SchedulerError> {
        self.scheduler.initialize_all().await
    }

    /// Registers a webhook subscription.
    pub async fn subscribe_webhook(
        &self,
        subscription: NewWebhookSubscription,
    ) -> Result<WebhookSubscription, ValidationError> {
        self.dal.webhook_subscription().create(subscription).await
    }

    /// Removes a webhook subscription.
    pub async fn unsubscribe_webhook(&self, id: Uuid) -> Result<bool, ValidationError> {
        self.dal.webhook_subscription().delete(id).await
    }

    /// Stops trigger fires, drains the queue, and stops the notifier.
    pub async fn shutdown(&self) {
        info!("Runner shutting down");
        self.registry.clear();
        self.queue.shutdown().await;
        self.notifier.abort();
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.notifier.abort();
    }
}

/// Consumes terminal run events and fans them out to every healthy
/// webhook subscription. Deliveries to different subscribers run
/// concurrently; one slow endpoint never blocks the rest.
fn spawn_webhook_notifier(
    dal: DAL,
    engine: Arc<WebhookDeliveryEngine>,
    mut events: broadcast::Receiver<RunEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Webhook notifier lagged behind run events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if !event.status.is_terminal() {
                continue;
            }

            let subscriptions = match dal.webhook_subscription().list().await {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    warn!(error = %e, "Failed to load webhook subscriptions");
                    continue;
                }
            };

            for subscription in subscriptions {
                if should_quarantine(subscription.consecutive_failures) {
                    debug!(
                        subscription_id = %subscription.id,
                        failures = subscription.consecutive_failures,
                        "Skipping quarantined webhook subscription"
                    );
                    continue;
                }

                let engine = engine.clone();
                let dal = dal.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    let payload = WebhookEvent::run_completed(
                        event.run_id,
                        event.entity_id,
                        event.status,
                        serde_json::json!({ "task_id": event.task_id }),
                    );

                    match engine
                        .deliver(&subscription.endpoint_url, &payload, &subscription.secret)
                        .await
                    {
                        Ok(outcome) if outcome.success => {
                            if let Err(e) = dal
                                .webhook_subscription()
                                .record_success(subscription.id)
                                .await
                            {
                                warn!(subscription_id = %subscription.id, error = %e, "Failed to reset failure counter");
                            }
                        }
                        Ok(outcome) => {
                            match dal
                                .webhook_subscription()
                                .record_failure(subscription.id)
                                .await
                            {
                                Ok(failures) if should_quarantine(failures) => {
                                    warn!(
                                        subscription_id = %subscription.id,
                                        failures,
                                        status = ?outcome.status_code,
                                        "Webhook subscription quarantined"
                                    );
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!(subscription_id = %subscription.id, error = %e, "Failed to record delivery failure");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(subscription_id = %subscription.id, error = %e, "Webhook delivery not attempted");
                        }
                    }
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::{EntityConfig, TriggerSpec, WorkScript};
    use serial_test::serial;

    async fn test_runner(running: usize, waiting: usize) -> (Runner, tempfile::NamedTempFile) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let config = RunnerConfig::builder()
            .database_url(tmp.path().to_str().unwrap())
            .db_pool_size(1)
            .running_capacity(running)
            .waiting_capacity(waiting)
            .build()
            .unwrap();
        (Runner::new(config).await.unwrap(), tmp)
    }

    fn script_job(name: &str, content: &str, enabled: bool) -> NewEntity {
        NewEntity {
            name: name.to_string(),
            spec: Some(TriggerSpec::Cron {
                expression: "0 0 * * *".to_string(),
                timezone: "UTC".to_string(),
            }),
            enabled,
            config: EntityConfig::Job {
                scripts: vec![WorkScript {
                    name: "main".to_string(),
                    content: content.to_string(),
                }],
            },
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_adhoc_execution_end_to_end() {
        let (runner, _tmp) = test_runner(2, 4).await;
        let mut events = runner.subscribe_events();

        let entity = runner
            .create_entity(script_job("smoke", "exit 0", true))
            .await
            .unwrap();
        let receipt = runner.execute_adhoc(entity.id).await.unwrap();

        // running, then terminal.
        assert_eq!(events.recv().await.unwrap().status, RunStatus::Running);
        let terminal = events.recv().await.unwrap();
        assert_eq!(terminal.run_id, receipt.run_id);
        assert_eq!(terminal.status, RunStatus::Passed);

        let run = runner.run_status(receipt.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Passed);
        assert_eq!(run.task_id, receipt.task_id);

        runner.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_failing_job_records_failure() {
        let (runner, _tmp) = test_runner(1, 4).await;
        let mut events = runner.subscribe_events();

        let entity = runner
            .create_entity(script_job("broken", "exit 1", true))
            .await
            .unwrap();
        runner.execute_adhoc(entity.id).await.unwrap();

        events.recv().await.unwrap();
        let terminal = events.recv().await.unwrap();
        assert_eq!(terminal.status, RunStatus::Failed);

        let history = runner.runs_for_entity(entity.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].error_details.is_some());

        runner.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_rejected_task_is_marked_not_dangling() {
        // A single slot held by a long sleep, zero waiting capacity.
        let (runner, _tmp) = test_runner(1, 0).await;

        let slow = runner
            .create_entity(script_job("slow", "sleep 5", true))
            .await
            .unwrap();
        let fast = runner
            .create_entity(script_job("fast", "exit 0", true))
            .await
            .unwrap();

        let mut events = runner.subscribe_events();
        runner.execute_adhoc(slow.id).await.unwrap();
        // Wait until the slow task actually occupies the slot.
        assert_eq!(events.recv().await.unwrap().status, RunStatus::Running);

        let rejected = runner.execute_adhoc(fast.id).await;
        assert!(matches!(
            rejected,
            Err(QueueError::CapacityExceeded { .. })
        ));

        // The rejected run is terminal, not pending forever.
        let history = runner.runs_for_entity(fast.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Error);
        assert!(history[0].error_details.as_deref().unwrap().contains("not admitted"));
    }

    #[tokio::test]
    #[serial]
    async fn test_boot_sweep_schedules_persisted_entities() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let url = tmp.path().to_str().unwrap().to_string();

        {
            let config = RunnerConfig::builder()
                .database_url(&url)
                .db_pool_size(1)
                .build()
                .unwrap();
            let runner = Runner::new(config).await.unwrap();
            runner
                .create_entity(script_job("persisted", "exit 0", true))
                .await
                .unwrap();
            runner
                .create_entity(script_job("disabled", "exit 0", false))
                .await
                .unwrap();
            runner.shutdown().await;
        }

        // A fresh instance rebuilds exactly the schedulable triggers.
        let config = RunnerConfig::builder()
            .database_url(&url)
            .db_pool_size(1)
            .build()
            .unwrap();
        let runner = Runner::new(config).await.unwrap();

        let drift = runner.drift_report().await.unwrap();
        assert!(drift.is_clean());
        assert_eq!(drift.consistent, 1);

        runner.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_webhook_subscription_management() {
        let (runner, _tmp) = test_runner(1, 1).await;

        let sub = runner
            .subscribe_webhook(NewWebhookSubscription {
                endpoint_url: "https://hooks.example.com/vigil".to_string(),
                secret: "a-long-enough-secret".to_string(),
            })
            .await
            .unwrap();

        assert!(runner.unsubscribe_webhook(sub.id).await.unwrap());
        assert!(!runner.unsubscribe_webhook(sub.id).await.unwrap());

        runner.shutdown().await;
    }
}
