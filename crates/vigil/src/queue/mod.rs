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

//! Admission-controlled execution queue.
//!
//! Two independent limits: a running capacity (concurrent executions)
//! and a waiting capacity (queued tasks). Admission happens at enqueue
//! time: invalid tasks are rejected before occupying a slot, and a full
//! waiting queue rejects with backpressure instead of growing unbounded.
//!
//! All counter mutations happen under a single mutex, so the invariant
//! `running <= running_capacity && waiting <= waiting_capacity` holds at
//! every instant. Promotion from waiting to running occurs inside the
//! same critical section as the completion that freed the slot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::executor::TaskExecution;
use crate::models::task::ExecutionTask;

/// Capacity configuration for the execution queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum tasks executing concurrently.
    pub running_capacity: usize,
    /// Maximum tasks waiting for a running slot.
    pub waiting_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            running_capacity: 4,
            waiting_capacity: 64,
        }
    }
}

/// Point-in-time queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub running: usize,
    pub waiting: usize,
    pub running_capacity: usize,
    pub waiting_capacity: usize,
}

struct QueueState {
    running: usize,
    waiting: VecDeque<ExecutionTask>,
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    executor: Arc<dyn TaskExecution>,
    shutdown: AtomicBool,
    idle: Notify,
}

/// The execution queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

impl ExecutionQueue {
    pub fn new(config: QueueConfig, executor: Arc<dyn TaskExecution>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState {
                    running: 0,
                    waiting: VecDeque::new(),
                }),
                executor,
                shutdown: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    /// Admits a task: validates it, then either starts it immediately
    /// (free running slot), queues it (free waiting slot), or rejects it
    /// with backpressure. Returns the task's run id on admission.
    pub async fn enqueue(&self, task: ExecutionTask) -> Result<Uuid, QueueError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(QueueError::Shutdown);
        }

        // Reject before occupying any slot.
        task.validate()?;

        let run_id = task.run_id;
        let mut state = self.inner.state.lock().await;

        if state.running < self.inner.config.running_capacity {
            state.running += 1;
            debug!(run_id = %run_id, running = state.running, "Task admitted to running slot");
            self.spawn_execution(task);
        } else if state.waiting.len() < self.inner.config.waiting_capacity {
            state.waiting.push_back(task);
            debug!(run_id = %run_id, waiting = state.waiting.len(), "Task admitted to waiting queue");
        } else {
            warn!(
                run_id = %run_id,
                waiting = state.waiting.len(),
                capacity = self.inner.config.waiting_capacity,
                "Task rejected: waiting queue full"
            );
            return Err(QueueError::CapacityExceeded {
                queued: state.waiting.len(),
                capacity: self.inner.config.waiting_capacity,
            });
        }

        Ok(run_id)
    }

    /// Current occupancy.
    pub async fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().await;
        QueueStats {
            running: state.running,
            waiting: state.waiting.len(),
            running_capacity: self.inner.config.running_capacity,
            waiting_capacity: self.inner.config.waiting_capacity,
        }
    }

    /// Stops admitting new tasks and waits until running and waiting
    /// both drain to zero.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        loop {
            let idle = {
                let state = self.inner.state.lock().await;
                state.running == 0 && state.waiting.is_empty()
            };
            if idle {
                return;
            }
            self.inner.idle.notified().await;
        }
    }

    fn spawn_execution(&self, task: ExecutionTask) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.inner.executor.execute(task).await;
            queue.on_complete().await;
        });
    }

    /// Completion hook: promote the next waiting task into the freed
    /// slot, under the same lock that decrements the running count.
    async fn on_complete(&self) {
        let mut state = self.inner.state.lock().await;
        match state.waiting.pop_front() {
            Some(next) => {
                // The slot transfers directly; running count unchanged.
                debug!(run_id = %next.run_id, "Promoting waiting task to running slot");
                self.spawn_execution(next);
            }
            None => {
                state.running -= 1;
                if state.running == 0 {
                    // notify_one stores a permit, so a shutdown waiter
                    // that has not polled yet still observes it.
                    self.inner.idle.notify_one();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::MonitorProbe;
    use crate::models::task::WorkUnit;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Executor stub that parks every task until released through a
    /// channel, so tests can hold slots occupied deterministically.
    struct GatedExecutor {
        started: AtomicUsize,
        completed: AtomicUsize,
        release_rx: Mutex<mpsc::UnboundedReceiver<()>>,
        started_tx: mpsc::UnboundedSender<Uuid>,
    }

    #[async_trait]
    impl TaskExecution for GatedExecutor {
        async fn execute(&self, task: ExecutionTask) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _ = self.started_tx.send(task.run_id);
            self.release_rx.lock().await.recv().await;
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        queue: ExecutionQueue,
        executor: Arc<GatedExecutor>,
        release_tx: mpsc::UnboundedSender<()>,
        started_rx: mpsc::UnboundedReceiver<Uuid>,
    }

    fn harness(running: usize, waiting: usize) -> Harness {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let executor = Arc::new(GatedExecutor {
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            release_rx: Mutex::new(release_rx),
            started_tx,
        });
        let queue = ExecutionQueue::new(
            QueueConfig {
                running_capacity: running,
                waiting_capacity: waiting,
            },
            executor.clone(),
        );
        Harness {
            queue,
            executor,
            release_tx,
            started_rx,
        }
    }

    fn probe_task() -> ExecutionTask {
        ExecutionTask::new(
            Uuid::new_v4(),
            vec![WorkUnit::Probe(MonitorProbe::Website {
                url: "https://status.example.com".to_string(),
            })],
        )
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_capacity_limits_enforced() {
        let mut h = harness(2, 3);

        // Fill both running slots.
        h.queue.enqueue(probe_task()).await.unwrap();
        h.queue.enqueue(probe_task()).await.unwrap();
        h.started_rx.recv().await.unwrap();
        h.started_rx.recv().await.unwrap();

        // Fill the waiting queue.
        for _ in 0..3 {
            h.queue.enqueue(probe_task()).await.unwrap();
        }

        let stats = h.queue.stats().await;
        assert_eq!(stats.running, 2);
        assert_eq!(stats.waiting, 3);

        // Sixth task is rejected with backpressure.
        let result = h.queue.enqueue(probe_task()).await;
        assert!(matches!(
            result,
            Err(QueueError::CapacityExceeded {
                queued: 3,
                capacity: 3
            })
        ));
        assert!(logs_contain("waiting queue full"));
    }

    #[tokio::test]
    async fn test_completion_promotes_waiting_task() {
        let mut h = harness(1, 4);

        let first = h.queue.enqueue(probe_task()).await.unwrap();
        assert_eq!(h.started_rx.recv().await.unwrap(), first);

        let second = h.queue.enqueue(probe_task()).await.unwrap();
        assert_eq!(h.queue.stats().await.waiting, 1);

        // Releasing the first execution frees the slot; the waiting
        // task starts without any new enqueue.
        h.release_tx.send(()).unwrap();
        assert_eq!(h.started_rx.recv().await.unwrap(), second);

        let stats = h.queue.stats().await;
        assert_eq!(stats.running, 1);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn test_invalid_task_occupies_no_slot() {
        let h = harness(1, 1);

        let empty = ExecutionTask::new(Uuid::new_v4(), vec![]);
        assert!(matches!(
            h.queue.enqueue(empty).await,
            Err(QueueError::Validation(_))
        ));

        let stats = h.queue.stats().await;
        assert_eq!(stats.running, 0);
        assert_eq!(stats.waiting, 0);
        assert_eq!(h.executor.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fifo_promotion_order() {
        let mut h = harness(1, 4);

        let first = h.queue.enqueue(probe_task()).await.unwrap();
        assert_eq!(h.started_rx.recv().await.unwrap(), first);

        let second = h.queue.enqueue(probe_task()).await.unwrap();
        let third = h.queue.enqueue(probe_task()).await.unwrap();

        h.release_tx.send(()).unwrap();
        assert_eq!(h.started_rx.recv().await.unwrap(), second);
        h.release_tx.send(()).unwrap();
        assert_eq!(h.started_rx.recv().await.unwrap(), third);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks_and_drains() {
        let mut h = harness(1, 4);

        h.queue.enqueue(probe_task()).await.unwrap();
        h.started_rx.recv().await.unwrap();

        // Release the running task, then shut down.
        h.release_tx.send(()).unwrap();
        h.queue.shutdown().await;

        assert!(matches!(
            h.queue.enqueue(probe_task()).await,
            Err(QueueError::Shutdown)
        ));
        assert_eq!(h.executor.completed.load(Ordering::SeqCst), 1);
    }
}
