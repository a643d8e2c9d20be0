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

//! Task executor.
//!
//! Drives one execution task through the run state machine:
//! pending -> running -> {passed, failed, error}. Units run sequentially
//! within a task; tasks run in parallel up to the queue's running
//! capacity. A wall-clock bound terminates overlong executions, marking
//! the run failed with a timeout detail.
//!
//! Failures stay inside the worker boundary: every outcome is recorded
//! on the Run, and `execute` never panics or propagates errors into the
//! queue's slot accounting.

pub mod artifacts;
pub mod runner;

pub use artifacts::{ExecutionReport, FilesystemObjectStore, ObjectStore};
pub use runner::{ProbeRunner, ProcessScriptEngine, ScriptEngine, UnitOutcome, UnitReport, WorkUnitRunner};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::dal::RunDAL;
use crate::error::{ExecutorError, ValidationError};
use crate::models::events::RunEvent;
use crate::models::run::{NewRun, RunStatus};
use crate::models::task::ExecutionTask;

/// Queue-facing execution seam. Implementations own all error handling;
/// the queue only tracks slot occupancy.
#[async_trait]
pub trait TaskExecution: Send + Sync {
    async fn execute(&self, task: ExecutionTask);
}

/// Default wall-clock bound per task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Executes tasks, records runs, and publishes status transitions.
pub struct TaskExecutor {
    runs: RunDAL,
    runner: Arc<dyn WorkUnitRunner>,
    object_store: Option<Arc<dyn ObjectStore>>,
    events: broadcast::Sender<RunEvent>,
    timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        runs: RunDAL,
        runner: Arc<dyn WorkUnitRunner>,
        events: broadcast::Sender<RunEvent>,
    ) -> Self {
        Self {
            runs,
            runner,
            object_store: None,
            events,
            timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates the run row when the task arrived without one (direct
    /// executor use; the runner facade normally creates it at
    /// admission).
    async fn ensure_run(&self, task: &ExecutionTask) -> Result<(), ValidationError> {
        match self.runs.get_by_id(task.run_id).await {
            Ok(_) => Ok(()),
            Err(ValidationError::RunNotFound(_)) => self
                .runs
                .create(NewRun {
                    id: task.run_id,
                    task_id: task.task_id,
                    entity_id: task.entity_id,
                })
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        }
    }

    async fn run_units(&self, task: &ExecutionTask) -> Vec<UnitReport> {
        let mut reports = Vec::with_capacity(task.units.len());
        // Units run in caller order; a failing unit does not stop the
        // rest, so the report covers the whole task.
        for unit in &task.units {
            reports.push(self.runner.run_unit(unit).await);
        }
        reports
    }

    fn aggregate(reports: &[UnitReport]) -> (RunStatus, Option<String>) {
        let mut failures = Vec::new();
        let mut errors = Vec::new();
        for report in reports {
            match &report.outcome {
                UnitOutcome::Passed => {}
                UnitOutcome::Failed { reason } => {
                    failures.push(format!("{}: {}", report.name, reason));
                }
                UnitOutcome::Error { message } => {
                    errors.push(format!("{}: {}", report.name, message));
                }
            }
        }

        if !errors.is_empty() {
            (RunStatus::Error, Some(errors.join("; ")))
        } else if !failures.is_empty() {
            (RunStatus::Failed, Some(failures.join("; ")))
        } else {
            (RunStatus::Passed, None)
        }
    }

    async fn upload_report(
        &self,
        task: &ExecutionTask,
        status: RunStatus,
        reports: Vec<UnitReport>,
    ) -> Option<String> {
        let store = self.object_store.as_ref()?;
        let report = ExecutionReport {
            run_id: task.run_id,
            entity_id: task.entity_id,
            status,
            units: reports,
            generated_at: Utc::now(),
        };
        let key = ExecutionReport::key(task.run_id);

        let bytes = match serde_json::to_vec(&report) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(run_id = %task.run_id, error = %e, "Failed to serialize execution report");
                return None;
            }
        };
        match store.put(&key, bytes).await {
            Ok(_) => Some(key),
            Err(e) => {
                // Artifact upload is best-effort; the run outcome is
                // already decided.
                warn!(run_id = %task.run_id, error = %e, "Failed to upload execution report");
                None
            }
        }
    }

    fn publish(&self, task: &ExecutionTask, status: RunStatus) {
        // Send fails only when no subscriber exists, which is fine.
        let _ = self
            .events
            .send(RunEvent::now(task.run_id, task.task_id, task.entity_id, status));
    }
}

#[async_trait]
impl TaskExecution for TaskExecutor {
    async fn execute(&self, task: ExecutionTask) {
        if let Err(e) = self.ensure_run(&task).await {
            error!(run_id = %task.run_id, error = %e, "Failed to prepare run record");
            return;
        }

        match self.runs.mark_running(task.run_id).await {
            Ok(true) => {}
            Ok(false) => {
                let e = ExecutorError::AlreadyTerminal(task.run_id);
                warn!(run_id = %task.run_id, error = %e, "Skipping execution");
                return;
            }
            Err(e) => {
                error!(run_id = %task.run_id, error = %e, "Failed to mark run running");
                return;
            }
        }
        self.publish(&task, RunStatus::Running);

        let started = Instant::now();
        let (status, error_details, reports) =
            match tokio::time::timeout(self.timeout, self.run_units(&task)).await {
                Ok(reports) => {
                    let (status, details) = Self::aggregate(&reports);
                    (status, details, reports)
                }
                Err(_) => {
                    let e = ExecutorError::Timeout {
                        run_id: task.run_id,
                        timeout_secs: self.timeout.as_secs(),
                    };
                    info!(run_id = %task.run_id, timeout_secs = self.timeout.as_secs(), "Execution timed out");
                    (RunStatus::Failed, Some(e.to_string()), Vec::new())
                }
            };
        let duration_ms = started.elapsed().as_millis() as i64;

        let report_key = self.upload_report(&task, status, reports).await;

        // The guarded update makes the terminal transition exactly-once;
        // the status event follows only the winning writer.
        match self
            .runs
            .complete(task.run_id, status, Some(duration_ms), error_details, report_key)
            .await
        {
            Ok(true) => {
                debug!(run_id = %task.run_id, status = status.as_str(), duration_ms, "Run completed");
                self.publish(&task, status);
            }
            Ok(false) => {
                debug!(run_id = %task.run_id, "Run already terminal; outcome discarded");
            }
            Err(e) => {
                error!(run_id = %task.run_id, error = %e, "Failed to record run outcome");
            }
        }
    }
}
