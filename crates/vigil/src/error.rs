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

//! Error types for the scheduling and execution subsystems.
//!
//! The taxonomy distinguishes failures a caller can act on:
//!
//! - [`ValidationError`]: bad input, no side effects, never retried
//! - [`QueueError::CapacityExceeded`]: backpressure, retry later (maps to
//!   429 at an HTTP boundary, as opposed to 400 for validation)
//! - [`RegistryError::DuplicateTrigger`]: a reconciliation bug — callers
//!   must always remove-before-add, so this never surfaces in normal
//!   operation
//! - [`ExecutorError`]: recorded on the Run, never propagated past the
//!   worker boundary
//! - [`DeliveryError`]: webhook input validation; attempted deliveries
//!   report their outcome instead of erroring

use thiserror::Error;
use uuid::Uuid;

/// Errors for invalid input or failed store operations.
///
/// Validation failures have no side effects and should not be retried.
/// The `ConnectionPool`/`Database` variants carry store-level failures
/// surfaced through the DAL.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCronExpression { expression: String, message: String },

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Interval must be at least one minute")]
    ZeroInterval,

    #[error("Entity {0} has no trigger spec")]
    MissingSpec(Uuid),

    #[error("Invalid work unit: {0}")]
    InvalidWorkUnit(String),

    #[error("Execution task must contain at least one work unit")]
    EmptyTask,

    #[error("Webhook secret must be at least {minimum} characters")]
    SecretTooShort { minimum: usize },

    #[error("Invalid endpoint URL '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(Uuid),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Invalid run status: {0}")]
    InvalidRunStatus(String),

    #[error("Invalid UUID bytes: {0}")]
    InvalidUuid(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Invalid entity configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Errors surfaced by the repeatable schedule registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A live trigger already exists for this key. Callers must remove
    /// the old trigger before registering a replacement.
    #[error("A repeating trigger already exists for key '{key}'")]
    DuplicateTrigger { key: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Registry is shut down")]
    Shutdown,
}

/// Errors surfaced by the admission-controlled execution queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backpressure, not a hard failure: the queued-work ceiling is
    /// reached. Callers should retry later or surface a 429.
    #[error("Queue capacity exceeded: {queued} tasks waiting (capacity {capacity})")]
    CapacityExceeded { queued: usize, capacity: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Queue is shut down")]
    Shutdown,
}

/// Task-level execution failures, recorded on the Run.
///
/// These never cross the worker boundary as errors; a failing unit must
/// not crash the pool.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Execution timed out after {timeout_secs}s (run {run_id})")]
    Timeout { run_id: Uuid, timeout_secs: u64 },

    #[error("Run {0} already reached a terminal state")]
    AlreadyTerminal(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Webhook delivery failures that prevent any attempt from being made.
///
/// Deliveries that were attempted report a
/// [`DeliveryOutcome`](crate::webhook::DeliveryOutcome) instead.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to serialize event payload: {0}")]
    Serialization(String),
}

/// Errors from the scheduler manager reconciling store and registry.
///
/// Registry failures during entity mutation are deliberately *not*
/// wrapped here: the store write wins and the registry self-heals at the
/// next full reconciliation sweep.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
