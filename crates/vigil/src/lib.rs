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

//! Vigil: scheduled execution core for jobs and monitors.
//!
//! Vigil schedules entities (cron-triggered jobs and interval-triggered
//! monitors), executes their work through an admission-controlled queue,
//! records run outcomes, and notifies webhook subscribers of state
//! changes.
//!
//! # Architecture
//!
//! - [`cron`] — timezone-aware next-fire-time evaluation
//! - [`dal`] / [`database`] — SQLite-backed schedule store
//! - [`registry`] — in-memory repeating triggers firing into a sink
//! - [`scheduler`] — reconciles store truth with registry state
//! - [`queue`] — capacity-gated admission and dispatch
//! - [`executor`] — runs work units, records runs, publishes events
//! - [`webhook`] — signed, retried delivery of run events
//! - [`runner`] — explicit construction of the assembled service
//!
//! # Quick start
//!
//! ```rust,no_run
//! use vigil::models::entity::{EntityConfig, NewEntity, TriggerSpec, WorkScript};
//! use vigil::runner::{Runner, RunnerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunnerConfig::builder()
//!     .database_url("vigil.db")
//!     .running_capacity(4)
//!     .build()?;
//! let runner = Runner::new(config).await?;
//!
//! let entity = runner
//!     .create_entity(NewEntity {
//!         name: "nightly-smoke".to_string(),
//!         spec: Some(TriggerSpec::Cron {
//!             expression: "0 2 * * *".to_string(),
//!             timezone: "America/New_York".to_string(),
//!         }),
//!         enabled: true,
//!         config: EntityConfig::Job {
//!             scripts: vec![WorkScript {
//!                 name: "smoke".to_string(),
//!                 content: "curl -fsS https://example.com/health".to_string(),
//!             }],
//!         },
//!     })
//!     .await?;
//!
//! let receipt = runner.execute_adhoc(entity.id).await?;
//! let run = runner.run_status(receipt.run_id).await?;
//! println!("run {} is {:?}", run.id, run.status);
//! # Ok(())
//! # }
//! ```

pub mod cron;
pub mod dal;
pub mod database;
pub mod error;
pub mod executor;
pub mod models;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod webhook;

pub use error::{
    DeliveryError, ExecutorError, QueueError, RegistryError, SchedulerError, ValidationError,
};
pub use models::entity::{Entity, EntityConfig, EntityKind, NewEntity, TriggerSpec};
pub use models::run::{Run, RunStatus};
pub use runner::{Runner, RunnerConfig, TaskAccepted};
