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

//! Domain models for schedulable entities, execution tasks, runs, and
//! webhook subscriptions.
//!
//! These are backend-agnostic domain types; the DAL converts them to and
//! from SQLite storage representations at its boundary.

pub mod entity;
pub mod events;
pub mod run;
pub mod task;
pub mod webhook;

pub use entity::{Entity, EntityConfig, EntityKind, MonitorProbe, NewEntity, TriggerSpec, WorkScript};
pub use events::RunEvent;
pub use run::{NewRun, Run, RunStatus};
pub use task::{ExecutionTask, WorkUnit};
pub use webhook::{NewWebhookSubscription, WebhookEvent, WebhookSubscription};
