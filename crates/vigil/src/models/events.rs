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

//! Run status-change events for streaming consumers.
//!
//! Events are published on a `tokio::sync::broadcast` channel: once when
//! a run starts and exactly once when it reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::run::RunStatus;

/// A run status transition, as observed by SSE-style subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub entity_id: Uuid,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn now(run_id: Uuid, task_id: Uuid, entity_id: Uuid, status: RunStatus) -> Self {
        Self {
            run_id,
            task_id,
            entity_id,
            status,
            timestamp: Utc::now(),
        }
    }
}
