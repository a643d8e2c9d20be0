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

//! Execution task model.
//!
//! An execution task is one request to run an entity's work units. Its
//! `task_id` is generated at enqueue time (distinct from the entity id),
//! and the `run_id` distinguishes concurrent executions of the same
//! entity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::entity::{MonitorProbe, WorkScript};

/// A single unit of work within an execution task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum WorkUnit {
    Script(WorkScript),
    Probe(MonitorProbe),
}

impl WorkUnit {
    /// Display name of the unit, used in reports and logs.
    pub fn name(&self) -> String {
        match self {
            WorkUnit::Script(script) => script.name.clone(),
            WorkUnit::Probe(MonitorProbe::HttpRequest { url, .. }) => {
                format!("http_request {}", url)
            }
            WorkUnit::Probe(MonitorProbe::Website { url }) => format!("website {}", url),
            WorkUnit::Probe(MonitorProbe::PingHost { host }) => format!("ping {}", host),
            WorkUnit::Probe(MonitorProbe::PortCheck { host, port }) => {
                format!("port {}:{}", host, port)
            }
            WorkUnit::Probe(MonitorProbe::Heartbeat { .. }) => "heartbeat".to_string(),
        }
    }

    /// Static validation performed before a task is admitted to the
    /// queue, so a poison unit never occupies a queue slot.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            WorkUnit::Script(script) => {
                if script.name.trim().is_empty() {
                    return Err(ValidationError::InvalidWorkUnit(
                        "script name is empty".to_string(),
                    ));
                }
                if script.content.trim().is_empty() {
                    return Err(ValidationError::InvalidWorkUnit(format!(
                        "script '{}' has no content",
                        script.name
                    )));
                }
                Ok(())
            }
            WorkUnit::Probe(MonitorProbe::HttpRequest { url, method, .. }) => {
                validate_url(url)?;
                if method.trim().is_empty() {
                    return Err(ValidationError::InvalidWorkUnit(
                        "http method is empty".to_string(),
                    ));
                }
                Ok(())
            }
            WorkUnit::Probe(MonitorProbe::Website { url }) => validate_url(url),
            WorkUnit::Probe(MonitorProbe::PingHost { host }) => validate_host(host),
            WorkUnit::Probe(MonitorProbe::PortCheck { host, port }) => {
                validate_host(host)?;
                if *port == 0 {
                    return Err(ValidationError::InvalidWorkUnit(
                        "port must be non-zero".to_string(),
                    ));
                }
                Ok(())
            }
            WorkUnit::Probe(MonitorProbe::Heartbeat { grace_minutes, .. }) => {
                if *grace_minutes == 0 {
                    return Err(ValidationError::InvalidWorkUnit(
                        "heartbeat grace window must be at least one minute".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn validate_url(raw: &str) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        ValidationError::InvalidWorkUnit(format!("invalid url '{}': {}", raw, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidWorkUnit(format!(
            "unsupported url scheme '{}'",
            other
        ))),
    }
}

fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.trim().is_empty() {
        return Err(ValidationError::InvalidWorkUnit("host is empty".to_string()));
    }
    Ok(())
}

/// A request to execute an entity's work units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTask {
    /// Generated at enqueue time; distinct from the entity id.
    pub task_id: Uuid,
    pub entity_id: Uuid,
    /// Distinguishes concurrent executions of the same entity.
    pub run_id: Uuid,
    /// Executed sequentially in this exact order.
    pub units: Vec<WorkUnit>,
}

impl ExecutionTask {
    /// Builds a task with fresh task and run ids.
    pub fn new(entity_id: Uuid, units: Vec<WorkUnit>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            entity_id,
            run_id: Uuid::new_v4(),
            units,
        }
    }

    /// Validates every unit; used as the queue's admission gate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.units.is_empty() {
            return Err(ValidationError::EmptyTask);
        }
        for unit in &self.units {
            unit.validate()?;
        }
        Ok(())
    }
}
