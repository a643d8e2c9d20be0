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

//! Schedulable entity model.
//!
//! An entity is a Job (cron-triggered suite of scripts) or a Monitor
//! (interval-triggered probe). Invariant: an enabled entity with a
//! non-empty trigger spec has exactly one live repeating trigger in the
//! registry; a disabled entity has none.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cron;
use crate::error::ValidationError;
use crate::models::task::WorkUnit;

/// Kind of schedulable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Monitor,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::Monitor => "monitor",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "job" => Ok(EntityKind::Job),
            "monitor" => Ok(EntityKind::Monitor),
            other => Err(ValidationError::InvalidConfig(format!(
                "unknown entity kind: {}",
                other
            ))),
        }
    }
}

/// Trigger specification: how an entity recurs.
///
/// Jobs carry a cron expression evaluated in an explicit timezone;
/// monitors carry an interval in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSpec {
    Cron { expression: String, timezone: String },
    Interval { minutes: u32 },
}

impl TriggerSpec {
    /// Computes the next fire time strictly after `from`.
    pub fn next_fire(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
        match self {
            TriggerSpec::Cron {
                expression,
                timezone,
            } => cron::next_fire_time(expression, timezone, from),
            TriggerSpec::Interval { minutes } => cron::next_interval_fire(*minutes, from),
        }
    }

    /// Validates the spec without evaluating it against a clock.
    pub fn validate(&self) -> Result<(), ValidationError> {
        // next_fire exercises both the expression parser and the
        // timezone lookup.
        self.next_fire(Utc::now()).map(|_| ())
    }

    /// Human-readable pattern, used in registry listings.
    pub fn pattern(&self) -> String {
        match self {
            TriggerSpec::Cron {
                expression,
                timezone,
            } => format!("cron({} @ {})", expression, timezone),
            TriggerSpec::Interval { minutes } => format!("every {}m", minutes),
        }
    }
}

/// A named script executed as one unit of a job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkScript {
    pub name: String,
    pub content: String,
}

/// Monitor probe configuration, one strictly-typed variant per monitor
/// type. Dispatch is exhaustive pattern matching, never field probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorProbe {
    HttpRequest {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        expected_status: Option<u16>,
    },
    Website {
        url: String,
    },
    PingHost {
        host: String,
    },
    PortCheck {
        host: String,
        port: u16,
    },
    Heartbeat {
        #[serde(default)]
        last_seen: Option<DateTime<Utc>>,
        grace_minutes: u32,
    },
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// Entity payload: the work an entity performs when triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityConfig {
    Job { scripts: Vec<WorkScript> },
    Monitor { probe: MonitorProbe },
}

impl EntityConfig {
    /// Expands the config into the ordered work units of one execution.
    /// Script order is preserved exactly as configured.
    pub fn work_units(&self) -> Vec<WorkUnit> {
        match self {
            EntityConfig::Job { scripts } => {
                scripts.iter().cloned().map(WorkUnit::Script).collect()
            }
            EntityConfig::Monitor { probe } => vec![WorkUnit::Probe(probe.clone())],
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityConfig::Job { .. } => EntityKind::Job,
            EntityConfig::Monitor { .. } => EntityKind::Monitor,
        }
    }
}

/// A schedulable entity as stored in the schedule store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub kind: EntityKind,
    /// None when the entity has no schedule yet (not schedulable).
    pub spec: Option<TriggerSpec>,
    pub enabled: bool,
    /// Registry-side repeating trigger, if one is live.
    pub trigger_id: Option<Uuid>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub config: EntityConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Whether this entity should hold a live trigger.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.spec.is_some()
    }
}

/// Fields for creating a new entity.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub name: String,
    pub spec: Option<TriggerSpec>,
    pub enabled: bool,
    pub config: EntityConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_spec_next_fire() {
        let spec = TriggerSpec::Cron {
            expression: "0 0 * * *".to_string(),
            timezone: "UTC".to_string(),
        };
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let next = spec.next_fire(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_interval_spec_next_fire() {
        let spec = TriggerSpec::Interval { minutes: 10 };
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let next = spec.next_fire(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 10, 0).unwrap());
    }

    #[test]
    fn test_invalid_spec_fails_validation() {
        let spec = TriggerSpec::Cron {
            expression: "bogus".to_string(),
            timezone: "UTC".to_string(),
        };
        assert!(spec.validate().is_err());

        let spec = TriggerSpec::Interval { minutes: 0 };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_monitor_probe_tagged_serialization() {
        let probe = MonitorProbe::PortCheck {
            host: "db.internal".to_string(),
            port: 5432,
        };
        let json = serde_json::to_string(&probe).unwrap();
        assert!(json.contains("\"type\":\"port_check\""));

        let back: MonitorProbe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn test_http_probe_defaults() {
        let json = r#"{"type":"http_request","url":"https://api.example.com/health"}"#;
        let probe: MonitorProbe = serde_json::from_str(json).unwrap();

        match probe {
            MonitorProbe::HttpRequest {
                method,
                expected_status,
                ..
            } => {
                assert_eq!(method, "GET");
                assert!(expected_status.is_none());
            }
            other => panic!("expected http_request, got {:?}", other),
        }
    }

    #[test]
    fn test_job_config_preserves_script_order() {
        let config = EntityConfig::Job {
            scripts: vec![
                WorkScript {
                    name: "setup".to_string(),
                    content: "echo setup".to_string(),
                },
                WorkScript {
                    name: "assert".to_string(),
                    content: "echo assert".to_string(),
                },
            ],
        };

        let units = config.work_units();
        assert_eq!(units.len(), 2);
        match (&units[0], &units[1]) {
            (WorkUnit::Script(a), WorkUnit::Script(b)) => {
                assert_eq!(a.name, "setup");
                assert_eq!(b.name, "assert");
            }
            other => panic!("expected script units, got {:?}", other),
        }
    }
}
