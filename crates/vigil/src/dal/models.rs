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

//! SQLite row types and conversions to the domain models.
//!
//! SQLite stores UUIDs as 16-byte BLOBs, timestamps as RFC3339 TEXT, and
//! booleans as INTEGER 0/1. Conversions are confined to this module; the
//! rest of the crate only sees domain types.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{entities, runs, webhook_subscriptions};
use crate::error::ValidationError;
use crate::models::entity::{Entity, EntityConfig, EntityKind, TriggerSpec};
use crate::models::run::{Run, RunStatus};
use crate::models::webhook::WebhookSubscription;

pub(crate) fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

pub(crate) fn blob_to_uuid(blob: &[u8]) -> Result<Uuid, ValidationError> {
    Uuid::from_slice(blob).map_err(|e| ValidationError::InvalidUuid(e.to_string()))
}

pub(crate) fn timestamp_to_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn string_to_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp(raw.to_string()))
}

pub(crate) fn current_timestamp_string() -> String {
    Utc::now().to_rfc3339()
}

fn optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ValidationError> {
    raw.map(string_to_timestamp).transpose()
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = entities)]
pub struct SqliteEntity {
    pub id: Vec<u8>,
    pub name: String,
    pub kind: String,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub interval_minutes: Option<i32>,
    pub enabled: i32,
    pub trigger_id: Option<Vec<u8>>,
    pub next_run_at: Option<String>,
    pub config: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SqliteEntity {
    pub fn from_domain(entity: &Entity) -> Result<Self, ValidationError> {
        let (cron_expression, timezone, interval_minutes) = match &entity.spec {
            Some(TriggerSpec::Cron {
                expression,
                timezone,
            }) => (Some(expression.clone()), Some(timezone.clone()), None),
            Some(TriggerSpec::Interval { minutes }) => (None, None, Some(*minutes as i32)),
            None => (None, None, None),
        };

        Ok(Self {
            id: uuid_to_blob(entity.id),
            name: entity.name.clone(),
            kind: entity.kind.as_str().to_string(),
            cron_expression,
            timezone,
            interval_minutes,
            enabled: i32::from(entity.enabled),
            trigger_id: entity.trigger_id.map(uuid_to_blob),
            next_run_at: entity.next_run_at.map(timestamp_to_string),
            config: serde_json::to_string(&entity.config)
                .map_err(|e| ValidationError::InvalidConfig(e.to_string()))?,
            created_at: timestamp_to_string(entity.created_at),
            updated_at: timestamp_to_string(entity.updated_at),
        })
    }
}

impl TryFrom<SqliteEntity> for Entity {
    type Error = ValidationError;

    fn try_from(row: SqliteEntity) -> Result<Self, Self::Error> {
        let spec = match (&row.cron_expression, row.interval_minutes) {
            (Some(expression), _) => Some(TriggerSpec::Cron {
                expression: expression.clone(),
                timezone: row.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
            }),
            (None, Some(minutes)) => Some(TriggerSpec::Interval {
                minutes: minutes as u32,
            }),
            (None, None) => None,
        };

        let config: EntityConfig = serde_json::from_str(&row.config)
            .map_err(|e| ValidationError::InvalidConfig(e.to_string()))?;

        Ok(Entity {
            id: blob_to_uuid(&row.id)?,
            name: row.name,
            kind: EntityKind::parse(&row.kind)?,
            spec,
            enabled: row.enabled != 0,
            trigger_id: row
                .trigger_id
                .as_deref()
                .map(blob_to_uuid)
                .transpose()?,
            next_run_at: optional_timestamp(row.next_run_at.as_deref())?,
            config,
            created_at: string_to_timestamp(&row.created_at)?,
            updated_at: string_to_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = runs)]
pub struct SqliteRun {
    pub id: Vec<u8>,
    pub task_id: Vec<u8>,
    pub entity_id: Vec<u8>,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_details: Option<String>,
    pub report_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteRun> for Run {
    type Error = ValidationError;

    fn try_from(row: SqliteRun) -> Result<Self, Self::Error> {
        Ok(Run {
            id: blob_to_uuid(&row.id)?,
            task_id: blob_to_uuid(&row.task_id)?,
            entity_id: blob_to_uuid(&row.entity_id)?,
            status: RunStatus::parse(&row.status)?,
            started_at: optional_timestamp(row.started_at.as_deref())?,
            completed_at: optional_timestamp(row.completed_at.as_deref())?,
            duration_ms: row.duration_ms,
            error_details: row.error_details,
            report_key: row.report_key,
            created_at: string_to_timestamp(&row.created_at)?,
            updated_at: string_to_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = webhook_subscriptions)]
pub struct SqliteWebhookSubscription {
    pub id: Vec<u8>,
    pub endpoint_url: String,
    pub secret: String,
    pub consecutive_failures: i32,
    pub last_attempt_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteWebhookSubscription> for WebhookSubscription {
    type Error = ValidationError;

    fn try_from(row: SqliteWebhookSubscription) -> Result<Self, Self::Error> {
        Ok(WebhookSubscription {
            id: blob_to_uuid(&row.id)?,
            endpoint_url: row.endpoint_url,
            secret: row.secret,
            consecutive_failures: row.consecutive_failures,
            last_attempt_at: optional_timestamp(row.last_attempt_at.as_deref())?,
            created_at: string_to_timestamp(&row.created_at)?,
            updated_at: string_to_timestamp(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_blob_round_trip() {
        let id = Uuid::new_v4();
        assert_eq!(blob_to_uuid(&uuid_to_blob(id)).unwrap(), id);
    }

    #[test]
    fn test_bad_blob_rejected() {
        assert!(matches!(
            blob_to_uuid(&[1, 2, 3]),
            Err(ValidationError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let back = string_to_timestamp(&timestamp_to_string(now)).unwrap();
        assert_eq!(back, now);
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        assert!(matches!(
            string_to_timestamp("yesterday"),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }
}
