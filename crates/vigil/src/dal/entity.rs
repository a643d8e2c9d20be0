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

//! Data access layer for schedulable entities.
//!
//! The store is the authoritative source of schedule truth; the trigger
//! registry is derived state reconciled against these rows.

use diesel::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::dal::models::{
    current_timestamp_string, timestamp_to_string, uuid_to_blob, SqliteEntity,
};
use crate::database::schema::entities;
use crate::database::Database;
use crate::error::ValidationError;
use crate::models::entity::{Entity, NewEntity, TriggerSpec};

/// DAL for the entities table.
pub struct EntityDAL {
    database: Database,
}

impl EntityDAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Creates an entity after validating its trigger spec.
    pub async fn create(&self, new_entity: NewEntity) -> Result<Entity, ValidationError> {
        if let Some(spec) = &new_entity.spec {
            spec.validate()?;
        }

        let now = chrono::Utc::now();
        let entity = Entity {
            id: Uuid::new_v4(),
            name: new_entity.name,
            kind: new_entity.config.kind(),
            spec: new_entity.spec,
            enabled: new_entity.enabled,
            trigger_id: None,
            next_run_at: None,
            config: new_entity.config,
            created_at: now,
            updated_at: now,
        };
        let row = SqliteEntity::from_domain(&entity)?;

        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            diesel::insert_into(entities::table)
                .values(&row)
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        debug!(entity_id = %entity.id, name = %entity.name, "Created entity");
        Ok(entity)
    }

    /// Fetches an entity by id.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Entity, ValidationError> {
        let blob = uuid_to_blob(id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let row = conn
            .interact(move |conn| {
                entities::table
                    .find(blob)
                    .first::<SqliteEntity>(conn)
                    .optional()
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(Entity::try_from)
            .transpose()?
            .ok_or(ValidationError::EntityNotFound(id))
    }

    /// Lists all entities, newest first.
    pub async fn list(&self) -> Result<Vec<Entity>, ValidationError> {
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(|conn| {
                entities::table
                    .order(entities::created_at.desc())
                    .load::<SqliteEntity>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(Entity::try_from).collect()
    }

    /// Lists entities that should hold a live repeating trigger: enabled
    /// with a non-empty trigger spec.
    pub async fn list_schedulable(&self) -> Result<Vec<Entity>, ValidationError> {
        let all = self.list().await?;
        Ok(all.into_iter().filter(Entity::is_schedulable).collect())
    }

    /// Updates an entity's trigger spec after validating it. The stale
    /// trigger id is cleared in the same UPDATE; the scheduler persists
    /// the replacement id once the new trigger is registered.
    pub async fn update_spec(
        &self,
        id: Uuid,
        spec: Option<TriggerSpec>,
    ) -> Result<Entity, ValidationError> {
        if let Some(spec) = &spec {
            spec.validate()?;
        }

        let (cron_expression, timezone, interval_minutes) = match &spec {
            Some(TriggerSpec::Cron {
                expression,
                timezone,
            }) => (Some(expression.clone()), Some(timezone.clone()), None),
            Some(TriggerSpec::Interval { minutes }) => (None, None, Some(*minutes as i32)),
            None => (None, None, None),
        };

        let blob = uuid_to_blob(id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(entities::table.find(blob))
                    .set((
                        entities::cron_expression.eq(cron_expression),
                        entities::timezone.eq(timezone),
                        entities::interval_minutes.eq(interval_minutes),
                        entities::trigger_id.eq(None::<Vec<u8>>),
                        entities::updated_at.eq(current_timestamp_string()),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if affected == 0 {
            return Err(ValidationError::EntityNotFound(id));
        }
        self.get_by_id(id).await
    }

    /// Flips the enabled flag. Returns the updated entity.
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<Entity, ValidationError> {
        let blob = uuid_to_blob(id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(entities::table.find(blob))
                    .set((
                        entities::enabled.eq(i32::from(enabled)),
                        entities::updated_at.eq(current_timestamp_string()),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if affected == 0 {
            return Err(ValidationError::EntityNotFound(id));
        }
        debug!(entity_id = %id, enabled, "Updated entity enabled flag");
        self.get_by_id(id).await
    }

    /// Records which registry trigger (if any) is live for this entity.
    pub async fn set_trigger_id(
        &self,
        id: Uuid,
        trigger_id: Option<Uuid>,
    ) -> Result<(), ValidationError> {
        let blob = uuid_to_blob(id);
        let trigger_blob = trigger_id.map(uuid_to_blob);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(entities::table.find(blob))
                    .set((
                        entities::trigger_id.eq(trigger_blob),
                        entities::updated_at.eq(current_timestamp_string()),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if affected == 0 {
            return Err(ValidationError::EntityNotFound(id));
        }
        Ok(())
    }

    /// Records the next scheduled fire time, for observability.
    pub async fn set_next_run_at(
        &self,
        id: Uuid,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), ValidationError> {
        let blob = uuid_to_blob(id);
        let next = next_run_at.map(timestamp_to_string);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            diesel::update(entities::table.find(blob))
                .set(entities::next_run_at.eq(next))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Deletes an entity. Missing rows are not an error.
    pub async fn delete(&self, id: Uuid) -> Result<bool, ValidationError> {
        let blob = uuid_to_blob(id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| diesel::delete(entities::table.find(blob)).execute(conn))
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }
}
