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

//! Data access layer for run records.
//!
//! Status updates are guarded in SQL: the UPDATE filters on the current
//! status, so an illegal or duplicate transition affects zero rows. This
//! makes the terminal transition exactly-once even with racing writers.

use diesel::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::dal::models::{current_timestamp_string, uuid_to_blob, SqliteRun};
use crate::database::schema::runs;
use crate::database::Database;
use crate::error::ValidationError;
use crate::models::run::{NewRun, Run, RunStatus};

/// DAL for the runs table.
pub struct RunDAL {
    database: Database,
}

impl RunDAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Creates a run in the pending state.
    pub async fn create(&self, new_run: NewRun) -> Result<Run, ValidationError> {
        let now_str = current_timestamp_string();
        let row = SqliteRun {
            id: uuid_to_blob(new_run.id),
            task_id: uuid_to_blob(new_run.task_id),
            entity_id: uuid_to_blob(new_run.entity_id),
            status: RunStatus::Pending.as_str().to_string(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_details: None,
            report_key: None,
            created_at: now_str.clone(),
            updated_at: now_str,
        };

        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let insert = row.clone();
        conn.interact(move |conn| {
            diesel::insert_into(runs::table).values(&insert).execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Run::try_from(row)
    }

    /// Fetches a run by id.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Run, ValidationError> {
        let blob = uuid_to_blob(id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let row = conn
            .interact(move |conn| {
                runs::table.find(blob).first::<SqliteRun>(conn).optional()
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(Run::try_from)
            .transpose()?
            .ok_or(ValidationError::RunNotFound(id))
    }

    /// Lists runs for an entity, newest first.
    pub async fn list_for_entity(&self, entity_id: Uuid) -> Result<Vec<Run>, ValidationError> {
        let blob = uuid_to_blob(entity_id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(move |conn| {
                runs::table
                    .filter(runs::entity_id.eq(blob))
                    .order(runs::created_at.desc())
                    .load::<SqliteRun>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(Run::try_from).collect()
    }

    /// Marks a pending run as running and stamps `started_at`.
    ///
    /// Returns `false` if the run was not in the pending state.
    pub async fn mark_running(&self, id: Uuid) -> Result<bool, ValidationError> {
        let blob = uuid_to_blob(id);
        let now_str = current_timestamp_string();
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    runs::table
                        .find(blob)
                        .filter(runs::status.eq(RunStatus::Pending.as_str())),
                )
                .set((
                    runs::status.eq(RunStatus::Running.as_str()),
                    runs::started_at.eq(Some(now_str.clone())),
                    runs::updated_at.eq(now_str),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }

    /// Moves a run to a terminal state, stamping `completed_at` and the
    /// outcome fields.
    ///
    /// Returns `true` if this call performed the transition; `false` if
    /// the run was already terminal. At most one caller ever gets `true`.
    pub async fn complete(
        &self,
        id: Uuid,
        status: RunStatus,
        duration_ms: Option<i64>,
        error_details: Option<String>,
        report_key: Option<String>,
    ) -> Result<bool, ValidationError> {
        if !status.is_terminal() {
            return Err(ValidationError::InvalidRunStatus(format!(
                "{} is not a terminal status",
                status.as_str()
            )));
        }

        let blob = uuid_to_blob(id);
        let now_str = current_timestamp_string();
        let status_str = status.as_str();
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(runs::table.find(blob).filter(
                    runs::status.eq_any([
                        RunStatus::Pending.as_str(),
                        RunStatus::Running.as_str(),
                    ]),
                ))
                .set((
                    runs::status.eq(status_str),
                    runs::completed_at.eq(Some(now_str.clone())),
                    runs::duration_ms.eq(duration_ms),
                    runs::error_details.eq(error_details),
                    runs::report_key.eq(report_key),
                    runs::updated_at.eq(now_str),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if affected > 0 {
            debug!(run_id = %id, status = status_str, "Run reached terminal state");
        }
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    async fn test_dal() -> (RunDAL, tempfile::NamedTempFile) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let db = Database::new(tmp.path().to_str().unwrap(), 1).unwrap();
        db.run_migrations().await.unwrap();
        (RunDAL::new(db), tmp)
    }

    fn new_run() -> NewRun {
        NewRun {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_lifecycle_pending_running_passed() {
        let (dal, _tmp) = test_dal().await;
        let run = dal.create(new_run()).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none());

        assert!(dal.mark_running(run.id).await.unwrap());
        let running = dal.get_by_id(run.id).await.unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        assert!(dal
            .complete(run.id, RunStatus::Passed, Some(1250), None, Some("reports/r1".into()))
            .await
            .unwrap());
        let done = dal.get_by_id(run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Passed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.duration_ms, Some(1250));
        assert_eq!(done.report_key.as_deref(), Some("reports/r1"));
    }

    #[tokio::test]
    #[serial]
    async fn test_terminal_transition_is_exactly_once() {
        let (dal, _tmp) = test_dal().await;
        let run = dal.create(new_run()).await.unwrap();
        dal.mark_running(run.id).await.unwrap();

        assert!(dal
            .complete(run.id, RunStatus::Failed, None, Some("assertion failed".into()), None)
            .await
            .unwrap());
        // Second terminal write loses.
        assert!(!dal
            .complete(run.id, RunStatus::Error, None, Some("timed out".into()), None)
            .await
            .unwrap());

        let done = dal.get_by_id(run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.error_details.as_deref(), Some("assertion failed"));
    }

    #[tokio::test]
    #[serial]
    async fn test_mark_running_only_from_pending() {
        let (dal, _tmp) = test_dal().await;
        let run = dal.create(new_run()).await.unwrap();

        assert!(dal.mark_running(run.id).await.unwrap());
        assert!(!dal.mark_running(run.id).await.unwrap());

        dal.complete(run.id, RunStatus::Passed, None, None, None)
            .await
            .unwrap();
        assert!(!dal.mark_running(run.id).await.unwrap());
    }

    #[tokio::test]
    #[serial]
    async fn test_non_terminal_complete_rejected() {
        let (dal, _tmp) = test_dal().await;
        let run = dal.create(new_run()).await.unwrap();

        assert!(matches!(
            dal.complete(run.id, RunStatus::Running, None, None, None).await,
            Err(ValidationError::InvalidRunStatus(_))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_list_for_entity() {
        let (dal, _tmp) = test_dal().await;
        let entity_id = Uuid::new_v4();

        for _ in 0..3 {
            dal.create(NewRun {
                id: Uuid::new_v4(),
                task_id: Uuid::new_v4(),
                entity_id,
            })
            .await
            .unwrap();
        }
        dal.create(new_run()).await.unwrap();

        let runs = dal.list_for_entity(entity_id).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.entity_id == entity_id));
    }
}
