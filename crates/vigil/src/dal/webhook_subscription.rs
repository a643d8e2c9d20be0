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

//! Data access layer for webhook subscriptions.
//!
//! Tracks per-endpoint health: the consecutive-failure counter increments
//! when a delivery exhausts its retries and resets to zero on any
//! successful delivery.

use diesel::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::dal::models::{current_timestamp_string, uuid_to_blob, SqliteWebhookSubscription};
use crate::database::schema::webhook_subscriptions;
use crate::database::Database;
use crate::error::ValidationError;
use crate::models::webhook::{NewWebhookSubscription, WebhookSubscription};

/// DAL for the webhook_subscriptions table.
pub struct WebhookSubscriptionDAL {
    database: Database,
}

impl WebhookSubscriptionDAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Creates a subscription after validating endpoint and secret.
    pub async fn create(
        &self,
        new_subscription: NewWebhookSubscription,
    ) -> Result<WebhookSubscription, ValidationError> {
        new_subscription.validate()?;

        let now_str = current_timestamp_string();
        let row = SqliteWebhookSubscription {
            id: uuid_to_blob(Uuid::new_v4()),
            endpoint_url: new_subscription.endpoint_url,
            secret: new_subscription.secret,
            consecutive_failures: 0,
            last_attempt_at: None,
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
            diesel::insert_into(webhook_subscriptions::table)
                .values(&insert)
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        let subscription = WebhookSubscription::try_from(row)?;
        debug!(subscription_id = %subscription.id, endpoint = %subscription.endpoint_url, "Created webhook subscription");
        Ok(subscription)
    }

    /// Lists all subscriptions.
    pub async fn list(&self) -> Result<Vec<WebhookSubscription>, ValidationError> {
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(|conn| {
                webhook_subscriptions::table
                    .order(webhook_subscriptions::created_at.asc())
                    .load::<SqliteWebhookSubscription>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        rows.into_iter()
            .map(WebhookSubscription::try_from)
            .collect()
    }

    /// Resets the failure counter after a successful delivery.
    pub async fn record_success(&self, id: Uuid) -> Result<(), ValidationError> {
        let blob = uuid_to_blob(id);
        let now_str = current_timestamp_string();
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            diesel::update(webhook_subscriptions::table.find(blob))
                .set((
                    webhook_subscriptions::consecutive_failures.eq(0),
                    webhook_subscriptions::last_attempt_at.eq(Some(now_str.clone())),
                    webhook_subscriptions::updated_at.eq(now_str),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Increments the failure counter after a delivery exhausts its
    /// retries. Returns the new counter value.
    pub async fn record_failure(&self, id: Uuid) -> Result<i32, ValidationError> {
        let blob = uuid_to_blob(id);
        let now_str = current_timestamp_string();
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let failures = conn
            .interact(move |conn| {
                diesel::update(webhook_subscriptions::table.find(blob.clone()))
                    .set((
                        webhook_subscriptions::consecutive_failures
                            .eq(webhook_subscriptions::consecutive_failures + 1),
                        webhook_subscriptions::last_attempt_at.eq(Some(now_str.clone())),
                        webhook_subscriptions::updated_at.eq(now_str),
                    ))
                    .execute(conn)?;

                webhook_subscriptions::table
                    .find(blob)
                    .select(webhook_subscriptions::consecutive_failures)
                    .first::<i32>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(failures)
    }

    /// Deletes a subscription. Missing rows are not an error.
    pub async fn delete(&self, id: Uuid) -> Result<bool, ValidationError> {
        let blob = uuid_to_blob(id);
        let conn = self
            .database
            .pool()
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::delete(webhook_subscriptions::table.find(blob)).execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    async fn test_dal() -> (WebhookSubscriptionDAL, tempfile::NamedTempFile) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let db = Database::new(tmp.path().to_str().unwrap(), 1).unwrap();
        db.run_migrations().await.unwrap();
        (WebhookSubscriptionDAL::new(db), tmp)
    }

    fn subscription() -> NewWebhookSubscription {
        NewWebhookSubscription {
            endpoint_url: "https://hooks.example.com/vigil".to_string(),
            secret: "a-long-enough-secret".to_string(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_create_and_list() {
        let (dal, _tmp) = test_dal().await;

        let created = dal.create(subscription()).await.unwrap();
        assert_eq!(created.consecutive_failures, 0);
        assert!(created.last_attempt_at.is_none());

        let all = dal.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, created.id);
    }

    #[tokio::test]
    #[serial]
    async fn test_invalid_subscription_rejected() {
        let (dal, _tmp) = test_dal().await;

        let result = dal
            .create(NewWebhookSubscription {
                endpoint_url: "https://hooks.example.com/vigil".to_string(),
                secret: "short".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ValidationError::SecretTooShort { .. })));
        assert!(dal.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_failure_counter_increments_and_resets() {
        let (dal, _tmp) = test_dal().await;
        let sub = dal.create(subscription()).await.unwrap();

        assert_eq!(dal.record_failure(sub.id).await.unwrap(), 1);
        assert_eq!(dal.record_failure(sub.id).await.unwrap(), 2);

        dal.record_success(sub.id).await.unwrap();
        let refreshed = dal.list().await.unwrap().remove(0);
        assert_eq!(refreshed.consecutive_failures, 0);
        assert!(refreshed.last_attempt_at.is_some());

        assert_eq!(dal.record_failure(sub.id).await.unwrap(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_delete() {
        let (dal, _tmp) = test_dal().await;
        let sub = dal.create(subscription()).await.unwrap();

        assert!(dal.delete(sub.id).await.unwrap());
        assert!(!dal.delete(sub.id).await.unwrap());
    }
}
