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

//! Webhook subscription and outbound event models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::run::RunStatus;

/// Minimum accepted shared-secret length.
pub const MIN_SECRET_LENGTH: usize = 8;

/// An outbound webhook subscription.
///
/// The consecutive-failure counter resets to zero on any successful
/// delivery; once it reaches the quarantine threshold the subscription is
/// treated as unhealthy by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub endpoint_url: String,
    pub secret: String,
    pub consecutive_failures: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a new subscription.
#[derive(Debug, Clone)]
pub struct NewWebhookSubscription {
    pub endpoint_url: String,
    pub secret: String,
}

impl NewWebhookSubscription {
    /// Validates the endpoint URL and secret length. No side effects.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let parsed = url::Url::parse(&self.endpoint_url).map_err(|e| {
            ValidationError::InvalidEndpoint {
                url: self.endpoint_url.clone(),
                message: e.to_string(),
            }
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidEndpoint {
                url: self.endpoint_url.clone(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if self.secret.len() < MIN_SECRET_LENGTH {
            return Err(ValidationError::SecretTooShort {
                minimum: MIN_SECRET_LENGTH,
            });
        }
        Ok(())
    }
}

/// Payload delivered to webhook subscribers on run state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub run_id: Uuid,
    pub entity_id: Uuid,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    pub fn run_completed(
        run_id: Uuid,
        entity_id: Uuid,
        status: RunStatus,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: "run.completed".to_string(),
            run_id,
            entity_id,
            status,
            timestamp: Utc::now(),
            payload,
        }
    }
}
