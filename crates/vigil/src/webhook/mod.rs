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

//! Webhook delivery engine.
//!
//! Signs the JSON event body with HMAC-SHA256 and delivers it with a
//! bounded retry policy. Retryable: network errors, per-attempt
//! timeouts, HTTP 429, and HTTP 5xx. Any other 4xx fails immediately
//! with zero retries. Attempted deliveries always return a
//! [`DeliveryOutcome`]; only input validation and serialization fail as
//! errors.
//!
//! The engine is stateless. The caller persists the per-subscription
//! failure counter and consults [`should_quarantine`] to decide whether
//! a subscriber is still healthy.

use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{DeliveryError, ValidationError};
use crate::models::webhook::{WebhookEvent, MIN_SECRET_LENGTH};

/// Signature header carrying `sha256=<hex digest>`.
pub const SIGNATURE_HEADER: &str = "x-vigil-signature";
/// Event-type header.
pub const EVENT_HEADER: &str = "x-vigil-event";
/// Send-time header, for replay detection on the receiving side.
pub const TIMESTAMP_HEADER: &str = "x-vigil-timestamp";

/// Consecutive failures after which a subscription is unhealthy.
pub const QUARANTINE_THRESHOLD: i32 = 10;

/// Pure quarantine predicate; the caller owns the counter.
pub fn should_quarantine(consecutive_failures: i32) -> bool {
    consecutive_failures >= QUARANTINE_THRESHOLD
}

/// HMAC-SHA256 over the raw body bytes, hex encoded.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Retry policy for deliveries.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries after the first attempt (so attempts = max_retries + 1).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Hard per-attempt bound, enforced by cancellation.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `attempt` (0-based): exponential from the
    /// initial delay, capped, plus up to 10% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.0..=0.1);
        base.mul_f64(1.0 + jitter)
    }
}

/// Result of an attempted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub retries_attempted: u32,
}

enum AttemptResult {
    Success(u16),
    Retryable(Option<u16>, String),
    Fatal(u16),
}

/// Delivers signed webhook events.
pub struct WebhookDeliveryEngine {
    client: reqwest::Client,
    config: RetryConfig,
}

impl Default for WebhookDeliveryEngine {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl WebhookDeliveryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Delivers `event` to `endpoint`, signing with `secret`.
    ///
    /// Validation failures return an error with zero attempts made;
    /// anything that reached the wire reports a [`DeliveryOutcome`].
    pub async fn deliver(
        &self,
        endpoint: &str,
        event: &WebhookEvent,
        secret: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        validate_target(endpoint, secret)?;

        let body =
            serde_json::to_vec(event).map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        let signature = format!("sha256={}", sign_payload(secret, &body));
        let timestamp = event.timestamp.to_rfc3339();

        let mut retries_attempted = 0;
        loop {
            let attempt = self
                .attempt(endpoint, &body, &signature, &event.event_type, &timestamp)
                .await;

            match attempt {
                AttemptResult::Success(status) => {
                    debug!(endpoint, status, retries_attempted, "Webhook delivered");
                    return Ok(DeliveryOutcome {
                        success: true,
                        status_code: Some(status),
                        error: None,
                        retries_attempted,
                    });
                }
                AttemptResult::Fatal(status) => {
                    warn!(endpoint, status, "Webhook rejected; not retrying");
                    return Ok(DeliveryOutcome {
                        success: false,
                        status_code: Some(status),
                        error: Some(format!("endpoint returned {}", status)),
                        retries_attempted,
                    });
                }
                AttemptResult::Retryable(status, message) => {
                    if retries_attempted >= self.config.max_retries {
                        warn!(endpoint, error = %message, retries_attempted, "Webhook delivery failed; retries exhausted");
                        return Ok(DeliveryOutcome {
                            success: false,
                            status_code: status,
                            error: Some(message),
                            retries_attempted,
                        });
                    }
                    let delay = self.config.backoff(retries_attempted);
                    debug!(endpoint, error = %message, delay_ms = delay.as_millis() as u64, "Webhook attempt failed; backing off");
                    tokio::time::sleep(delay).await;
                    retries_attempted += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        endpoint: &str,
        body: &[u8],
        signature: &str,
        event_type: &str,
        timestamp: &str,
    ) -> AttemptResult {
        let request = self
            .client
            .post(endpoint)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, event_type)
            .header(TIMESTAMP_HEADER, timestamp)
            .body(body.to_vec())
            .send();

        // Cancellation, not just a client read timeout: the future is
        // dropped at the bound.
        match tokio::time::timeout(self.config.attempt_timeout, request).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    AttemptResult::Success(status.as_u16())
                } else if status.as_u16() == 429 || status.is_server_error() {
                    AttemptResult::Retryable(
                        Some(status.as_u16()),
                        format!("endpoint returned {}", status.as_u16()),
                    )
                } else {
                    AttemptResult::Fatal(status.as_u16())
                }
            }
            Ok(Err(e)) => AttemptResult::Retryable(None, format!("request failed: {}", e)),
            Err(_) => AttemptResult::Retryable(
                None,
                format!(
                    "attempt timed out after {}s",
                    self.config.attempt_timeout.as_secs()
                ),
            ),
        }
    }
}

fn validate_target(endpoint: &str, secret: &str) -> Result<(), DeliveryError> {
    let parsed = url::Url::parse(endpoint).map_err(|e| {
        DeliveryError::Validation(ValidationError::InvalidEndpoint {
            url: endpoint.to_string(),
            message: e.to_string(),
        })
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DeliveryError::Validation(
            ValidationError::InvalidEndpoint {
                url: endpoint.to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            },
        ));
    }
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(DeliveryError::Validation(
            ValidationError::SecretTooShort {
                minimum: MIN_SECRET_LENGTH,
            },
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run::RunStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use uuid::Uuid;

    const SECRET: &str = "a-long-enough-secret";

    fn fast_engine() -> WebhookDeliveryEngine {
        WebhookDeliveryEngine::new(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(5),
        })
    }

    fn event() -> WebhookEvent {
        WebhookEvent::run_completed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            RunStatus::Passed,
            serde_json::json!({"duration_ms": 42}),
        )
    }

    /// Serves the given HTTP status codes, one per request, closing the
    /// connection after each. Returns the endpoint URL and an attempt
    /// counter.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        tokio::spawn(async move {
            for status in statuses {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nconnection: close\r\ncontent-length: 0\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{}/hook", addr), attempts)
    }

    #[test]
    fn test_signature_known_vector() {
        // RFC 2202-style vector: HMAC-SHA256("key", "The quick brown
        // fox jumps over the lazy dog").
        let signature = sign_payload("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            signature,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_quarantine_threshold() {
        assert!(!should_quarantine(0));
        assert!(!should_quarantine(9));
        assert!(should_quarantine(10));
        assert!(should_quarantine(25));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (endpoint, attempts) = scripted_server(vec![200]).await;

        let outcome = fast_engine()
            .deliver(&endpoint, &event(), SECRET)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.retries_attempted, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_through_500s_then_succeeds() {
        let (endpoint, attempts) = scripted_server(vec![500, 500, 500, 200]).await;

        let outcome = fast_engine()
            .deliver(&endpoint, &event(), SECRET)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.retries_attempted, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_404_fails_immediately_without_retry() {
        let (endpoint, attempts) = scripted_server(vec![404, 200]).await;

        let outcome = fast_engine()
            .deliver(&endpoint, &event(), SECRET)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(404));
        assert_eq!(outcome.retries_attempted, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_429_is_retryable() {
        let (endpoint, attempts) = scripted_server(vec![429, 200]).await;

        let outcome = fast_engine()
            .deliver(&endpoint, &event(), SECRET)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.retries_attempted, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_last_status() {
        let (endpoint, attempts) = scripted_server(vec![503, 503, 503, 503]).await;

        let outcome = fast_engine()
            .deliver(&endpoint, &event(), SECRET)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert_eq!(outcome.retries_attempted, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_validation_failures_never_hit_the_wire() {
        let engine = fast_engine();

        let result = engine.deliver("not a url", &event(), SECRET).await;
        assert!(matches!(result, Err(DeliveryError::Validation(_))));

        let result = engine
            .deliver("https://hooks.example.com/x", &event(), "short")
            .await;
        assert!(matches!(
            result,
            Err(DeliveryError::Validation(ValidationError::SecretTooShort { .. }))
        ));
    }

    #[test]
    fn test_backoff_grows_and_respects_cap() {
        let config = RetryConfig::default();

        // Below the cap the doubling dominates the 10% jitter, so the
        // sequence is strictly increasing: 1s, 2s, 4s, 8s, 16s, 32s.
        let mut previous = Duration::ZERO;
        for attempt in 0..6 {
            let delay = config.backoff(attempt);
            assert!(delay > previous, "attempt {} did not grow", attempt);
            previous = delay;
        }

        // At and past the cap: 60s plus at most 10% jitter.
        for attempt in 6..12 {
            let delay = config.backoff(attempt);
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(66));
        }
    }
}
