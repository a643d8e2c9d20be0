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

//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ValidationError;
use crate::executor::DEFAULT_TASK_TIMEOUT;

/// Configuration for a [`Runner`](crate::runner::Runner).
///
/// Build with [`RunnerConfig::builder`]; every field has a default.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RunnerConfig {
    database_url: String,
    db_pool_size: usize,
    running_capacity: usize,
    waiting_capacity: usize,
    task_timeout: Duration,
    artifact_root: Option<PathBuf>,
    event_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            database_url: "vigil.db".to_string(),
            db_pool_size: 5,
            running_capacity: 4,
            waiting_capacity: 64,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            artifact_root: None,
            event_capacity: 256,
        }
    }
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn db_pool_size(&self) -> usize {
        self.db_pool_size
    }

    pub fn running_capacity(&self) -> usize {
        self.running_capacity
    }

    pub fn waiting_capacity(&self) -> usize {
        self.waiting_capacity
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn artifact_root(&self) -> Option<&PathBuf> {
        self.artifact_root.as_ref()
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}

/// Builder for [`RunnerConfig`].
#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    database_url: Option<String>,
    db_pool_size: Option<usize>,
    running_capacity: Option<usize>,
    waiting_capacity: Option<usize>,
    task_timeout: Option<Duration>,
    artifact_root: Option<PathBuf>,
    event_capacity: Option<usize>,
}

impl RunnerConfigBuilder {
    /// SQLite database path or `sqlite://` URL.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn db_pool_size(mut self, size: usize) -> Self {
        self.db_pool_size = Some(size);
        self
    }

    /// Maximum concurrently executing tasks.
    pub fn running_capacity(mut self, capacity: usize) -> Self {
        self.running_capacity = Some(capacity);
        self
    }

    /// Maximum tasks waiting for a running slot.
    pub fn waiting_capacity(mut self, capacity: usize) -> Self {
        self.waiting_capacity = Some(capacity);
        self
    }

    /// Wall-clock bound per task execution.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Directory for execution reports. Reports are skipped when unset.
    pub fn artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    /// Capacity of the run-event broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<RunnerConfig, ValidationError> {
        let defaults = RunnerConfig::default();
        let config = RunnerConfig {
            database_url: self.database_url.unwrap_or(defaults.database_url),
            db_pool_size: self.db_pool_size.unwrap_or(defaults.db_pool_size),
            running_capacity: self.running_capacity.unwrap_or(defaults.running_capacity),
            waiting_capacity: self.waiting_capacity.unwrap_or(defaults.waiting_capacity),
            task_timeout: self.task_timeout.unwrap_or(defaults.task_timeout),
            artifact_root: self.artifact_root,
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
        };

        if config.running_capacity == 0 {
            return Err(ValidationError::InvalidConfig(
                "running_capacity must be at least 1".to_string(),
            ));
        }
        if config.db_pool_size == 0 {
            return Err(ValidationError::InvalidConfig(
                "db_pool_size must be at least 1".to_string(),
            ));
        }
        if config.event_capacity == 0 {
            return Err(ValidationError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::builder().build().unwrap();
        assert_eq!(config.running_capacity(), 4);
        assert_eq!(config.waiting_capacity(), 64);
        assert_eq!(config.task_timeout(), DEFAULT_TASK_TIMEOUT);
        assert!(config.artifact_root().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = RunnerConfig::builder()
            .database_url("sqlite:///tmp/test.db")
            .running_capacity(2)
            .waiting_capacity(3)
            .task_timeout(Duration::from_secs(30))
            .artifact_root("/tmp/artifacts")
            .build()
            .unwrap();

        assert_eq!(config.database_url(), "sqlite:///tmp/test.db");
        assert_eq!(config.running_capacity(), 2);
        assert_eq!(config.waiting_capacity(), 3);
        assert_eq!(config.artifact_root().unwrap().to_str(), Some("/tmp/artifacts"));
    }

    #[test]
    fn test_zero_running_capacity_rejected() {
        assert!(RunnerConfig::builder().running_capacity(0).build().is_err());
    }
}
