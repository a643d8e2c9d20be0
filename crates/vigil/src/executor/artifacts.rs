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

//! Execution artifacts and the object-store seam.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::executor::runner::UnitReport;
use crate::models::run::RunStatus;

/// Narrow object-store contract for execution artifacts. `put` returns
/// a URL for the stored object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ValidationError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, ValidationError>;
}

/// Report uploaded after each run, one entry per executed unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub entity_id: Uuid,
    pub status: RunStatus,
    pub units: Vec<UnitReport>,
    pub generated_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Object-store key for a run's report.
    pub fn key(run_id: Uuid) -> String {
        format!("reports/{}.json", run_id)
    }
}

/// Object store backed by a local directory. Keys map to relative
/// paths under the root.
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, ValidationError> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
            return Err(ValidationError::InvalidConfig(format!(
                "invalid object key '{}'",
                key
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ValidationError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ValidationError::InvalidConfig(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ValidationError::InvalidConfig(e.to_string()))?;
        Ok(format!("file://{}", path.display()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ValidationError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ValidationError::InvalidConfig(format!("object '{}': {}", key, e)))
    }
}
