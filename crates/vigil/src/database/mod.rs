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

//! SQLite database connection management.
//!
//! Wraps a `deadpool-diesel` connection pool and embedded migrations.
//! UUIDs are stored as BLOB, timestamps as RFC3339 TEXT, and booleans as
//! INTEGER (0/1); the DAL converts to domain types at its boundary.

pub mod schema;

use deadpool_diesel::sqlite::{Manager, Pool, Runtime};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::ValidationError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Database handle with a pooled SQLite connection.
///
/// `Clone` is cheap; clones share the same underlying pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Creates a database handle for `database_url`.
    ///
    /// Accepts a bare filesystem path or a `sqlite://` URL.
    pub fn new(database_url: &str, pool_size: usize) -> Result<Self, ValidationError> {
        let path = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(database_url);

        let manager = Manager::new(path, Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Returns the connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Runs all pending embedded migrations.
    pub async fn run_migrations(&self) -> Result<(), ValidationError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?;

        conn.interact(|conn| {
            // busy_timeout guards against transient lock contention when
            // the pool holds more than one connection.
            diesel::sql_query("PRAGMA busy_timeout = 5000;")
                .execute(conn)
                .map_err(|e| e.to_string())?;

            conn.run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.len())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))?
        .map_err(ValidationError::Migration)
        .map(|applied| {
            if applied > 0 {
                info!(applied, "Applied database migrations");
            }
        })
    }
}

use diesel::prelude::*;
