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

//! Data access layer.
//!
//! One DAL struct per table, all sharing the pooled [`Database`] handle.
//! Callers obtain table DALs through the accessor methods on [`DAL`].

pub mod entity;
pub mod models;
pub mod run;
pub mod webhook_subscription;

pub use entity::EntityDAL;
pub use run::RunDAL;
pub use webhook_subscription::WebhookSubscriptionDAL;

use crate::database::Database;

/// Root data access handle.
#[derive(Clone)]
pub struct DAL {
    database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn entity(&self) -> EntityDAL {
        EntityDAL::new(self.database.clone())
    }

    pub fn run(&self) -> RunDAL {
        RunDAL::new(self.database.clone())
    }

    pub fn webhook_subscription(&self) -> WebhookSubscriptionDAL {
        WebhookSubscriptionDAL::new(self.database.clone())
    }
}
