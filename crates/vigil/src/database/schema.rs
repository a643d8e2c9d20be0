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

//! Diesel schema for the SQLite backend.

diesel::table! {
    entities (id) {
        id -> Binary,
        name -> Text,
        kind -> Text,
        cron_expression -> Nullable<Text>,
        timezone -> Nullable<Text>,
        interval_minutes -> Nullable<Integer>,
        enabled -> Integer,
        trigger_id -> Nullable<Binary>,
        next_run_at -> Nullable<Text>,
        config -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    runs (id) {
        id -> Binary,
        task_id -> Binary,
        entity_id -> Binary,
        status -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
        duration_ms -> Nullable<BigInt>,
        error_details -> Nullable<Text>,
        report_key -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    webhook_subscriptions (id) {
        id -> Binary,
        endpoint_url -> Text,
        secret -> Text,
        consecutive_failures -> Integer,
        last_attempt_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(entities, runs, webhook_subscriptions);
