//! Persistence layer for MindfulFlow.
//!
//! Provides SQLite connection pooling (via `r2d2`), embedded idempotent
//! migrations with a schema-repair path, CRUD queries for the practice
//! records, the onboarding seed, a local JSON key-value store used when no
//! database is configured, and the authentication adapter.
//!
//! # Design decisions
//!
//! - **Idempotent migrations**: every migration uses `IF NOT EXISTS`, so the
//!   schema-repair path can re-execute all of them regardless of what the
//!   tracking table says.
//! - **One repair, one retry**: a read that fails because a table is missing
//!   triggers exactly one repair before the caller gets an empty result.
//! - **Two backends, one surface**: [`PracticeStore`] hides whether records
//!   live in SQLite or in the local store.

pub mod auth;
mod error;
mod fetch;
pub mod local;
mod migrations;
mod pool;
mod records;
mod seed;
mod store;

pub use auth::{hash_password, verify_password, AuthError, AuthService};
pub use error::DbError;
pub use fetch::{fetch_user_data, fetch_user_data_with_repair};
pub use local::{CachedCredential, LocalStore, LocalStoreError};
pub use migrations::{repair_schema, run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use records::{
    add_document, add_note, create_appointment, create_client, find_client, find_user_by_email,
    get_user, insert_user, list_appointments, list_clients, update_note_content, UserCredentials,
};
pub use seed::{onboarding_template, personalize, seed_user};
pub use store::{PracticeStore, StoreError};
