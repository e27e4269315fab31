//! Loading a practitioner's data with one schema-repair-and-retry cycle.

use crate::error::DbError;
use crate::migrations::repair_schema;
use crate::records::{list_appointments, list_clients};
use crate::seed::seed_user;
use chrono::Utc;
use mindfulflow_types::UserData;
use rusqlite::Connection;

/// Loads all clients and appointments of a user.
///
/// A user without clients is seeded with the onboarding data. If the read
/// fails because a table is missing, the schema is repaired once and the
/// read retried once. Every other failure degrades to an empty result.
pub fn fetch_user_data(conn: &Connection, user_id: &str) -> UserData {
    fetch_user_data_with_repair(conn, user_id, |conn| {
        repair_schema(conn).map_err(DbError::from)
    })
}

/// [`fetch_user_data`] with a caller-supplied repair step.
///
/// `repair` is `FnOnce`: it runs at most once per call.
pub fn fetch_user_data_with_repair<R>(conn: &Connection, user_id: &str, repair: R) -> UserData
where
    R: FnOnce(&Connection) -> Result<(), DbError>,
{
    match load_or_seed(conn, user_id) {
        Ok(data) => data,
        Err(e) if e.is_missing_relation() => {
            tracing::warn!(user_id, error = %e, "schema appears to be missing, attempting repair");
            if let Err(repair_err) = repair(conn) {
                tracing::error!(user_id, error = %repair_err, "schema repair failed");
                return UserData::default();
            }
            tracing::info!(user_id, "schema repaired, retrying fetch");
            load_or_seed(conn, user_id).unwrap_or_else(|retry_err| {
                tracing::error!(user_id, error = %retry_err, "fetch failed after schema repair");
                UserData::default()
            })
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "failed to fetch user data");
            UserData::default()
        }
    }
}

fn load_or_seed(conn: &Connection, user_id: &str) -> Result<UserData, DbError> {
    let clients = list_clients(conn, user_id)?;
    if clients.is_empty() {
        return seed_user(conn, user_id, Utc::now());
    }
    let appointments = list_appointments(conn, user_id)?;
    Ok(UserData {
        clients,
        appointments,
    })
}
