//! Practice data service with a remote (SQLite) and a local (JSON) backend.
//!
//! All methods are blocking; async callers run them on `spawn_blocking`.

use crate::error::DbError;
use crate::fetch::fetch_user_data;
use crate::local::{LocalStore, LocalStoreError};
use crate::pool::DbPool;
use crate::records;
use mindfulflow_types::{Appointment, Client, DocumentFile, Note, UserData, Workspace};
use thiserror::Error;

/// Errors from [`PracticeStore`] writes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Local(#[from] LocalStoreError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Db(DbError::Pool(e))
    }
}

/// Where practice records live.
#[derive(Clone)]
pub enum PracticeStore {
    Remote(DbPool),
    Local(LocalStore),
}

impl std::fmt::Debug for PracticeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PracticeStore::Remote(_) => f.write_str("PracticeStore::Remote"),
            PracticeStore::Local(local) => f
                .debug_tuple("PracticeStore::Local")
                .field(&local.dir())
                .finish(),
        }
    }
}

impl PracticeStore {
    /// Loads everything for a practitioner, seeding on first use.
    ///
    /// Never fails: backend errors degrade to an empty [`UserData`].
    pub fn fetch_user_data(&self, user_id: &str) -> UserData {
        match self {
            PracticeStore::Remote(pool) => match pool.get() {
                Ok(conn) => fetch_user_data(&conn, user_id),
                Err(e) => {
                    tracing::error!(user_id, error = %e, "failed to get connection for fetch");
                    UserData::default()
                }
            },
            PracticeStore::Local(local) => local.load_user_data(user_id).unwrap_or_else(|e| {
                tracing::error!(user_id, error = %e, "failed to load local snapshot");
                UserData::default()
            }),
        }
    }

    pub fn find_client(&self, user_id: &str, client_id: &str) -> Result<Client, StoreError> {
        let found = match self {
            PracticeStore::Remote(pool) => {
                let conn = pool.get()?;
                records::find_client(&conn, user_id, client_id)?
            }
            PracticeStore::Local(local) => {
                Workspace::new(user_id, local.load_user_data(user_id)?)
                    .client(client_id)
                    .cloned()
            }
        };
        found.ok_or_else(|| StoreError::NotFound(format!("client {client_id}")))
    }

    pub fn create_client(&self, user_id: &str, client: &Client) -> Result<(), StoreError> {
        match self {
            PracticeStore::Remote(pool) => {
                let conn = pool.get()?;
                records::create_client(&conn, user_id, client)?;
            }
            PracticeStore::Local(local) => {
                local.update_user_data(user_id, |data| data.clients.push(client.clone()))?;
            }
        }
        tracing::info!(user_id, client_id = %client.id, "client created");
        Ok(())
    }

    /// Stores a note as the client's newest note.
    pub fn add_note(&self, user_id: &str, client_id: &str, note: &Note) -> Result<(), StoreError> {
        match self {
            PracticeStore::Remote(pool) => {
                let conn = pool.get()?;
                records::add_note(&conn, client_id, note)?;
            }
            PracticeStore::Local(local) => {
                let found = local.update_user_data(user_id, |data| {
                    let mut ws = Workspace::new(user_id, std::mem::take(data));
                    let found = ws.prepend_note(client_id, note.clone());
                    *data = ws.into_user_data();
                    found
                })?;
                if !found {
                    return Err(StoreError::NotFound(format!("client {client_id}")));
                }
            }
        }
        Ok(())
    }

    pub fn update_note_content(
        &self,
        user_id: &str,
        client_id: &str,
        note_id: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        match self {
            PracticeStore::Remote(pool) => {
                let conn = pool.get()?;
                records::update_note_content(&conn, client_id, note_id, content)?;
            }
            PracticeStore::Local(local) => {
                let found = local.update_user_data(user_id, |data| {
                    let mut ws = Workspace::new(user_id, std::mem::take(data));
                    let found = ws.set_note_content(client_id, note_id, content);
                    *data = ws.into_user_data();
                    found
                })?;
                if !found {
                    return Err(StoreError::NotFound(format!("note {note_id}")));
                }
            }
        }
        Ok(())
    }

    pub fn add_document(
        &self,
        user_id: &str,
        client_id: &str,
        doc: &DocumentFile,
    ) -> Result<(), StoreError> {
        match self {
            PracticeStore::Remote(pool) => {
                let conn = pool.get()?;
                records::add_document(&conn, client_id, doc)?;
            }
            PracticeStore::Local(local) => {
                let found = local.update_user_data(user_id, |data| {
                    match data.clients.iter_mut().find(|c| c.id == client_id) {
                        Some(client) => {
                            client.documents.insert(0, doc.clone());
                            true
                        }
                        None => false,
                    }
                })?;
                if !found {
                    return Err(StoreError::NotFound(format!("client {client_id}")));
                }
            }
        }
        Ok(())
    }

    /// Stores an appointment and updates the client's next appointment.
    ///
    /// Appointments for unknown client ids are stored as-is.
    pub fn create_appointment(&self, user_id: &str, appt: &Appointment) -> Result<(), StoreError> {
        match self {
            PracticeStore::Remote(pool) => {
                let conn = pool.get()?;
                records::create_appointment(&conn, user_id, appt)?;
            }
            PracticeStore::Local(local) => {
                local.update_user_data(user_id, |data| {
                    let mut ws = Workspace::new(user_id, std::mem::take(data));
                    ws.push_appointment(appt.clone());
                    *data = ws.into_user_data();
                })?;
            }
        }
        tracing::info!(user_id, appointment_id = %appt.id, client_id = %appt.client_id, "appointment created");
        Ok(())
    }
}
