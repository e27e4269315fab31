//! CRUD queries for users, clients, notes, documents and appointments.

use crate::error::DbError;
use mindfulflow_types::{
    Appointment, Client, ClientStatus, DocumentFile, Note, Sentiment, SessionType, User,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

/// A user together with the stored password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

fn parse_label<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_label<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Inserts a user row.
pub fn insert_user(conn: &Connection, user: &User, password_hash: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO users (id, name, email, password_hash) VALUES (?1, ?2, ?3, ?4)",
        params![user.id, user.name, user.email, password_hash],
    )?;
    Ok(())
}

/// Looks up a user and their password hash by email.
pub fn find_user_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<UserCredentials>, DbError> {
    let found = conn
        .query_row(
            "SELECT id, name, email, password_hash FROM users WHERE email = ?1",
            [email],
            |row| {
                Ok(UserCredentials {
                    user: User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    },
                    password_hash: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<User>, DbError> {
    let found = conn
        .query_row(
            "SELECT id, name, email FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

/// Inserts a client row. Nested notes and documents are not written.
pub fn create_client(conn: &Connection, user_id: &str, client: &Client) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO clients (id, user_id, name, avatar, status, diagnosis, next_appointment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            client.id,
            user_id,
            client.name,
            client.avatar,
            client.status.as_str(),
            client.diagnosis,
            client.next_appointment,
        ],
    )?;
    Ok(())
}

pub fn add_note(conn: &Connection, client_id: &str, note: &Note) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO notes (id, client_id, date, content, summary, sentiment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            note.id,
            client_id,
            note.date,
            note.content,
            note.summary,
            note.sentiment.map(Sentiment::as_str),
        ],
    )?;
    Ok(())
}

/// Replaces the text of an existing note.
///
/// # Errors
///
/// Returns `DbError::NotFound` if no note with that id belongs to the client.
pub fn update_note_content(
    conn: &Connection,
    client_id: &str,
    note_id: &str,
    content: &str,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE notes SET content = ?1 WHERE id = ?2 AND client_id = ?3",
        params![content, note_id, client_id],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("note {note_id}")));
    }
    Ok(())
}

pub fn add_document(conn: &Connection, client_id: &str, doc: &DocumentFile) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO documents (id, client_id, name, mime_type, upload_date, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            doc.id,
            client_id,
            doc.name,
            doc.mime_type,
            doc.upload_date,
            doc.content,
        ],
    )?;
    Ok(())
}

/// Inserts an appointment and marks it as the client's next appointment.
///
/// The client update is skipped silently for placeholder client ids.
pub fn create_appointment(
    conn: &Connection,
    user_id: &str,
    appt: &Appointment,
) -> Result<(), DbError> {
    if !conn.is_autocommit() {
        // Already inside the caller's transaction (e.g. seeding).
        return write_appointment(conn, user_id, appt);
    }
    let tx = conn.unchecked_transaction()?;
    write_appointment(&tx, user_id, appt)?;
    tx.commit()?;
    Ok(())
}

fn write_appointment(conn: &Connection, user_id: &str, appt: &Appointment) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO appointments (id, user_id, client_id, date, duration_minutes, session_type, summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            appt.id,
            user_id,
            appt.client_id,
            appt.date,
            appt.duration_minutes,
            appt.session_type.as_str(),
            appt.summary,
        ],
    )?;
    conn.execute(
        "UPDATE clients SET next_appointment = ?1 WHERE id = ?2 AND user_id = ?3",
        params![appt.date, appt.client_id, user_id],
    )?;
    Ok(())
}

fn map_row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        date: row.get(1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        sentiment: parse_optional_label::<Sentiment>(row, 4)?,
    })
}

fn map_row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentFile> {
    Ok(DocumentFile {
        id: row.get(0)?,
        name: row.get(1)?,
        mime_type: row.get(2)?,
        upload_date: row.get(3)?,
        content: row.get(4)?,
    })
}

fn map_row_to_client(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        avatar: row.get(2)?,
        status: parse_label::<ClientStatus>(row, 3)?,
        diagnosis: row.get(4)?,
        next_appointment: row.get(5)?,
        notes: Vec::new(),
        documents: Vec::new(),
    })
}

fn map_row_to_appointment(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        client_id: row.get(1)?,
        date: row.get(2)?,
        duration_minutes: row.get(3)?,
        session_type: parse_label::<SessionType>(row, 4)?,
        summary: row.get(5)?,
    })
}

fn hydrate(conn: &Connection, client: &mut Client) -> Result<(), DbError> {
    let mut notes = conn.prepare_cached(
        "SELECT id, date, content, summary, sentiment
         FROM notes WHERE client_id = ?1 ORDER BY date DESC",
    )?;
    client.notes = notes
        .query_map([&client.id], map_row_to_note)?
        .collect::<Result<_, _>>()?;

    let mut docs = conn.prepare_cached(
        "SELECT id, name, mime_type, upload_date, content
         FROM documents WHERE client_id = ?1 ORDER BY upload_date DESC",
    )?;
    client.documents = docs
        .query_map([&client.id], map_row_to_document)?
        .collect::<Result<_, _>>()?;
    Ok(())
}

/// Lists a user's clients with their notes (newest first) and documents.
pub fn list_clients(conn: &Connection, user_id: &str) -> Result<Vec<Client>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, avatar, status, diagnosis, next_appointment
         FROM clients WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let mut clients: Vec<Client> = stmt
        .query_map([user_id], map_row_to_client)?
        .collect::<Result<_, _>>()?;

    for client in &mut clients {
        hydrate(conn, client)?;
    }
    Ok(clients)
}

/// Fetches one client owned by the user, hydrated.
pub fn find_client(
    conn: &Connection,
    user_id: &str,
    client_id: &str,
) -> Result<Option<Client>, DbError> {
    let client = conn
        .query_row(
            "SELECT id, name, avatar, status, diagnosis, next_appointment
             FROM clients WHERE id = ?1 AND user_id = ?2",
            [client_id, user_id],
            map_row_to_client,
        )
        .optional()?;

    match client {
        Some(mut client) => {
            hydrate(conn, &mut client)?;
            Ok(Some(client))
        }
        None => Ok(None),
    }
}

pub fn list_appointments(conn: &Connection, user_id: &str) -> Result<Vec<Appointment>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, date, duration_minutes, session_type, summary
         FROM appointments WHERE user_id = ?1 ORDER BY date ASC",
    )?;
    let appointments = stmt
        .query_map([user_id], map_row_to_appointment)?
        .collect::<Result<_, _>>()?;
    Ok(appointments)
}
