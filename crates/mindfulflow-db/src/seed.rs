//! Onboarding data for practitioners who have no clients yet.

use crate::error::DbError;
use crate::records::{add_document, add_note, create_appointment, create_client, get_user};
use chrono::{DateTime, Duration, Utc};
use mindfulflow_types::{
    Appointment, Client, ClientStatus, DocumentFile, Note, Sentiment, SessionType, UserData,
    DEFAULT_SESSION_MINUTES,
};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use uuid::Uuid;

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// The starter clients and appointments shown to a new practitioner.
///
/// Timestamps are relative to `now`. Ids are template ids and must be made
/// unique with [`personalize`] before they are stored.
pub fn onboarding_template(now: DateTime<Utc>) -> UserData {
    let tomorrow = now + Duration::days(1);
    let in_two_days = now + Duration::days(2);

    let clients = vec![
        Client {
            id: "c1".to_string(),
            name: "Sarah Jenkins".to_string(),
            avatar: "https://picsum.photos/200/200?random=1".to_string(),
            status: ClientStatus::Active,
            diagnosis: Some("Generalized Anxiety Disorder".to_string()),
            next_appointment: Some(ts(tomorrow)),
            documents: vec![
                DocumentFile {
                    id: "d1".to_string(),
                    name: "Intake_Form.pdf".to_string(),
                    mime_type: "application/pdf".to_string(),
                    upload_date: "2023-10-01".to_string(),
                    content: None,
                },
                DocumentFile {
                    id: "d2".to_string(),
                    name: "Anxiety_Worksheet_v2.docx".to_string(),
                    mime_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                        .to_string(),
                    upload_date: "2023-11-15".to_string(),
                    content: None,
                },
            ],
            notes: vec![
                Note {
                    id: "n1".to_string(),
                    date: ts(now - Duration::days(7)),
                    content: "Patient reported increased stress at work due to restructuring. \
                              Sleep has been disrupted, waking up at 3 AM unable to fall back \
                              asleep. We discussed grounding techniques and she agreed to try the \
                              '5-4-3-2-1' method daily. Expressed concern about upcoming family \
                              gathering."
                        .to_string(),
                    summary: Some(
                        "Work stress causing insomnia. Introduced grounding techniques. \
                         Anxiety regarding family events."
                            .to_string(),
                    ),
                    sentiment: Some(Sentiment::Concern),
                },
                Note {
                    id: "n2".to_string(),
                    date: ts(now - Duration::days(14)),
                    content: "Initial session. Established rapport. Patient describes a history \
                              of 'worrying about everything'. No current medication. Goals: \
                              Reduce daily anxiety levels, improve sleep quality."
                        .to_string(),
                    summary: None,
                    sentiment: Some(Sentiment::Neutral),
                },
            ],
        },
        Client {
            id: "c2".to_string(),
            name: "Michael Chen".to_string(),
            avatar: "https://picsum.photos/200/200?random=2".to_string(),
            status: ClientStatus::Active,
            diagnosis: Some("Mild Depression".to_string()),
            next_appointment: Some(ts(in_two_days)),
            documents: Vec::new(),
            notes: vec![Note {
                id: "n3".to_string(),
                date: ts(now - Duration::days(5)),
                content: "Michael is feeling slightly better. Started gym 2x a week. Still \
                          struggling with motivation for work tasks. Discussed behavioral \
                          activation strategies."
                    .to_string(),
                summary: None,
                sentiment: Some(Sentiment::Positive),
            }],
        },
        Client {
            id: "c3".to_string(),
            name: "Elena Rodriguez".to_string(),
            avatar: "https://picsum.photos/200/200?random=3".to_string(),
            status: ClientStatus::Archived,
            diagnosis: Some("Adjustment Disorder".to_string()),
            next_appointment: None,
            documents: Vec::new(),
            notes: Vec::new(),
        },
    ];

    let appointments = vec![
        Appointment {
            id: "a1".to_string(),
            client_id: "c1".to_string(),
            date: ts(tomorrow),
            duration_minutes: DEFAULT_SESSION_MINUTES,
            session_type: SessionType::InPerson,
            summary: None,
        },
        Appointment {
            id: "a2".to_string(),
            client_id: "c2".to_string(),
            date: ts(in_two_days),
            duration_minutes: DEFAULT_SESSION_MINUTES,
            session_type: SessionType::Virtual,
            summary: None,
        },
    ];

    UserData {
        clients,
        appointments,
    }
}

/// Gives every record of a template a globally unique id, keeping the
/// client references of appointments intact.
pub fn personalize(template: UserData) -> UserData {
    let mut client_ids = HashMap::new();

    let clients = template
        .clients
        .into_iter()
        .map(|mut client| {
            let id = format!("{}_{}", client.id, Uuid::new_v4().simple());
            client_ids.insert(client.id.clone(), id.clone());
            client.id = id;
            for note in &mut client.notes {
                note.id = format!("n_{}", Uuid::new_v4().simple());
            }
            for doc in &mut client.documents {
                doc.id = format!("d_{}", Uuid::new_v4().simple());
            }
            client
        })
        .collect();

    let appointments = template
        .appointments
        .into_iter()
        .map(|mut appt| {
            appt.id = format!("a_{}", Uuid::new_v4().simple());
            if let Some(id) = client_ids.get(&appt.client_id) {
                appt.client_id = id.clone();
            }
            appt
        })
        .collect();

    UserData {
        clients,
        appointments,
    }
}

/// Writes the onboarding data for a user and returns it.
///
/// If the user row is missing (a session that outlived its database), a
/// placeholder user is inserted first so the client rows satisfy their
/// foreign key.
pub fn seed_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<UserData, DbError> {
    tracing::info!(user_id, "seeding onboarding data for new user");

    let tx = conn.unchecked_transaction()?;

    if get_user(&tx, user_id)?.is_none() {
        tracing::warn!(user_id, "user row missing, inserting placeholder user");
        tx.execute(
            "INSERT INTO users (id, email, name, password_hash) VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id,
                format!("recovered_{user_id}@example.invalid"),
                "Recovered User",
                "!",
            ],
        )?;
    }

    let data = personalize(onboarding_template(now));
    for client in &data.clients {
        create_client(&tx, user_id, client)?;
        for note in &client.notes {
            add_note(&tx, &client.id, note)?;
        }
        for doc in &client.documents {
            add_document(&tx, &client.id, doc)?;
        }
    }
    for appt in &data.appointments {
        create_appointment(&tx, user_id, appt)?;
    }

    tx.commit()?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personalize_keeps_appointment_links() {
        let data = personalize(onboarding_template(Utc::now()));
        let sarah = &data.clients[0];
        assert!(sarah.id.starts_with("c1_"));
        assert_eq!(data.appointments[0].client_id, sarah.id);
        assert_ne!(sarah.notes[0].id, "n1");
    }

    #[test]
    fn personalize_produces_distinct_ids_each_time() {
        let now = Utc::now();
        let a = personalize(onboarding_template(now));
        let b = personalize(onboarding_template(now));
        assert_ne!(a.clients[0].id, b.clients[0].id);
    }
}
