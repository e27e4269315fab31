//! In-memory practice state mutated by the voice assistant.

use crate::{Appointment, Client, Note, UserData};
use serde::{Deserialize, Serialize};

/// A practitioner's clients and appointments held in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub user_id: String,
    pub clients: Vec<Client>,
    pub appointments: Vec<Appointment>,
}

impl Workspace {
    pub fn new(user_id: impl Into<String>, data: UserData) -> Self {
        Self {
            user_id: user_id.into(),
            clients: data.clients,
            appointments: data.appointments,
        }
    }

    /// Resolves a spoken or typed client name.
    ///
    /// Case-insensitive substring match against client names; the first
    /// match in list order wins. A blank query matches nothing.
    pub fn find_client(&self, name: &str) -> Option<&Client> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.clients
            .iter()
            .find(|c| c.name.to_lowercase().contains(&needle))
    }

    pub fn client(&self, client_id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == client_id)
    }

    fn client_mut(&mut self, client_id: &str) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.id == client_id)
    }

    /// The most recent note of a client (notes are kept newest first).
    pub fn latest_note(&self, client_id: &str) -> Option<&Note> {
        self.client(client_id).and_then(|c| c.notes.first())
    }

    /// Inserts a note at the head of the client's note list.
    ///
    /// Returns `false` if the client is unknown.
    pub fn prepend_note(&mut self, client_id: &str, note: Note) -> bool {
        match self.client_mut(client_id) {
            Some(client) => {
                client.notes.insert(0, note);
                true
            }
            None => false,
        }
    }

    /// Replaces the content of one note. Returns `false` if not found.
    pub fn set_note_content(&mut self, client_id: &str, note_id: &str, content: &str) -> bool {
        let Some(client) = self.client_mut(client_id) else {
            return false;
        };
        match client.notes.iter_mut().find(|n| n.id == note_id) {
            Some(note) => {
                note.content = content.to_string();
                true
            }
            None => false,
        }
    }

    /// Appends an appointment and records it as the client's next one.
    pub fn push_appointment(&mut self, appointment: Appointment) {
        if let Some(client) = self.client_mut(&appointment.client_id) {
            client.next_appointment = Some(appointment.date.clone());
        }
        self.appointments.push(appointment);
    }

    pub fn replace_appointments(&mut self, appointments: Vec<Appointment>) {
        self.appointments = appointments;
    }

    pub fn into_user_data(self) -> UserData {
        UserData {
            clients: self.clients,
            appointments: self.appointments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientStatus, SessionType, UNKNOWN_CLIENT_ID};

    fn client(id: &str, name: &str, notes: Vec<Note>) -> Client {
        Client {
            id: id.to_string(),
            name: name.to_string(),
            avatar: String::new(),
            status: ClientStatus::Active,
            diagnosis: None,
            next_appointment: None,
            notes,
            documents: Vec::new(),
        }
    }

    fn note(id: &str, content: &str) -> Note {
        Note {
            id: id.to_string(),
            date: "2026-10-01T10:00:00Z".to_string(),
            content: content.to_string(),
            summary: None,
            sentiment: None,
        }
    }

    fn workspace() -> Workspace {
        Workspace {
            user_id: "u1".to_string(),
            clients: vec![
                client("c1", "Sarah Jenkins", vec![note("n1", "first")]),
                client("c2", "Sarah Chen", Vec::new()),
            ],
            appointments: Vec::new(),
        }
    }

    #[test]
    fn find_client_is_case_insensitive_substring_first_match() {
        let ws = workspace();
        assert_eq!(ws.find_client("jenk").map(|c| c.id.as_str()), Some("c1"));
        assert_eq!(ws.find_client("SARAH").map(|c| c.id.as_str()), Some("c1"));
        assert_eq!(ws.find_client("chen").map(|c| c.id.as_str()), Some("c2"));
        assert!(ws.find_client("Michael").is_none());
    }

    #[test]
    fn blank_name_matches_nothing() {
        let ws = workspace();
        assert!(ws.find_client("").is_none());
        assert!(ws.find_client("   ").is_none());
    }

    #[test]
    fn prepend_note_puts_note_at_head() {
        let mut ws = workspace();
        assert!(ws.prepend_note("c1", note("n2", "second")));
        assert_eq!(ws.latest_note("c1").map(|n| n.id.as_str()), Some("n2"));
        assert!(!ws.prepend_note("missing", note("n3", "x")));
    }

    #[test]
    fn set_note_content_updates_in_place() {
        let mut ws = workspace();
        assert!(ws.set_note_content("c1", "n1", "first\nmore"));
        assert_eq!(ws.latest_note("c1").unwrap().content, "first\nmore");
        assert!(!ws.set_note_content("c1", "nope", "x"));
    }

    #[test]
    fn push_appointment_updates_next_appointment() {
        let mut ws = workspace();
        ws.push_appointment(Appointment {
            id: "a1".to_string(),
            client_id: "c2".to_string(),
            date: "2026-10-21T15:00:00Z".to_string(),
            duration_minutes: 50,
            session_type: SessionType::Virtual,
            summary: None,
        });
        ws.push_appointment(Appointment {
            id: "a2".to_string(),
            client_id: UNKNOWN_CLIENT_ID.to_string(),
            date: "2026-10-22T15:00:00Z".to_string(),
            duration_minutes: 50,
            session_type: SessionType::InPerson,
            summary: None,
        });

        assert_eq!(ws.appointments.len(), 2);
        assert_eq!(
            ws.client("c2").unwrap().next_appointment.as_deref(),
            Some("2026-10-21T15:00:00Z")
        );
    }
}
