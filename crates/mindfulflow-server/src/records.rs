//! Voice tool writes routed to the practice store.

use async_trait::async_trait;
use mindfulflow_db::{PracticeStore, StoreError};
use mindfulflow_types::{Appointment, Note};
use mindfulflow_voice::{RecordStore, VoiceError};

/// [`RecordStore`] over a [`PracticeStore`], one blocking task per write.
#[derive(Debug, Clone)]
pub struct PracticeRecords {
    store: PracticeStore,
}

impl PracticeRecords {
    pub fn new(store: PracticeStore) -> Self {
        Self { store }
    }

    async fn run<F>(&self, f: F) -> Result<(), VoiceError>
    where
        F: FnOnce(&PracticeStore) -> Result<(), StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| VoiceError::Store(format!("task join error: {e}")))?
            .map_err(|e| VoiceError::Store(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for PracticeRecords {
    async fn add_note(&self, user_id: &str, client_id: &str, note: &Note) -> Result<(), VoiceError> {
        let (user_id, client_id, note) = (user_id.to_string(), client_id.to_string(), note.clone());
        self.run(move |store| store.add_note(&user_id, &client_id, &note))
            .await
    }

    async fn update_note_content(
        &self,
        user_id: &str,
        client_id: &str,
        note_id: &str,
        content: &str,
    ) -> Result<(), VoiceError> {
        let (user_id, client_id) = (user_id.to_string(), client_id.to_string());
        let (note_id, content) = (note_id.to_string(), content.to_string());
        self.run(move |store| store.update_note_content(&user_id, &client_id, &note_id, &content))
            .await
    }

    async fn create_appointment(
        &self,
        user_id: &str,
        appt: &Appointment,
    ) -> Result<(), VoiceError> {
        let (user_id, appt) = (user_id.to_string(), appt.clone());
        self.run(move |store| store.create_appointment(&user_id, &appt))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindfulflow_db::LocalStore;
    use mindfulflow_types::{Sentiment, SessionType};

    #[tokio::test]
    async fn writes_land_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = PracticeStore::Local(LocalStore::open(dir.path()).unwrap());
        let records = PracticeRecords::new(store.clone());

        let data = store.fetch_user_data("u1");
        let client_id = data.clients[0].id.clone();

        let note = Note {
            id: "n_voice".into(),
            date: "2025-03-01T10:00:00Z".into(),
            content: "Dictated".into(),
            summary: None,
            sentiment: Some(Sentiment::Neutral),
        };
        records.add_note("u1", &client_id, &note).await.unwrap();
        records
            .update_note_content("u1", &client_id, "n_voice", "Dictated\nmore")
            .await
            .unwrap();

        let appt = Appointment {
            id: "a_voice".into(),
            client_id: "unknown".into(),
            date: "2025-03-02T10:00:00+00:00".into(),
            duration_minutes: 50,
            session_type: SessionType::InPerson,
            summary: None,
        };
        records.create_appointment("u1", &appt).await.unwrap();

        let data = store.fetch_user_data("u1");
        let client = data.clients.iter().find(|c| c.id == client_id).unwrap();
        assert_eq!(client.notes[0].content, "Dictated\nmore");
        assert!(data.appointments.iter().any(|a| a.id == "a_voice"));
    }

    #[tokio::test]
    async fn missing_note_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = PracticeStore::Local(LocalStore::open(dir.path()).unwrap());
        let records = PracticeRecords::new(store);

        let err = records
            .update_note_content("u1", "nobody", "n_missing", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Store(_)));
    }
}
