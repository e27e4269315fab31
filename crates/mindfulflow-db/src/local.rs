//! Local key-value store used when the database is unavailable.
//!
//! Each key is a JSON document in a directory. It holds the offline
//! credential cache (`mindfulflow_users`) and one full [`UserData`] snapshot
//! per practitioner (`mindfulflow_data_<userId>`). Writes go to a temporary
//! file first and are renamed into place.

use crate::seed::{onboarding_template, personalize};
use chrono::Utc;
use mindfulflow_types::{User, UserData};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const USERS_KEY: &str = "mindfulflow_users";
const DATA_KEY_PREFIX: &str = "mindfulflow_data_";

/// Errors from the local store.
#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("local store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("local store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid local store key: {0}")]
    InvalidKey(String),

    #[error("local store lock poisoned")]
    Poisoned,
}

/// A user record in the offline credential cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCredential {
    #[serde(flatten)]
    pub user: User,
    pub password_hash: String,
}

/// Directory-backed JSON key-value store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    // Serialises read-modify-write cycles across clones.
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Opens (and creates, if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LocalStoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, LocalStoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(LocalStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LocalStoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), LocalStoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Runs a read-modify-write cycle on one key under the store lock.
    pub fn update<T, R, F>(&self, key: &str, f: F) -> Result<R, LocalStoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LocalStoreError::Poisoned)?;
        let mut value = self.get::<T>(key)?.unwrap_or_default();
        let out = f(&mut value);
        self.put(key, &value)?;
        Ok(out)
    }

    fn data_key(user_id: &str) -> String {
        format!("{DATA_KEY_PREFIX}{user_id}")
    }

    /// Loads a practitioner's snapshot, seeding and saving the onboarding
    /// data on first use.
    pub fn load_user_data(&self, user_id: &str) -> Result<UserData, LocalStoreError> {
        let key = Self::data_key(user_id);
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LocalStoreError::Poisoned)?;
        if let Some(data) = self.get::<UserData>(&key)? {
            return Ok(data);
        }
        tracing::info!(user_id, "no local snapshot, seeding onboarding data");
        let data = personalize(onboarding_template(Utc::now()));
        self.put(&key, &data)?;
        Ok(data)
    }

    /// Mutates a practitioner's snapshot in place.
    ///
    /// The snapshot is seeded first if it does not exist yet.
    pub fn update_user_data<R, F>(&self, user_id: &str, f: F) -> Result<R, LocalStoreError>
    where
        F: FnOnce(&mut UserData) -> R,
    {
        // Seed outside the update so a first write does not start from an
        // empty snapshot.
        self.load_user_data(user_id)?;
        self.update(&Self::data_key(user_id), f)
    }

    pub fn cached_users(&self) -> Result<Vec<CachedCredential>, LocalStoreError> {
        Ok(self.get(USERS_KEY)?.unwrap_or_default())
    }

    /// Adds a credential to the cache unless the email is already present.
    ///
    /// Returns `false` if the email was taken.
    pub fn cache_user(&self, credential: CachedCredential) -> Result<bool, LocalStoreError> {
        self.update(USERS_KEY, |users: &mut Vec<CachedCredential>| {
            if users.iter().any(|u| u.user.email == credential.user.email) {
                return false;
            }
            users.push(credential);
            true
        })
    }
}
