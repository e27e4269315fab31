//! Authentication against the users table with a local credential fallback.
//!
//! Passwords are stored as `sha256$<salt hex>$<digest hex>` where the digest
//! is SHA-256 over the salt followed by the password bytes. The local cache
//! stores the same format, never the plain password.

use crate::error::DbError;
use crate::local::{CachedCredential, LocalStore, LocalStoreError};
use crate::migrations::run_migrations;
use crate::pool::DbPool;
use crate::records::{find_user_by_email, get_user, insert_user};
use mindfulflow_types::User;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// Errors returned by [`AuthService`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("email already registered: {0}")]
    EmailTaken(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Local(#[from] LocalStoreError),
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hashes a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{HASH_SCHEME}${}${}", hex::encode(salt), digest(&salt, password))
}

/// Checks a password against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt_hex), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let actual = digest(&salt, password);
    // Length is fixed, compare without early exit.
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

enum RemoteOutcome<T> {
    Done(T),
    Unreachable(String),
}

/// Registers and authenticates practitioners.
#[derive(Clone)]
pub struct AuthService {
    pool: Option<DbPool>,
    local: LocalStore,
}

impl AuthService {
    pub fn new(pool: Option<DbPool>, local: LocalStore) -> Self {
        Self { pool, local }
    }

    fn remote<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T, DbError>,
    ) -> Result<RemoteOutcome<T>, DbError> {
        let Some(pool) = &self.pool else {
            return Ok(RemoteOutcome::Unreachable("no database configured".to_string()));
        };
        let conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => return Ok(RemoteOutcome::Unreachable(e.to_string())),
        };
        f(&conn).map(RemoteOutcome::Done)
    }

    /// Creates an account.
    ///
    /// A duplicate email in the database is rejected. Any other database
    /// failure falls back to the local credential cache.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AuthError> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AuthError::Invalid(
                "name, email and password are required".to_string(),
            ));
        }

        let user = User {
            id: format!("u_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            email: email.clone(),
        };
        let password_hash = hash_password(password);

        let remote = self.remote(|conn| {
            run_migrations(conn)?;
            insert_user(conn, &user, &password_hash)
        });
        let reason = match remote {
            Ok(RemoteOutcome::Done(())) => {
                tracing::info!(user_id = %user.id, "user registered");
                return Ok(user);
            }
            Err(e) if e.is_constraint_violation() => {
                return Err(AuthError::EmailTaken(email));
            }
            Ok(RemoteOutcome::Unreachable(reason)) => reason,
            Err(e) => e.to_string(),
        };

        tracing::warn!(reason = %reason, "remote registration failed, using local credential cache");
        let cached = self.local.cache_user(CachedCredential {
            user: user.clone(),
            password_hash,
        })?;
        if !cached {
            return Err(AuthError::EmailTaken(email));
        }
        tracing::info!(user_id = %user.id, "user registered locally");
        Ok(user)
    }

    /// Verifies credentials.
    ///
    /// The local cache is consulted when the database has no matching user
    /// or cannot be reached.
    pub fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = email.trim().to_lowercase();

        let remote = self.remote(|conn| find_user_by_email(conn, &email));
        let remote_reachable = match remote {
            Ok(RemoteOutcome::Done(Some(creds)))
                if verify_password(password, &creds.password_hash) =>
            {
                tracing::info!(user_id = %creds.user.id, "user logged in");
                return Ok(creds.user);
            }
            Ok(RemoteOutcome::Done(_)) => true,
            Ok(RemoteOutcome::Unreachable(reason)) => {
                tracing::warn!(reason = %reason, "database unreachable, checking local credential cache");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote login failed, checking local credential cache");
                false
            }
        };

        let cached = self
            .local
            .cached_users()?
            .into_iter()
            .find(|c| c.user.email == email && verify_password(password, &c.password_hash));
        if let Some(cred) = cached {
            tracing::info!(user_id = %cred.user.id, "user logged in from local cache");
            return Ok(cred.user);
        }

        if remote_reachable {
            Err(AuthError::InvalidCredentials)
        } else {
            Err(AuthError::Unavailable(
                "connection failed, please try again".to_string(),
            ))
        }
    }

    /// Resolves a user id from a session to a user record.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        match self.remote(|conn| get_user(conn, user_id)) {
            Ok(RemoteOutcome::Done(Some(user))) => return Ok(Some(user)),
            Ok(_) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "remote user lookup failed"),
        }
        Ok(self
            .local
            .cached_users()?
            .into_iter()
            .find(|c| c.user.id == user_id)
            .map(|c| c.user))
    }
}
