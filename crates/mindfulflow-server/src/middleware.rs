use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::AppState;

/// The authenticated practitioner, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser(pub String);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issues and verifies HMAC-SHA256 signed session tokens.
///
/// Token format: `base64url(user_id|expires_unix_secs|hmac_hex)`.
#[derive(Clone)]
pub struct SessionTokens {
    secret: [u8; 32],
    ttl_secs: u64,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("secret", &"[REDACTED]")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl SessionTokens {
    /// Derives the signing key from `secret`; an empty secret yields a random
    /// key.
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let secret = if secret.is_empty() {
            tracing::warn!("no session secret configured, tokens will not survive a restart");
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            key
        } else {
            let mut hasher = Sha256::new();
            hasher.update(b"mindfulflow-session-v1:");
            hasher.update(secret.as_bytes());
            hasher.finalize().into()
        };
        Self { secret, ttl_secs }
    }

    fn mac(&self, payload: &str) -> Hmac<Sha256> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC key length is valid");
        mac.update(payload.as_bytes());
        mac
    }

    pub fn issue(&self, user_id: &str) -> String {
        self.issue_at(user_id, now_secs())
    }

    fn issue_at(&self, user_id: &str, now: u64) -> String {
        let payload = format!("{user_id}|{}", now + self.ttl_secs);
        let signature = self.mac(&payload).finalize().into_bytes();
        URL_SAFE_NO_PAD.encode(format!("{payload}|{}", hex::encode(signature)))
    }

    /// Returns the user id bound to a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<String> {
        self.verify_at(token, now_secs())
    }

    fn verify_at(&self, token: &str, now: u64) -> Option<String> {
        let decoded = URL_SAFE_NO_PAD.decode(token.trim().as_bytes()).ok()?;
        let text = String::from_utf8(decoded).ok()?;

        // user ids never contain '|', so split from the right.
        let mut parts = text.rsplitn(3, '|');
        let sig_hex = parts.next()?;
        let expires_str = parts.next()?;
        let user_id = parts.next()?;

        let provided = hex::decode(sig_hex).ok()?;
        self.mac(&format!("{user_id}|{expires_str}"))
            .verify_slice(&provided)
            .ok()?;

        let expires: u64 = expires_str.parse().ok()?;
        if now > expires || user_id.is_empty() {
            return None;
        }
        Some(user_id.to_string())
    }
}

/// Authenticates requests via `Authorization: Bearer <session token>`.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let Some(user_id) = state.tokens.verify(&token) else {
        tracing::debug!(path = %req.uri().path(), "rejected session token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let tokens = SessionTokens::new("secret", 60);
        let token = tokens.issue("u_123");
        assert_eq!(tokens.verify(&token).as_deref(), Some("u_123"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = SessionTokens::new("secret", 60);
        let token = tokens.issue_at("u_1", 1_000);
        assert_eq!(tokens.verify_at(&token, 1_060).as_deref(), Some("u_1"));
        assert!(tokens.verify_at(&token, 1_061).is_none());
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let ours = SessionTokens::new("secret-a", 60);
        let theirs = SessionTokens::new("secret-b", 60);
        assert!(ours.verify(&theirs.issue("u_1")).is_none());
    }

    #[test]
    fn tampered_user_id_is_rejected() {
        let tokens = SessionTokens::new("secret", 60);
        let decoded = String::from_utf8(
            URL_SAFE_NO_PAD
                .decode(tokens.issue("u_1").as_bytes())
                .unwrap(),
        )
        .unwrap();
        let forged = URL_SAFE_NO_PAD.encode(decoded.replacen("u_1", "u_2", 1));
        assert!(tokens.verify(&forged).is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        let tokens = SessionTokens::new("secret", 60);
        assert!(tokens.verify("").is_none());
        assert!(tokens.verify("not base64 at all!").is_none());
        assert!(tokens.verify(&URL_SAFE_NO_PAD.encode("a|b")).is_none());
    }

    #[test]
    fn random_secrets_differ() {
        let a = SessionTokens::new("", 60);
        let b = SessionTokens::new("", 60);
        assert!(b.verify(&a.issue("u_1")).is_none());
    }
}
