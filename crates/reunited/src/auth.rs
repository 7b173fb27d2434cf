//! Officer sessions: opaque tokens with a fixed lifetime.
//!
//! Credentials themselves live in the store's officer table; this only
//! tracks which tokens are currently valid.

use chrono::{DateTime, Duration, Utc};
use reunite_store::Officer;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

struct Session {
    officer: Officer,
    expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh token for a verified officer.
    pub async fn open_session(&self, officer: Officer) -> String {
        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            token.clone(),
            Session {
                officer,
                expires_at: Utc::now() + self.ttl,
            },
        );
        token
    }

    /// Resolve a token to its officer. Expired tokens are removed on
    /// lookup and resolve to nothing.
    pub async fn principal(&self, token: &str) -> Option<Officer> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Some(session.officer.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn close_session(&self, token: &str) -> bool {
        self.sessions.lock().await.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn officer() -> Officer {
        Officer {
            username: "patil".to_string(),
            contact_phone: Some("8589958840".to_string()),
        }
    }

    #[tokio::test]
    async fn test_open_and_resolve_session() {
        let sessions = SessionManager::new(3600);
        let token = sessions.open_session(officer()).await;
        let resolved = sessions.principal(&token).await.unwrap();
        assert_eq!(resolved.username, "patil");
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let sessions = SessionManager::new(3600);
        assert!(sessions.principal("not-a-token").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_rejected_and_purged() {
        let sessions = SessionManager::new(-1);
        let token = sessions.open_session(officer()).await;
        assert!(sessions.principal(&token).await.is_none());
        assert!(sessions.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_session() {
        let sessions = SessionManager::new(3600);
        let token = sessions.open_session(officer()).await;
        assert!(sessions.close_session(&token).await);
        assert!(!sessions.close_session(&token).await);
        assert!(sessions.principal(&token).await.is_none());
    }
}
