//! Identity collaborator: who is signed in, and when that changes.

use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;

mod http;

pub use http::AuthClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl Session {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// The live session, if any. Expired sessions count as absent.
    async fn current_session(&self) -> Result<Option<Session>, AppError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError>;

    async fn sign_out(&self) -> Result<(), AppError>;

    /// Delivers every sign-in and sign-out transition.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

/// Identity for the local file backend: a single implicit user that is
/// always signed in.
pub struct LocalIdentity {
    session: watch::Sender<Option<Session>>,
}

impl LocalIdentity {
    pub const USER_ID: &'static str = "local";

    pub fn new() -> Self {
        let (session, _) = watch::channel(Some(Self::session()));
        Self { session }
    }

    fn session() -> Session {
        Session {
            access_token: String::new(),
            refresh_token: None,
            user_id: Self::USER_ID.to_string(),
            email: None,
            expires_at: None,
        }
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Identity for LocalIdentity {
    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        Ok(self.session.borrow().clone())
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session, AppError> {
        let session = Self::session();
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        self.session.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}
