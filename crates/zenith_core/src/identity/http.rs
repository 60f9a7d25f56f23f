use super::{Identity, Session};
use crate::error::AppError;
use crate::storage::session_store;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

const AUTH_PATH: &str = "auth/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// GoTrue-style password identity. The session survives restarts in a
/// private session file.
pub struct AuthClient {
    base_url: String,
    anon_key: String,
    session_path: PathBuf,
    session: watch::Sender<Option<Session>>,
    client: reqwest::Client,
}

impl AuthClient {
    pub fn new(base_url: &str, anon_key: &str, session_path: PathBuf) -> Result<Self, AppError> {
        let stored = session_store::load_session(&session_path)?
            .filter(|session| !session.is_expired());
        let (session, _) = watch::channel(stored);

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::remote(err.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session_path,
            session,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{AUTH_PATH}/{path}", self.base_url)
    }

    fn headers(&self, bearer: Option<&str>) -> Result<HeaderMap, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|err| AppError::invalid_data(format!("invalid api key: {err}")))?,
        );
        if let Some(token) = bearer {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|err| {
                    AppError::invalid_data(format!("invalid auth header: {err}"))
                })?,
            );
        }
        Ok(headers)
    }

    fn publish(&self, session: Option<Session>) -> Result<(), AppError> {
        match session.as_ref() {
            Some(session) => session_store::save_session(&self.session_path, session)?,
            None => session_store::clear_session(&self.session_path)?,
        }
        self.session.send_replace(session);
        Ok(())
    }
}

fn session_from_token(response: TokenResponse, now: OffsetDateTime) -> Session {
    Session {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        user_id: response.user.id,
        email: response.user.email,
        expires_at: response
            .expires_in
            .map(|seconds| now + time::Duration::seconds(seconds)),
    }
}

#[async_trait]
impl Identity for AuthClient {
    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        let current = self.session.borrow().clone();
        match current {
            Some(session) if session.is_expired() => {
                info!(user_id = %session.user_id, "session expired");
                self.publish(None)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::invalid_input("email and password are required"));
        }

        let response = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .headers(self.headers(None)?)
            .json(&serde_json::json!({ "email": email.trim(), "password": password }))
            .send()
            .await
            .map_err(|err| AppError::remote(format!("sign-in request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::remote(format!("read body failed: {err}")))?;
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(AppError::unauthenticated("invalid email or password"));
        }
        if !status.is_success() {
            return Err(AppError::remote(format!("status={status} body={body}")));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| AppError::invalid_data(err.to_string()))?;
        let session = session_from_token(token, OffsetDateTime::now_utc());
        info!(user_id = %session.user_id, "signed in");
        self.publish(Some(session.clone()))?;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        let current = self.session.borrow().clone();
        if let Some(session) = current {
            let result = self
                .client
                .post(self.endpoint("logout"))
                .headers(self.headers(Some(&session.access_token))?)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!(status = %response.status(), "remote sign-out rejected"),
                Err(err) => warn!("remote sign-out failed: {err}"),
            }
        }
        self.publish(None)?;
        info!("signed out");
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}
