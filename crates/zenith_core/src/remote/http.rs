use super::{Query, RemoteStore};
use crate::error::AppError;
use crate::identity::Session;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, instrument};

const REST_PATH: &str = "rest/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// PostgREST-style backend. Each request carries the project key and the
/// bearer token of the current session, so row-level access rules apply on
/// the server side.
pub struct RestStore {
    base_url: String,
    anon_key: String,
    session: watch::Receiver<Option<Session>>,
    client: reqwest::Client,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        session: watch::Receiver<Option<Session>>,
    ) -> Result<Self, AppError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|err| AppError::invalid_data(format!("invalid backend url: {err}")))?;
        if parsed.host_str().is_none() {
            return Err(AppError::invalid_data("backend url missing host"));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::remote(err.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session,
            client,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{REST_PATH}/{collection}", self.base_url)
    }

    fn headers(&self) -> Result<HeaderMap, AppError> {
        let token = self
            .session
            .borrow()
            .as_ref()
            .map(|session| session.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|err| AppError::invalid_data(format!("invalid api key: {err}")))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| AppError::invalid_data(format!("invalid auth header: {err}")))?,
        );
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        Ok(headers)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, AppError> {
        let response = request
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|err| AppError::remote(format!("request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::remote(format!("read body failed: {err}")))?;

        if !status.is_success() {
            return Err(AppError::remote(format!("status={status} body={body}")));
        }
        if body.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        serde_json::from_str(&body).map_err(|err| AppError::invalid_data(err.to_string()))
    }
}

/// Query-string pairs in PostgREST syntax.
pub(crate) fn query_pairs(query: &Query) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), "*".to_string())];
    for filter in &query.filters {
        pairs.push((filter.column.clone(), format!("eq.{}", filter.value)));
    }
    if let Some(order) = query.order.as_ref() {
        let direction = if order.descending { "desc" } else { "asc" };
        pairs.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    if let Some(limit) = query.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
}

fn id_pair(id: &str) -> [(String, String); 1] {
    [("id".to_string(), format!("eq.{id}"))]
}

fn rows(payload: Value) -> Result<Vec<Value>, AppError> {
    match payload {
        Value::Array(rows) => Ok(rows),
        other => Err(AppError::invalid_data(format!(
            "expected a list of rows, got {other}"
        ))),
    }
}

fn require_match(payload: Value, collection: &str, id: &str) -> Result<(), AppError> {
    if rows(payload)?.is_empty() {
        return Err(AppError::remote(format!("no {collection} row with id {id}")));
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for RestStore {
    #[instrument(name = "rest_select", skip(self, query))]
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, AppError> {
        let request = self
            .client
            .get(self.collection_url(collection))
            .query(&query_pairs(query));
        debug!("issuing select");
        rows(self.send(request).await?)
    }

    #[instrument(name = "rest_insert", skip(self, record))]
    async fn insert(&self, collection: &str, record: Value) -> Result<Value, AppError> {
        let request = self
            .client
            .post(self.collection_url(collection))
            .json(&Value::Array(vec![record]));
        debug!("issuing insert");
        rows(self.send(request).await?)?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::remote("insert returned no row"))
    }

    #[instrument(name = "rest_update", skip(self, fields))]
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError> {
        let request = self
            .client
            .patch(self.collection_url(collection))
            .query(&id_pair(id))
            .json(&fields);
        debug!("issuing update");
        require_match(self.send(request).await?, collection, id)
    }

    #[instrument(name = "rest_delete", skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        let request = self
            .client
            .delete(self.collection_url(collection))
            .query(&id_pair(id));
        debug!("issuing delete");
        require_match(self.send(request).await?, collection, id)
    }
}
