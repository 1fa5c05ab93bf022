use crate::realtime::{self, RealtimeOptions};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lcm_core::models::RecordKey;
use lcm_core::service::{Query, RemoteService, Subscription};
use lcm_core::SyncError;
use lcm_proto::{ApiErrorBody, PasswordGrant, RemovePrefixes, TokenResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use url::Url;

/// A signed-in admin session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// `RemoteService` backed by the hosted REST, storage, auth and realtime APIs
pub struct HttpService {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
    realtime: RealtimeOptions,
}

impl HttpService {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, SyncError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| SyncError::validation(format!("invalid service url '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::validation(format!(
                "service url must be http or https, got '{base_url}'"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: RwLock::new(None),
            realtime: RealtimeOptions::default(),
        })
    }

    pub fn with_access_token(self, token: Option<String>) -> Self {
        self.set_access_token(token);
        self
    }

    pub fn with_realtime(mut self, options: RealtimeOptions) -> Self {
        self.realtime = options;
        self
    }

    /// Use `token` as bearer for later requests; `None` falls back to the
    /// anon key
    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer()))
    }

    /// Sign in with email and password; the session's token is used for
    /// every later request
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SyncError> {
        let grant = PasswordGrant {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&grant)
            .send()
            .await
            .map_err(network)?;
        let token: TokenResponse = decode(check(response).await?).await?;
        let session = Session {
            email: token
                .user
                .and_then(|u| u.email)
                .unwrap_or_else(|| email.to_string()),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        };
        self.set_access_token(Some(session.access_token.clone()));
        debug!(email = %session.email, "signed in");
        Ok(session)
    }

    /// Rows returned with `Prefer: return=representation` by a keyed write
    async fn keyed_write(
        &self,
        method: Method,
        collection: &str,
        key: &RecordKey,
        body: Option<Value>,
    ) -> Result<(), SyncError> {
        let mut request = self
            .request(method, &format!("/rest/v1/{collection}"))
            .query(&[("id", format!("eq.{key}"))])
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(network)?;
        let rows: Vec<Value> = decode(check(response).await?).await?;
        if rows.is_empty() {
            return Err(SyncError::not_found(collection, key));
        }
        Ok(())
    }
}

fn network(err: reqwest::Error) -> SyncError {
    SyncError::Network(err.to_string())
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SyncError> {
    let body = response.text().await.map_err(network)?;
    Ok(serde_json::from_str(&body)?)
}

/// Pass successful responses through and turn the rest into errors
async fn check(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
    Err(map_status(status, &body, &text))
}

pub fn map_status(status: StatusCode, body: &ApiErrorBody, raw: &str) -> SyncError {
    let message = body
        .summary()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if raw.trim().is_empty() {
                status.to_string()
            } else {
                raw.trim().to_string()
            }
        });
    // storage reports duplicate objects as 400 with an error code
    if body.error.as_deref() == Some("Duplicate") {
        return SyncError::Conflict(message);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Permission(message),
        StatusCode::CONFLICT => SyncError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Validation(message)
        }
        _ => SyncError::Service(format!("{status}: {message}")),
    }
}

fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RemoteService for HttpService {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Value>, SyncError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        if !query.order.is_empty() {
            let order = query
                .order
                .iter()
                .map(|term| {
                    let direction = if term.ascending { "asc" } else { "desc" };
                    format!("{}.{direction}", term.column)
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        for (column, value) in &query.filters {
            params.push((column.clone(), format!("eq.{}", filter_value(value))));
        }

        let response = self
            .request(Method::GET, &format!("/rest/v1/{collection}"))
            .query(&params)
            .send()
            .await
            .map_err(network)?;
        decode(check(response).await?).await
    }

    async fn insert(&self, collection: &str, fields: Value) -> Result<Value, SyncError> {
        let response = self
            .request(Method::POST, &format!("/rest/v1/{collection}"))
            .header("Prefer", "return=representation")
            .json(&fields)
            .send()
            .await
            .map_err(network)?;
        let rows: Vec<Value> = decode(check(response).await?).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SyncError::Decode(format!("insert into {collection} returned no row")))
    }

    async fn update_by_key(
        &self,
        collection: &str,
        key: &RecordKey,
        fields: Value,
    ) -> Result<(), SyncError> {
        self.keyed_write(Method::PATCH, collection, key, Some(fields))
            .await
    }

    async fn delete_by_key(&self, collection: &str, key: &RecordKey) -> Result<(), SyncError> {
        self.keyed_write(Method::DELETE, collection, key, None).await
    }

    async fn upload_blob(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), SyncError> {
        let response = self
            .request(Method::POST, &format!("/storage/v1/object/{bucket}/{key}"))
            .header("x-upsert", "false")
            .header(
                CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(bytes)
            .send()
            .await
            .map_err(network)?;
        check(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{key}", self.base_url)
    }

    async fn delete_blob(&self, bucket: &str, key: &str) -> Result<(), SyncError> {
        let body = RemovePrefixes {
            prefixes: vec![key.to_string()],
        };
        let response = self
            .request(Method::DELETE, &format!("/storage/v1/object/{bucket}"))
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        check(response).await?;
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, SyncError> {
        let ws_url = realtime::websocket_url(&self.base_url, &self.anon_key)?;
        Ok(realtime::subscribe(
            ws_url,
            collection,
            self.bearer(),
            self.realtime.clone(),
        ))
    }
}
