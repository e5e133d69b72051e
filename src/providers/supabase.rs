//! Supabase: GoTrue for authentication and PostgREST row access.
//!
//! Entities are rows in tables named after the entity kind and scoped to
//! the caller by `user_id`. Row-level security still applies server side;
//! the explicit owner filter keeps listings and counts to the caller's rows
//! even under a permissive policy.
use super::util::{error_message, with_retry};
use crate::core::config::RetryConfig;
use crate::core::credentials::Session;
use crate::core::error::{AuthError, GatewayError};
use crate::core::gateway::{AuthContext, Backend, Registration, decode, ensure_writable};
use crate::core::model::{EmergingMarket, EntityKind, MarketDetail, MarketTrend, Record, User};
use crate::core::query::{Condition, ListQuery, Op, Page};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgREST error codes with a meaning beyond their HTTP status.
const JWT_EXPIRED: &str = "PGRST301";
const NO_ROWS: &str = "PGRST116";
const INSUFFICIENT_PRIVILEGE: &str = "42501";
/// `invalid_text_representation`, raised for an id that is not a valid uuid.
const INVALID_TEXT: &str = "22P02";

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Login,
    Resource(EntityKind, &'a str),
    /// A single row addressed by id.
    Row(EntityKind, &'a str),
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    role: Option<String>,
}

/// A GoTrue user object.
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

impl From<AuthUser> for Record<User> {
    fn from(user: AuthUser) -> Self {
        let metadata = user.user_metadata.unwrap_or_default();
        Record {
            id: user.id,
            owner_id: None,
            created_at: user.created_at.unwrap_or_else(Utc::now),
            updated_at: None,
            data: User {
                email: user.email,
                first_name: metadata.first_name,
                last_name: metadata.last_name,
                role: metadata.role.unwrap_or_else(|| "investor".to_string()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Option<AuthUser>,
}

pub struct SupabaseBackend {
    client: reqwest::Client,
    url: String,
    anon_key: String,
    retry: RetryConfig,
}

impl SupabaseBackend {
    pub fn new(url: &str, anon_key: &str, retry: RetryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(SupabaseBackend {
            client,
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            retry,
        })
    }

    fn endpoint(&self, path: &str, params: &[(String, String)]) -> Result<Url, GatewayError> {
        Url::parse_with_params(&format!("{}/{}", self.url, path), params)
            .map_err(|e| GatewayError::Transport(format!("invalid request URL: {e}")))
    }

    fn table_url(&self, kind: EntityKind, params: &[(String, String)]) -> Result<Url, GatewayError> {
        self.endpoint(&format!("rest/v1/{}", kind.table()), params)
    }

    /// Requests carry the project key, and the user's token once logged in.
    fn request(&self, method: Method, url: Url, auth: Option<&AuthContext>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key);
        match auth {
            Some(auth) => builder.bearer_auth(&auth.access_token),
            None => builder.bearer_auth(&self.anon_key),
        }
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        target: Target<'_>,
    ) -> Result<(HeaderMap, Value), GatewayError> {
        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                Err(e) if status.is_success() => {
                    return Err(GatewayError::Transport(format!("malformed response: {e}")));
                }
                Err(_) => Value::Null,
            }
        };

        if status.is_success() {
            return Ok((headers, body));
        }
        debug!("Supabase request failed with {}: {}", status, text);
        Err(status_error(status, &body, target))
    }

    async fn fetch(
        &self,
        url: Url,
        auth: &AuthContext,
        count: bool,
        target: Target<'_>,
    ) -> Result<(HeaderMap, Value), GatewayError> {
        with_retry(
            || {
                let mut request = self.request(Method::GET, url.clone(), Some(auth));
                if count {
                    request = request.header("Prefer", "count=exact");
                }
                self.execute(request, target)
            },
            self.retry.attempts.saturating_sub(1),
            self.retry.delay_ms,
        )
        .await
    }

    async fn fetch_rows(
        &self,
        kind: EntityKind,
        params: &[(String, String)],
        auth: &AuthContext,
        target: Target<'_>,
    ) -> Result<Vec<Value>, GatewayError> {
        let url = self.table_url(kind, params)?;
        let (_, body) = self.fetch(url, auth, false, target).await?;
        rows_of(body)
    }

    /// Writes rows and returns the affected representation.
    async fn write(
        &self,
        method: Method,
        kind: EntityKind,
        params: &[(String, String)],
        auth: &AuthContext,
        body: Option<&Value>,
        target: Target<'_>,
    ) -> Result<Vec<Value>, GatewayError> {
        let url = self.table_url(kind, params)?;
        let mut request = self
            .request(method, url, Some(auth))
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(body);
        }
        let (_, body) = self.execute(request, target).await?;
        rows_of(body)
    }

    async fn auth_user(&self, auth: &AuthContext) -> Result<Record<User>, GatewayError> {
        let url = self.endpoint("auth/v1/user", &[])?;
        let (_, body) = self
            .fetch(url, auth, false, Target::Resource(EntityKind::User, &auth.user_id))
            .await?;
        let user: AuthUser = decode(EntityKind::User, body)?;
        Ok(user.into())
    }

    fn session_from(&self, body: Value) -> Result<Session, GatewayError> {
        let response: TokenResponse = decode(EntityKind::User, body)?;
        let (Some(token), Some(user)) = (response.access_token, response.user) else {
            return Err(GatewayError::Validation(
                "account created; confirm the email address before logging in".to_string(),
            ));
        };
        Ok(Session::new(
            token,
            response.token_type,
            response.expires_in,
            user.into(),
        ))
    }
}

fn status_error(status: StatusCode, body: &Value, target: Target<'_>) -> GatewayError {
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    if matches!(target, Target::Login) && status.is_client_error() {
        return AuthError::InvalidCredentials(message).into();
    }
    if code == JWT_EXPIRED || status == StatusCode::UNAUTHORIZED {
        return AuthError::Expired.into();
    }
    if code == INSUFFICIENT_PRIVILEGE || status == StatusCode::FORBIDDEN {
        return AuthError::Denied(message).into();
    }
    match (status, target) {
        (StatusCode::BAD_REQUEST, Target::Row(kind, id)) if code == INVALID_TEXT => {
            GatewayError::not_found(kind, id)
        }
        (StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE, Target::Row(kind, id))
            if status == StatusCode::NOT_FOUND || code == NO_ROWS =>
        {
            GatewayError::not_found(kind, id)
        }
        (StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE, Target::Resource(kind, id))
            if status == StatusCode::NOT_FOUND || code == NO_ROWS =>
        {
            GatewayError::not_found(kind, id)
        }
        (StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY, _) => {
            GatewayError::Validation(message)
        }
        _ => GatewayError::Transport(format!("{status}: {message}")),
    }
}

fn rows_of(body: Value) -> Result<Vec<Value>, GatewayError> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        Value::Object(_) => Ok(vec![body]),
        other => Err(GatewayError::Transport(format!(
            "expected rows, got {other}"
        ))),
    }
}

fn first_row(rows: Vec<Value>, kind: EntityKind, id: &str) -> Result<Value, GatewayError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| GatewayError::not_found(kind, id))
}

/// `address.city` addresses a JSON column as `address->>city`.
fn column(field: &str) -> String {
    match field.split_once('.') {
        Some((head, rest)) => {
            let mut parts: Vec<&str> = rest.split('.').collect();
            let leaf = parts.pop().unwrap_or_default();
            let mut path = head.to_string();
            for part in parts {
                path.push_str("->");
                path.push_str(part);
            }
            format!("{path}->>{leaf}")
        }
        None => field.to_string(),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_param(condition: &Condition) -> (String, String) {
    let value = match (condition.op, &condition.value) {
        (Op::Eq, v) => format!("eq.{}", literal(v)),
        (Op::Gte, v) => format!("gte.{}", literal(v)),
        (Op::Lte, v) => format!("lte.{}", literal(v)),
        (Op::Contains, Value::Array(items)) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("cs.{{{}}}", items.join(","))
        }
        (Op::Contains, v) => format!("ilike.*{}*", literal(v)),
    };
    (column(&condition.field), value)
}

fn owner_param(kind: EntityKind, auth: &AuthContext) -> Option<(String, String)> {
    kind.owner_column()
        .map(|column| (column.to_string(), format!("eq.{}", auth.user_id)))
}

fn scoped_id_params(kind: EntityKind, id: &str, auth: &AuthContext) -> Vec<(String, String)> {
    let mut params = vec![("id".to_string(), format!("eq.{id}"))];
    params.extend(owner_param(kind, auth));
    params
}

/// Total row count from a `Content-Range: 0-9/42` header.
fn total_from(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("content-range")?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse()
        .ok()
}

#[async_trait]
impl Backend for SupabaseBackend {
    fn name(&self) -> &'static str {
        "supabase"
    }

    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let url = self.endpoint(
            "auth/v1/token",
            &[("grant_type".to_string(), "password".to_string())],
        )?;
        let request = self
            .request(Method::POST, url, None)
            .json(&json!({"email": email, "password": password}));
        let (_, body) = self.execute(request, Target::Login).await?;
        self.session_from(body)
    }

    async fn register(&self, registration: &Registration) -> Result<Session, GatewayError> {
        let url = self.endpoint("auth/v1/signup", &[])?;
        let request = self.request(Method::POST, url, None).json(&json!({
            "email": registration.email,
            "password": registration.password,
            "data": {
                "first_name": registration.first_name,
                "last_name": registration.last_name,
            }
        }));
        let (_, body) = self
            .execute(
                request,
                Target::Resource(EntityKind::User, &registration.email),
            )
            .await?;
        self.session_from(body)
    }

    async fn logout(&self, auth: &AuthContext) -> Result<(), GatewayError> {
        let url = self.endpoint("auth/v1/logout", &[])?;
        self.execute(
            self.request(Method::POST, url, Some(auth)),
            Target::Resource(EntityKind::User, &auth.user_id),
        )
        .await?;
        Ok(())
    }

    async fn current_user(&self, auth: &AuthContext) -> Result<Record<User>, GatewayError> {
        self.auth_user(auth).await
    }

    #[instrument(skip(self, auth))]
    async fn list(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<Value>, GatewayError> {
        let mut params: Vec<(String, String)> = query.filters.iter().map(filter_param).collect();
        params.extend(owner_param(kind, auth));
        if let Some(sort) = &query.sort {
            let direction = if sort.descending {
                "desc.nullslast"
            } else {
                "asc.nullslast"
            };
            params.push(("order".to_string(), format!("{}.{}", column(&sort.field), direction)));
        }
        params.push(("limit".to_string(), query.page.limit.to_string()));
        params.push(("offset".to_string(), query.page.offset.to_string()));

        let url = self.table_url(kind, &params)?;
        let (headers, body) = self
            .fetch(url, auth, true, Target::Resource(kind, kind.table()))
            .await?;
        let items = rows_of(body)?;
        let total = total_from(&headers).unwrap_or(query.page.offset + items.len());
        Ok(Page::new(items, total, query.page.limit, query.page.offset))
    }

    #[instrument(skip(self, auth))]
    async fn get(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<Value, GatewayError> {
        let rows = self
            .fetch_rows(
                kind,
                &scoped_id_params(kind, id, auth),
                auth,
                Target::Row(kind, id),
            )
            .await?;
        first_row(rows, kind, id)
    }

    async fn create(&self, auth: &AuthContext, kind: EntityKind, body: Value) -> Result<Value, GatewayError> {
        ensure_writable(kind)?;
        let Value::Object(mut row) = body else {
            return Err(GatewayError::Validation(format!("{kind} payload must be an object")));
        };
        row.insert("user_id".to_string(), json!(auth.user_id));
        let rows = self
            .write(
                Method::POST,
                kind,
                &[],
                auth,
                Some(&Value::Object(row)),
                Target::Resource(kind, kind.table()),
            )
            .await?;
        first_row(rows, kind, "new")
    }

    async fn update(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &str,
        body: Value,
    ) -> Result<Value, GatewayError> {
        ensure_writable(kind)?;
        let mut row = match body {
            Value::Object(row) => row,
            _ => Map::new(),
        };
        row.insert("updated_at".to_string(), json!(Utc::now()));
        let rows = self
            .write(
                Method::PATCH,
                kind,
                &scoped_id_params(kind, id, auth),
                auth,
                Some(&Value::Object(row)),
                Target::Row(kind, id),
            )
            .await?;
        first_row(rows, kind, id)
    }

    async fn delete(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<(), GatewayError> {
        ensure_writable(kind)?;
        let rows = self
            .write(
                Method::DELETE,
                kind,
                &scoped_id_params(kind, id, auth),
                auth,
                None,
                Target::Row(kind, id),
            )
            .await?;
        first_row(rows, kind, id).map(|_| ())
    }

    async fn market_trends(&self, auth: &AuthContext) -> Result<Vec<MarketTrend>, GatewayError> {
        let url = self.endpoint("rest/v1/market_trends", &[])?;
        let (_, body) = self
            .fetch(url, auth, false, Target::Resource(EntityKind::Market, "market_trends"))
            .await?;
        decode(EntityKind::Market, body)
    }

    async fn emerging_markets(&self, auth: &AuthContext) -> Result<Vec<EmergingMarket>, GatewayError> {
        let params = [("order".to_string(), "ai_score.desc".to_string())];
        let url = self.endpoint("rest/v1/emerging_markets", &params)?;
        let (_, body) = self
            .fetch(url, auth, false, Target::Resource(EntityKind::Market, "emerging_markets"))
            .await?;
        decode(EntityKind::Market, body)
    }

    #[instrument(skip(self, auth))]
    async fn market_detail(
        &self,
        auth: &AuthContext,
        city: &str,
        state: &str,
    ) -> Result<MarketDetail, GatewayError> {
        let params = [
            ("city".to_string(), format!("ilike.{city}")),
            ("state".to_string(), format!("ilike.{state}")),
            ("limit".to_string(), "1".to_string()),
        ];
        let label = format!("{city}, {state}");
        let rows = self
            .fetch_rows(
                EntityKind::Market,
                &params,
                auth,
                Target::Resource(EntityKind::Market, &label),
            )
            .await?;
        decode(EntityKind::Market, first_row(rows, EntityKind::Market, &label)?)
    }
}
