//! The hosted JSON API. Every response wraps its payload in a `data`
//! envelope; list payloads carry a `pagination` block beside the rows.
use super::util::{error_message, with_retry};
use crate::core::cache::Cache;
use crate::core::config::RetryConfig;
use crate::core::credentials::Session;
use crate::core::error::{AuthError, GatewayError};
use crate::core::finance::DerivedMetrics;
use crate::core::gateway::{AuthContext, Backend, Registration, decode};
use crate::core::model::{
    DealInputs, EmergingMarket, EntityKind, MarketDetail, MarketTrend, Projection,
    PropertyAnalysis, Record, ReportRequest, Subject, User,
};
use crate::core::query::{ListQuery, Op, Page};
use crate::store::memory::MemoryCache;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, instrument};

const USER_AGENT: &str = concat!("dealdesk/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What a request is about, for turning a failure status into an error.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Login,
    Resource(EntityKind, &'a str),
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: Value,
}

pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    market_cache: MemoryCache<String, Value>,
    market_ttl: Duration,
}

impl RestBackend {
    pub fn new(base_url: &str, retry: RetryConfig, market_ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(RestBackend {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            market_cache: MemoryCache::new(),
            market_ttl,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn url_with_params(&self, path: &str, params: &[(String, String)]) -> Result<Url, GatewayError> {
        Url::parse_with_params(&self.url(path), params)
            .map_err(|e| GatewayError::Transport(format!("invalid request URL: {e}")))
    }

    fn request(&self, method: Method, url: impl reqwest::IntoUrl, auth: Option<&AuthContext>) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match auth {
            Some(auth) => builder.bearer_auth(&auth.access_token),
            None => builder,
        }
    }

    /// Sends one request and returns the response body, or the error its
    /// status maps to.
    async fn execute(&self, request: RequestBuilder, target: Target<'_>) -> Result<Value, GatewayError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                Err(e) if status.is_success() => {
                    error!(error = ?e, response = %text, "Failed to parse response");
                    return Err(GatewayError::Transport(format!("malformed response: {e}")));
                }
                Err(_) => Value::Null,
            }
        };

        if status.is_success() {
            return Ok(body);
        }
        debug!("Request failed with {}: {}", status, text);
        Err(status_error(status, &body, target))
    }

    /// GETs are idempotent, so transport failures are retried.
    async fn fetch(&self, url: Url, auth: &AuthContext, target: Target<'_>) -> Result<Value, GatewayError> {
        with_retry(
            || self.execute(self.request(Method::GET, url.clone(), Some(auth)), target),
            self.retry.attempts.saturating_sub(1),
            self.retry.delay_ms,
        )
        .await
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        auth: Option<&AuthContext>,
        body: &Value,
        target: Target<'_>,
    ) -> Result<Value, GatewayError> {
        let request = self.request(method, self.url(path), auth).json(body);
        self.execute(request, target).await
    }

    async fn fetch_record(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<Value, GatewayError> {
        let url = self.url_with_params(&format!("{}/{}", kind.collection(), id), &[])?;
        let body = self.fetch(url, auth, Target::Resource(kind, id)).await?;
        Ok(record_of(kind, body))
    }

    /// Market reads change slowly; they are served from memory for a while.
    async fn cached_market_data(
        &self,
        auth: &AuthContext,
        key: String,
        url: Url,
        target: Target<'_>,
    ) -> Result<Value, GatewayError> {
        if let Some(hit) = self.market_cache.get(&key).await {
            return Ok(hit);
        }
        let data = into_data(self.fetch(url, auth, target).await?);
        self.market_cache
            .put(key, data.clone(), Some(self.market_ttl))
            .await;
        Ok(data)
    }

    fn session_from(&self, body: Value) -> Result<Session, GatewayError> {
        let grant: TokenGrant = decode(EntityKind::User, into_data(body))?;
        let user: Record<User> = decode(EntityKind::User, normalize_id(EntityKind::User, grant.user))?;
        Ok(Session::new(
            grant.access_token,
            grant.token_type,
            grant.expires_in,
            user,
        ))
    }
}

fn status_error(status: StatusCode, body: &Value, target: Target<'_>) -> GatewayError {
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    match (status, target) {
        (StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND, Target::Login) => {
            AuthError::InvalidCredentials(message).into()
        }
        (StatusCode::UNAUTHORIZED, _) => AuthError::Expired.into(),
        (StatusCode::FORBIDDEN, _) => AuthError::Denied(message).into(),
        (StatusCode::NOT_FOUND, Target::Resource(kind, id)) => GatewayError::not_found(kind, id),
        (StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY, _) => {
            GatewayError::Validation(message)
        }
        _ => GatewayError::Transport(format!("{status}: {message}")),
    }
}

/// Unwraps the `data` envelope, tolerating bodies without one.
fn into_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

/// The API names identifiers after the entity (`property_id`,
/// `portfolio_id`, ...) and sometimes sends them as numbers.
fn normalize_id(kind: EntityKind, mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        if !map.contains_key("id") {
            if let Some(id) = map.remove(&format!("{kind}_id")) {
                map.insert("id".to_string(), id);
            }
        }
        if let Some(Value::Number(n)) = map.get("id") {
            let id = n.to_string();
            map.insert("id".to_string(), Value::String(id));
        }
    }
    value
}

/// A single record, optionally nested under its kind's name.
fn record_of(kind: EntityKind, body: Value) -> Value {
    let data = into_data(body);
    let data = match data {
        Value::Object(mut map) if map.get(&kind.to_string()).is_some_and(Value::is_object) => {
            map.remove(&kind.to_string()).unwrap_or(Value::Null)
        }
        other => other,
    };
    normalize_id(kind, data)
}

fn parse_page(kind: EntityKind, body: Value, query: &ListQuery) -> Result<Page<Value>, GatewayError> {
    let mut data = into_data(body);
    let rows = match &mut data {
        Value::Array(rows) => std::mem::take(rows),
        Value::Object(map) => match map.remove(kind.collection()) {
            Some(Value::Array(rows)) => rows,
            _ => {
                return Err(GatewayError::Transport(format!(
                    "malformed {} list: no '{}' array",
                    kind,
                    kind.collection()
                )));
            }
        },
        _ => {
            return Err(GatewayError::Transport(format!("malformed {kind} list")));
        }
    };

    let pagination = data.get("pagination");
    let field = |name: &str, fallback: usize| {
        pagination
            .and_then(|p| p.get(name))
            .and_then(Value::as_u64)
            .map_or(fallback, |v| v as usize)
    };
    let total = field("total", rows.len());
    let limit = field("limit", query.page.limit);
    let offset = field("offset", query.page.offset);

    let items = rows.into_iter().map(|row| normalize_id(kind, row)).collect();
    Ok(Page::new(items, total, limit, offset))
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Translates a list query into the API's search parameters.
fn list_params(query: &ListQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();
    for condition in &query.filters {
        let leaf = condition.leaf();
        let name = match condition.op {
            Op::Eq => leaf.to_string(),
            Op::Gte => format!("min_{leaf}"),
            Op::Lte => format!("max_{leaf}"),
            Op::Contains if condition.field.starts_with("address.") => "location".to_string(),
            Op::Contains => leaf.to_string(),
        };
        params.push((name, param_value(&condition.value)));
    }
    if let Some(sort) = &query.sort {
        let sort_by = match (sort.field.as_str(), sort.descending) {
            ("relevance_score" | "ai_score", true) => "ai_score".to_string(),
            (field, true) => format!("{field}_desc"),
            (field, false) => format!("{field}_asc"),
        };
        params.push(("sort_by".to_string(), sort_by));
    }
    params.push(("limit".to_string(), query.page.limit.to_string()));
    params.push(("offset".to_string(), query.page.offset.to_string()));
    params
}

#[async_trait]
impl Backend for RestBackend {
    fn name(&self) -> &'static str {
        "rest"
    }

    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let body = json!({"email": email, "password": password});
        let response = self
            .send_json(Method::POST, "auth/login", None, &body, Target::Login)
            .await?;
        self.session_from(response)
    }

    async fn register(&self, registration: &Registration) -> Result<Session, GatewayError> {
        let body = json!({
            "email": registration.email,
            "password": registration.password,
            "first_name": registration.first_name,
            "last_name": registration.last_name,
        });
        let response = self
            .send_json(
                Method::POST,
                "auth/register",
                None,
                &body,
                Target::Resource(EntityKind::User, &registration.email),
            )
            .await?;
        self.session_from(response)
    }

    async fn logout(&self, auth: &AuthContext) -> Result<(), GatewayError> {
        self.send_json(
            Method::POST,
            "auth/logout",
            Some(auth),
            &json!({}),
            Target::Resource(EntityKind::User, &auth.user_id),
        )
        .await?;
        Ok(())
    }

    async fn current_user(&self, auth: &AuthContext) -> Result<Record<User>, GatewayError> {
        let url = self.url_with_params("auth/user", &[])?;
        let body = self
            .fetch(url, auth, Target::Resource(EntityKind::User, &auth.user_id))
            .await?;
        decode(EntityKind::User, record_of(EntityKind::User, body))
    }

    #[instrument(skip(self, auth))]
    async fn list(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<Value>, GatewayError> {
        let url = self.url_with_params(kind.collection(), &list_params(query))?;
        let body = self
            .fetch(url, auth, Target::Resource(kind, kind.collection()))
            .await?;
        parse_page(kind, body, query)
    }

    #[instrument(skip(self, auth))]
    async fn get(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<Value, GatewayError> {
        self.fetch_record(auth, kind, id).await
    }

    async fn create(&self, auth: &AuthContext, kind: EntityKind, body: Value) -> Result<Value, GatewayError> {
        let response = self
            .send_json(
                Method::POST,
                kind.collection(),
                Some(auth),
                &body,
                Target::Resource(kind, kind.collection()),
            )
            .await?;
        Ok(record_of(kind, response))
    }

    async fn update(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &str,
        body: Value,
    ) -> Result<Value, GatewayError> {
        let path = format!("{}/{}", kind.collection(), id);
        let response = self
            .send_json(Method::PUT, &path, Some(auth), &body, Target::Resource(kind, id))
            .await?;
        Ok(record_of(kind, response))
    }

    async fn delete(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<(), GatewayError> {
        let url = self.url(&format!("{}/{}", kind.collection(), id));
        self.execute(
            self.request(Method::DELETE, url, Some(auth)),
            Target::Resource(kind, id),
        )
        .await?;
        Ok(())
    }

    async fn market_trends(&self, auth: &AuthContext) -> Result<Vec<MarketTrend>, GatewayError> {
        let url = self.url_with_params("markets/trends", &[])?;
        let mut data = self
            .cached_market_data(auth, "trends".to_string(), url, Target::Resource(EntityKind::Market, "trends"))
            .await?;
        let rows = data
            .get_mut("market_trends")
            .map(Value::take)
            .unwrap_or(data);
        decode(EntityKind::Market, rows)
    }

    async fn emerging_markets(&self, auth: &AuthContext) -> Result<Vec<EmergingMarket>, GatewayError> {
        let url = self.url_with_params("markets/emerging", &[])?;
        let mut data = self
            .cached_market_data(
                auth,
                "emerging".to_string(),
                url,
                Target::Resource(EntityKind::Market, "emerging"),
            )
            .await?;
        let rows = data
            .get_mut("emerging_markets")
            .map(Value::take)
            .unwrap_or(data);
        decode(EntityKind::Market, rows)
    }

    #[instrument(skip(self, auth))]
    async fn market_detail(
        &self,
        auth: &AuthContext,
        city: &str,
        state: &str,
    ) -> Result<MarketDetail, GatewayError> {
        let params = [
            ("city".to_string(), city.to_string()),
            ("state".to_string(), state.to_string()),
        ];
        let url = self.url_with_params("markets/detail", &params)?;
        let key = format!("detail:{}|{}", city.to_lowercase(), state.to_lowercase());
        let label = format!("{city}, {state}");
        let data = self
            .cached_market_data(auth, key, url, Target::Resource(EntityKind::Market, &label))
            .await?;
        decode(EntityKind::Market, data)
    }

    async fn attach_property(
        &self,
        auth: &AuthContext,
        portfolio_id: &str,
        property_id: &str,
    ) -> Result<Value, GatewayError> {
        self.send_json(
            Method::POST,
            &format!("portfolios/{portfolio_id}/properties"),
            Some(auth),
            &json!({"property_id": property_id}),
            Target::Resource(EntityKind::Portfolio, portfolio_id),
        )
        .await?;
        self.fetch_record(auth, EntityKind::Portfolio, portfolio_id).await
    }

    async fn detach_property(
        &self,
        auth: &AuthContext,
        portfolio_id: &str,
        property_id: &str,
    ) -> Result<Value, GatewayError> {
        let url = self.url(&format!("portfolios/{portfolio_id}/properties/{property_id}"));
        self.execute(
            self.request(Method::DELETE, url, Some(auth)),
            Target::Resource(EntityKind::Portfolio, portfolio_id),
        )
        .await?;
        self.fetch_record(auth, EntityKind::Portfolio, portfolio_id).await
    }

    /// Server-side analysis, which adds risk and recommendation data to the
    /// return figures.
    async fn property_analysis(
        &self,
        auth: &AuthContext,
        property_id: &str,
        _projection: Projection,
    ) -> Result<PropertyAnalysis, GatewayError> {
        let url = self.url_with_params(&format!("properties/{property_id}/analysis"), &[])?;
        let body = self
            .fetch(url, auth, Target::Resource(EntityKind::Property, property_id))
            .await?;
        let mut data = into_data(body);
        let analysis = data.get_mut("analysis").map(Value::take).unwrap_or(data);
        decode(EntityKind::Analysis, analysis)
    }

    async fn analyze_deal(&self, auth: &AuthContext, inputs: &DealInputs) -> Result<DerivedMetrics, GatewayError> {
        let body = serde_json::to_value(inputs).map_err(|e| GatewayError::Validation(e.to_string()))?;
        let response = self
            .send_json(
                Method::POST,
                "properties/analyze",
                Some(auth),
                &body,
                Target::Resource(EntityKind::Analysis, "analyze"),
            )
            .await?;
        let mut data = into_data(response);
        let metrics = data.get_mut("analysis").map(Value::take).unwrap_or(data);
        decode(EntityKind::Analysis, metrics)
    }

    /// Reports are produced by the server; the returned record may still be
    /// scheduled or in progress.
    async fn generate_report(
        &self,
        auth: &AuthContext,
        request: &ReportRequest,
        _projection: Projection,
    ) -> Result<Value, GatewayError> {
        let (path, mut body, label) = match &request.subject {
            Subject::Property { property_id } => (
                "reports/property",
                json!({"property_id": property_id}),
                property_id.clone(),
            ),
            Subject::Portfolio { portfolio_id } => (
                "reports/portfolio",
                json!({"portfolio_id": portfolio_id}),
                portfolio_id.clone(),
            ),
            Subject::Market { city, state } => (
                "reports/market",
                json!({"city": city, "state": state}),
                format!("{city}, {state}"),
            ),
        };
        body["format"] = json!(request.format);
        let kind = match &request.subject {
            Subject::Property { .. } => EntityKind::Property,
            Subject::Portfolio { .. } => EntityKind::Portfolio,
            Subject::Market { .. } => EntityKind::Market,
        };

        let response = self
            .send_json(Method::POST, path, Some(auth), &body, Target::Resource(kind, &label))
            .await
            .map_err(|e| match e {
                // Report generation is retried by polling, never by resending.
                GatewayError::Transport(reason) => {
                    GatewayError::Transport(format!("report generation failed: {reason}"))
                }
                other => other,
            })?;
        let mut report = record_of(EntityKind::Report, response);
        // Some deployments answer with just the id and status.
        if let Value::Object(map) = &mut report {
            let subject = serde_json::to_value(&request.subject)
                .map_err(|e| GatewayError::Validation(e.to_string()))?;
            if let Value::Object(subject) = subject {
                for (key, value) in subject {
                    map.entry(key).or_insert(value);
                }
            }
            map.entry("format").or_insert(json!(request.format));
            map.entry("name")
                .or_insert_with(|| json!(format!("{} Report", request.subject)));
        }
        Ok(report)
    }
}
