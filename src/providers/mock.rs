//! In-memory backend seeded with demo data, for offline use and tests.
use crate::core::credentials::Session;
use crate::core::error::{AuthError, GatewayError};
use crate::core::gateway::{
    AuthContext, Backend, Registration, analyze_stored_property, ensure_writable,
};
use crate::core::model::{
    EmergingMarket, EntityKind, KeyMetrics, MarketDetail, MarketTrend, Projection,
    PropertyAnalysis, Record, RiskAssessment, User,
};
use crate::core::query::{self, ListQuery, Page};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

const SEED: &str = include_str!("../../fixtures/seed.json");
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
struct Account {
    password: String,
    user: Record<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Insight {
    #[serde(default)]
    risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    opportunity_score: Option<f64>,
    #[serde(default)]
    ai_recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    properties: Vec<Value>,
    #[serde(default)]
    portfolios: Vec<Value>,
    #[serde(default)]
    analyses: Vec<Value>,
    #[serde(default)]
    reports: Vec<Value>,
    #[serde(default)]
    property_insights: HashMap<String, Insight>,
    #[serde(default)]
    market_trends: Vec<MarketTrend>,
    #[serde(default)]
    emerging_markets: Vec<EmergingMarket>,
    #[serde(default)]
    market_details: Vec<MarketDetail>,
}

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    tables: HashMap<EntityKind, Vec<Value>>,
    /// Tokens ended by logout.
    revoked: HashSet<String>,
}

impl State {
    /// Tokens name their user, so a session saved by an earlier process
    /// stays valid against a freshly seeded backend.
    fn authorize(&self, auth: &AuthContext) -> Result<(), GatewayError> {
        let user_id = auth
            .access_token
            .strip_prefix("mock.")
            .and_then(|rest| rest.rsplit_once('.'))
            .map(|(user_id, _nonce)| user_id);
        let known = self.accounts.iter().any(|a| a.user.id == auth.user_id);
        if user_id == Some(auth.user_id.as_str())
            && known
            && !self.revoked.contains(&auth.access_token)
        {
            Ok(())
        } else {
            Err(AuthError::Expired.into())
        }
    }

    fn issue_session(&self, user: Record<User>) -> Session {
        let token = format!("mock.{}.{}", user.id, Uuid::new_v4().simple());
        Session::new(
            token,
            Some("bearer".to_string()),
            Some(TOKEN_LIFETIME_SECS),
            user,
        )
    }

    fn rows(&self, kind: EntityKind) -> &[Value] {
        self.tables.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    fn position(&self, kind: EntityKind, id: &str, user_id: &str) -> Result<usize, GatewayError> {
        self.rows(kind)
            .iter()
            .position(|row| row["id"] == id && is_visible(row, kind, user_id))
            .ok_or_else(|| GatewayError::not_found(kind, id))
    }
}

/// Rows of other users are invisible, as under row-level security.
fn is_visible(row: &Value, kind: EntityKind, user_id: &str) -> bool {
    match kind.owner_column() {
        Some(column) => row[column] == user_id,
        None => true,
    }
}

fn id_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Property => "prop",
        EntityKind::Analysis => "analysis",
        EntityKind::Portfolio => "portfolio",
        EntityKind::Report => "report",
        EntityKind::User => "user",
        EntityKind::Market => "market",
    }
}

fn user_row(user: &Record<User>) -> Result<Value, GatewayError> {
    serde_json::to_value(user).map_err(|e| GatewayError::Validation(e.to_string()))
}

pub struct MockBackend {
    state: RwLock<State>,
    insights: HashMap<String, Insight>,
    market_trends: Vec<MarketTrend>,
    emerging_markets: Vec<EmergingMarket>,
    market_details: Vec<MarketDetail>,
    latency: Duration,
}

impl MockBackend {
    /// The bundled demo data set. Log in as `demo@example.com` / `password`.
    pub fn seeded(latency_ms: u64) -> Result<Self> {
        Self::from_seed(SEED, latency_ms)
    }

    pub fn from_seed(seed: &str, latency_ms: u64) -> Result<Self> {
        let seed: Seed = serde_json::from_str(seed).context("Failed to parse mock seed data")?;

        let mut tables = HashMap::new();
        let users = seed
            .accounts
            .iter()
            .map(|account| user_row(&account.user))
            .collect::<Result<Vec<_>, _>>()?;
        tables.insert(EntityKind::User, users);
        tables.insert(EntityKind::Property, seed.properties);
        tables.insert(EntityKind::Portfolio, seed.portfolios);
        tables.insert(EntityKind::Analysis, seed.analyses);
        tables.insert(EntityKind::Report, seed.reports);

        let market_rows = seed
            .market_details
            .iter()
            .map(|detail| serde_json::to_value(detail).context("Failed to encode market data"))
            .collect::<Result<Vec<_>>>()?;
        tables.insert(EntityKind::Market, market_rows);

        debug!(
            "Mock backend seeded with {} accounts, {} properties",
            seed.accounts.len(),
            tables.get(&EntityKind::Property).map_or(0, Vec::len)
        );

        Ok(MockBackend {
            state: RwLock::new(State {
                accounts: seed.accounts,
                tables,
                revoked: HashSet::new(),
            }),
            insights: seed.property_insights,
            market_trends: seed.market_trends,
            emerging_markets: seed.emerging_markets,
            market_details: seed.market_details,
            latency: Duration::from_millis(latency_ms),
        })
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        self.pause().await;
        let state = self.state.read().await;
        let user = state
            .accounts
            .iter()
            .find(|a| a.user.data.email.eq_ignore_ascii_case(email) && a.password == password)
            .map(|a| a.user.clone())
            .ok_or_else(|| AuthError::InvalidCredentials("Invalid email or password".to_string()))?;
        Ok(state.issue_session(user))
    }

    async fn register(&self, registration: &Registration) -> Result<Session, GatewayError> {
        self.pause().await;
        let user = User {
            email: registration.email.clone(),
            first_name: registration.first_name.clone(),
            last_name: registration.last_name.clone(),
            role: "investor".to_string(),
        };
        user.validate().map_err(GatewayError::Validation)?;

        let mut state = self.state.write().await;
        if state
            .accounts
            .iter()
            .any(|a| a.user.data.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(GatewayError::Validation(format!(
                "{} is already registered",
                user.email
            )));
        }

        let record = Record {
            id: format!("user_{}", Uuid::new_v4().simple()),
            owner_id: None,
            created_at: Utc::now(),
            updated_at: None,
            data: user,
        };
        let row = user_row(&record)?;
        state.tables.entry(EntityKind::User).or_default().push(row);
        state.accounts.push(Account {
            password: registration.password.clone(),
            user: record.clone(),
        });
        Ok(state.issue_session(record))
    }

    async fn logout(&self, auth: &AuthContext) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.authorize(auth)?;
        state.revoked.insert(auth.access_token.clone());
        Ok(())
    }

    async fn current_user(&self, auth: &AuthContext) -> Result<Record<User>, GatewayError> {
        self.pause().await;
        let state = self.state.read().await;
        state.authorize(auth)?;
        state
            .accounts
            .iter()
            .find(|a| a.user.id == auth.user_id)
            .map(|a| a.user.clone())
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, &auth.user_id))
    }

    #[instrument(skip(self, auth))]
    async fn list(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<Value>, GatewayError> {
        self.pause().await;
        let state = self.state.read().await;
        state.authorize(auth)?;
        let visible = state
            .rows(kind)
            .iter()
            .filter(|row| is_visible(row, kind, &auth.user_id))
            .cloned()
            .collect();
        Ok(query::apply(visible, query))
    }

    async fn get(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<Value, GatewayError> {
        self.pause().await;
        let state = self.state.read().await;
        state.authorize(auth)?;
        let index = state.position(kind, id, &auth.user_id)?;
        Ok(state.rows(kind)[index].clone())
    }

    async fn create(&self, auth: &AuthContext, kind: EntityKind, body: Value) -> Result<Value, GatewayError> {
        self.pause().await;
        ensure_writable(kind)?;
        let Value::Object(mut row) = body else {
            return Err(GatewayError::Validation(format!("{kind} payload must be an object")));
        };

        let mut state = self.state.write().await;
        state.authorize(auth)?;
        let id = format!("{}_{}", id_prefix(kind), Uuid::new_v4().simple());
        row.insert("id".to_string(), json!(id));
        row.insert("user_id".to_string(), json!(auth.user_id));
        row.insert("created_at".to_string(), json!(Utc::now()));

        let row = Value::Object(row);
        state.tables.entry(kind).or_default().push(row.clone());
        debug!("Created {} {}", kind, id);
        Ok(row)
    }

    async fn update(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &str,
        body: Value,
    ) -> Result<Value, GatewayError> {
        self.pause().await;
        ensure_writable(kind)?;
        let Value::Object(mut row) = body else {
            return Err(GatewayError::Validation(format!("{kind} payload must be an object")));
        };

        let mut state = self.state.write().await;
        state.authorize(auth)?;
        let index = state.position(kind, id, &auth.user_id)?;
        let table = state.tables.entry(kind).or_default();
        let existing = &table[index];
        for field in ["id", "user_id", "created_at"] {
            if let Some(value) = existing.get(field) {
                row.insert(field.to_string(), value.clone());
            }
        }
        row.insert("updated_at".to_string(), json!(Utc::now()));

        table[index] = Value::Object(row);
        Ok(table[index].clone())
    }

    async fn delete(&self, auth: &AuthContext, kind: EntityKind, id: &str) -> Result<(), GatewayError> {
        self.pause().await;
        ensure_writable(kind)?;
        let mut state = self.state.write().await;
        state.authorize(auth)?;
        let index = state.position(kind, id, &auth.user_id)?;
        state.tables.entry(kind).or_default().remove(index);
        Ok(())
    }

    async fn market_trends(&self, auth: &AuthContext) -> Result<Vec<MarketTrend>, GatewayError> {
        self.pause().await;
        self.state.read().await.authorize(auth)?;
        Ok(self.market_trends.clone())
    }

    async fn emerging_markets(&self, auth: &AuthContext) -> Result<Vec<EmergingMarket>, GatewayError> {
        self.pause().await;
        self.state.read().await.authorize(auth)?;
        Ok(self.emerging_markets.clone())
    }

    async fn market_detail(
        &self,
        auth: &AuthContext,
        city: &str,
        state: &str,
    ) -> Result<MarketDetail, GatewayError> {
        self.pause().await;
        self.state.read().await.authorize(auth)?;
        self.market_details
            .iter()
            .find(|d| d.city.eq_ignore_ascii_case(city) && d.state.eq_ignore_ascii_case(state))
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::Market, format!("{city}, {state}")))
    }

    /// Local metrics plus whatever canned insight the seed has for the
    /// property.
    async fn property_analysis(
        &self,
        auth: &AuthContext,
        property_id: &str,
        projection: Projection,
    ) -> Result<PropertyAnalysis, GatewayError> {
        let metrics = analyze_stored_property(self, auth, property_id, projection).await?;
        let insight = self.insights.get(property_id).cloned().unwrap_or_default();
        Ok(PropertyAnalysis {
            financial_metrics: KeyMetrics::from(&metrics),
            risk_assessment: insight.risk_assessment,
            opportunity_score: insight.opportunity_score,
            ai_recommendations: insight.ai_recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::{Condition, SortKey};

    async fn demo_auth(backend: &MockBackend) -> AuthContext {
        let session = backend.login("demo@example.com", "password").await.unwrap();
        AuthContext::from(&session)
    }

    #[tokio::test]
    async fn test_login_checks_password() {
        let backend = MockBackend::seeded(0).unwrap();
        let err = backend.login("demo@example.com", "wrong").await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Auth(AuthError::InvalidCredentials(
                "Invalid email or password".to_string()
            ))
        );

        let session = backend.login("DEMO@example.com", "password").await.unwrap();
        assert_eq!(session.user_id(), "user_12345");
        assert_eq!(session.user.data.first_name, "Demo");
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn test_seeded_listing_filters_and_sorts() {
        let backend = MockBackend::seeded(0).unwrap();
        let auth = demo_auth(&backend).await;
        let query = ListQuery::new()
            .filter(Condition::contains("address.city", "anytown"))
            .filter(Condition::lte("price", 500000))
            .sort_by(SortKey::desc("relevance_score"));
        let page = backend.list(&auth, EntityKind::Property, &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0]["id"], "prop_12345");
        assert_eq!(page.items[1]["id"], "prop_23456");
    }

    #[tokio::test]
    async fn test_rows_are_scoped_to_owner() {
        let backend = MockBackend::seeded(0).unwrap();
        let session = backend
            .register(&Registration {
                email: "new@example.com".to_string(),
                password: "secret".to_string(),
                first_name: "New".to_string(),
                last_name: "Investor".to_string(),
            })
            .await
            .unwrap();
        let auth = AuthContext::from(&session);

        let page = backend
            .list(&auth, EntityKind::Property, &ListQuery::new())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(matches!(
            backend.get(&auth, EntityKind::Property, "prop_12345").await,
            Err(GatewayError::NotFound { .. })
        ));
        // Market data is shared.
        assert_eq!(backend.market_trends(&auth).await.unwrap().len(), 5);

        let me = backend.current_user(&auth).await.unwrap();
        assert_eq!(me.data.email, "new@example.com");
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let backend = MockBackend::seeded(0).unwrap();
        let result = backend
            .register(&Registration {
                email: "demo@example.com".to_string(),
                password: "x".to_string(),
                first_name: String::new(),
                last_name: String::new(),
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_session_outlives_backend_instance() {
        let auth = demo_auth(&MockBackend::seeded(0).unwrap()).await;
        let restarted = MockBackend::seeded(0).unwrap();
        assert!(restarted.current_user(&auth).await.is_ok());

        let forged = AuthContext {
            access_token: "mock.user_99999.abc".to_string(),
            user_id: "user_12345".to_string(),
        };
        assert_eq!(
            restarted.current_user(&forged).await.unwrap_err(),
            GatewayError::Auth(AuthError::Expired)
        );
    }

    #[tokio::test]
    async fn test_logged_out_token_is_rejected() {
        let backend = MockBackend::seeded(0).unwrap();
        let auth = demo_auth(&backend).await;
        backend.logout(&auth).await.unwrap();
        assert_eq!(
            backend
                .get(&auth, EntityKind::Property, "prop_12345")
                .await
                .unwrap_err(),
            GatewayError::Auth(AuthError::Expired)
        );
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let backend = MockBackend::seeded(0).unwrap();
        let auth = demo_auth(&backend).await;
        let updated = backend
            .update(
                &auth,
                EntityKind::Portfolio,
                "portfolio_12345",
                json!({"name": "Renamed", "property_ids": []}),
            )
            .await
            .unwrap();
        assert_eq!(updated["id"], "portfolio_12345");
        assert_eq!(updated["user_id"], "user_12345");
        assert_eq!(updated["created_at"], "2023-01-15T00:00:00Z");
        assert_eq!(updated["name"], "Renamed");
        assert!(updated.get("description").is_none());
    }

    #[tokio::test]
    async fn test_market_detail_lookup() {
        let backend = MockBackend::seeded(0).unwrap();
        let auth = demo_auth(&backend).await;
        let detail = backend.market_detail(&auth, "austin", "tx").await.unwrap();
        assert_eq!(detail.median_home_price, 545000.0);

        assert!(matches!(
            backend.market_detail(&auth, "Gotham", "NY").await,
            Err(GatewayError::NotFound { kind: EntityKind::Market, .. })
        ));
    }

    #[tokio::test]
    async fn test_property_analysis_includes_seeded_insight() {
        let backend = MockBackend::seeded(0).unwrap();
        let auth = demo_auth(&backend).await;
        let analysis = backend
            .property_analysis(&auth, "prop_12345", Projection::default())
            .await
            .unwrap();
        let cap = analysis.financial_metrics.cap_rate.unwrap();
        assert!((cap - 17244.0 / 450000.0).abs() < 1e-9);
        assert_eq!(analysis.opportunity_score, Some(8.7));
        assert_eq!(analysis.ai_recommendations.len(), 4);

        let other = backend
            .property_analysis(&auth, "prop_23456", Projection::default())
            .await
            .unwrap();
        assert!(other.risk_assessment.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let backend = MockBackend::seeded(250).unwrap();
        let started = tokio::time::Instant::now();
        backend.login("demo@example.com", "password").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
