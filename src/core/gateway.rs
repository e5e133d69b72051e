//! Uniform data access over interchangeable backends.
//!
//! A [`Backend`] speaks JSON records and knows nothing about entity rules.
//! [`Gateway`] wraps one with the held [`Credentials`], typed
//! [`Collection`]s, validation, and the cross-entity policies (deletion
//! guard, frozen snapshots, portfolio roll-ups, report generation).

use crate::core::aggregate::{self, HoldingValue, PortfolioSummary};
use crate::core::credentials::{Credentials, Session};
use crate::core::error::{AuthError, GatewayError};
use crate::core::finance::{self, DerivedMetrics};
use crate::core::model::{
    Analysis, DealInputs, EmergingMarket, EntityKind, KeyMetrics, MarketDetail, MarketTrend,
    Portfolio, Projection, Property, PropertyAnalysis, Record, Report, ReportRequest, ReportStatus,
    Snapshot, Subject, User,
};
use crate::core::query::{ListQuery, Page, SortKey};
use crate::providers::util::merge_patch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Identity a backend scopes a call to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub access_token: String,
    pub user_id: String,
}

impl From<&Session> for AuthContext {
    fn from(session: &Session) -> Self {
        AuthContext {
            access_token: session.access_token.clone(),
            user_id: session.user_id().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Fields owned by the backend rather than the caller.
const IDENTITY_FIELDS: [&str; 4] = ["id", "user_id", "created_at", "updated_at"];

/// One data source. Records travel as JSON objects carrying `id`, `user_id`
/// and `created_at` beside the payload fields.
///
/// Row reads and writes are scoped to `auth.user_id`; market data is not.
/// The provided methods build on the CRUD primitives and compute analytics
/// locally; backends with server-side equivalents override them.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn login(&self, email: &str, password: &str) -> Result<Session, GatewayError>;
    async fn register(&self, registration: &Registration) -> Result<Session, GatewayError>;
    async fn logout(&self, auth: &AuthContext) -> Result<(), GatewayError>;
    async fn current_user(&self, auth: &AuthContext) -> Result<Record<User>, GatewayError>;

    async fn list(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<Value>, GatewayError>;
    async fn get(&self, auth: &AuthContext, kind: EntityKind, id: &str)
    -> Result<Value, GatewayError>;
    async fn create(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        body: Value,
    ) -> Result<Value, GatewayError>;
    /// Replaces the payload of an existing record with `body`.
    async fn update(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &str,
        body: Value,
    ) -> Result<Value, GatewayError>;
    async fn delete(&self, auth: &AuthContext, kind: EntityKind, id: &str)
    -> Result<(), GatewayError>;

    async fn market_trends(&self, auth: &AuthContext) -> Result<Vec<MarketTrend>, GatewayError>;
    async fn emerging_markets(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<EmergingMarket>, GatewayError>;
    async fn market_detail(
        &self,
        auth: &AuthContext,
        city: &str,
        state: &str,
    ) -> Result<MarketDetail, GatewayError>;

    async fn attach_property(
        &self,
        auth: &AuthContext,
        portfolio_id: &str,
        property_id: &str,
    ) -> Result<Value, GatewayError> {
        let mut record = self.get(auth, EntityKind::Portfolio, portfolio_id).await?;
        let mut portfolio: Portfolio = decode(EntityKind::Portfolio, record.clone())?;
        if !portfolio.property_ids.iter().any(|id| id == property_id) {
            portfolio.property_ids.push(property_id.to_string());
        }
        merge_patch(&mut record, &encode(&portfolio)?);
        self.update(auth, EntityKind::Portfolio, portfolio_id, payload_of(record))
            .await
    }

    async fn detach_property(
        &self,
        auth: &AuthContext,
        portfolio_id: &str,
        property_id: &str,
    ) -> Result<Value, GatewayError> {
        let mut record = self.get(auth, EntityKind::Portfolio, portfolio_id).await?;
        let mut portfolio: Portfolio = decode(EntityKind::Portfolio, record.clone())?;
        portfolio.property_ids.retain(|id| id != property_id);
        merge_patch(&mut record, &encode(&portfolio)?);
        self.update(auth, EntityKind::Portfolio, portfolio_id, payload_of(record))
            .await
    }

    async fn property_analysis(
        &self,
        auth: &AuthContext,
        property_id: &str,
        projection: Projection,
    ) -> Result<PropertyAnalysis, GatewayError> {
        let metrics = analyze_stored_property(self, auth, property_id, projection).await?;
        Ok(PropertyAnalysis {
            financial_metrics: KeyMetrics::from(&metrics),
            risk_assessment: None,
            opportunity_score: None,
            ai_recommendations: Vec::new(),
        })
    }

    async fn analyze_deal(
        &self,
        _auth: &AuthContext,
        inputs: &DealInputs,
    ) -> Result<DerivedMetrics, GatewayError> {
        Ok(finance::analyze(inputs)?)
    }

    /// Produces the report at once, with its snapshot frozen, and stores it.
    async fn generate_report(
        &self,
        auth: &AuthContext,
        request: &ReportRequest,
        projection: Projection,
    ) -> Result<Value, GatewayError> {
        let (name, snapshot) = match &request.subject {
            Subject::Property { property_id } => {
                let property: Record<Property> = decode(
                    EntityKind::Property,
                    self.get(auth, EntityKind::Property, property_id).await?,
                )?;
                let metrics = analyze_property(&property, projection)?;
                (
                    format!("{} Property Analysis", property.data.address.street),
                    Snapshot::Property(metrics),
                )
            }
            Subject::Portfolio { portfolio_id } => {
                let portfolio: Record<Portfolio> = decode(
                    EntityKind::Portfolio,
                    self.get(auth, EntityKind::Portfolio, portfolio_id).await?,
                )?;
                let summary = summarize_portfolio(self, auth, &portfolio, projection).await;
                (
                    format!("{} Portfolio Summary", portfolio.data.name),
                    Snapshot::Portfolio(summary.totals),
                )
            }
            Subject::Market { city, state } => {
                let detail = self.market_detail(auth, city, state).await?;
                (
                    format!("{city}, {state} Market Analysis"),
                    Snapshot::Market(detail),
                )
            }
        };

        let report = Report {
            name,
            subject: request.subject.clone(),
            format: request.format,
            status: ReportStatus::Completed,
            download_url: None,
            generated_at: Some(Utc::now()),
            snapshot: Some(snapshot),
            scheduled_for: None,
        };
        self.create(auth, EntityKind::Report, encode(&report)?).await
    }
}

/// A record type stored through the gateway.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn default_sort() -> SortKey {
        SortKey::desc("created_at")
    }

    fn validate(&self) -> Result<(), String>;

    /// Frozen records reject updates.
    fn is_frozen(&self) -> bool {
        false
    }
}

impl Entity for Property {
    const KIND: EntityKind = EntityKind::Property;

    fn default_sort() -> SortKey {
        SortKey::desc("relevance_score")
    }

    fn validate(&self) -> Result<(), String> {
        Property::validate(self)
    }
}

impl Entity for Portfolio {
    const KIND: EntityKind = EntityKind::Portfolio;

    fn validate(&self) -> Result<(), String> {
        Portfolio::validate(self)
    }
}

impl Entity for Analysis {
    const KIND: EntityKind = EntityKind::Analysis;

    fn validate(&self) -> Result<(), String> {
        Analysis::validate(self)
    }

    fn is_frozen(&self) -> bool {
        self.status == ReportStatus::Completed
    }
}

impl Entity for Report {
    const KIND: EntityKind = EntityKind::Report;

    fn validate(&self) -> Result<(), String> {
        Report::validate(self)
    }

    fn is_frozen(&self) -> bool {
        self.status == ReportStatus::Completed
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn default_sort() -> SortKey {
        SortKey::asc("email")
    }

    fn validate(&self) -> Result<(), String> {
        User::validate(self)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(kind: EntityKind, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value)
        .map_err(|e| GatewayError::Transport(format!("malformed {kind} record: {e}")))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Validation(e.to_string()))
}

/// Strips backend-owned identity fields, leaving the caller's payload.
pub(crate) fn payload_of(mut record: Value) -> Value {
    if let Value::Object(map) = &mut record {
        for field in IDENTITY_FIELDS {
            map.remove(field);
        }
    }
    record
}

/// Users are created by registration and market data is read-only; row
/// stores reject writes to either.
pub(crate) fn ensure_writable(kind: EntityKind) -> Result<(), GatewayError> {
    match kind {
        EntityKind::User => Err(GatewayError::Validation(
            "users are created by registration".to_string(),
        )),
        EntityKind::Market => Err(GatewayError::Validation(
            "market data is read-only".to_string(),
        )),
        _ => Ok(()),
    }
}

fn analyze_property(
    property: &Record<Property>,
    projection: Projection,
) -> Result<DerivedMetrics, GatewayError> {
    let inputs = property.data.deal_inputs(projection).ok_or_else(|| {
        GatewayError::Validation(format!(
            "property '{}' has no purchase or rental assumptions",
            property.id
        ))
    })?;
    Ok(finance::analyze(&inputs)?)
}

pub(crate) async fn analyze_stored_property<B: Backend + ?Sized>(
    backend: &B,
    auth: &AuthContext,
    property_id: &str,
    projection: Projection,
) -> Result<DerivedMetrics, GatewayError> {
    let property: Record<Property> = decode(
        EntityKind::Property,
        backend.get(auth, EntityKind::Property, property_id).await?,
    )?;
    analyze_property(&property, projection)
}

/// Loads every member concurrently and rolls their metrics up. Members that
/// fail to load are reported on their holding rather than failing the whole
/// summary.
pub(crate) async fn summarize_portfolio<B: Backend + ?Sized>(
    backend: &B,
    auth: &AuthContext,
    portfolio: &Record<Portfolio>,
    projection: Projection,
) -> PortfolioSummary {
    let fetches = portfolio
        .data
        .property_ids
        .iter()
        .map(|id| backend.get(auth, EntityKind::Property, id));
    let results = join_all(fetches).await;

    let holdings = portfolio
        .data
        .property_ids
        .iter()
        .zip(results)
        .map(|(id, result)| {
            match result.and_then(|value| decode::<Record<Property>>(EntityKind::Property, value)) {
                Ok(property) => aggregate::value_holding(id, &property.data, projection),
                Err(e) => {
                    debug!("Could not load member {} of {}: {}", id, portfolio.id, e);
                    HoldingValue::failed(id, e)
                }
            }
        })
        .collect();

    aggregate::summarize(&portfolio.data.name, holdings)
}

/// Falls back to the default value for a failed read, for views that would
/// rather show nothing than an error.
pub fn or_default<T: Default>(result: Result<T, GatewayError>, what: &str) -> T {
    result.unwrap_or_else(|e| {
        warn!("Showing no {what}: {e}");
        T::default()
    })
}

/// Typed access to the active backend on behalf of the logged-in user.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn Backend>,
    credentials: Arc<Credentials>,
    projection: Projection,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>, credentials: Arc<Credentials>) -> Self {
        Gateway {
            backend,
            credentials,
            projection: Projection::default(),
        }
    }

    /// Assumptions used whenever metrics are derived from stored properties.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    fn auth(&self) -> Result<AuthContext, GatewayError> {
        let session = self.credentials.session()?;
        Ok(AuthContext::from(session.as_ref()))
    }

    /// Any rejected credential invalidates the held session.
    fn checked<T>(&self, result: Result<T, GatewayError>) -> Result<T, GatewayError> {
        if let Some(e) = result.as_ref().err().filter(|e| e.is_auth()) {
            info!("Clearing session after auth failure: {e}");
            self.credentials.clear();
        }
        result
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Arc<Session>, GatewayError> {
        let session = self.checked(self.backend.login(email, password).await)?;
        info!("Logged in as {}", session.user.data.email);
        self.credentials.set(session);
        self.credentials
            .current()
            .ok_or(GatewayError::Auth(AuthError::NotLoggedIn))
    }

    #[instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn register(&self, registration: &Registration) -> Result<Arc<Session>, GatewayError> {
        let session = self.checked(self.backend.register(registration).await)?;
        info!("Registered {}", session.user.data.email);
        self.credentials.set(session);
        self.credentials
            .current()
            .ok_or(GatewayError::Auth(AuthError::NotLoggedIn))
    }

    /// Ends the session locally even when the backend cannot be told.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        let Some(session) = self.credentials.current() else {
            return Ok(());
        };
        let result = self
            .backend
            .logout(&AuthContext::from(session.as_ref()))
            .await;
        self.credentials.clear();
        match result {
            Err(GatewayError::Auth(_)) => Ok(()),
            other => other,
        }
    }

    pub async fn current_user(&self) -> Result<Record<User>, GatewayError> {
        let auth = self.auth()?;
        self.checked(self.backend.current_user(&auth).await)
    }

    pub fn collection<T: Entity>(&self) -> Collection<'_, T> {
        Collection {
            gateway: self,
            _marker: PhantomData,
        }
    }

    pub fn properties(&self) -> Collection<'_, Property> {
        self.collection()
    }

    pub fn portfolios(&self) -> Collection<'_, Portfolio> {
        self.collection()
    }

    pub fn analyses(&self) -> Collection<'_, Analysis> {
        self.collection()
    }

    pub fn reports(&self) -> Collection<'_, Report> {
        self.collection()
    }

    pub fn users(&self) -> Collection<'_, User> {
        self.collection()
    }

    #[instrument(skip(self))]
    pub async fn attach_property(
        &self,
        portfolio_id: &str,
        property_id: &str,
    ) -> Result<Record<Portfolio>, GatewayError> {
        let auth = self.auth()?;
        // Attaching a property that does not exist would leave a dangling member.
        self.checked(self.backend.get(&auth, EntityKind::Property, property_id).await)?;
        let value = self.checked(
            self.backend
                .attach_property(&auth, portfolio_id, property_id)
                .await,
        )?;
        decode(EntityKind::Portfolio, value)
    }

    #[instrument(skip(self))]
    pub async fn detach_property(
        &self,
        portfolio_id: &str,
        property_id: &str,
    ) -> Result<Record<Portfolio>, GatewayError> {
        let auth = self.auth()?;
        let value = self.checked(
            self.backend
                .detach_property(&auth, portfolio_id, property_id)
                .await,
        )?;
        decode(EntityKind::Portfolio, value)
    }

    #[instrument(skip(self))]
    pub async fn property_analysis(&self, property_id: &str) -> Result<PropertyAnalysis, GatewayError> {
        let auth = self.auth()?;
        self.checked(
            self.backend
                .property_analysis(&auth, property_id, self.projection)
                .await,
        )
    }

    pub async fn analyze_deal(&self, inputs: &DealInputs) -> Result<DerivedMetrics, GatewayError> {
        inputs.validate().map_err(GatewayError::Validation)?;
        let auth = self.auth()?;
        self.checked(self.backend.analyze_deal(&auth, inputs).await)
    }

    pub async fn market_trends(&self) -> Result<Vec<MarketTrend>, GatewayError> {
        let auth = self.auth()?;
        self.checked(self.backend.market_trends(&auth).await)
    }

    pub async fn emerging_markets(&self) -> Result<Vec<EmergingMarket>, GatewayError> {
        let auth = self.auth()?;
        self.checked(self.backend.emerging_markets(&auth).await)
    }

    #[instrument(skip(self))]
    pub async fn market_detail(&self, city: &str, state: &str) -> Result<MarketDetail, GatewayError> {
        let auth = self.auth()?;
        self.checked(self.backend.market_detail(&auth, city, state).await)
    }

    /// Recomputes a portfolio's totals from its members' current inputs.
    #[instrument(skip(self))]
    pub async fn portfolio_summary(&self, portfolio_id: &str) -> Result<PortfolioSummary, GatewayError> {
        let portfolio = self.portfolios().get(portfolio_id).await?;
        let auth = self.auth()?;
        Ok(summarize_portfolio(self.backend.as_ref(), &auth, &portfolio, self.projection).await)
    }

    /// Starts a report. Depending on the backend it may complete later; see
    /// [`Gateway::wait_for_report`].
    #[instrument(skip(self), fields(subject = %request.subject))]
    pub async fn generate_report(&self, request: &ReportRequest) -> Result<Record<Report>, GatewayError> {
        let auth = self.auth()?;
        let value = self.checked(
            self.backend
                .generate_report(&auth, request, self.projection)
                .await,
        )?;
        let report: Record<Report> = decode(EntityKind::Report, value)?;
        info!("Report {} is {}", report.id, report.data.status);
        Ok(report)
    }

    /// Books a report to run later. The record is stored as scheduled and
    /// carries no snapshot until it has run.
    #[instrument(skip(self))]
    pub async fn schedule_report(
        &self,
        request: &ReportRequest,
        run_at: DateTime<Utc>,
    ) -> Result<Record<Report>, GatewayError> {
        if run_at <= Utc::now() {
            return Err(GatewayError::Validation(format!(
                "cannot schedule a report in the past ({run_at})"
            )));
        }
        let report = Report {
            name: format!("Scheduled {} report", request.subject),
            subject: request.subject.clone(),
            format: request.format,
            status: ReportStatus::Scheduled,
            download_url: None,
            generated_at: None,
            snapshot: None,
            scheduled_for: Some(run_at),
        };
        let record = self.reports().create(report).await?;
        info!("Report {} scheduled for {}", record.id, run_at);
        Ok(record)
    }

    /// Polls a report until it completes. Gives up with a retryable error
    /// after `attempts` checks.
    pub async fn wait_for_report(
        &self,
        report_id: &str,
        attempts: usize,
        interval: Duration,
    ) -> Result<Record<Report>, GatewayError> {
        for attempt in 1..=attempts.max(1) {
            let report = self.reports().get(report_id).await?;
            if report.data.status == ReportStatus::Completed {
                return Ok(report);
            }
            debug!(
                "Report {} is {} (check {}/{})",
                report_id, report.data.status, attempt, attempts
            );
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(GatewayError::Transport(format!(
            "report '{report_id}' still not ready after {attempts} checks"
        )))
    }

    /// Rejects deleting a property that one of the caller's portfolios still
    /// lists.
    async fn ensure_unreferenced(&self, property_id: &str) -> Result<(), GatewayError> {
        let mut query = ListQuery::new().page(100, 0);
        loop {
            let page = self.portfolios().list(query.clone()).await?;
            if let Some(holder) = page
                .items
                .iter()
                .find(|p| p.data.property_ids.iter().any(|id| id == property_id))
            {
                return Err(GatewayError::Validation(format!(
                    "property '{property_id}' is still in portfolio '{}'; detach it first",
                    holder.data.name
                )));
            }
            if !page.has_more() || page.items.is_empty() {
                return Ok(());
            }
            query = query.page(page.limit, page.offset + page.items.len());
        }
    }
}

/// Typed CRUD for one entity kind.
pub struct Collection<'a, T> {
    gateway: &'a Gateway,
    _marker: PhantomData<T>,
}

impl<T: Entity> Collection<'_, T> {
    #[instrument(skip(self), fields(kind = %T::KIND))]
    pub async fn list(&self, query: ListQuery) -> Result<Page<Record<T>>, GatewayError> {
        let gateway = self.gateway;
        let auth = gateway.auth()?;
        let query = query.with_default_sort(T::default_sort());
        let page = gateway.checked(gateway.backend.list(&auth, T::KIND, &query).await)?;
        debug!("Listed {} of {} {}", page.items.len(), page.total, T::KIND.collection());
        page.map(|value| decode(T::KIND, value))
    }

    /// [`Collection::list`] for display: a failed read shows as no rows.
    pub async fn list_or_empty(&self, query: ListQuery) -> Page<Record<T>> {
        let page = query.page;
        match self.list(query).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Showing no {}: {}", T::KIND.collection(), e);
                Page::empty(page)
            }
        }
    }

    #[instrument(skip(self), fields(kind = %T::KIND))]
    pub async fn get(&self, id: &str) -> Result<Record<T>, GatewayError> {
        let gateway = self.gateway;
        let auth = gateway.auth()?;
        let value = gateway.checked(gateway.backend.get(&auth, T::KIND, id).await)?;
        decode(T::KIND, value)
    }

    #[instrument(skip(self, payload), fields(kind = %T::KIND))]
    pub async fn create(&self, payload: T) -> Result<Record<T>, GatewayError> {
        payload.validate().map_err(GatewayError::Validation)?;
        let gateway = self.gateway;
        let auth = gateway.auth()?;
        let value = gateway.checked(
            gateway
                .backend
                .create(&auth, T::KIND, payload_of(encode(&payload)?))
                .await,
        )?;
        let record: Record<T> = decode(T::KIND, value)?;
        info!("Created {} {}", T::KIND, record.id);
        Ok(record)
    }

    /// Applies a JSON merge patch to the stored payload. Identity fields in
    /// the patch are ignored.
    #[instrument(skip(self, patch), fields(kind = %T::KIND))]
    pub async fn update(&self, id: &str, patch: Value) -> Result<Record<T>, GatewayError> {
        let gateway = self.gateway;
        let auth = gateway.auth()?;
        let current = gateway.checked(gateway.backend.get(&auth, T::KIND, id).await)?;
        let existing: Record<T> = decode(T::KIND, current.clone())?;
        if existing.data.is_frozen() {
            return Err(GatewayError::Validation(format!(
                "{} '{id}' is completed and can no longer change",
                T::KIND
            )));
        }

        let mut merged = payload_of(current);
        merge_patch(&mut merged, &payload_of(patch));
        let updated: T = serde_json::from_value(merged)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        updated.validate().map_err(GatewayError::Validation)?;

        let value = gateway.checked(
            gateway
                .backend
                .update(&auth, T::KIND, id, encode(&updated)?)
                .await,
        )?;
        info!("Updated {} {}", T::KIND, id);
        decode(T::KIND, value)
    }

    #[instrument(skip(self), fields(kind = %T::KIND))]
    pub async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let gateway = self.gateway;
        if T::KIND == EntityKind::Property {
            gateway.ensure_unreferenced(id).await?;
        }
        let auth = gateway.auth()?;
        gateway.checked(gateway.backend.delete(&auth, T::KIND, id).await)?;
        info!("Deleted {} {}", T::KIND, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::tests::demo_session;
    use crate::core::model::tests::sample_property;
    use crate::core::model::ReportFormat;
    use crate::providers::mock::MockBackend;
    use crate::store::memory::MemoryCredentialStore;
    use serde_json::json;

    async fn logged_in() -> Gateway {
        let credentials = Arc::new(Credentials::new(Arc::new(MemoryCredentialStore::default())));
        let gateway = Gateway::new(Arc::new(MockBackend::seeded(0).unwrap()), credentials);
        gateway.login("demo@example.com", "password").await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found_for_every_kind() {
        let gateway = logged_in().await;
        assert!(matches!(
            gateway.properties().get("nope").await,
            Err(GatewayError::NotFound { kind: EntityKind::Property, .. })
        ));
        assert!(matches!(
            gateway.portfolios().get("nope").await,
            Err(GatewayError::NotFound { kind: EntityKind::Portfolio, .. })
        ));
        assert!(matches!(
            gateway.analyses().get("nope").await,
            Err(GatewayError::NotFound { kind: EntityKind::Analysis, .. })
        ));
        assert!(matches!(
            gateway.reports().get("nope").await,
            Err(GatewayError::NotFound { kind: EntityKind::Report, .. })
        ));
        assert!(matches!(
            gateway.users().get("nope").await,
            Err(GatewayError::NotFound { kind: EntityKind::User, .. })
        ));
        // Deleting twice is just as deterministic.
        assert!(matches!(
            gateway.reports().delete("nope").await,
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips_payload() {
        let gateway = logged_in().await;
        let payload = sample_property();
        let created = gateway.properties().create(payload.clone()).await.unwrap();
        assert_eq!(created.data, payload);
        assert_eq!(created.owner_id.as_deref(), Some("user_12345"));

        let fetched = gateway.properties().get(&created.id).await.unwrap();
        assert_eq!(fetched.data, payload);
    }

    #[tokio::test]
    async fn test_round_trip_holds_for_every_writable_kind() {
        let gateway = logged_in().await;

        let portfolio = Portfolio {
            name: "Round Trip".to_string(),
            description: Some("Duplexes only".to_string()),
            property_ids: vec!["prop_12345".to_string()],
        };
        let created = gateway.portfolios().create(portfolio.clone()).await.unwrap();
        assert_eq!(created.data, portfolio);
        let fetched = gateway.portfolios().get(&created.id).await.unwrap();
        assert_eq!(fetched.data, portfolio);

        let inputs = finance::tests::scenario_inputs();
        let analysis = Analysis {
            name: Some("Main St".to_string()),
            property_id: None,
            metrics: Some(finance::analyze(&inputs).unwrap()),
            inputs,
            status: ReportStatus::Completed,
            generated_at: Some(Utc::now()),
        };
        let created = gateway.analyses().create(analysis.clone()).await.unwrap();
        assert_eq!(created.data, analysis);
        let fetched = gateway.analyses().get(&created.id).await.unwrap();
        assert_eq!(fetched.data, analysis);

        let report = Report {
            name: "Austin Market Analysis".to_string(),
            subject: Subject::Market {
                city: "Austin".to_string(),
                state: "TX".to_string(),
            },
            format: ReportFormat::Csv,
            status: ReportStatus::InProgress,
            download_url: None,
            generated_at: None,
            snapshot: None,
            scheduled_for: None,
        };
        let created = gateway.reports().create(report.clone()).await.unwrap();
        assert_eq!(created.data, report);
        let fetched = gateway.reports().get(&created.id).await.unwrap();
        assert_eq!(fetched.data, report);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_payload() {
        let gateway = logged_in().await;
        let mut payload = sample_property();
        payload.price = -1.0;
        assert!(matches!(
            gateway.properties().create(payload).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let gateway = logged_in().await;
        let created = gateway.properties().create(sample_property()).await.unwrap();
        let updated = gateway
            .properties()
            .update(
                &created.id,
                json!({"price": 440000, "address": {"street": "125 Main St"}, "id": "hijack"}),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.data.price, 440000.0);
        assert_eq!(updated.data.address.street, "125 Main St");
        assert_eq!(updated.data.address.city, "Anytown");

        assert!(matches!(
            gateway
                .properties()
                .update(&created.id, json!({"bathrooms": -2}))
                .await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_referenced_property_cannot_be_deleted() {
        let gateway = logged_in().await;
        let property = gateway.properties().create(sample_property()).await.unwrap();
        let portfolio = gateway
            .portfolios()
            .create(Portfolio {
                name: "Holdings".to_string(),
                description: None,
                property_ids: vec![],
            })
            .await
            .unwrap();
        gateway
            .attach_property(&portfolio.id, &property.id)
            .await
            .unwrap();

        let err = gateway.properties().delete(&property.id).await.unwrap_err();
        assert!(matches!(&err, GatewayError::Validation(msg) if msg.contains("Holdings")));

        let detached = gateway
            .detach_property(&portfolio.id, &property.id)
            .await
            .unwrap();
        assert!(detached.data.property_ids.is_empty());
        gateway.properties().delete(&property.id).await.unwrap();
        assert!(matches!(
            gateway.properties().get(&property.id).await,
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_and_checks_property() {
        let gateway = logged_in().await;
        let portfolio = gateway
            .portfolios()
            .create(Portfolio {
                name: "Growth".to_string(),
                description: None,
                property_ids: vec![],
            })
            .await
            .unwrap();
        gateway.attach_property(&portfolio.id, "prop_12345").await.unwrap();
        let again = gateway.attach_property(&portfolio.id, "prop_12345").await.unwrap();
        assert_eq!(again.data.property_ids, vec!["prop_12345".to_string()]);

        assert!(matches!(
            gateway.attach_property(&portfolio.id, "missing").await,
            Err(GatewayError::NotFound { kind: EntityKind::Property, .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_report_is_frozen() {
        let gateway = logged_in().await;
        let report = gateway
            .generate_report(&ReportRequest {
                subject: Subject::Property {
                    property_id: "prop_12345".to_string(),
                },
                format: ReportFormat::Pdf,
            })
            .await
            .unwrap();
        assert_eq!(report.data.status, ReportStatus::Completed);
        assert!(matches!(report.data.snapshot, Some(Snapshot::Property(_))));

        assert!(matches!(
            gateway
                .reports()
                .update(&report.id, json!({"name": "Renamed"}))
                .await,
            Err(GatewayError::Validation(_))
        ));

        let waited = gateway
            .wait_for_report(&report.id, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(waited.id, report.id);
    }

    #[tokio::test]
    async fn test_scheduled_report_waits_for_its_run_time() {
        let gateway = logged_in().await;
        let request = ReportRequest {
            subject: Subject::Portfolio {
                portfolio_id: "portfolio_12345".to_string(),
            },
            format: ReportFormat::Xlsx,
        };

        assert!(matches!(
            gateway
                .schedule_report(&request, Utc::now() - chrono::Duration::hours(1))
                .await,
            Err(GatewayError::Validation(_))
        ));

        let run_at = Utc::now() + chrono::Duration::days(7);
        let scheduled = gateway.schedule_report(&request, run_at).await.unwrap();
        assert_eq!(scheduled.data.status, ReportStatus::Scheduled);
        assert_eq!(scheduled.data.scheduled_for, Some(run_at));
        assert!(scheduled.data.snapshot.is_none());

        let fetched = gateway.reports().get(&scheduled.id).await.unwrap();
        assert_eq!(fetched.data, scheduled.data);
        assert!(matches!(
            gateway
                .wait_for_report(&scheduled.id, 2, Duration::from_millis(1))
                .await,
            Err(GatewayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_portfolio_summary_recomputes_from_members() {
        let gateway = logged_in().await;
        let page = gateway.portfolios().list(ListQuery::new()).await.unwrap();
        let portfolio = &page.items[0];

        let summary = gateway.portfolio_summary(&portfolio.id).await.unwrap();
        assert_eq!(summary.holdings.len(), portfolio.data.property_ids.len());
        assert!(summary.totals.weighted_cap_rate.is_some());

        // Changing a member's inputs changes the next summary.
        let member = &portfolio.data.property_ids[0];
        let before = summary.totals.total_monthly_cash_flow;
        gateway
            .properties()
            .update(member, json!({"rental_info": {"estimated_rent": 5000}}))
            .await
            .unwrap();
        let after = gateway.portfolio_summary(&portfolio.id).await.unwrap();
        assert!(after.totals.total_monthly_cash_flow > before);
    }

    #[tokio::test]
    async fn test_calls_require_login() {
        let credentials = Arc::new(Credentials::new(Arc::new(MemoryCredentialStore::default())));
        let gateway = Gateway::new(Arc::new(MockBackend::seeded(0).unwrap()), credentials);
        assert_eq!(
            gateway.properties().get("prop_12345").await.unwrap_err(),
            GatewayError::Auth(AuthError::NotLoggedIn)
        );
        let page = gateway.properties().list_or_empty(ListQuery::new()).await;
        assert_eq!(page.total, 0);
    }

    /// Rejects every call as if the session had been revoked server-side.
    struct RevokedBackend;

    fn revoked<T>() -> Result<T, GatewayError> {
        Err(GatewayError::Auth(AuthError::Expired))
    }

    #[async_trait]
    impl Backend for RevokedBackend {
        fn name(&self) -> &'static str {
            "revoked"
        }
        async fn login(&self, _: &str, _: &str) -> Result<Session, GatewayError> {
            Err(GatewayError::Auth(AuthError::InvalidCredentials(
                "Account locked".to_string(),
            )))
        }
        async fn register(&self, _: &Registration) -> Result<Session, GatewayError> {
            revoked()
        }
        async fn logout(&self, _: &AuthContext) -> Result<(), GatewayError> {
            revoked()
        }
        async fn current_user(&self, _: &AuthContext) -> Result<Record<User>, GatewayError> {
            revoked()
        }
        async fn list(&self, _: &AuthContext, _: EntityKind, _: &ListQuery) -> Result<Page<Value>, GatewayError> {
            revoked()
        }
        async fn get(&self, _: &AuthContext, _: EntityKind, _: &str) -> Result<Value, GatewayError> {
            revoked()
        }
        async fn create(&self, _: &AuthContext, _: EntityKind, _: Value) -> Result<Value, GatewayError> {
            revoked()
        }
        async fn update(&self, _: &AuthContext, _: EntityKind, _: &str, _: Value) -> Result<Value, GatewayError> {
            revoked()
        }
        async fn delete(&self, _: &AuthContext, _: EntityKind, _: &str) -> Result<(), GatewayError> {
            revoked()
        }
        async fn market_trends(&self, _: &AuthContext) -> Result<Vec<MarketTrend>, GatewayError> {
            revoked()
        }
        async fn emerging_markets(&self, _: &AuthContext) -> Result<Vec<EmergingMarket>, GatewayError> {
            revoked()
        }
        async fn market_detail(&self, _: &AuthContext, _: &str, _: &str) -> Result<MarketDetail, GatewayError> {
            revoked()
        }
    }

    #[tokio::test]
    async fn test_auth_failure_clears_session() {
        let store = Arc::new(MemoryCredentialStore::default());
        let credentials = Arc::new(Credentials::new(store));
        credentials.set(demo_session(Some(3600)));
        let mut rx = credentials.subscribe();
        let gateway = Gateway::new(Arc::new(RevokedBackend), credentials.clone());

        let err = gateway.properties().get("prop_12345").await.unwrap_err();
        assert_eq!(err, GatewayError::Auth(AuthError::Expired));
        assert!(credentials.current().is_none());
        assert!(rx.has_changed().unwrap());

        // A second call fails fast without reaching the backend.
        assert_eq!(
            gateway.properties().get("prop_12345").await.unwrap_err(),
            GatewayError::Auth(AuthError::NotLoggedIn)
        );
    }

    #[tokio::test]
    async fn test_login_rejection_keeps_reason() {
        let credentials = Arc::new(Credentials::new(Arc::new(MemoryCredentialStore::default())));
        let gateway = Gateway::new(Arc::new(RevokedBackend), credentials);
        let err = gateway.login("demo@example.com", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "login rejected: Account locked");
    }

    #[tokio::test]
    async fn test_writes_propagate_failures() {
        let credentials = Arc::new(Credentials::new(Arc::new(MemoryCredentialStore::default())));
        credentials.set(demo_session(None));
        let gateway = Gateway::new(Arc::new(RevokedBackend), credentials);
        assert!(gateway.properties().create(sample_property()).await.is_err());
    }
}
