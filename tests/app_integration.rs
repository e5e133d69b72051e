use dealdesk::AppCommand;
use dealdesk::cli::analyze::AnalyzeTarget;
use dealdesk::cli::portfolio::PortfolioAction;
use dealdesk::cli::report::ReportAction;
use dealdesk::cli::search::SearchArgs;
use dealdesk::core::config::AppConfig;
use dealdesk::core::model::{ReportFormat, ReportRequest, Subject};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::info;

// Canned responses for a REST deployment
mod test_utils {
    use serde_json::json;
    use wiremock::matchers::{bearer_token, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn property(id: &str, street: &str, price: u64, rent: u64) -> serde_json::Value {
        json!({
            "property_id": id,
            "user_id": "user_12345",
            "address": {"street": street, "city": "Anytown", "state": "CA", "zip": "90210"},
            "property_type": "single_family",
            "price": price,
            "bedrooms": 3,
            "bathrooms": 2,
            "ai_score": 90,
            "created_at": "2023-05-01T09:00:00Z",
            "purchase_info": {
                "asking_price": price,
                "down_payment_percent": 0.2,
                "loan_interest_rate": 0.0425,
                "loan_term_years": 30
            },
            "rental_info": {"estimated_rent": rent, "vacancy_rate": 0.05, "management_fee_percent": 0.08},
            "expenses": {"property_tax": 5400, "insurance": 1800, "maintenance": 2700, "capex_reserve": 1560}
        })
    }

    pub async fn create_api_server() -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "access_token": "rest-token",
                    "token_type": "Bearer",
                    "expires_in": 3600,
                    "user": {
                        "user_id": "user_12345",
                        "email": "demo@example.com",
                        "first_name": "Demo",
                        "last_name": "User",
                        "role": "investor",
                        "created_at": "2023-01-01T00:00:00Z"
                    }
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/properties"))
            .and(bearer_token("rest-token"))
            .and(query_param("location", "Anytown"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "properties": [
                        property("prop_12345", "123 Main St", 450000, 2600),
                        property("prop_23456", "456 Oak Ave", 325000, 2100)
                    ],
                    "pagination": {"total": 2, "limit": 10, "offset": 0}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/portfolios/portfolio_12345"))
            .and(bearer_token("rest-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "portfolio_id": "portfolio_12345",
                    "user_id": "user_12345",
                    "name": "Primary Investment Portfolio",
                    "property_ids": ["prop_12345", "prop_23456"],
                    "created_at": "2023-01-15T00:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        for (id, street, price, rent) in [
            ("prop_12345", "123 Main St", 450000, 2600),
            ("prop_23456", "456 Oak Ave", 325000, 2100),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/properties/{id}")))
                .and(bearer_token("rest-token"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"data": property(id, street, price, rent)})),
                )
                .mount(&server)
                .await;
        }

        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"success": true}})))
            .expect(1)
            .mount(&server)
            .await;

        server
    }
}

fn write_config(dir: &Path, backend: &str) -> String {
    let config_path = dir.join("config.yaml");
    let config_content = format!(
        r#"
        backend:
{backend}
        credentials:
          store: disk
        data_path: {}
        retry:
          attempts: 2
          delay_ms: 1
    "#,
        dir.join("data").display()
    );
    fs::write(&config_path, config_content).expect("Failed to write config file");
    config_path.to_string_lossy().into_owned()
}

fn mock_config(dir: &Path) -> String {
    write_config(dir, "          kind: mock\n          latency_ms: 0")
}

async fn run(command: AppCommand, config_path: &str) -> anyhow::Result<()> {
    dealdesk::run_command(command, Some(config_path)).await
}

fn login() -> AppCommand {
    AppCommand::Login {
        email: "demo@example.com".to_string(),
        password: Some("password".to_string()),
    }
}

#[test_log::test(tokio::test)]
async fn test_full_app_flow_with_mock_backend() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = mock_config(dir.path());

    // Commands before login fail and ask for a session
    let err = run(AppCommand::Search(SearchArgs::default()), &config_path)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No active session"), "{err:?}");

    run(login(), &config_path).await.expect("login failed");

    // The session was persisted, so later runs are authenticated
    run(AppCommand::Whoami, &config_path)
        .await
        .expect("whoami failed");
    run(
        AppCommand::Search(SearchArgs {
            location: Some("Anytown".to_string()),
            max_price: Some(500000.0),
            page_size: 10,
            page: 1,
            ..Default::default()
        }),
        &config_path,
    )
    .await
    .expect("search failed");
    run(
        AppCommand::Portfolio(PortfolioAction::Show {
            id: "portfolio_12345".to_string(),
        }),
        &config_path,
    )
    .await
    .expect("portfolio summary failed");
    run(AppCommand::Markets(None), &config_path)
        .await
        .expect("market overview failed");
    run(
        AppCommand::Markets(Some(("Austin".to_string(), "TX".to_string()))),
        &config_path,
    )
    .await
    .expect("market detail failed");
    run(
        AppCommand::Analyze(AnalyzeTarget::Property("prop_12345".to_string())),
        &config_path,
    )
    .await
    .expect("property analysis failed");
    run(
        AppCommand::Report(ReportAction::Generate {
            request: ReportRequest {
                subject: Subject::Portfolio {
                    portfolio_id: "portfolio_12345".to_string(),
                },
                format: ReportFormat::Csv,
            },
            wait: true,
        }),
        &config_path,
    )
    .await
    .expect("report generation failed");
    run(
        AppCommand::Report(ReportAction::Schedule {
            request: ReportRequest {
                subject: Subject::Market {
                    city: "Austin".to_string(),
                    state: "TX".to_string(),
                },
                format: ReportFormat::Pdf,
            },
            at: chrono::Utc::now() + chrono::Duration::days(1),
        }),
        &config_path,
    )
    .await
    .expect("report scheduling failed");

    let missing = run(
        AppCommand::Markets(Some(("Gotham".to_string(), "NY".to_string()))),
        &config_path,
    )
    .await
    .unwrap_err();
    info!("Missing market: {missing:#}");
    assert!(format!("{missing:#}").contains("not found"));

    run(AppCommand::Logout, &config_path)
        .await
        .expect("logout failed");
    assert!(
        run(AppCommand::Whoami, &config_path).await.is_err(),
        "session should be gone after logout"
    );
}

#[test_log::test(tokio::test)]
async fn test_analyze_deal_file_without_session() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = mock_config(dir.path());
    let deal_path = dir.path().join("deal.yaml");
    fs::write(
        &deal_path,
        r#"
        purchase_info:
          asking_price: 450000
          closing_costs: 4500
          down_payment_percent: 0.2
          loan_interest_rate: 0.0425
          loan_term_years: 30
        rental_info:
          estimated_rent: 2600
          vacancy_rate: 0.05
          management_fee_percent: 0.08
        expenses:
          property_tax: 5400
          insurance: 1800
          maintenance: 2700
          capex_reserve: 1560
        projection:
          appreciation_rate: 0.035
    "#,
    )
    .expect("Failed to write deal file");

    let result = run(
        AppCommand::Analyze(AnalyzeTarget::Deal {
            path: deal_path.clone(),
            save_as: None,
        }),
        &config_path,
    )
    .await;
    assert!(result.is_ok(), "Analysis failed with: {:?}", result.err());

    // Saving needs a session
    let result = run(
        AppCommand::Analyze(AnalyzeTarget::Deal {
            path: deal_path,
            save_as: Some("Main St".to_string()),
        }),
        &config_path,
    )
    .await;
    assert!(result.is_err());
}

#[test_log::test(tokio::test)]
async fn test_full_app_flow_with_rest_api() {
    let server = test_utils::create_api_server().await;
    let dir = TempDir::new().expect("Failed to create temp dir");
    let backend = format!(
        "          kind: rest\n          base_url: {}",
        server.uri()
    );
    let config_path = write_config(dir.path(), &backend);

    run(login(), &config_path).await.expect("login failed");
    run(
        AppCommand::Search(SearchArgs {
            location: Some("Anytown".to_string()),
            page_size: 10,
            page: 1,
            ..Default::default()
        }),
        &config_path,
    )
    .await
    .expect("search failed");
    run(
        AppCommand::Portfolio(PortfolioAction::Show {
            id: "portfolio_12345".to_string(),
        }),
        &config_path,
    )
    .await
    .expect("portfolio summary failed");
    run(AppCommand::Logout, &config_path)
        .await
        .expect("logout failed");
}

#[test_log::test(tokio::test)]
async fn test_setup_writes_loadable_config() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.yaml");
    let written = dealdesk::cli::setup::setup(path.to_str()).expect("setup failed");
    assert_eq!(written, path);

    let config = AppConfig::load_from_path(&path).expect("example config should load");
    assert_eq!(config.retry.attempts, 3);
    assert!(dealdesk::cli::setup::setup(path.to_str()).is_err());
}
