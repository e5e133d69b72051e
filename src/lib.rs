pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::cli::analyze::AnalyzeTarget;
use crate::cli::portfolio::PortfolioAction;
use crate::cli::report::ReportAction;
use crate::cli::search::SearchArgs;
use crate::core::config::AppConfig;
use crate::core::gateway::Registration;
use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Login {
        email: String,
        password: Option<String>,
    },
    Register(Registration),
    Logout,
    Whoami,
    Analyze(AnalyzeTarget),
    Search(SearchArgs),
    Portfolio(PortfolioAction),
    /// All markets, or one `(city, state)`.
    Markets(Option<(String, String)>),
    Report(ReportAction),
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("dealdesk starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let gateway = providers::connect(&config)?;
    debug!("Connected to {} backend", gateway.backend_name());

    match command {
        AppCommand::Login { email, password } => cli::auth::login(&gateway, &email, password).await,
        AppCommand::Register(registration) => cli::auth::register(&gateway, registration).await,
        AppCommand::Logout => cli::auth::logout(&gateway).await,
        AppCommand::Whoami => cli::auth::whoami(&gateway).await,
        AppCommand::Analyze(target) => cli::analyze::run(&gateway, target).await,
        AppCommand::Search(args) => cli::search::run(&gateway, &args).await,
        AppCommand::Portfolio(action) => cli::portfolio::run(&gateway, action).await,
        AppCommand::Markets(location) => cli::markets::run(&gateway, location).await,
        AppCommand::Report(action) => cli::report::run(&gateway, action).await,
    }
}
