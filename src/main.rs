use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use dealdesk::cli::analyze::AnalyzeTarget;
use dealdesk::cli::portfolio::PortfolioAction;
use dealdesk::cli::report::ReportAction;
use dealdesk::cli::search::{SearchArgs, SortOrder};
use dealdesk::core::gateway::Registration;
use dealdesk::core::log::init_logging;
use dealdesk::core::model::{PropertyType, ReportFormat, ReportRequest, Subject};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Log in and keep the session
    Login {
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and log in
    Register {
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// End the current session
    Logout,
    /// Show the logged-in account
    Whoami,
    /// Analyze a deal file or a stored property
    Analyze {
        /// YAML file with purchase, rental and expense assumptions
        #[arg(required_unless_present = "property")]
        deal: Option<PathBuf>,
        /// Analyze a stored property instead
        #[arg(long, conflicts_with = "deal")]
        property: Option<String>,
        /// Save the analysis under this name
        #[arg(long, requires = "deal")]
        save_as: Option<String>,
    },
    /// Search properties
    Search(SearchCommand),
    /// Manage portfolios
    Portfolio {
        #[command(subcommand)]
        action: Option<PortfolioCommand>,
    },
    /// Show market trends, or the detail of one market
    Markets {
        #[arg(long, requires = "state")]
        city: Option<String>,
        #[arg(long, requires = "city")]
        state: Option<String>,
    },
    /// List or generate reports
    Report {
        #[command(subcommand)]
        action: Option<ReportCommand>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Relevance,
    PriceAsc,
    PriceDesc,
}

#[derive(Args)]
struct SearchCommand {
    /// City to search in
    #[arg(long)]
    location: Option<String>,
    #[arg(long, value_parser = parse_property_type)]
    property_type: Option<PropertyType>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    min_bedrooms: Option<u32>,
    #[arg(long)]
    min_bathrooms: Option<f64>,
    #[arg(long)]
    min_square_feet: Option<u32>,
    #[arg(long, value_enum, default_value = "relevance")]
    sort: SortArg,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long, default_value_t = 1)]
    page: usize,
}

#[derive(Subcommand)]
enum PortfolioCommand {
    /// List portfolios
    List,
    /// Show a portfolio with its computed totals
    Show { id: String },
    /// Create an empty portfolio
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Add a property to a portfolio
    Add { id: String, property_id: String },
    /// Remove a property from a portfolio
    Remove { id: String, property_id: String },
    /// Delete a portfolio
    Delete { id: String },
}

#[derive(Subcommand)]
enum ReportCommand {
    /// List reports
    List,
    /// Report on a property
    Property {
        id: String,
        #[command(flatten)]
        options: ReportOptions,
    },
    /// Report on a portfolio
    Portfolio {
        id: String,
        #[command(flatten)]
        options: ReportOptions,
    },
    /// Report on a market
    Market {
        city: String,
        state: String,
        #[command(flatten)]
        options: ReportOptions,
    },
}

#[derive(Args)]
struct ReportOptions {
    #[arg(long, value_parser = parse_report_format, default_value = "pdf")]
    format: ReportFormat,
    /// Wait until the report completes
    #[arg(long)]
    wait: bool,
    /// Schedule the report instead of running it now (RFC 3339 time)
    #[arg(long, value_parser = parse_run_time, conflicts_with = "wait")]
    at: Option<DateTime<Utc>>,
}

fn parse_property_type(s: &str) -> Result<PropertyType, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_report_format(s: &str) -> Result<ReportFormat, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_run_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time such as 2026-11-01T09:00:00Z: {e}"))
}

impl From<SearchCommand> for SearchArgs {
    fn from(cmd: SearchCommand) -> SearchArgs {
        SearchArgs {
            location: cmd.location,
            property_type: cmd.property_type,
            min_price: cmd.min_price,
            max_price: cmd.max_price,
            min_bedrooms: cmd.min_bedrooms,
            min_bathrooms: cmd.min_bathrooms,
            min_square_feet: cmd.min_square_feet,
            sort: match cmd.sort {
                SortArg::Relevance => SortOrder::Relevance,
                SortArg::PriceAsc => SortOrder::PriceAsc,
                SortArg::PriceDesc => SortOrder::PriceDesc,
            },
            page_size: cmd.limit,
            page: cmd.page,
        }
    }
}

fn report_action(cmd: Option<ReportCommand>) -> ReportAction {
    let (subject, options) = match cmd {
        None | Some(ReportCommand::List) => return ReportAction::List,
        Some(ReportCommand::Property { id, options }) => {
            (Subject::Property { property_id: id }, options)
        }
        Some(ReportCommand::Portfolio { id, options }) => {
            (Subject::Portfolio { portfolio_id: id }, options)
        }
        Some(ReportCommand::Market {
            city,
            state,
            options,
        }) => (Subject::Market { city, state }, options),
    };
    let request = ReportRequest {
        subject,
        format: options.format,
    };
    match options.at {
        Some(at) => ReportAction::Schedule { request, at },
        None => ReportAction::Generate {
            request,
            wait: options.wait,
        },
    }
}

impl From<Commands> for dealdesk::AppCommand {
    fn from(cmd: Commands) -> dealdesk::AppCommand {
        match cmd {
            Commands::Login { email, password } => dealdesk::AppCommand::Login { email, password },
            Commands::Register {
                email,
                password,
                first_name,
                last_name,
            } => dealdesk::AppCommand::Register(Registration {
                email,
                password,
                first_name,
                last_name,
            }),
            Commands::Logout => dealdesk::AppCommand::Logout,
            Commands::Whoami => dealdesk::AppCommand::Whoami,
            Commands::Analyze {
                deal,
                property,
                save_as,
            } => dealdesk::AppCommand::Analyze(match (property, deal) {
                (Some(id), _) => AnalyzeTarget::Property(id),
                (None, deal) => AnalyzeTarget::Deal {
                    path: deal.unwrap_or_default(),
                    save_as,
                },
            }),
            Commands::Search(search) => dealdesk::AppCommand::Search(search.into()),
            Commands::Portfolio { action } => dealdesk::AppCommand::Portfolio(match action {
                None | Some(PortfolioCommand::List) => PortfolioAction::List,
                Some(PortfolioCommand::Show { id }) => PortfolioAction::Show { id },
                Some(PortfolioCommand::Create { name, description }) => {
                    PortfolioAction::Create { name, description }
                }
                Some(PortfolioCommand::Add { id, property_id }) => {
                    PortfolioAction::Add { id, property_id }
                }
                Some(PortfolioCommand::Remove { id, property_id }) => {
                    PortfolioAction::Remove { id, property_id }
                }
                Some(PortfolioCommand::Delete { id }) => PortfolioAction::Delete { id },
            }),
            Commands::Markets { city, state } => {
                dealdesk::AppCommand::Markets(city.zip(state))
            }
            Commands::Report { action } => dealdesk::AppCommand::Report(report_action(action)),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => dealdesk::cli::setup::setup(cli.config_path.as_deref()).map(|path| {
            println!("Created configuration at {}", path.display());
        }),
        Some(cmd) => dealdesk::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
