pub mod analyze;
pub mod auth;
pub mod markets;
pub mod portfolio;
pub mod report;
pub mod search;
pub mod setup;
pub mod ui;
