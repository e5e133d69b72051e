//! Domain types, calculations and the data-access gateway

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod finance;
pub mod gateway;
pub mod log;
pub mod model;
pub mod query;

// Re-export main types for cleaner imports
pub use error::{AuthError, CalcError, GatewayError};
pub use gateway::{Backend, Gateway};
