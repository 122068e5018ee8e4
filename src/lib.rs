//! eufy-login - login negotiation for Eufy Security accounts
//!
//! Two clients produce the same [`LoginOutcome`]:
//! - [`CloudLoginClient`] walks an ordered table of HTTP login targets.
//! - [`GatewaySession`] logs in through a local eufy-security-ws gateway.

pub mod cloud;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod models;

pub use cloud::CloudLoginClient;
pub use config::Config;
pub use error::{GatewayError, LoginError};
pub use gateway::GatewaySession;
pub use models::{Credentials, LoginOutcome, Session};
