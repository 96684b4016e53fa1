// National Grid client - library root

pub mod auth;
pub mod client;
pub mod config;
pub mod dns;
pub mod error;
pub mod extract;
pub mod models;
pub mod retry;
pub mod session;

pub use auth::{BearerToken, CredentialExchange, ExchangedToken, LoginContext, StaticTokenExchange};
pub use client::NationalGridClient;
pub use config::ClientConfig;
pub use error::{NatGridError, RequestContext, Result};
pub use models::{GraphQlRequest, GraphQlResponse, RestRequest, RestResponse};
pub use retry::{Idempotency, RetryPolicy};
