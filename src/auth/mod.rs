// Authentication module
// Manages token lifecycle and the credential exchange seam

mod cache;
mod exchange;
mod types;

pub use cache::TokenCache;
pub use exchange::{Authenticator, CredentialExchange, StaticTokenExchange};
pub use types::{BearerToken, ExchangedToken, LoginContext, SUBJECT_KEY};
