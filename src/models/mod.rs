// Request and response envelopes for the downstream APIs

pub mod graphql;
pub mod rest;

pub use graphql::{GraphQlRequest, GraphQlResponse};
pub use rest::{RestRequest, RestResponse};
