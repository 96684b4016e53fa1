use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Method;
use std::sync::Arc;

use natgrid_client::config::{CliArgs, Command};
use natgrid_client::{
    ClientConfig, GraphQlRequest, NationalGridClient, RestRequest, StaticTokenExchange,
};

/// Lifetime assumed for a token passed on the command line
const STATIC_TOKEN_LIFETIME_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over --log-level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::load(&args)?;
    tracing::debug!("Loaded configuration: {:?}", config);

    let client = build_client(config, args.access_token.as_deref())?;
    let result = run(&client, &args.command).await;
    client.close().await;
    result
}

/// Pick the authentication mode from the supplied options
fn build_client(config: ClientConfig, access_token: Option<&str>) -> Result<NationalGridClient> {
    match access_token {
        Some(token) => {
            tracing::info!("Using pre-issued access token");
            Ok(NationalGridClient::with_exchange(
                config,
                Arc::new(StaticTokenExchange::new(token, STATIC_TOKEN_LIFETIME_SECS)),
            )?)
        }
        None if config.has_credentials() => anyhow::bail!(
            "Username and password were supplied, but this binary has no credential exchange; \
             pass --access-token instead"
        ),
        None => Ok(NationalGridClient::new(config)?),
    }
}

async fn run(client: &NationalGridClient, command: &Command) -> Result<()> {
    match command {
        Command::Ping => {
            let ok = client.ping().await?;
            if ok {
                tracing::info!("Endpoint answered");
            } else {
                tracing::warn!("Endpoint answered without data");
            }
            println!("{}", serde_json::json!({ "ok": ok }));
        }

        Command::Graphql {
            query,
            variables,
            operation_name,
            endpoint,
        } => {
            let mut request = GraphQlRequest::new(query.clone());
            if let Some(variables) = variables {
                let parsed: serde_json::Value =
                    serde_json::from_str(variables).context("Failed to parse --variables")?;
                let map = match parsed {
                    serde_json::Value::Object(map) => map,
                    _ => anyhow::bail!("--variables must be a JSON object"),
                };
                request = request.with_variables(map);
            }
            if let Some(name) = operation_name {
                request = request.with_operation_name(name.clone());
            }
            if let Some(endpoint) = endpoint {
                request = request.with_endpoint(endpoint.clone());
            }

            let response = client.execute_graphql(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::Rest {
            path,
            method,
            params,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let mut request = RestRequest::new(method, path.clone());
            for (name, value) in params {
                request = request.with_param(name.clone(), value.clone());
            }

            let response = client.execute_rest(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
