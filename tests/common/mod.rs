// Shared helpers for integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use natgrid_client::{ClientConfig, CredentialExchange, ExchangedToken, Result, RetryPolicy};

// ==================================================================================================
// Credential exchange
// ==================================================================================================

/// Exchange that issues `token-1`, `token-2`, ... and counts its calls
pub struct CountingExchange {
    calls: AtomicUsize,
    subject: Option<String>,
}

impl CountingExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            subject: None,
        })
    }

    pub fn with_subject(subject: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            subject: Some(subject.to_string()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialExchange for CountingExchange {
    async fn exchange(
        &self,
        _http: &reqwest::Client,
        _username: &str,
        _password: &str,
        _timeout: Duration,
    ) -> Result<ExchangedToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        // Give concurrent callers a chance to pile up on the refresh lock
        tokio::time::sleep(Duration::from_millis(10)).await;

        let token = ExchangedToken::new(format!("token-{}", n), 3600);
        Ok(match self.subject {
            Some(ref subject) => token.with_subject(subject.clone()),
            None => token,
        })
    }
}

/// Client configuration pointing at a mock server with fast retries
pub fn test_config(server_url: &str) -> ClientConfig {
    ClientConfig::default()
        .with_endpoint(format!("{}/graphql", server_url))
        .with_rest_base_url(format!("{}/api", server_url))
        .with_credentials("alice@example.test", "hunter2")
        .with_subscription_key("test-subscription-key")
        .with_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..RetryPolicy::default()
        })
}

// ==================================================================================================
// Log capture
// ==================================================================================================

/// One captured log event with every field rendered into `text`
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub text: String,
}

/// Tracing layer that records every event, at every level
#[derive(Clone, Default)]
pub struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureLayer {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events at `level` or more severe
    pub fn at_least(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level <= level)
            .collect()
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut text = String::new();
        event.record(&mut FieldVisitor(&mut text));

        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            text,
        });
    }
}

/// Renders all fields as `name=value`
struct FieldVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for FieldVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(&format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(&format!("{}={}", field.name(), value));
    }
}
