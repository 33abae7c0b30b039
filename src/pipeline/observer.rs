//! Post-turn hooks

use std::sync::Arc;

use async_trait::async_trait;

/// Receives the full reply once a turn completes
///
/// Implementations must return promptly; slow work belongs in a spawned task.
#[async_trait]
pub trait TurnObserver: Send + Sync {
    async fn turn_completed(&self, full_text: &str);
}

/// Logs completed turns
#[derive(Debug, Default)]
pub struct LoggingObserver;

#[async_trait]
impl TurnObserver for LoggingObserver {
    async fn turn_completed(&self, full_text: &str) {
        tracing::info!(chars = full_text.chars().count(), "turn complete");
    }
}

/// POSTs `{"text": <reply>}` to a reaction service without waiting for it
pub struct WebhookObserver {
    client: reqwest::Client,
    url: String,
}

impl WebhookObserver {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TurnObserver for WebhookObserver {
    async fn turn_completed(&self, full_text: &str) {
        let request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": full_text }));
        let url = self.url.clone();

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %url, "reaction hook delivered");
                }
                Ok(response) => {
                    tracing::warn!(url = %url, status = %response.status(), "reaction hook rejected");
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "reaction hook failed");
                }
            }
        });
    }
}

/// Pick the observer for a configured reaction URL
#[must_use]
pub fn observer_for(reaction_url: Option<&str>) -> Arc<dyn TurnObserver> {
    match reaction_url {
        Some(url) => Arc::new(WebhookObserver::new(url)),
        None => Arc::new(LoggingObserver),
    }
}
