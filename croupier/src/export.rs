//! Outbound collaborators: result export and the capacity signal.

use crate::errors::EngineError;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Flat string-keyed result payload.
pub type Payload = Map<String, Value>;

#[async_trait::async_trait]
pub trait ResultExporter: Send + Sync {
    async fn export(&self, payload: &Payload) -> Result<(), EngineError>;
}

/// POSTs results as JSON to a fixed URL.
pub struct HttpWebhook {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::TransportFailure(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ResultExporter for HttpWebhook {
    #[instrument(skip(self, payload), fields(url = %self.url))]
    async fn export(&self, payload: &Payload) -> Result<(), EngineError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| EngineError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::TransportFailure(format!("webhook answered {status}: {body}")));
        }
        info!("Webhook accepted {} fields", payload.len());
        Ok(())
    }
}

/// Used when no endpoint is configured: results are only logged.
pub struct LogExporter;

#[async_trait::async_trait]
impl ResultExporter for LogExporter {
    async fn export(&self, payload: &Payload) -> Result<(), EngineError> {
        info!(
            "No webhook configured, result: {}",
            serde_json::Value::Object(payload.clone())
        );
        Ok(())
    }
}

/// Fire-and-forget notice that an engine drained its queue.
pub trait CapacitySignal: Send + Sync {
    fn capacity_available(&self, app: &str);
}

pub struct LogSignal;

impl CapacitySignal for LogSignal {
    fn capacity_available(&self, app: &str) {
        info!("{} has no pending work", app);
    }
}

/// Forwards the app name to an external scheduler.
pub struct ChannelSignal {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSignal {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl CapacitySignal for ChannelSignal {
    fn capacity_available(&self, app: &str) {
        if self.tx.send(app.to_string()).is_err() {
            warn!("Scheduler channel closed, capacity signal for {} dropped", app);
        } else {
            debug!("Signalled capacity for {}", app);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_signal_forwards_app() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signal = ChannelSignal::new(tx);
        signal.capacity_available("pppoker");
        assert_eq!(rx.try_recv().unwrap(), "pppoker");
        drop(rx);
        signal.capacity_available("pppoker");
    }

    #[tokio::test]
    async fn unreachable_webhook_is_a_transport_failure() {
        let hook = HttpWebhook::new("http://127.0.0.1:9/hook").unwrap();
        let mut payload = Payload::new();
        payload.insert("Saldo".into(), Value::String("10".into()));
        let err = hook.export(&payload).await.unwrap_err();
        assert!(matches!(err, EngineError::TransportFailure(_)));
    }
}
