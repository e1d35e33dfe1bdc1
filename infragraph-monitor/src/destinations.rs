//! Alert destinations.
//!
//! The monitor hands each destination the full batch of a cycle's alerts.
//! Destinations are independent: one failing never affects the others.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use infragraph_core::DispatchError;

use crate::rules::AlertInstance;

#[async_trait]
pub trait AlertDestination: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alerts: &[AlertInstance]) -> Result<(), DispatchError>;
}

type AlertCallback = dyn Fn(&[AlertInstance]) -> Result<(), String> + Send + Sync;

/// Calls a closure with every batch.
pub struct CallbackDestination {
    name: String,
    callback: Arc<AlertCallback>,
}

impl CallbackDestination {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&[AlertInstance]) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl AlertDestination for CallbackDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alerts: &[AlertInstance]) -> Result<(), DispatchError> {
        (self.callback)(alerts).map_err(|message| DispatchError::Delivery {
            destination: self.name.clone(),
            message,
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    source: &'static str,
    count: usize,
    alerts: &'a [AlertInstance],
}

/// POSTs each batch as JSON to a URL.
pub struct WebhookDestination {
    name: String,
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WebhookDestination {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn failure(&self, message: String) -> DispatchError {
        DispatchError::Delivery {
            destination: self.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl AlertDestination for WebhookDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alerts: &[AlertInstance]) -> Result<(), DispatchError> {
        let payload = WebhookPayload {
            source: "infragraph",
            count: alerts.len(),
            alerts,
        };
        let mut request = self.client.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| self.failure(format!("HTTP request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(destination = %self.name, status = %status, "Webhook rejected alerts");
            return Err(self.failure(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

/// Pushes each batch onto a bounded tokio channel.
pub struct ChannelDestination {
    name: String,
    tx: mpsc::Sender<Vec<AlertInstance>>,
}

impl ChannelDestination {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<Vec<AlertInstance>>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// A destination plus the receiving end of its queue.
    pub fn channel(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Vec<AlertInstance>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(name, tx), rx)
    }
}

#[async_trait]
impl AlertDestination for ChannelDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alerts: &[AlertInstance]) -> Result<(), DispatchError> {
        self.tx
            .send(alerts.to_vec())
            .await
            .map_err(|_| DispatchError::Closed {
                destination: self.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{AlertCategory, AlertSeverity};
    use chrono::Utc;
    use std::sync::Mutex;

    fn alert() -> AlertInstance {
        AlertInstance::new("orphan", AlertCategory::Orphan, AlertSeverity::Warning, "lonely", Utc::now())
    }

    #[tokio::test]
    async fn test_callback_receives_batch() {
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        let dest = CallbackDestination::new("cb", move |alerts: &[AlertInstance]| {
            *sink.lock().unwrap() += alerts.len();
            Ok(())
        });
        dest.deliver(&[alert(), alert()]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_callback_error_is_delivery_error() {
        let dest = CallbackDestination::new("cb", |_: &[AlertInstance]| Err("pager down".to_string()));
        let err = dest.deliver(&[alert()]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Delivery { ref destination, .. } if destination == "cb"));
        assert!(err.to_string().contains("pager down"));
    }

    #[tokio::test]
    async fn test_channel_destination() {
        let (dest, mut rx) = ChannelDestination::channel("queue", 4);
        dest.deliver(&[alert()]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        drop(rx);
        let err = dest.deliver(&[alert()]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_delivery_error() {
        let dest = WebhookDestination::new("hook", "http://127.0.0.1:9/alerts")
            .with_header("Authorization", "Bearer t");
        assert_eq!(dest.url(), "http://127.0.0.1:9/alerts");
        let err = dest.deliver(&[alert()]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Delivery { .. }));
    }

    #[test]
    fn test_webhook_payload_shape() {
        let alerts = vec![alert()];
        let payload = WebhookPayload {
            source: "infragraph",
            count: alerts.len(),
            alerts: &alerts,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["alerts"][0]["ruleId"], "orphan");
        assert_eq!(json["alerts"][0]["severity"], "warning");
    }
}
