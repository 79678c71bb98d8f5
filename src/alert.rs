//! Fire-and-forget push-alerts to an external webhook.
//!
//! The dispatcher serializes an alert into a human-readable message and
//! performs one POST per alert. The JSON body carries the same message under
//! both `content` and `text` for compatibility with common chat webhooks.
//!
//! Delivery is decoupled from detection: posts are spawned and never
//! awaited by the tick loop, and delivery failures are logged to the
//! diagnostic channel only. A slow or broken sink cannot widen the detection
//! latency or drop an event from the primary log.

use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::events::MonitorEvent;

/// HTTP timeout for one webhook post.
const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts alert-worthy events to a configured webhook.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    client: reqwest::Client,
    webhook_url: String,
}

impl AlertDispatcher {
    /// Create a dispatcher for the given webhook URL.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ALERT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }

    /// Create a dispatcher only when a webhook URL is configured.
    #[must_use]
    pub fn from_url(webhook_url: Option<&str>) -> Option<Self> {
        webhook_url.map(Self::new)
    }

    /// Dispatch one event to the sink without blocking the caller.
    ///
    /// The post runs on a spawned task; errors are swallowed into a warning
    /// on the diagnostic channel.
    pub fn dispatch(&self, event: &MonitorEvent) {
        let message = render_alert(event);
        let body = json!({
            "content": message,
            "text": message,
        });

        let client = self.client.clone();
        let url = self.webhook_url.clone();
        let event_type = event.event_type();

        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(event_type, "Alert delivered");
                }
                Ok(response) => {
                    warn!(
                        event_type,
                        status = %response.status(),
                        "Alert webhook returned non-success status"
                    );
                }
                Err(e) => {
                    warn!(event_type, error = %e, "Alert delivery failed");
                }
            }
        });
    }
}

/// Render the human message posted to the sink: type, severity, and the full
/// payload as pretty-printed JSON.
fn render_alert(event: &MonitorEvent) -> String {
    let severity = event
        .severity()
        .map_or_else(|| "ELEVATED".to_string(), |s| s.to_string());

    let payload = serde_json::to_string_pretty(event)
        .unwrap_or_else(|_| format!("{{\"event_type\":\"{}\"}}", event.event_type()));

    format!(
        "🚨 {} (severity: {severity})\n```\n{payload}\n```",
        event.event_type()
    )
}
