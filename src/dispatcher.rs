// src/dispatcher.rs
//
// Notification fan-out. Each recipient is dispatched independently and
// concurrently; one recipient's outcome never affects another's. The only
// retry in the whole engine lives here: a provider response carrying the
// carrier-transient marker gets exactly one retry after a fixed delay.
// Everything else — network error, non-success status, malformed body —
// is terminal for that recipient. The overall dispatch never fails as a
// batch; it aggregates per-recipient outcomes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::collaborators::{SmsResponse, SmsTransport, StoreError};
use crate::types::{AlertKind, DispatchConfig};

/// Substring the SMS provider embeds in a response body when the carrier
/// rejected the message transiently. A brittle but intentional integration
/// contract — kept behind this named predicate so the provider can change
/// without touching dispatch logic.
pub const CARRIER_TRANSIENT_MARKER: &str = "carrier temporarily unavailable";

pub fn is_carrier_transient(body: &str) -> bool {
    body.to_lowercase().contains(CARRIER_TRANSIENT_MARKER)
}

/// Terminal outcome for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    SentAfterRetry,
    Failed(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sent | Self::SentAfterRetry)
    }
}

#[derive(Debug, Clone)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub outcome: SendOutcome,
}

/// Aggregate result of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchResult {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }
}

pub struct NotificationDispatcher {
    transport: Arc<dyn SmsTransport>,
    retry_delay_ms: u64,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn SmsTransport>, retry_delay_ms: u64) -> Self {
        Self {
            transport,
            retry_delay_ms,
        }
    }

    /// Fan a message out to every recipient. Completes when all recipients
    /// have reached a terminal outcome. An empty recipient list is a
    /// logged no-op, not an error.
    pub async fn dispatch(
        &self,
        device_id: &str,
        kind: AlertKind,
        message: &str,
        recipients: &[String],
    ) -> DispatchResult {
        if recipients.is_empty() {
            info!(
                "📣 No recipients configured for {} alert on {} — nothing to send",
                kind.as_str(),
                device_id
            );
            return DispatchResult::default();
        }

        info!(
            "📣 Dispatching {} alert for {} to {} recipient(s)",
            kind.as_str(),
            device_id,
            recipients.len()
        );

        let mut tasks = JoinSet::new();
        for recipient in recipients {
            let transport = self.transport.clone();
            let recipient = recipient.clone();
            let message = message.to_string();
            let retry_delay_ms = self.retry_delay_ms;
            tasks.spawn(async move {
                let outcome = send_one(&*transport, &recipient, &message, retry_delay_ms).await;
                RecipientOutcome { recipient, outcome }
            });
        }

        let mut result = DispatchResult::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => result.outcomes.push(outcome),
                // A panicked send task counts as a terminal failure for a
                // recipient we can no longer name; never poison the batch.
                Err(e) => {
                    error!("Dispatch task failed to join: {}", e);
                    result.outcomes.push(RecipientOutcome {
                        recipient: "<unknown>".to_string(),
                        outcome: SendOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        info!(
            "📣 Dispatch complete for {}: {} ok / {} failed",
            device_id,
            result.successes(),
            result.failures()
        );
        result
    }
}

/// One recipient's send, with the single carrier-transient retry.
async fn send_one(
    transport: &dyn SmsTransport,
    recipient: &str,
    message: &str,
    retry_delay_ms: u64,
) -> SendOutcome {
    match transport.send(recipient, message).await {
        Ok(resp) if is_carrier_transient(&resp.body) => {
            warn!(
                "📨 Carrier-transient response for {} — retrying once in {}ms",
                recipient, retry_delay_ms
            );
            tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
            match transport.send(recipient, message).await {
                Ok(retry) if retry.is_success() && !is_carrier_transient(&retry.body) => {
                    info!("📨 Retry succeeded for {}", recipient);
                    SendOutcome::SentAfterRetry
                }
                Ok(retry) => {
                    error!("📨 Retry failed for {}: {} {}", recipient, retry.status, retry.body);
                    SendOutcome::Failed(retry.body)
                }
                Err(e) => {
                    error!("📨 Retry errored for {}: {}", recipient, e);
                    SendOutcome::Failed(e.to_string())
                }
            }
        }
        Ok(resp) if resp.is_success() => SendOutcome::Sent,
        Ok(resp) => {
            error!("📨 Send failed for {}: {} {}", recipient, resp.status, resp.body);
            SendOutcome::Failed(resp.body)
        }
        Err(e) => {
            error!("📨 Send errored for {}: {}", recipient, e);
            SendOutcome::Failed(e.to_string())
        }
    }
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    number: &'a str,
    message: &'a str,
}

/// SMS gateway transport over HTTP. The request timeout doubles as the
/// caller-supplied bound on each send.
pub struct HttpSmsTransport {
    http_client: reqwest::Client,
    gateway_url: String,
}

impl HttpSmsTransport {
    pub fn new(config: &DispatchConfig, timeout_ms: u64) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            http_client,
            gateway_url: config.gateway_url.clone(),
        })
    }
}

#[async_trait]
impl SmsTransport for HttpSmsTransport {
    async fn send(&self, recipient: &str, message: &str) -> Result<SmsResponse, StoreError> {
        let payload = SmsPayload {
            number: recipient,
            message,
        };
        let response = self
            .http_client
            .post(&self.gateway_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        Ok(SmsResponse { status, body })
    }
}
