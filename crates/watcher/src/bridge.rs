//! Client for the local HTTP bridge that owns the chat session.
//!
//! Endpoints:
//! - `GET  /health`                  2xx while the session is connected
//! - `POST /messages {to, text}`     send one text message
//! - `GET  /groups/{id}/members`     `{ "members": [..] }`
//! - `GET  /events?after={seq}`      `{ "events": [{seq, senderId, chatId, fromSelf, text}] }`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sitewatch_core::dispatch::ChatTransport;
use sitewatch_core::{DispatchError, InboundEvent};

pub struct BridgeTransport {
    client: Client,
    base_url: String,
    /// Highest event sequence number already delivered.
    cursor: AtomicU64,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<BridgeEvent>,
}

#[derive(Debug, Deserialize)]
struct BridgeEvent {
    seq: u64,
    #[serde(flatten)]
    event: InboundEvent,
}

impl BridgeTransport {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cursor: AtomicU64::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport_err(e: reqwest::Error) -> DispatchError {
    DispatchError::Transport(e.to_string())
}

/// Keep events past `cursor`, in sequence order, and return the new cursor.
fn advance(cursor: u64, mut events: Vec<BridgeEvent>) -> (u64, Vec<InboundEvent>) {
    events.retain(|e| e.seq > cursor);
    events.sort_by_key(|e| e.seq);
    let next = events.last().map_or(cursor, |e| e.seq);
    (next, events.into_iter().map(|e| e.event).collect())
}

#[async_trait]
impl ChatTransport for BridgeTransport {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        let send_err = |reason: String| DispatchError::Send {
            recipient: recipient.to_string(),
            reason,
        };
        let resp = self
            .client
            .post(self.url("/messages"))
            .json(&OutgoingMessage { to: recipient, text })
            .send()
            .await
            .map_err(|e| send_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(send_err(format!("bridge returned {}", resp.status())));
        }
        Ok(())
    }

    async fn group_members(&self, group: &str) -> Result<Vec<String>, DispatchError> {
        let page = self
            .client
            .get(self.url(&format!("/groups/{group}/members")))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport_err)?
            .json::<MembersPage>()
            .await
            .map_err(transport_err)?;
        Ok(page.members)
    }

    async fn poll_events(&self) -> Result<Vec<InboundEvent>, DispatchError> {
        let after = self.cursor.load(Ordering::Acquire);
        let page = self
            .client
            .get(self.url(&format!("/events?after={after}")))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport_err)?
            .json::<EventsPage>()
            .await
            .map_err(transport_err)?;

        let (next, events) = advance(after, page.events);
        self.cursor.fetch_max(next, Ordering::AcqRel);
        Ok(events)
    }

    async fn is_ready(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "bridge health check failed");
                false
            }
        }
    }
}
