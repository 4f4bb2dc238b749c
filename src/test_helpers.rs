//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Url;

use crate::common::{ClientId, IncomingMessage, Recipient};
use crate::network::{Connector, Epoch};

/// Connector that performs no I/O and records every call.
#[derive(Debug, Default)]
pub struct RecordingConnector {
    pub opened: Vec<(Url, Epoch)>,
    pub sent: Vec<String>,
    pub closed: Vec<(u16, String)>,
    /// Make `send` report a dead link.
    pub refuse_sends: bool,
}

impl RecordingConnector {
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

impl Connector for RecordingConnector {
    fn open(&mut self, url: &Url, epoch: Epoch) {
        self.opened.push((url.clone(), epoch));
    }

    fn send(&mut self, text: String) -> bool {
        if self.refuse_sends {
            return false;
        }
        self.sent.push(text);
        true
    }

    fn close(&mut self, code: u16, reason: &str) {
        self.closed.push((code, reason.to_string()));
    }
}

pub fn endpoint() -> Url {
    Url::parse("ws://chat.test/ws").unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

pub fn incoming(sender: &str, recipient: &str, content: &str, sent_at: DateTime<Utc>) -> IncomingMessage {
    IncomingMessage {
        client_id: None,
        server_id: None,
        sender: sender.to_string(),
        recipient: Recipient::parse(Some(recipient)),
        content: content.to_string(),
        sent_at,
    }
}

pub fn echo(
    client_id: &ClientId,
    sender: &str,
    recipient: &str,
    content: &str,
    sent_at: DateTime<Utc>,
) -> IncomingMessage {
    IncomingMessage {
        client_id: Some(client_id.clone()),
        ..incoming(sender, recipient, content, sent_at)
    }
}
