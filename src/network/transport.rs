//! Connection lifecycle for one chat session.
//!
//! [`SessionTransport`] is a synchronous state machine: it never sleeps or
//! spawns anything itself. A [`Connector`] performs the actual I/O and
//! reports back through [`TransportEvent`]s tagged with the epoch of the
//! attempt that produced them. Every new attempt (and every intentional
//! close) bumps the epoch, so events and retry timers belonging to a
//! superseded attempt are recognised and dropped.

use std::time::Duration;

use reqwest::Url;
use tokio::time::Instant;

use crate::error::SessionError;

/// Close code for an intentional close. Anything else is reconnect-eligible.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code reported when the link died without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub type Epoch = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Open => "Connected",
            Self::Closed => "Disconnected",
            Self::Reconnecting => "Reconnecting",
        }
    }
}

/// Raw event reported by a connector for one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Frame(String),
    Closed { code: u16, reason: String },
    Error(String),
    /// The server refused the credential during the handshake.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub epoch: Epoch,
    pub event: LinkEvent,
}

impl TransportEvent {
    pub fn new(epoch: Epoch, event: LinkEvent) -> Self {
        Self { epoch, event }
    }
}

/// The I/O side of the transport.
///
/// `open` must drop whatever link a previous call created before starting a
/// new one; events for the new link carry `epoch`.
pub trait Connector {
    fn open(&mut self, url: &Url, epoch: Epoch);
    fn send(&mut self, text: String) -> bool;
    fn close(&mut self, code: u16, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub epoch: Epoch,
    pub due: Instant,
}

/// What the transport tells its owner after an event passed the epoch check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Opened,
    Message(String),
    Closed {
        code: u16,
        reason: String,
        will_retry: bool,
    },
    Error(String),
    AuthRejected(String),
}

pub struct SessionTransport<C> {
    connector: C,
    endpoint: Url,
    reconnect_delay: Duration,
    state: ConnectionState,
    epoch: Epoch,
    credential: Option<String>,
    retry: Option<ScheduledRetry>,
    retries_scheduled: u64,
}

impl<C: Connector> SessionTransport<C> {
    pub fn new(connector: C, endpoint: Url, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            endpoint,
            reconnect_delay,
            state: ConnectionState::Idle,
            epoch: 0,
            credential: None,
            retry: None,
            retries_scheduled: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn pending_retry(&self) -> Option<ScheduledRetry> {
        self.retry
    }

    /// Total number of reconnects ever scheduled by this transport.
    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The URL a connection attempt with the current credential would use.
    pub fn connection_url(&self) -> Option<Url> {
        let credential = self.credential.as_deref()?;
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", credential);
        Some(url)
    }

    pub fn connect(&mut self, credential: impl Into<String>) -> Result<(), SessionError> {
        let credential = credential.into();
        if credential.trim().is_empty() {
            self.credential = None;
            return Err(SessionError::AuthExpired);
        }
        self.credential = Some(credential);
        self.start_attempt();
        Ok(())
    }

    /// Manual retry: start a new attempt now, skipping any scheduled delay.
    pub fn retry_now(&mut self) -> Result<(), SessionError> {
        if self.credential.is_none() {
            return Err(SessionError::AuthExpired);
        }
        if self.state == ConnectionState::Open {
            return Ok(());
        }
        log::info!("Manual reconnect requested");
        self.start_attempt();
        Ok(())
    }

    pub fn send(&mut self, text: String) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        self.connector.send(text)
    }

    /// Intentional close. Cancels the pending retry first, then closes the
    /// link with [`NORMAL_CLOSE`]; never schedules a reconnect.
    pub fn close(&mut self, reason: &str) {
        self.retry = None;
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        ) {
            self.connector.close(NORMAL_CLOSE, reason);
        }
        self.epoch += 1;
        self.state = ConnectionState::Closed;
    }

    /// Forget the credential so nothing reconnects until `connect` is
    /// called again.
    pub fn forget_credential(&mut self) {
        self.credential = None;
        self.retry = None;
    }

    pub fn handle(&mut self, event: TransportEvent, now: Instant) -> Option<TransportSignal> {
        if event.epoch != self.epoch {
            log::debug!(
                "Dropping event from stale epoch {} (current {}): {:?}",
                event.epoch,
                self.epoch,
                event.event
            );
            return None;
        }

        match event.event {
            LinkEvent::Opened => {
                self.state = ConnectionState::Open;
                self.retry = None;
                log::info!("Connection open (epoch {})", self.epoch);
                Some(TransportSignal::Opened)
            }
            LinkEvent::Frame(text) => Some(TransportSignal::Message(text)),
            LinkEvent::Error(detail) => {
                log::warn!("Transport error: {detail}");
                Some(TransportSignal::Error(detail))
            }
            LinkEvent::Rejected(detail) => {
                log::warn!("Server rejected the credential: {detail}");
                self.state = ConnectionState::Closed;
                self.forget_credential();
                Some(TransportSignal::AuthRejected(detail))
            }
            LinkEvent::Closed { code, reason } => {
                let will_retry = code != NORMAL_CLOSE && self.credential.is_some();
                log::info!("Connection closed, code {code} ({reason}); reconnect: {will_retry}");
                if will_retry {
                    self.state = ConnectionState::Reconnecting;
                    self.schedule_retry(now);
                } else {
                    self.state = ConnectionState::Closed;
                    self.retry = None;
                }
                Some(TransportSignal::Closed {
                    code,
                    reason,
                    will_retry,
                })
            }
        }
    }

    /// Fire the retry scheduled for `epoch`. Returns true when a new
    /// connection attempt was started.
    pub fn fire_retry(&mut self, epoch: Epoch) -> bool {
        let current = matches!(self.retry, Some(retry) if retry.epoch == epoch);
        if !current
            || epoch != self.epoch
            || self.state != ConnectionState::Reconnecting
            || self.credential.is_none()
        {
            log::debug!("Ignoring stale reconnect timer for epoch {epoch}");
            return false;
        }
        log::info!("Reconnecting (epoch {epoch} superseded)");
        self.start_attempt();
        true
    }

    /// Fire the pending retry if its deadline has passed.
    pub fn poll_retry(&mut self, now: Instant) -> bool {
        match self.retry {
            Some(retry) if retry.due <= now => self.fire_retry(retry.epoch),
            _ => false,
        }
    }

    fn schedule_retry(&mut self, now: Instant) {
        if self.retry.is_some() {
            return;
        }
        self.retry = Some(ScheduledRetry {
            epoch: self.epoch,
            due: now + self.reconnect_delay,
        });
        self.retries_scheduled += 1;
        log::info!(
            "Reconnect scheduled in {:?} (epoch {})",
            self.reconnect_delay,
            self.epoch
        );
    }

    fn start_attempt(&mut self) {
        let Some(url) = self.connection_url() else {
            return;
        };
        self.retry = None;
        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        log::info!("Connecting to {} (epoch {})", self.endpoint, self.epoch);
        self.connector.open(&url, self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingConnector, endpoint};

    fn transport() -> SessionTransport<RecordingConnector> {
        SessionTransport::new(RecordingConnector::default(), endpoint(), DEFAULT_RECONNECT_DELAY)
    }

    fn closed(epoch: Epoch, code: u16) -> TransportEvent {
        TransportEvent::new(
            epoch,
            LinkEvent::Closed {
                code,
                reason: "bye".to_string(),
            },
        )
    }

    #[test]
    fn connect_carries_token_in_query() {
        let mut transport = transport();
        transport.connect("tok.en-1").unwrap();

        assert_eq!(transport.state(), ConnectionState::Connecting);
        assert_eq!(transport.epoch(), 1);
        let (url, epoch) = &transport.connector().opened[0];
        assert_eq!(url.as_str(), "ws://chat.test/ws?token=tok.en-1");
        assert_eq!(*epoch, 1);
    }

    #[test]
    fn empty_credential_is_auth_expired_without_connecting() {
        let mut transport = transport();
        assert!(matches!(transport.connect("  "), Err(SessionError::AuthExpired)));
        assert!(transport.connector().opened.is_empty());
        assert_eq!(transport.state(), ConnectionState::Idle);
    }

    #[test]
    fn send_is_refused_until_open() {
        let mut transport = transport();
        assert!(!transport.send("x".to_string()));
        transport.connect("t").unwrap();
        assert!(!transport.send("x".to_string()));

        let now = Instant::now();
        transport.handle(TransportEvent::new(1, LinkEvent::Opened), now);
        assert!(transport.send("x".to_string()));
        assert_eq!(transport.connector().sent, vec!["x".to_string()]);
    }

    #[test]
    fn normal_close_schedules_no_retry() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(TransportEvent::new(1, LinkEvent::Opened), now);

        let signal = transport.handle(closed(1, NORMAL_CLOSE), now);
        assert!(matches!(
            signal,
            Some(TransportSignal::Closed {
                will_retry: false,
                ..
            })
        ));
        assert_eq!(transport.state(), ConnectionState::Closed);
        assert_eq!(transport.pending_retry(), None);
        assert_eq!(transport.retries_scheduled(), 0);
    }

    #[test]
    fn abnormal_close_schedules_exactly_one_retry() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(TransportEvent::new(1, LinkEvent::Opened), now);

        transport.handle(closed(1, ABNORMAL_CLOSE), now);
        // A second close report for the same link must not stack a timer.
        transport.handle(closed(1, 1001), now);

        assert_eq!(transport.state(), ConnectionState::Reconnecting);
        assert_eq!(transport.retries_scheduled(), 1);
        let retry = transport.pending_retry().unwrap();
        assert_eq!(retry.epoch, 1);
        assert_eq!(retry.due, now + DEFAULT_RECONNECT_DELAY);
    }

    #[test]
    fn retry_waits_for_its_deadline() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(closed(1, ABNORMAL_CLOSE), now);

        assert!(!transport.poll_retry(now + Duration::from_secs(1)));
        assert_eq!(transport.connector().opened.len(), 1);

        assert!(transport.poll_retry(now + DEFAULT_RECONNECT_DELAY));
        assert_eq!(transport.connector().opened.len(), 2);
        assert_eq!(transport.epoch(), 2);
        assert_eq!(transport.state(), ConnectionState::Connecting);
        assert_eq!(transport.pending_retry(), None);
    }

    #[test]
    fn stale_retry_does_not_open_a_second_connection() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(closed(1, ABNORMAL_CLOSE), now);
        let stale = transport.pending_retry().unwrap();

        // A fresh connect supersedes the scheduled retry.
        transport.connect("t").unwrap();
        assert_eq!(transport.connector().opened.len(), 2);

        assert!(!transport.fire_retry(stale.epoch));
        assert!(!transport.poll_retry(stale.due + Duration::from_secs(10)));
        assert_eq!(transport.connector().opened.len(), 2);
        assert_eq!(transport.epoch(), 2);
    }

    #[test]
    fn events_from_superseded_link_are_ignored() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.connect("t").unwrap();

        assert_eq!(transport.handle(TransportEvent::new(1, LinkEvent::Opened), now), None);
        assert_eq!(transport.handle(closed(1, ABNORMAL_CLOSE), now), None);
        assert_eq!(transport.state(), ConnectionState::Connecting);
        assert_eq!(transport.pending_retry(), None);
    }

    #[test]
    fn intentional_close_cancels_pending_retry() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(closed(1, ABNORMAL_CLOSE), now);
        let pending = transport.pending_retry().unwrap();

        transport.close("logout");

        assert_eq!(transport.pending_retry(), None);
        assert_eq!(transport.state(), ConnectionState::Closed);
        assert_eq!(
            transport.connector().closed,
            vec![(NORMAL_CLOSE, "logout".to_string())]
        );
        assert!(!transport.fire_retry(pending.epoch));
        // The close report of the old link arrives after the epoch moved on.
        assert_eq!(transport.handle(closed(1, NORMAL_CLOSE), now), None);
    }

    #[test]
    fn transport_error_does_not_change_state() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(TransportEvent::new(1, LinkEvent::Opened), now);

        let signal = transport.handle(
            TransportEvent::new(1, LinkEvent::Error("reset".to_string())),
            now,
        );
        assert_eq!(signal, Some(TransportSignal::Error("reset".to_string())));
        assert_eq!(transport.state(), ConnectionState::Open);
    }

    #[test]
    fn rejected_handshake_never_retries() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("expired").unwrap();
        let signal = transport.handle(
            TransportEvent::new(1, LinkEvent::Rejected("401".to_string())),
            now,
        );
        assert_eq!(signal, Some(TransportSignal::AuthRejected("401".to_string())));

        transport.handle(closed(1, ABNORMAL_CLOSE), now);
        assert_eq!(transport.pending_retry(), None);
        assert!(!transport.has_credential());
        assert!(matches!(transport.retry_now(), Err(SessionError::AuthExpired)));
    }

    #[test]
    fn retry_now_bypasses_the_delay() {
        let mut transport = transport();
        let now = Instant::now();
        transport.connect("t").unwrap();
        transport.handle(closed(1, ABNORMAL_CLOSE), now);

        transport.retry_now().unwrap();
        assert_eq!(transport.connector().opened.len(), 2);
        assert_eq!(transport.pending_retry(), None);
        assert_eq!(transport.state(), ConnectionState::Connecting);
    }
}
