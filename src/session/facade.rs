//! The one object the rest of the client talks to.
//!
//! [`SessionFacade`] owns the transport, presence, message store, router and
//! typing state for a single authenticated session. It is synchronous and
//! is driven by [`crate::network::SessionClient`], which feeds it commands,
//! connector events and timer ticks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use reqwest::Url;
use tokio::time::Instant;

use super::presence::PresenceTracker;
use super::router::ConversationRouter;
use super::store::{DEFAULT_SENT_WINDOW, Ingest, MessageStore, default_dedup_window};
use super::typing::{
    DEFAULT_REMOTE_TYPING_TIMEOUT, DEFAULT_TYPING_IDLE, TypingCoordinator, TypingSignal,
};
use crate::common::{Contact, ConversationKey, IncomingMessage, Message, SessionView, UserId};
use crate::error::{ProtocolError, SessionError};
use crate::network::protocol::{self, InboundFrame, OutboundFrame};
use crate::network::transport::{
    Connector, DEFAULT_RECONNECT_DELAY, SessionTransport, TransportEvent, TransportSignal,
};

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Websocket endpoint without the token, e.g. `ws://host/ws`.
    pub endpoint: Url,
    pub reconnect_delay: Duration,
    pub typing_idle: Duration,
    pub remote_typing_timeout: Duration,
    pub dedup_window: TimeDelta,
    pub sent_window_capacity: usize,
}

impl SessionOptions {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            typing_idle: DEFAULT_TYPING_IDLE,
            remote_typing_timeout: DEFAULT_REMOTE_TYPING_TIMEOUT,
            dedup_window: default_dedup_window(),
            sent_window_capacity: DEFAULT_SENT_WINDOW,
        }
    }
}

pub struct SessionFacade<C> {
    local_user: UserId,
    transport: SessionTransport<C>,
    presence: PresenceTracker,
    store: MessageStore,
    router: ConversationRouter,
    typing: TypingCoordinator,
    /// Live messages that arrived in a conversation other than the selected
    /// one. Never holds the selected key.
    unread: BTreeMap<ConversationKey, usize>,
    connection_error: Option<String>,
    auth_expired: bool,
}

impl<C: Connector> SessionFacade<C> {
    pub fn new(local_user: impl Into<UserId>, connector: C, options: SessionOptions) -> Self {
        let local_user = local_user.into();
        Self {
            transport: SessionTransport::new(connector, options.endpoint, options.reconnect_delay),
            presence: PresenceTracker::new(),
            store: MessageStore::new(
                local_user.clone(),
                options.dedup_window,
                options.sent_window_capacity,
            ),
            router: ConversationRouter::new(local_user.clone()),
            typing: TypingCoordinator::new(options.typing_idle, options.remote_typing_timeout),
            unread: BTreeMap::new(),
            connection_error: None,
            auth_expired: false,
            local_user,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn transport(&self) -> &SessionTransport<C> {
        &self.transport
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn router(&self) -> &ConversationRouter {
        &self.router
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    pub fn auth_expired(&self) -> bool {
        self.auth_expired
    }

    pub fn connect(&mut self, credential: &str) -> Result<(), SessionError> {
        match self.transport.connect(credential) {
            Ok(()) => {
                self.auth_expired = false;
                self.connection_error = None;
                Ok(())
            }
            Err(err) => {
                self.expire_auth(err.to_string());
                Err(err)
            }
        }
    }

    pub fn retry_now(&mut self) -> Result<(), SessionError> {
        self.transport.retry_now().inspect_err(|err| {
            log::warn!("Retry refused: {err}");
            self.auth_expired = true;
        })
    }

    /// Send `content` to the selected conversation. The message is shown
    /// immediately and reconciled when the server echoes it back.
    pub fn send(&mut self, content: &str) -> Result<Message, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if !self.transport.is_open() {
            log::warn!(
                "Send rejected while {}",
                self.transport.state().label().to_lowercase()
            );
            return Err(SessionError::SendRejected);
        }

        let message = self
            .store
            .append_local(content, self.router.recipient(), Utc::now());
        let sent = OutboundFrame::Message {
            content: message.content.clone(),
            recipient: message.recipient.as_wire().to_string(),
            client_id: message.id.clone(),
        }
        .encode()
        .map(|frame| self.transport.send(frame));
        match sent {
            Ok(true) => {}
            Ok(false) => {
                self.store.retract_local(&message.id);
                return Err(SessionError::SendRejected);
            }
            Err(err) => {
                self.store.retract_local(&message.id);
                return Err(err.into());
            }
        }
        log::debug!("Sent {} to {}", message.id, message.recipient.as_wire());

        if let Some(signal) = self.typing.stop() {
            self.send_typing(signal);
        }
        Ok(message)
    }

    /// Returns true when the selection changed.
    pub fn select_conversation(&mut self, peer: Option<UserId>) -> bool {
        if !self.router.select_conversation(peer) {
            return false;
        }
        self.unread.remove(self.router.selected());
        if let Some(signal) = self.typing.stop() {
            self.send_typing(signal);
        }
        true
    }

    pub fn selected(&self) -> &ConversationKey {
        self.router.selected()
    }

    /// The draft input changed. Only direct conversations carry typing
    /// indicators.
    pub fn draft_changed(&mut self, draft_empty: bool, now: Instant) {
        let peer = match self.router.selected().peer() {
            Some(peer) if !draft_empty => peer.to_string(),
            _ => {
                if let Some(signal) = self.typing.stop() {
                    self.send_typing(signal);
                }
                return;
            }
        };
        for signal in self.typing.keystroke(&peer, now) {
            self.send_typing(signal);
        }
    }

    /// Intentional close: cancel the retry, close with 1000, then drop
    /// presence and typing state.
    pub fn disconnect(&mut self, reason: &str) {
        self.transport.close(reason);
        self.presence.clear();
        self.typing.clear();
    }

    /// Disconnect and forget everything tied to the credential.
    pub fn logout(&mut self) {
        self.disconnect("logout");
        self.transport.forget_credential();
        self.store.clear();
        self.unread.clear();
        self.router.select_conversation(None);
        self.connection_error = None;
        log::info!("Logged out {}", self.local_user);
    }

    /// Feed one connector event. Returns true when the view may have
    /// changed.
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) -> bool {
        let Some(signal) = self.transport.handle(event, now) else {
            return false;
        };
        match signal {
            TransportSignal::Opened => {
                self.connection_error = None;
            }
            TransportSignal::Message(text) => self.handle_frame(&text, now),
            TransportSignal::Closed {
                code,
                reason,
                will_retry,
            } => {
                self.typing.clear();
                if will_retry {
                    self.connection_error = Some(if reason.is_empty() {
                        format!("Connection lost (code {code})")
                    } else {
                        format!("Connection lost (code {code}): {reason}")
                    });
                }
            }
            TransportSignal::Error(detail) => {
                self.connection_error = Some(detail);
            }
            TransportSignal::AuthRejected(detail) => {
                self.presence.clear();
                self.typing.clear();
                self.expire_auth(detail);
            }
        }
        true
    }

    /// Fire due timers. Returns true when something changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let retried = self.transport.poll_retry(now);

        let typing_before = self.typing.typing_peers().count();
        let stopped = self.typing.poll(now);
        let expired = self.typing.typing_peers().count() != typing_before;
        if let Some(signal) = &stopped {
            self.send_typing(signal.clone());
        }

        retried || stopped.is_some() || expired
    }

    /// Earliest instant at which [`Self::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let retry = self.transport.pending_retry().map(|retry| retry.due);
        retry.into_iter().chain(self.typing.next_deadline()).min()
    }

    /// Merge fetched history. Returns the number of new entries.
    pub fn backfill(&mut self, history: Vec<IncomingMessage>) -> usize {
        let added = self.store.backfill(history);
        if added > 0 {
            log::debug!("Backfilled {added} messages");
        }
        added
    }

    /// A history fetch failed. A rejected credential ends the session the
    /// same way a refused handshake does.
    pub fn history_failed(&mut self, err: SessionError) {
        match err {
            SessionError::AuthExpired => {
                self.disconnect("credential rejected");
                self.transport.forget_credential();
                self.expire_auth(SessionError::AuthExpired.to_string());
            }
            other => log::warn!("History fetch failed: {other}"),
        }
    }

    /// Unread count for one conversation.
    pub fn unread(&self, key: &ConversationKey) -> usize {
        self.unread.get(key).copied().unwrap_or(0)
    }

    pub fn visible_messages(&self) -> Vec<&Message> {
        self.router.visible_messages(self.store.messages())
    }

    /// Online users other than the local user, plus everyone we have a
    /// direct conversation with.
    pub fn contacts(&self) -> Vec<Contact> {
        let users: BTreeSet<&UserId> = self
            .presence
            .others(&self.local_user)
            .chain(self.store.partners().iter())
            .collect();
        users
            .into_iter()
            .map(|user| Contact {
                user: user.clone(),
                online: self.presence.is_online(user),
                typing: self.typing.is_peer_typing(user),
                unread: self.unread(&ConversationKey::Peer(user.clone())),
            })
            .collect()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            local_user: self.local_user.clone(),
            state: self.transport.state(),
            connection_error: self.connection_error.clone(),
            auth_expired: self.auth_expired,
            selected: self.router.selected().clone(),
            visible: self.visible_messages().into_iter().cloned().collect(),
            contacts: self.contacts(),
            group_unread: self.unread(&ConversationKey::Group),
        }
    }

    fn handle_frame(&mut self, text: &str, now: Instant) {
        let frame = match protocol::decode(text) {
            Ok(frame) => frame,
            Err(ProtocolError::UnknownType(kind)) => {
                log::debug!("Ignoring frame of unknown type `{kind}`");
                return;
            }
            Err(err) => {
                log::warn!("Dropping frame: {err}");
                return;
            }
        };

        match frame {
            InboundFrame::Message(frame) => {
                let incoming = frame.into_incoming();
                self.typing.remote_message(&incoming.sender);
                match self.store.ingest_remote(incoming) {
                    Ingest::Appended(index) => self.note_unread(index),
                    Ingest::Confirmed(index) => {
                        log::debug!("Message {} confirmed", self.store.messages()[index].id);
                    }
                    Ingest::Duplicate(_) => {}
                }
            }
            InboundFrame::Users { users } => {
                self.presence.apply_snapshot(users.unwrap_or_default());
            }
            InboundFrame::UserJoined { username } => {
                log::info!("{username} joined");
                self.presence.apply_joined(username);
            }
            InboundFrame::UserLeft { username } => {
                log::info!("{username} left");
                self.typing.remote_update(&username, false, now);
                self.presence.apply_left(&username);
            }
            InboundFrame::Typing { content } => {
                if content.sender != self.local_user {
                    self.typing
                        .remote_update(&content.sender, content.is_typing, now);
                }
            }
            InboundFrame::Status { content } => {
                if content.is_online {
                    self.presence.apply_joined(content.user_id);
                } else {
                    self.typing.remote_update(&content.user_id, false, now);
                    self.presence.apply_left(&content.user_id);
                }
            }
            InboundFrame::Error { message } => {
                log::warn!("Server error: {message}");
                self.connection_error = Some(message);
            }
        }
    }

    fn note_unread(&mut self, index: usize) {
        let message = &self.store.messages()[index];
        if message.sender == self.local_user {
            return;
        }
        let Some(key) = message.conversation(&self.local_user) else {
            return;
        };
        if &key != self.router.selected() {
            *self.unread.entry(key).or_default() += 1;
        }
    }

    fn send_typing(&mut self, signal: TypingSignal) {
        let frame = match OutboundFrame::typing(&signal.peer, signal.is_typing).encode() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Failed to encode typing frame: {err}");
                return;
            }
        };
        if !self.transport.send(frame) {
            log::debug!("Typing frame for {} not sent: not connected", signal.peer);
        }
    }

    fn expire_auth(&mut self, detail: String) {
        log::warn!("Session credential expired: {detail}");
        self.auth_expired = true;
        self.connection_error = Some(detail);
    }
}
