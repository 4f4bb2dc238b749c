//! Append-ordered message log with optimistic-echo reconciliation.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};

use crate::common::{ClientId, IncomingMessage, Message, Origin, Recipient, UserId};

pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 5_000;
pub const DEFAULT_SENT_WINDOW: usize = 100;

/// Bounded FIFO of recently sent ids, used to short-circuit echo matching.
/// Holding nothing (capacity 0) is valid; dedup does not depend on it.
#[derive(Debug, Clone)]
pub struct SentMessageWindow {
    capacity: usize,
    order: VecDeque<ClientId>,
    members: HashSet<ClientId>,
}

impl SentMessageWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, id: ClientId) {
        if self.capacity == 0 || !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Outcome of feeding one remote message into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// New entry at this index.
    Appended(usize),
    /// Matched a local echo at this index, which is now confirmed.
    Confirmed(usize),
    /// Matched an entry that was already confirmed.
    Duplicate(usize),
}

/// Clock-skew tolerance for matching an echo by sender and content.
pub fn default_dedup_window() -> TimeDelta {
    TimeDelta::milliseconds(DEFAULT_DEDUP_WINDOW_MS)
}

pub struct MessageStore {
    local_user: UserId,
    log: Vec<Message>,
    by_id: HashMap<ClientId, usize>,
    partners: BTreeSet<UserId>,
    sent: SentMessageWindow,
    dedup_window: TimeDelta,
}

impl MessageStore {
    pub fn new(local_user: impl Into<UserId>, dedup_window: TimeDelta, sent_capacity: usize) -> Self {
        Self {
            local_user: local_user.into(),
            log: Vec::new(),
            by_id: HashMap::new(),
            partners: BTreeSet::new(),
            sent: SentMessageWindow::new(sent_capacity),
            dedup_window,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn get(&self, id: &ClientId) -> Option<&Message> {
        self.by_id.get(id).map(|&index| &self.log[index])
    }

    pub fn sent_window(&self) -> &SentMessageWindow {
        &self.sent
    }

    /// Conversation partners, maintained as messages arrive.
    pub fn partners(&self) -> &BTreeSet<UserId> {
        &self.partners
    }

    /// Create and append an optimistic local message.
    pub fn append_local(
        &mut self,
        content: impl Into<String>,
        recipient: Recipient,
        sent_at: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id: ClientId::generate(),
            server_id: None,
            sender: self.local_user.clone(),
            recipient,
            content: content.into(),
            sent_at,
            origin: Origin::Local,
        };
        self.record_local(message)
    }

    /// Append a pre-built local message. If its echo already arrived (same
    /// id), the existing entry is returned and nothing is appended.
    pub fn record_local(&mut self, message: Message) -> Message {
        self.sent.insert(message.id.clone());
        if let Some(&index) = self.by_id.get(&message.id) {
            return self.log[index].clone();
        }
        let message = Message {
            origin: Origin::Local,
            ..message
        };
        self.push(message.clone());
        message
    }

    /// Take back the newest entry if it is the unconfirmed local message
    /// `id`, e.g. when the frame could not be handed to the transport.
    pub fn retract_local(&mut self, id: &ClientId) -> bool {
        match self.log.last() {
            Some(last) if &last.id == id && last.origin == Origin::Local => {}
            _ => return false,
        }
        if let Some(message) = self.log.pop() {
            self.by_id.remove(&message.id);
        }
        self.partners = derive_partners(&self.log, &self.local_user);
        true
    }

    pub fn ingest_remote(&mut self, incoming: IncomingMessage) -> Ingest {
        if let Some(index) = self.find_duplicate(&incoming) {
            let entry = &mut self.log[index];
            if entry.server_id.is_none() {
                entry.server_id = incoming.server_id;
            }
            return if entry.origin == Origin::Local {
                entry.origin = Origin::Remote;
                log::debug!("Confirmed local message {}", entry.id);
                Ingest::Confirmed(index)
            } else {
                Ingest::Duplicate(index)
            };
        }

        let id = match incoming.client_id {
            Some(id) if !self.by_id.contains_key(&id) => id,
            _ => ClientId::generate(),
        };
        let index = self.log.len();
        self.push(Message {
            id,
            server_id: incoming.server_id,
            sender: incoming.sender,
            recipient: incoming.recipient,
            content: incoming.content,
            sent_at: incoming.sent_at,
            origin: Origin::Remote,
        });
        Ingest::Appended(index)
    }

    /// Feed fetched history through the same dedup path as live traffic.
    pub fn backfill<I>(&mut self, history: I) -> usize
    where
        I: IntoIterator<Item = IncomingMessage>,
    {
        history
            .into_iter()
            .map(|incoming| self.ingest_remote(incoming))
            .filter(|outcome| matches!(outcome, Ingest::Appended(_)))
            .count()
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.by_id.clear();
        self.partners.clear();
        self.sent = SentMessageWindow::new(self.sent.capacity);
    }

    fn find_duplicate(&self, incoming: &IncomingMessage) -> Option<usize> {
        if let Some(id) = &incoming.client_id {
            if let Some(&index) = self.by_id.get(id) {
                if incoming.sender == self.local_user && self.sent.contains(id) {
                    log::debug!("Echo of recent send {id}");
                }
                return Some(index);
            }
        }

        if let Some(server_id) = &incoming.server_id {
            if let Some(index) = self
                .log
                .iter()
                .position(|entry| entry.server_id.as_ref() == Some(server_id))
            {
                return Some(index);
            }
        }

        let window = self.dedup_window;
        let matches = |entry: &Message| {
            entry.sender == incoming.sender
                && entry.content == incoming.content
                && (entry.sent_at - incoming.sent_at).abs() < window
        };
        // Unconfirmed echoes first, so repeated identical sends each find
        // their own local copy.
        self.log
            .iter()
            .position(|entry| entry.origin == Origin::Local && matches(entry))
            .or_else(|| self.log.iter().position(matches))
    }

    fn push(&mut self, message: Message) {
        note_partners(&mut self.partners, &self.local_user, &message);
        self.by_id.insert(message.id.clone(), self.log.len());
        self.log.push(message);
    }
}

fn note_partners(partners: &mut BTreeSet<UserId>, local_user: &str, message: &Message) {
    let Some(to) = message.recipient.user() else {
        return;
    };
    for user in [message.sender.as_str(), to] {
        if user != local_user && !user.is_empty() {
            partners.insert(user.to_string());
        }
    }
}

/// Full recompute of the conversation partners from a log.
pub fn derive_partners(log: &[Message], local_user: &str) -> BTreeSet<UserId> {
    let mut partners = BTreeSet::new();
    for message in log {
        note_partners(&mut partners, local_user, message);
    }
    partners
}
