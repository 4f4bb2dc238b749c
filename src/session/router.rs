use crate::common::{ConversationKey, Message, Recipient, UserId};

/// Tracks which conversation is selected and filters the log for it.
#[derive(Debug, Clone)]
pub struct ConversationRouter {
    local_user: UserId,
    selected: ConversationKey,
}

impl ConversationRouter {
    pub fn new(local_user: impl Into<UserId>) -> Self {
        Self {
            local_user: local_user.into(),
            selected: ConversationKey::Group,
        }
    }

    pub fn selected(&self) -> &ConversationKey {
        &self.selected
    }

    /// `None` selects the group chat. Selecting yourself is ignored.
    /// Returns true when the selection changed.
    pub fn select_conversation(&mut self, peer: Option<UserId>) -> bool {
        let key = match peer {
            Some(peer) if peer.is_empty() => ConversationKey::Group,
            Some(peer) if peer == self.local_user => {
                log::debug!("Ignoring selection of the local user");
                return false;
            }
            other => ConversationKey::from_peer(other),
        };
        if key == self.selected {
            return false;
        }
        self.selected = key;
        true
    }

    /// Recipient for a message sent to the selected conversation.
    pub fn recipient(&self) -> Recipient {
        self.selected.recipient()
    }

    pub fn is_visible(&self, message: &Message) -> bool {
        is_visible_in(&self.selected, &self.local_user, message)
    }

    /// Messages of the selected conversation, in log order. Recomputed on
    /// every call.
    pub fn visible_messages<'a>(&self, log: &'a [Message]) -> Vec<&'a Message> {
        log.iter().filter(|message| self.is_visible(message)).collect()
    }
}

pub fn is_visible_in(key: &ConversationKey, local_user: &str, message: &Message) -> bool {
    match key {
        ConversationKey::Group => message.is_group(),
        ConversationKey::Peer(peer) => message.is_between(local_user, peer),
    }
}
