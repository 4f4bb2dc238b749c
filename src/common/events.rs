use super::types::{ConversationKey, Message, UserId};
use crate::network::ConnectionState;

/// Events the session loop sends up to the UI.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Fresh read-only view of the session after any state change.
    Updated(SessionView),
    /// A send could not go out; the draft should be kept.
    SendRejected { content: String, reason: String },
    /// The user logged out; any stored credential should be dropped.
    LoggedOut,
    /// The loop has stopped; no more events follow.
    Terminated,
}

impl SessionEvent {
    /// True when the credential behind this session is no longer usable
    /// and must not be reused on the next start.
    pub fn invalidates_credential(&self) -> bool {
        match self {
            Self::Updated(view) => view.auth_expired,
            Self::LoggedOut => true,
            Self::SendRejected { .. } | Self::Terminated => false,
        }
    }
}

/// One row of the sidebar: an online user or a known conversation partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub user: UserId,
    pub online: bool,
    pub typing: bool,
    /// Messages received from this peer since the conversation was last
    /// open.
    pub unread: usize,
}

/// Immutable snapshot of everything the UI renders.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub local_user: UserId,
    pub state: ConnectionState,
    pub connection_error: Option<String>,
    pub auth_expired: bool,
    pub selected: ConversationKey,
    pub visible: Vec<Message>,
    pub contacts: Vec<Contact>,
    /// Unread group messages while a direct conversation is open.
    pub group_unread: usize,
}

impl SessionView {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn selected_contact(&self) -> Option<&Contact> {
        let peer = self.selected.peer()?;
        self.contacts.iter().find(|contact| contact.user == peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(auth_expired: bool) -> SessionView {
        SessionView {
            local_user: "alice".to_string(),
            state: ConnectionState::Closed,
            connection_error: None,
            auth_expired,
            selected: ConversationKey::Group,
            visible: Vec::new(),
            contacts: Vec::new(),
            group_unread: 0,
        }
    }

    #[test]
    fn expired_view_and_logout_invalidate_the_credential() {
        assert!(SessionEvent::Updated(view(true)).invalidates_credential());
        assert!(SessionEvent::LoggedOut.invalidates_credential());

        assert!(!SessionEvent::Updated(view(false)).invalidates_credential());
        assert!(!SessionEvent::Terminated.invalidates_credential());
    }
}
