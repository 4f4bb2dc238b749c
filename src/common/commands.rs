use super::types::UserId;

/// Commands the UI sends down to the session loop.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Send a message to the currently selected conversation.
    Send(String),
    /// `None` selects the group chat.
    SelectConversation(Option<UserId>),
    /// The draft changed; `draft_empty` is true once the input was cleared.
    DraftChanged { draft_empty: bool },
    /// Manual reconnect that skips the backoff delay.
    Retry,
    /// Close the connection intentionally and stop the loop.
    Disconnect,
    /// Disconnect and forget the credential.
    Logout,
}
