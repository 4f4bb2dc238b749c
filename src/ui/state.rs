use crate::common::{ConversationKey, SessionEvent, SessionView};

/// UI-local state. The session itself is only ever seen through the last
/// published [`SessionView`].
#[derive(Default)]
pub struct AppState {
    pub view: Option<SessionView>,
    pub input_text: String,
    pub notice: Option<String>,
    pub terminated: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Updated(view) => {
                if view.is_connected() {
                    self.notice = None;
                }
                self.view = Some(view);
            }
            SessionEvent::SendRejected { content, reason } => {
                // Keep the draft so nothing typed is lost.
                if self.input_text.is_empty() {
                    self.input_text = content;
                }
                self.notice = Some(format!("Message not sent: {reason}"));
            }
            SessionEvent::LoggedOut => {
                self.input_text.clear();
                self.notice = Some("Logged out".to_string());
            }
            SessionEvent::Terminated => {
                self.terminated = true;
            }
        }
    }

    pub fn title(&self) -> String {
        self.view
            .as_ref()
            .map(|view| view.selected.to_string())
            .unwrap_or_else(|| ConversationKey::Group.to_string())
    }

    pub fn can_send(&self) -> bool {
        !self.terminated && self.view.as_ref().is_some_and(SessionView::is_connected)
    }
}
