use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::api::{AuthCollaborator, HistoryCollaborator};
use crate::common::{IncomingMessage, SessionCommand, SessionEvent, UserId};
use crate::error::{ApiError, SessionError};
use crate::session::{SessionFacade, SessionOptions};

use super::transport::{Connector, TransportEvent};
use super::websocket::WsConnector;

/// How long shutdown waits for the link to report its close.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type HistoryResult = Result<Vec<IncomingMessage>, ApiError>;

/// Runs one session: owns the [`SessionFacade`] and serialises commands,
/// connector events and timers onto a single loop.
pub struct SessionClient<C> {
    facade: SessionFacade<C>,
    credential: String,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    event_sender: mpsc::Sender<SessionEvent>,
    command_receiver: mpsc::Receiver<SessionCommand>,
    history: Option<Arc<dyn HistoryCollaborator>>,
    history_sender: mpsc::UnboundedSender<HistoryResult>,
    history_receiver: mpsc::UnboundedReceiver<HistoryResult>,
}

impl SessionClient<WsConnector> {
    /// Client backed by the tokio-tungstenite connector. A missing token
    /// surfaces as an expired session once the loop runs.
    pub fn websocket(
        auth: &impl AuthCollaborator,
        options: SessionOptions,
        event_sender: mpsc::Sender<SessionEvent>,
        command_receiver: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let local_user = auth.current_user().unwrap_or_default();
        let credential = auth.token().unwrap_or_default();
        let facade = SessionFacade::new(local_user, WsConnector::new(transport_tx), options);
        Self::new(facade, credential, transport_rx, event_sender, command_receiver)
    }
}

impl<C: Connector> SessionClient<C> {
    pub fn new(
        facade: SessionFacade<C>,
        credential: impl Into<String>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        event_sender: mpsc::Sender<SessionEvent>,
        command_receiver: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (history_sender, history_receiver) = mpsc::unbounded_channel();
        Self {
            facade,
            credential: credential.into(),
            transport_events,
            event_sender,
            command_receiver,
            history: None,
            history_sender,
            history_receiver,
        }
    }

    /// Fetch history whenever a conversation is opened.
    pub fn with_history(mut self, history: Arc<dyn HistoryCollaborator>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn run(mut self) {
        if let Err(err) = self.facade.connect(&self.credential) {
            log::error!("Cannot connect: {err}");
        }
        self.request_history();
        self.publish().await;
        log::info!("Session loop started for {}", self.facade.local_user());

        loop {
            let deadline = self.facade.next_deadline();
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(event) = self.transport_events.recv() => {
                    if self.facade.handle_transport_event(event, Instant::now()) {
                        self.publish().await;
                    }
                }
                Some(result) = self.history_receiver.recv() => {
                    self.handle_history(result).await;
                }
                () = wait_until(deadline) => {
                    if self.facade.tick(Instant::now()) {
                        self.publish().await;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Returns false when the loop should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Send(content) => {
                if let Err(err) = self.facade.send(&content) {
                    log::warn!("Send failed: {err}");
                    self.emit(SessionEvent::SendRejected {
                        content,
                        reason: err.to_string(),
                    })
                    .await;
                }
            }
            SessionCommand::SelectConversation(peer) => {
                if self.facade.select_conversation(peer) {
                    self.request_history();
                }
            }
            SessionCommand::DraftChanged { draft_empty } => {
                self.facade.draft_changed(draft_empty, Instant::now());
                return true;
            }
            SessionCommand::Retry => {
                if let Err(err) = self.facade.retry_now() {
                    log::warn!("Retry failed: {err}");
                }
            }
            SessionCommand::Disconnect => return false,
            SessionCommand::Logout => {
                self.facade.logout();
                self.emit(SessionEvent::LoggedOut).await;
                return false;
            }
        }
        self.publish().await;
        true
    }

    async fn handle_history(&mut self, result: HistoryResult) {
        match result {
            Ok(history) => {
                if self.facade.backfill(history) > 0 {
                    self.publish().await;
                }
            }
            Err(err) => {
                let err = SessionError::from(err);
                let expired = matches!(err, SessionError::AuthExpired);
                self.facade.history_failed(err);
                if expired {
                    self.publish().await;
                }
            }
        }
    }

    fn request_history(&self) {
        let Some(history) = &self.history else {
            return;
        };
        if !self.facade.transport().has_credential() {
            return;
        }
        let fetch = history.fetch_messages(self.facade.selected());
        let results = self.history_sender.clone();
        tokio::spawn(async move {
            let _ = results.send(fetch.await);
        });
    }

    async fn shutdown(&mut self) {
        let was_active = self.facade.transport().has_credential();
        self.facade.disconnect("client shutdown");
        if was_active {
            // Give the link task a moment to flush the close frame.
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, self.transport_events.recv()).await;
        }
        self.publish().await;
        self.emit(SessionEvent::Terminated).await;
        log::info!("Session loop stopped");
    }

    async fn publish(&self) {
        self.emit(SessionEvent::Updated(self.facade.view())).await;
    }

    async fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::debug!("No listener for session event: {err}");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable command side of a running [`SessionClient`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { commands }
    }

    /// Queue a command without blocking. Returns false when the queue is
    /// full or the session loop has stopped.
    pub fn command(&self, command: SessionCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to queue session command: {err}");
                false
            }
        }
    }

    pub fn send_message(&self, content: impl Into<String>) -> bool {
        self.command(SessionCommand::Send(content.into()))
    }

    pub fn select_conversation(&self, peer: Option<UserId>) -> bool {
        self.command(SessionCommand::SelectConversation(peer))
    }

    pub fn draft_changed(&self, draft_empty: bool) -> bool {
        self.command(SessionCommand::DraftChanged { draft_empty })
    }

    pub fn retry(&self) -> bool {
        self.command(SessionCommand::Retry)
    }

    pub fn disconnect(&self) -> bool {
        self.command(SessionCommand::Disconnect)
    }

    pub fn logout(&self) -> bool {
        self.command(SessionCommand::Logout)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ConversationKey, Origin, SessionView};
    use crate::network::transport::{ConnectionState, LinkEvent};
    use crate::test_helpers::{RecordingConnector, at, endpoint, incoming};
    use futures::future::BoxFuture;

    struct Harness {
        handle: SessionHandle,
        events: mpsc::Receiver<SessionEvent>,
        transport: mpsc::UnboundedSender<TransportEvent>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn(history: Option<Arc<dyn HistoryCollaborator>>) -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let facade = SessionFacade::new(
            "alice",
            RecordingConnector::default(),
            SessionOptions::new(endpoint()),
        );
        let mut client = SessionClient::new(facade, "token-1", transport_rx, event_tx, cmd_rx);
        if let Some(history) = history {
            client = client.with_history(history);
        }
        Harness {
            handle: SessionHandle::new(cmd_tx),
            events: event_rx,
            transport: transport_tx,
            task: tokio::spawn(client.run()),
        }
    }

    async fn next_view(events: &mut mpsc::Receiver<SessionEvent>) -> SessionView {
        loop {
            match events.recv().await {
                Some(SessionEvent::Updated(view)) => return view,
                Some(_) => continue,
                None => panic!("session loop ended"),
            }
        }
    }

    async fn view_where(
        events: &mut mpsc::Receiver<SessionEvent>,
        predicate: impl Fn(&SessionView) -> bool,
    ) -> SessionView {
        loop {
            let view = next_view(events).await;
            if predicate(&view) {
                return view;
            }
        }
    }

    struct CannedHistory;

    impl HistoryCollaborator for CannedHistory {
        fn fetch_messages(
            &self,
            conversation: &ConversationKey,
        ) -> BoxFuture<'static, Result<Vec<IncomingMessage>, ApiError>> {
            let peer = conversation.peer().map(str::to_string);
            Box::pin(async move {
                Ok(peer
                    .map(|peer| vec![incoming(&peer, "alice", "earlier", at(0))])
                    .unwrap_or_default())
            })
        }
    }

    struct FailingHistory(fn() -> ApiError);

    impl HistoryCollaborator for FailingHistory {
        fn fetch_messages(
            &self,
            _conversation: &ConversationKey,
        ) -> BoxFuture<'static, Result<Vec<IncomingMessage>, ApiError>> {
            let err = (self.0)();
            Box::pin(async move { Err(err) })
        }
    }

    #[tokio::test]
    async fn send_goes_out_once_open() {
        let mut h = spawn(None);
        let first = next_view(&mut h.events).await;
        assert_eq!(first.state, ConnectionState::Connecting);

        h.transport.send(TransportEvent::new(1, LinkEvent::Opened)).unwrap();
        view_where(&mut h.events, |view| view.is_connected()).await;

        assert!(h.handle.send_message("hello"));
        let view = view_where(&mut h.events, |view| !view.visible.is_empty()).await;
        assert_eq!(view.visible[0].content, "hello");
        assert_eq!(view.visible[0].origin, Origin::Local);
    }

    #[tokio::test]
    async fn rejected_send_is_reported() {
        let mut h = spawn(None);
        next_view(&mut h.events).await;

        h.handle.send_message("too early");
        loop {
            match h.events.recv().await {
                Some(SessionEvent::SendRejected { content, .. }) => {
                    assert_eq!(content, "too early");
                    break;
                }
                Some(_) => continue,
                None => panic!("session loop ended"),
            }
        }
    }

    #[tokio::test]
    async fn selecting_a_peer_backfills_history() {
        let mut h = spawn(Some(Arc::new(CannedHistory)));
        next_view(&mut h.events).await;

        h.handle.select_conversation(Some("bob".to_string()));
        let view = view_where(&mut h.events, |view| !view.visible.is_empty()).await;
        assert_eq!(view.selected, ConversationKey::Peer("bob".to_string()));
        assert_eq!(view.visible[0].content, "earlier");
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_after_delay() {
        let mut h = spawn(None);
        next_view(&mut h.events).await;
        h.transport.send(TransportEvent::new(1, LinkEvent::Opened)).unwrap();
        h.transport
            .send(TransportEvent::new(
                1,
                LinkEvent::Closed {
                    code: 1006,
                    reason: String::new(),
                },
            ))
            .unwrap();

        view_where(&mut h.events, |view| view.state == ConnectionState::Reconnecting).await;
        let view = view_where(&mut h.events, |view| view.state == ConnectionState::Connecting).await;
        assert!(view.connection_error.is_some());
    }

    #[tokio::test]
    async fn dropping_the_handle_terminates_the_loop() {
        let Harness {
            handle,
            mut events,
            transport: _transport,
            task,
        } = spawn(None);
        drop(handle);

        let mut terminated = false;
        while let Some(event) = events.recv().await {
            if matches!(event, SessionEvent::Terminated) {
                terminated = true;
            }
        }
        assert!(terminated);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn logout_is_reported_before_termination() {
        let mut h = spawn(None);
        next_view(&mut h.events).await;

        assert!(h.handle.logout());
        let mut seen = Vec::new();
        while let Some(event) = h.events.recv().await {
            if event.invalidates_credential() {
                seen.push("credential");
            }
            if matches!(event, SessionEvent::Terminated) {
                seen.push("terminated");
            }
        }
        assert_eq!(seen, ["credential", "terminated"]);
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn unauthorized_history_expires_the_session() {
        let mut h = spawn(Some(Arc::new(FailingHistory(|| ApiError::Unauthorized))));
        next_view(&mut h.events).await;

        h.handle.select_conversation(Some("bob".to_string()));
        let view = view_where(&mut h.events, |view| view.auth_expired).await;
        assert_eq!(view.state, ConnectionState::Closed);
        assert!(SessionEvent::Updated(view).invalidates_credential());
    }

    #[tokio::test]
    async fn other_history_errors_keep_the_session() {
        let mut h = spawn(Some(Arc::new(FailingHistory(|| ApiError::Status {
            status: 500,
            message: "boom".to_string(),
        }))));
        next_view(&mut h.events).await;

        h.handle.select_conversation(Some("bob".to_string()));
        let view = view_where(&mut h.events, |view| view.selected.peer() == Some("bob")).await;
        assert!(!view.auth_expired);

        // The failure is only logged; the loop still answers commands.
        h.transport.send(TransportEvent::new(1, LinkEvent::Opened)).unwrap();
        let view = view_where(&mut h.events, |view| view.is_connected()).await;
        assert!(!view.auth_expired);
    }
}
