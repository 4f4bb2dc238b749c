use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use rust_ws_chat::api::{Credentials, HttpApi};
use rust_ws_chat::common::{ClientId, SessionEvent};
use rust_ws_chat::config::{self, AppConfig};
use rust_ws_chat::network::{ConnectionState, SessionClient, SessionHandle};
use rust_ws_chat::session::SessionOptions;
use rust_ws_chat::ui::ChatApp;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long to wait for the session loop to close the socket on exit.
const EXIT_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "rust_ws_chat",
    version,
    about = "Websocket chat client with group and direct conversations"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Headless: print the group chat to stdout until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), eframe::Error> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env();

    let options = match app_config.session_options() {
        Ok(options) => options,
        Err(err) => {
            log::error!("Invalid configuration: {err}");
            return Ok(());
        }
    };
    let api = match app_config.api_base() {
        Ok(base) => HttpApi::new(base),
        Err(err) => {
            log::error!("Invalid configuration: {err}");
            return Ok(());
        }
    };
    let Some(credentials) = resolve_credentials(&app_config, &api, &cli.config).await else {
        return Ok(());
    };
    let api = api.with_token(credentials.token.clone());

    if cli.mode == Some(Mode::Watch) {
        run_watch(credentials, options, api, &cli.config).await;
        return Ok(());
    }

    run_full_client(credentials, options, api, cli.config).await
}

/// Use the stored token if there is one, otherwise log in with the
/// configured password and remember the new token.
async fn resolve_credentials(
    app_config: &AppConfig,
    api: &HttpApi,
    config_path: &str,
) -> Option<Credentials> {
    let Some(username) = app_config.username.clone() else {
        log::error!("No username configured; set CHAT_USERNAME or `username` in the config file");
        return None;
    };

    if let Some(token) = app_config.token.clone() {
        return Some(Credentials {
            user: username,
            token,
        });
    }

    let Some(password) = app_config.password.as_deref() else {
        log::error!("No token for {username}; set CHAT_PASSWORD to log in");
        return None;
    };

    match api.login(&username, password).await {
        Ok(credentials) => {
            config::persist_credentials(config_path, &credentials.user, &credentials.token);
            Some(credentials)
        }
        Err(err) => {
            log::error!("Login failed for {username}: {err}");
            None
        }
    }
}

fn spawn_session(
    credentials: Credentials,
    options: SessionOptions,
    api: HttpApi,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
    // UI -> Session
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Session -> UI
    let (event_tx, event_rx) = mpsc::channel(100);

    let client = SessionClient::websocket(&credentials, options, event_tx, cmd_rx)
        .with_history(Arc::new(api));
    let task = tokio::spawn(client.run());

    (SessionHandle::new(cmd_tx), event_rx, task)
}

/// Remembers whether the saved token was already dropped this run.
struct CredentialGuard {
    config_path: String,
    forgotten: bool,
}

impl CredentialGuard {
    fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            forgotten: false,
        }
    }

    fn observe(&mut self, event: &SessionEvent) {
        if !self.forgotten && event.invalidates_credential() {
            config::forget_token(&self.config_path);
            self.forgotten = true;
        }
    }
}

async fn run_watch(
    credentials: Credentials,
    options: SessionOptions,
    api: HttpApi,
    config_path: &str,
) {
    let (session, mut events, task) = spawn_session(credentials, options, api);
    let mut guard = CredentialGuard::new(config_path);
    let mut seen: HashSet<ClientId> = HashSet::new();
    let mut last_state = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                if let Some(event) = &event {
                    guard.observe(event);
                }
                match event {
                    Some(SessionEvent::Updated(view)) => {
                        if last_state != Some(view.state) {
                            log::info!("Connection: {}", view.state.label());
                            last_state = Some(view.state);
                        }
                        if view.auth_expired {
                            log::error!("Credential rejected; log in again");
                            session.disconnect();
                        }
                        for message in &view.visible {
                            if seen.insert(message.id.clone()) {
                                println!(
                                    "[{}] {}: {}",
                                    message.sent_at.format("%H:%M:%S"),
                                    message.sender,
                                    message.content
                                );
                            }
                        }
                    }
                    Some(SessionEvent::SendRejected { reason, .. }) => {
                        log::warn!("Send rejected: {reason}");
                    }
                    Some(SessionEvent::LoggedOut) => {
                        log::info!("Logged out");
                    }
                    Some(SessionEvent::Terminated) | None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, closing session");
                session.disconnect();
            }
        }
    }

    if last_state == Some(ConnectionState::Open) {
        log::info!("Session closed");
    }
    let _ = tokio::time::timeout(EXIT_GRACE, task).await;
}

async fn run_full_client(
    credentials: Credentials,
    options: SessionOptions,
    api: HttpApi,
    config_path: String,
) -> Result<(), eframe::Error> {
    let user = credentials.user.clone();
    let (session, mut session_rx, task) = spawn_session(credentials, options, api);

    // Session -> guard -> UI
    let (event_tx, event_rx) = mpsc::channel(100);
    tokio::spawn(async move {
        let mut guard = CredentialGuard::new(config_path);
        while let Some(event) = session_rx.recv().await {
            guard.observe(&event);
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let options = eframe::NativeOptions::default();
    let mut event_rx = Some(event_rx);

    let result = eframe::run_native(
        "Rust WS Chat",
        options,
        Box::new(move |cc| {
            let event_receiver = event_rx
                .take()
                .expect("ChatApp should only be initialized once");

            log::info!("Client started for {user}");

            Ok(Box::new(ChatApp::new(cc, session.clone(), event_receiver)))
        }),
    );

    // All command senders are gone once the window closed; let the loop
    // send its close frame before the runtime shuts down.
    let _ = tokio::time::timeout(EXIT_GRACE, task).await;
    result
}
