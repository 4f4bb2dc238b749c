//! Real-time chat session engine: websocket transport with epoch-guarded
//! reconnects, optimistic-echo deduplication, presence tracking and
//! group/direct conversation routing.

pub mod api;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use common::{SessionCommand, SessionEvent, SessionView};
pub use error::{ApiError, ConfigError, ProtocolError, SessionError};
pub use network::{SessionClient, SessionHandle};
pub use session::SessionFacade;
