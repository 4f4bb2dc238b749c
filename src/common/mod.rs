pub mod commands;
pub mod events;
pub mod types;

pub use commands::SessionCommand;
pub use events::{Contact, SessionEvent, SessionView};
pub use types::{
    ClientId, ConversationKey, GROUP_RECIPIENT, IncomingMessage, Message, Origin, Recipient,
    UserId,
};
