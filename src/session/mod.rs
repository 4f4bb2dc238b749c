pub mod facade;
pub mod presence;
pub mod router;
pub mod store;
pub mod typing;

pub use facade::{SessionFacade, SessionOptions};
pub use presence::PresenceTracker;
pub use router::ConversationRouter;
pub use store::{Ingest, MessageStore, SentMessageWindow, derive_partners};
pub use typing::{TypingCoordinator, TypingSignal};
