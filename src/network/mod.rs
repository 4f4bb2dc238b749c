pub mod client;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use client::{SessionClient, SessionHandle};
pub use transport::{
    ConnectionState, Connector, Epoch, LinkEvent, SessionTransport, TransportEvent,
    TransportSignal,
};
pub use websocket::WsConnector;
