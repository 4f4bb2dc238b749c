use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::transport::{ABNORMAL_CLOSE, Connector, Epoch, LinkEvent, TransportEvent};

/// Close code used when the peer sent a close frame without a status.
const NO_STATUS_CLOSE: u16 = 1005;

enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

struct Link {
    epoch: Epoch,
    outbound: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
}

/// [`Connector`] backed by tokio-tungstenite. Each `open` spawns one task
/// that owns the socket; the task for the previous link is aborted first.
pub struct WsConnector {
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Option<Link>,
}

impl WsConnector {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { events, link: None }
    }

    fn detach(&mut self) {
        if let Some(link) = self.link.take() {
            log::debug!("Detaching link for epoch {}", link.epoch);
            link.task.abort();
        }
    }
}

impl Connector for WsConnector {
    fn open(&mut self, url: &Url, epoch: Epoch) {
        self.detach();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            url.to_string(),
            epoch,
            outbound_rx,
            self.events.clone(),
        ));
        self.link = Some(Link {
            epoch,
            outbound,
            task,
        });
    }

    fn send(&mut self, text: String) -> bool {
        match &self.link {
            Some(link) => link.outbound.send(Outgoing::Text(text)).is_ok(),
            None => false,
        }
    }

    fn close(&mut self, code: u16, reason: &str) {
        // The task exits by itself once the close frame is out.
        if let Some(link) = self.link.take() {
            let close = Outgoing::Close {
                code,
                reason: reason.to_string(),
            };
            if link.outbound.send(close).is_err() {
                link.task.abort();
            }
        }
    }
}

impl Drop for WsConnector {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Map a failed handshake to the event the transport should see.
fn handshake_failure(err: tungstenite::Error) -> LinkEvent {
    match &err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            LinkEvent::Rejected(format!("handshake refused with {}", response.status()))
        }
        _ => LinkEvent::Error(format!("connect failed: {err}")),
    }
}

async fn run_link(
    url: String,
    epoch: Epoch,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let emit = |event: LinkEvent| {
        if events.send(TransportEvent::new(epoch, event)).is_err() {
            log::debug!("Session loop gone; dropping link event");
        }
    };

    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            let failure = handshake_failure(err);
            let rejected = matches!(failure, LinkEvent::Rejected(_));
            emit(failure);
            if !rejected {
                emit(LinkEvent::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: "connect failed".to_string(),
                });
            }
            return;
        }
    };

    emit(LinkEvent::Opened);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    if let Err(err) = write.send(tungstenite::Message::Text(text.into())).await {
                        emit(LinkEvent::Error(format!("send failed: {err}")));
                        emit(LinkEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: err.to_string(),
                        });
                        return;
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(err) = write.send(tungstenite::Message::Close(Some(frame))).await {
                        log::debug!("Close frame not delivered: {err}");
                    }
                    emit(LinkEvent::Closed { code, reason });
                    return;
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    emit(LinkEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS_CLOSE, String::new()));
                    emit(LinkEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    emit(LinkEvent::Error(err.to_string()));
                    emit(LinkEvent::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: err.to_string(),
                    });
                    return;
                }
                None => {
                    emit(LinkEvent::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_a_plain_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let event = handshake_failure(tungstenite::Error::Io(io));
        assert!(matches!(event, LinkEvent::Error(_)));
    }

    #[tokio::test]
    async fn unreachable_server_reports_error_then_abnormal_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(tx);
        // Port 9 (discard) on localhost is closed in test environments.
        connector.open(&Url::parse("ws://127.0.0.1:9/ws").unwrap(), 7);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.epoch, 7);
        assert!(matches!(first.event, LinkEvent::Error(_)));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second.event,
            LinkEvent::Closed {
                code: ABNORMAL_CLOSE,
                reason: "connect failed".to_string()
            }
        );
    }

    #[test]
    fn send_without_link_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(tx);
        assert!(!connector.send("x".to_string()));
    }
}
