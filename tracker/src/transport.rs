use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use reqwest::Url;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{models::SessionKey, session::ConnectionId};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("push url must use ws:// or wss://, got {0}://")]
    Scheme(String),
    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// A transport event tagged with the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEnvelope {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// Opens push connections. Aborting the returned task closes the connection.
pub trait Transport: Send + Sync {
    fn open(
        &self,
        connection: ConnectionId,
        key: &SessionKey,
        events: mpsc::UnboundedSender<TransportEnvelope>,
    ) -> JoinHandle<()>;
}

#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: Url,
}

impl WsTransport {
    pub fn new(base_url: Url) -> Result<Self, TransportError> {
        match base_url.scheme() {
            "ws" | "wss" => Ok(Self { base_url }),
            other => Err(TransportError::Scheme(other.to_string())),
        }
    }

    pub fn url_for(&self, key: &SessionKey) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("tripid", &key.trip_id)
            .append_pair("shareID", &key.share_id);
        url
    }
}

impl Transport for WsTransport {
    fn open(
        &self,
        connection: ConnectionId,
        key: &SessionKey,
        events: mpsc::UnboundedSender<TransportEnvelope>,
    ) -> JoinHandle<()> {
        let url = self.url_for(key);
        tokio::spawn(async move {
            let send = |event| {
                // receiver gone means the tracker stopped
                let _ = events.send(TransportEnvelope { connection, event });
            };

            let mut stream = match connect_async(url.as_str()).await {
                Ok((stream, _response)) => stream,
                Err(err) => {
                    send(TransportEvent::Error(TransportError::from(err).to_string()));
                    send(TransportEvent::Closed);
                    return;
                }
            };
            send(TransportEvent::Opened);

            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => send(TransportEvent::Message(text)),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(%connection, ?frame, "server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        send(TransportEvent::Error(TransportError::from(err).to_string()));
                        break;
                    }
                }
            }
            send(TransportEvent::Closed);
        })
    }
}

/// A connection opened through [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedConnection {
    pub id: ConnectionId,
    pub key: SessionKey,
    events: mpsc::UnboundedSender<TransportEnvelope>,
}

impl ScriptedConnection {
    /// Delivers `event` as if the server produced it. Returns `false` once the tracker stopped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .send(TransportEnvelope {
                connection: self.id,
                event,
            })
            .is_ok()
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }
}

/// In-process transport: records every `open` and lets the caller push events.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    opened: Arc<Mutex<Vec<ScriptedConnection>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> Vec<ScriptedConnection> {
        self.opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<ScriptedConnection> {
        self.connections().pop()
    }
}

impl Transport for ScriptedTransport {
    fn open(
        &self,
        connection: ConnectionId,
        key: &SessionKey,
        events: mpsc::UnboundedSender<TransportEnvelope>,
    ) -> JoinHandle<()> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(ScriptedConnection {
                id: connection,
                key: key.clone(),
                events,
            });
        }
        tokio::spawn(std::future::pending::<()>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SessionConfig, session::SessionManager};

    #[test]
    fn url_carries_session_key() {
        let transport =
            WsTransport::new(Url::parse("wss://push.example.com/TripShare").unwrap()).unwrap();
        let url = transport.url_for(&SessionKey::new("42", "a b"));
        assert_eq!(
            url.as_str(),
            "wss://push.example.com/TripShare?tripid=42&shareID=a+b"
        );
    }

    #[test]
    fn http_scheme_is_rejected() {
        let err = WsTransport::new(Url::parse("https://push.example.com").unwrap()).unwrap_err();
        assert!(matches!(err, TransportError::Scheme(scheme) if scheme == "https"));
    }

    #[tokio::test]
    async fn scripted_transport_forwards_events() {
        let transport = ScriptedTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_, first) =
            SessionManager::new(SessionKey::default(), SessionConfig::default()).connect();
        let task = transport.open(first, &SessionKey::default(), tx);

        let connection = transport.latest().unwrap();
        assert_eq!(connection.key, SessionKey::default());
        assert!(connection.emit(TransportEvent::Opened));
        assert_eq!(
            rx.recv().await,
            Some(TransportEnvelope {
                connection: first,
                event: TransportEvent::Opened
            })
        );
        task.abort();
    }
}
