use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::core::{WireMessage, CLOSE_ABNORMAL};
use crate::mux::{
    ChannelKey, ConnectRequest, Connection, ConnectionId, Connector, InboundFrame, MuxError,
    Result, TransportEventKind,
};

/// Close code reported when the peer closed without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens one WebSocket per channel against `/ws/shell/{project}/{env}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base: Url,
}

impl WsConnector {
    /// `server_url` may use ws, wss, http or https.
    pub fn new(server_url: &str) -> Result<Self> {
        let mut base = Url::parse(server_url)
            .map_err(|e| MuxError::InvalidEndpoint(format!("{}: {}", server_url, e)))?;
        let scheme = match base.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(MuxError::InvalidEndpoint(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };
        base.set_scheme(scheme)
            .map_err(|_| MuxError::InvalidEndpoint(server_url.to_string()))?;
        Ok(Self { base })
    }

    pub fn endpoint(&self, key: &ChannelKey, token: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MuxError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(["ws", "shell", key.project.as_str(), key.env.as_str()]);
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }
}

impl Connector for WsConnector {
    fn open(&mut self, request: ConnectRequest) -> Box<dyn Connection> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let id = request.connection;

        match self.endpoint(&request.key, &request.credentials) {
            Ok(url) => {
                tokio::spawn(run_connection(url, request, outbound_rx));
            }
            Err(e) => {
                request.emit(TransportEventKind::Error(e.to_string()));
                request.emit(TransportEventKind::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: String::new(),
                });
            }
        }

        Box::new(WsConnection { id, outbound_tx })
    }
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct WsConnection {
    id: ConnectionId,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, message: &WireMessage) -> Result<()> {
        let json = message
            .to_json()
            .map_err(|e| MuxError::Transport(e.to_string()))?;
        self.outbound_tx
            .send(Outbound::Text(json))
            .map_err(|_| MuxError::Transport("connection is closed".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        let _ = self.outbound_tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

fn abnormal(request: &ConnectRequest, error: String) {
    request.emit(TransportEventKind::Error(error));
    request.emit(TransportEventKind::Closed {
        code: CLOSE_ABNORMAL,
        reason: String::new(),
    });
}

async fn run_connection(
    url: Url,
    request: ConnectRequest,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    tracing::debug!(
        "Connecting {} to {}{}",
        request.key,
        url.origin().ascii_serialization(),
        url.path()
    );

    let connect = connect_async(url.as_str());
    tokio::pin!(connect);
    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws_stream, _)) => break ws_stream,
                Err(e) => {
                    tracing::warn!("Failed to connect {}: {}", request.key, e);
                    abnormal(&request, e.to_string());
                    return;
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                // Nothing can be sent before the socket is open
                Some(Outbound::Text(_)) => continue,
                Some(Outbound::Close { code, reason }) => {
                    request.emit(TransportEventKind::Closed { code, reason });
                    return;
                }
                None => return,
            },
        }
    };

    request.emit(TransportEventKind::Opened);
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(json)) => {
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        abnormal(&request, e.to_string());
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Close frame for {} not sent: {}", request.key, e);
                    }
                    request.emit(TransportEventKind::Closed { code, reason });
                    return;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    request.emit(TransportEventKind::Frame(InboundFrame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    request.emit(TransportEventKind::Frame(InboundFrame::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    request.emit(TransportEventKind::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {
                    // Ping, pong and raw frames are handled by tungstenite
                }
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error on {}: {}", request.key, e);
                    abnormal(&request, e.to_string());
                    return;
                }
                None => {
                    request.emit(TransportEventKind::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    });
                    return;
                }
            },
        }
    }
}
