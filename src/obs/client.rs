//! WebSocket control-socket client
//!
//! One reader task routes RequestResponse frames to their waiting caller by
//! `requestId` and fans events out on a broadcast channel. One writer task
//! owns the sink so callers never contend on it.

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::protocol::{
    Event, Frame, Hello, Identified, Identify, InputList, InputSettings, RequestResponse,
    SceneList, StreamStateData, request_text,
};
use super::{Connector, ControlSession, OpenError, RequestError, SessionEvent};
use crate::config::ConnectionConfig;
use crate::constants::protocol::{RPC_VERSION, event, op, request};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiter = oneshot::Sender<Result<Option<Value>, RequestError>>;

/// Capacity of the per-session event channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Opens obs-websocket v5 sessions over `ws://host:port`
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn ControlSession>, OpenError> {
        let session = WebSocketSession::connect(config).await?;
        Ok(Arc::new(session))
    }
}

/// State shared between the session handle and its reader task
struct Shared {
    pending: Mutex<HashMap<String, Waiter>>,
    events: broadcast::Sender<SessionEvent>,
    open: AtomicBool,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                return;
            }
        };

        match frame.op {
            op::REQUEST_RESPONSE => match frame.payload::<RequestResponse>() {
                Ok(response) => self.complete(response),
                Err(e) => warn!(error = %e, "Dropping malformed RequestResponse"),
            },
            op::EVENT => match frame.payload::<Event>() {
                Ok(event) => self.publish(event),
                Err(e) => warn!(error = %e, "Dropping malformed Event"),
            },
            other => debug!(op = other, "Ignoring frame"),
        }
    }

    fn complete(&self, response: RequestResponse) {
        let Some(waiter) = lock(&self.pending).remove(&response.request_id) else {
            debug!(request_id = %response.request_id, "Response for unknown request");
            return;
        };
        let status = response.request_status;
        let result = if status.result {
            Ok(response.response_data)
        } else {
            debug!(
                request_type = %response.request_type,
                code = status.code,
                comment = ?status.comment,
                "Request rejected"
            );
            Err(RequestError::Rejected {
                code: status.code,
                comment: status.comment,
            })
        };
        // Caller may have gone away; nothing to do then
        let _ = waiter.send(result);
    }

    fn publish(&self, event: Event) {
        if event.event_type != event::STREAM_STATE_CHANGED {
            trace!(event_type = %event.event_type, "Ignoring event");
            return;
        }
        match serde_json::from_value::<StreamStateData>(event.event_data.unwrap_or(Value::Null)) {
            Ok(data) => {
                let _ = self.events.send(SessionEvent::StreamStateChanged {
                    active: data.output_active,
                    state: data.output_state,
                });
            }
            Err(e) => warn!(error = %e, "Malformed StreamStateChanged data"),
        }
    }

    fn shutdown(&self, code: Option<u16>, reason: String) {
        self.open.store(false, Ordering::SeqCst);
        let waiters: Vec<Waiter> = lock(&self.pending).drain().map(|(_, waiter)| waiter).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(RequestError::SessionClosed));
        }
        let _ = self.events.send(SessionEvent::Closed { code, reason });
    }
}

/// An identified obs-websocket session
pub struct WebSocketSession {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Message>,
    next_id: AtomicU64,
}

impl WebSocketSession {
    /// Open the socket, complete Hello/Identify/Identified, start the IO tasks
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, OpenError> {
        let address = config.address();
        if config.host.trim().is_empty() || url::Url::parse(&address).is_err() {
            return Err(OpenError::InvalidAddress(address));
        }

        let (mut ws, _response) = connect_async(address.as_str()).await.map_err(handshake_error)?;
        debug!(address = %address, "Socket open, waiting for Hello");

        let hello = next_frame(&mut ws).await?;
        if hello.op != op::HELLO {
            return Err(OpenError::Malformed(format!("expected Hello, got op {}", hello.op)));
        }
        let hello: Hello = hello.payload().map_err(|e| OpenError::Malformed(e.to_string()))?;
        if hello.rpc_version < RPC_VERSION {
            return Err(OpenError::ProtocolMismatch(format!(
                "server speaks rpcVersion {}, need {RPC_VERSION}",
                hello.rpc_version
            )));
        }

        let identify = Frame::new(op::IDENTIFY, &Identify::answering(&hello, &config.password))
            .and_then(|frame| frame.to_text())
            .map_err(|e| OpenError::Malformed(e.to_string()))?;
        ws.send(Message::Text(identify)).await.map_err(stream_error)?;

        let identified = next_frame(&mut ws).await?;
        if identified.op != op::IDENTIFIED {
            return Err(OpenError::Malformed(format!("expected Identified, got op {}", identified.op)));
        }
        let identified: Identified = identified.payload().map_err(|e| OpenError::Malformed(e.to_string()))?;
        info!(
            address = %address,
            server_version = %hello.obs_web_socket_version,
            rpc_version = identified.negotiated_rpc_version,
            "Identified with control socket"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            events,
            open: AtomicBool::new(true),
        });

        let (mut sink, stream) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "Writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
        });
        tokio::spawn(read_loop(stream, shared.clone()));

        Ok(Self {
            shared,
            outgoing,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send a request and wait for its `responseData`
    async fn request(&self, request_type: &str, data: Option<Value>) -> Result<Option<Value>, RequestError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let text = request_text(request_type, &request_id, data)
            .map_err(|e| RequestError::Malformed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(request_id.clone(), tx);
        // shutdown() clears `open` before draining, so a late insert is caught here
        if !self.is_open() || self.outgoing.send(Message::Text(text)).is_err() {
            lock(&self.shared.pending).remove(&request_id);
            return Err(RequestError::SessionClosed);
        }
        trace!(request_type = %request_type, request_id = %request_id, "Request sent");

        rx.await.map_err(|_| RequestError::SessionClosed)?
    }

    async fn request_as<T: DeserializeOwned>(&self, request_type: &str, data: Option<Value>) -> Result<T, RequestError> {
        let response = self.request(request_type, data).await?.unwrap_or(Value::Null);
        serde_json::from_value(response).map_err(|e| RequestError::Malformed(format!("{request_type}: {e}")))
    }
}

#[async_trait]
impl ControlSession for WebSocketSession {
    async fn list_scenes(&self) -> Result<Vec<String>, RequestError> {
        let list: SceneList = self.request_as(request::GET_SCENE_LIST, None).await?;
        Ok(list.scenes.into_iter().map(|scene| scene.scene_name).collect())
    }

    async fn set_current_scene(&self, scene: &str) -> Result<(), RequestError> {
        self.request(request::SET_CURRENT_PROGRAM_SCENE, Some(json!({ "sceneName": scene })))
            .await
            .map(|_| ())
    }

    async fn list_inputs(&self, kind: &str) -> Result<Vec<String>, RequestError> {
        let list: InputList = self
            .request_as(request::GET_INPUT_LIST, Some(json!({ "inputKind": kind })))
            .await?;
        Ok(list.inputs.into_iter().map(|input| input.input_name).collect())
    }

    async fn get_input_settings(&self, name: &str) -> Result<Map<String, Value>, RequestError> {
        let settings: InputSettings = self
            .request_as(request::GET_INPUT_SETTINGS, Some(json!({ "inputName": name })))
            .await?;
        Ok(settings.input_settings)
    }

    async fn set_input_settings(
        &self,
        name: &str,
        patch: Map<String, Value>,
        overlay: bool,
    ) -> Result<(), RequestError> {
        let data = json!({
            "inputName": name,
            "inputSettings": patch,
            "overlay": overlay,
        });
        self.request(request::SET_INPUT_SETTINGS, Some(data)).await.map(|_| ())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None));
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, shared: Arc<Shared>) {
    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => shared.dispatch(&text),
            Some(Ok(Message::Close(frame))) => break close_details(frame),
            Some(Ok(_)) => {}
            Some(Err(e)) => break (None, e.to_string()),
            None => break (None, "connection dropped".to_string()),
        }
    };
    info!(code = ?code, reason = %reason, "Control socket closed");
    shared.shutdown(code, reason);
}

/// Read frames until a text frame arrives (handshake phase only)
async fn next_frame(ws: &mut WsStream) -> Result<Frame, OpenError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|e| OpenError::Malformed(e.to_string()));
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = close_details(frame);
                return Err(OpenError::Closed { code, reason });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(stream_error(e)),
            None => {
                return Err(OpenError::Closed {
                    code: None,
                    reason: "connection dropped".to_string(),
                });
            }
        }
    }
}

fn close_details(frame: Option<CloseFrame<'_>>) -> (Option<u16>, String) {
    match frame {
        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
        None => (None, "closed without a close frame".to_string()),
    }
}

/// Errors from the TCP connect + HTTP upgrade
fn handshake_error(err: WsError) -> OpenError {
    match err {
        WsError::Io(e) => OpenError::Unreachable(e),
        WsError::Url(e) => OpenError::InvalidAddress(e.to_string()),
        WsError::Http(response) => OpenError::ProtocolMismatch(format!("HTTP {}", response.status())),
        WsError::HttpFormat(e) => OpenError::ProtocolMismatch(e.to_string()),
        WsError::Protocol(e) => OpenError::ProtocolMismatch(e.to_string()),
        other => OpenError::Transport(other.to_string()),
    }
}

/// Errors on an upgraded socket during Hello/Identify
fn stream_error(err: WsError) -> OpenError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Io(_)
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => OpenError::Closed {
            code: None,
            reason: err.to_string(),
        },
        other => OpenError::Transport(other.to_string()),
    }
}
